// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Testing helper macros.

/// Assert that an expression matches a pattern.
///
/// # Example
///
/// ```
/// use garnet_macros::assert_matches;
///
/// #[derive(Debug)]
/// enum Outcome { Done(i32), Failed(String) }
///
/// let outcome = Outcome::Done(42);
/// assert_matches!(outcome, Outcome::Done(n) if n > 0);
/// ```
#[macro_export]
macro_rules! assert_matches {
    ($expr:expr, $pat:pat) => {
        match $expr {
            $pat => {}
            ref e => panic!(
                "assertion failed: `{}` does not match pattern `{}`\n  value: {:?}",
                stringify!($expr),
                stringify!($pat),
                e
            ),
        }
    };
    ($expr:expr, $pat:pat if $guard:expr) => {
        match $expr {
            $pat if $guard => {}
            ref e => panic!(
                "assertion failed: `{}` does not match pattern `{} if {}`\n  value: {:?}",
                stringify!($expr),
                stringify!($pat),
                stringify!($guard),
                e
            ),
        }
    };
}

/// Assert that evaluation failed with a Ruby exception of the named class,
/// optionally checking its message. Evaluates to the exception's class name
/// and message.
///
/// Two forms:
///
/// - `assert_raises!(result, "Class" [, "message"])` for a
///   `garnet_vm::Result`, as returned by `Engine::evaluate`.
/// - `assert_raises!(ctx => result, "Class" [, "message"])` for a
///   `VmResult` obtained directly from an `ExecutionContext`.
///
/// # Example
///
/// ```
/// use garnet_macros::assert_raises;
/// use garnet_vm::runtime::ExecutionContext;
///
/// let mut ctx = ExecutionContext::default();
/// let nil = garnet_vm::runtime::Value::Nil;
/// let result = ctx.funcall(nil, "no_such_method", &[]);
/// assert_raises!(ctx => result, "NoMethodError", "undefined method 'no_such_method' for nil");
/// ```
#[macro_export]
macro_rules! assert_raises {
    ($ctx:expr => $result:expr, $class:expr) => {{
        match $result {
            Err(::garnet_vm::vm::Unwind::Raise(exception)) => {
                let report = $ctx.exception_report(exception);
                assert_eq!(
                    report.class, $class,
                    "unexpected exception class (message: {:?})",
                    report.message
                );
                (report.class, report.message)
            }
            other => panic!(
                "assertion failed: expected {} from `{}`, got {:?}",
                $class,
                stringify!($result),
                other
            ),
        }
    }};
    ($ctx:expr => $result:expr, $class:expr, $message:expr) => {{
        let (class, message) = $crate::assert_raises!($ctx => $result, $class);
        assert_eq!(message, $message);
        (class, message)
    }};
    ($result:expr, $class:expr) => {{
        match $result {
            Err(::garnet_vm::Error::Unhandled { class, message, .. }) => {
                assert_eq!(class, $class, "unexpected exception class (message: {:?})", message);
                (class, message)
            }
            other => panic!(
                "assertion failed: expected {} from `{}`, got {:?}",
                $class,
                stringify!($result),
                other
            ),
        }
    }};
    ($result:expr, $class:expr, $message:expr) => {{
        let (class, message) = $crate::assert_raises!($result, $class);
        assert_eq!(message, $message);
        (class, message)
    }};
}
