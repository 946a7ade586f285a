// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shorthand for engine values.
//!
//! These expand to paths under `::garnet_vm`, so they work in any crate that
//! depends on the engine, including the engine itself.

/// Intern a symbol.
///
/// # Example
///
/// ```
/// use garnet_macros::sym;
///
/// let a = sym!(name);
/// let b = sym!("name");
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "name");
/// ```
#[macro_export]
macro_rules! sym {
    ($name:ident) => {
        ::garnet_vm::runtime::symbol::Symbol::intern(stringify!($name))
    };
    ($name:expr) => {
        ::garnet_vm::runtime::symbol::Symbol::intern($name)
    };
}

/// Build a `ParamSpec` from Ruby-like parameter notation.
///
/// Slots are assigned left to right; `...` takes three. Optional parameters
/// record their own slot as the default-expression index, which is enough
/// for exercising the binder directly.
///
/// | Notation | Parameter          |
/// |----------|--------------------|
/// | `a`      | required           |
/// | `?a`     | optional           |
/// | `*a`     | rest               |
/// | `a:`     | required keyword   |
/// | `?a:`    | optional keyword   |
/// | `**a`    | keyword rest       |
/// | `&a`     | block              |
/// | `...`    | forward everything |
///
/// Evaluates to `Result<ParamSpec, ParamError>`.
///
/// # Example
///
/// ```
/// use garnet_macros::params;
///
/// let spec = params![a, ?b, *rest, c, key:, ?opt:, **kw, &blk].unwrap();
/// assert_eq!(spec.required_count(), 2);
/// assert_eq!(spec.optional_count(), 1);
/// assert!(spec.has_rest());
/// assert!(spec.accepts_keywords());
///
/// // out of order
/// assert!(params![k:, a].is_err());
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::garnet_vm::runtime::params::ParamSpec::new(::std::vec::Vec::new())
    };
    ($($tt:tt)+) => {{
        let mut params = ::std::vec::Vec::new();
        let mut slot: u32 = 0;
        $crate::__garnet_params!(params, slot; $($tt)+);
        let _ = slot;
        ::garnet_vm::runtime::params::ParamSpec::new(params)
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __garnet_params {
    ($p:ident, $s:ident;) => {};
    ($p:ident, $s:ident; ... $(, $($rest:tt)*)?) => {
        $p.push($crate::__garnet_param!("...", [Forward, $s]));
        $s += 3;
        $crate::__garnet_params!($p, $s; $($($rest)*)?);
    };
    ($p:ident, $s:ident; * * $name:ident $(, $($rest:tt)*)?) => {
        $p.push($crate::__garnet_param!(stringify!($name), [KeywordRest, $s]));
        $s += 1;
        $crate::__garnet_params!($p, $s; $($($rest)*)?);
    };
    ($p:ident, $s:ident; * $name:ident $(, $($rest:tt)*)?) => {
        $p.push($crate::__garnet_param!(stringify!($name), [Rest, $s]));
        $s += 1;
        $crate::__garnet_params!($p, $s; $($($rest)*)?);
    };
    ($p:ident, $s:ident; & $name:ident $(, $($rest:tt)*)?) => {
        $p.push($crate::__garnet_param!(stringify!($name), [Block, $s]));
        $s += 1;
        $crate::__garnet_params!($p, $s; $($($rest)*)?);
    };
    ($p:ident, $s:ident; ? $name:ident : $(, $($rest:tt)*)?) => {
        $p.push($crate::__garnet_param!(stringify!($name), [OptionalKeyword($s as usize), $s]));
        $s += 1;
        $crate::__garnet_params!($p, $s; $($($rest)*)?);
    };
    ($p:ident, $s:ident; ? $name:ident $(, $($rest:tt)*)?) => {
        $p.push($crate::__garnet_param!(stringify!($name), [Optional($s as usize), $s]));
        $s += 1;
        $crate::__garnet_params!($p, $s; $($($rest)*)?);
    };
    ($p:ident, $s:ident; $name:ident : $(, $($rest:tt)*)?) => {
        $p.push($crate::__garnet_param!(stringify!($name), [RequiredKeyword, $s]));
        $s += 1;
        $crate::__garnet_params!($p, $s; $($($rest)*)?);
    };
    ($p:ident, $s:ident; $name:ident $(, $($rest:tt)*)?) => {
        $p.push($crate::__garnet_param!(stringify!($name), [Required, $s]));
        $s += 1;
        $crate::__garnet_params!($p, $s; $($($rest)*)?);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __garnet_param {
    ($name:expr, [$kind:ident, $slot:expr]) => {
        ::garnet_vm::runtime::params::Param::new(
            $name,
            ::garnet_vm::runtime::params::ParamKind::$kind,
            $slot,
        )
    };
    ($name:expr, [$kind:ident ($default:expr), $slot:expr]) => {
        ::garnet_vm::runtime::params::Param::new(
            $name,
            ::garnet_vm::runtime::params::ParamKind::$kind($default),
            $slot,
        )
    };
}

/// Build a static table of native method registrations.
///
/// Each entry is `"ruby_name" => function, arity;`.
///
/// # Example
///
/// ```
/// use garnet_macros::native_methods;
/// use garnet_vm::runtime::function::{Arity, NativeArgs, NativeMethod};
/// use garnet_vm::runtime::{ExecutionContext, Value};
/// use garnet_vm::vm::VmResult;
///
/// fn answer(_: &mut ExecutionContext, _: Value, _: NativeArgs) -> VmResult<Value> {
///     Ok(Value::Integer(42))
/// }
///
/// const METHODS: &[NativeMethod] = native_methods! {
///     "answer" => answer, Arity::exact(0);
/// };
/// assert_eq!(METHODS[0].name, "answer");
/// ```
#[macro_export]
macro_rules! native_methods {
    ($($name:literal => $func:path, $arity:expr);* $(;)?) => {
        &[$(
            ::garnet_vm::runtime::function::NativeMethod {
                name: $name,
                arity: $arity,
                func: $func,
            }
        ),*]
    };
}
