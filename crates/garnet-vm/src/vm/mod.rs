//! The execution engine.
//!
//! ## Structure
//!
//! - `binder` - pure argument binding against a parameter spec
//! - `regions` - begin/rescue/else/ensure state machine and unwinding
//! - `dispatch` - method lookup, call setup and block invocation
//! - `interpreter` - the per-fiber run loop
//!
//! Ruby-level failures and non-local exits travel as [`Unwind`] values in the
//! `Err` side of [`VmResult`], so `?` propagates them through native code the
//! same way the run loop propagates them through frames.

pub mod binder;
pub mod dispatch;
pub mod interpreter;
pub mod regions;

use crate::runtime::function::FrameId;
use crate::runtime::value::Value;

pub use binder::{Arg, ArgumentHeap, BindError, BindMode, Binding};

/// An abrupt completion travelling up the frame stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Unwind {
    /// A raised exception
    Raise(Value),
    /// `return` from a block, bound for its home method frame
    Return {
        /// Frame that returns
        target: FrameId,
        /// Returned value
        value: Value,
    },
    /// `break` from a block, bound for the frame that created the block
    Break {
        /// Frame whose pending call evaluates to `value`
        target: FrameId,
        /// Break value
        value: Value,
    },
    /// `throw`, bound for the innermost `catch` with a matching tag
    Throw {
        /// Tag
        tag: Value,
        /// Value `catch` returns
        value: Value,
    },
}

/// Result of engine operations that may unwind.
pub type VmResult<T> = Result<T, Unwind>;
