//! Ruby runtime types and the execution context.

pub mod class;
pub mod context;
pub mod environment;
pub mod fiber;
pub mod function;
pub mod globals;
pub mod object;
pub mod params;
pub mod symbol;
pub mod value;

pub use class::{ClassKind, ClassTable};
pub use context::{ExceptionReport, ExecutionContext, ExitHandler, ExitHandlers};
pub use fiber::{FiberId, FiberState};
pub use function::{Arity, CallFrame, MethodBody, MethodEntry, NativeArgs, NativeFn};
pub use params::{Param, ParamKind, ParamSpec};
pub use symbol::Symbol;
pub use value::{ClassId, ObjRef, Value};
