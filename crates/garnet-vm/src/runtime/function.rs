//! Methods and call frames.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use super::context::ExecutionContext;
use super::environment::EnvRef;
use super::object::HashKey;
use super::params::ForwardSlots;
use super::symbol::Symbol;
use super::value::{ClassId, Value};
use crate::compiler::Iseq;
use crate::vm::VmResult;
use crate::vm::regions::ActiveRegion;

/// Keyword arguments after binding, in encounter order.
pub type Keywords = IndexMap<HashKey, (Value, Value), FxBuildHasher>;

/// A native (Rust) method.
pub type NativeFn = fn(&mut ExecutionContext, Value, NativeArgs) -> VmResult<Value>;

/// Accepted argument counts of a native method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    /// Required positionals
    pub required: usize,
    /// Optional positionals
    pub optional: usize,
    /// Accepts any number of extra positionals
    pub rest: bool,
    /// Receives keywords separately instead of as a trailing Hash
    pub keywords: bool,
}

impl Arity {
    /// Exactly `n` positionals.
    pub const fn exact(n: usize) -> Self {
        Self {
            required: n,
            optional: 0,
            rest: false,
            keywords: false,
        }
    }

    /// Between `min` and `max` positionals.
    pub const fn range(min: usize, max: usize) -> Self {
        Self {
            required: min,
            optional: max - min,
            rest: false,
            keywords: false,
        }
    }

    /// At least `min` positionals.
    pub const fn at_least(min: usize) -> Self {
        Self {
            required: min,
            optional: 0,
            rest: true,
            keywords: false,
        }
    }

    /// Anything, like a C method of arity -1.
    pub const fn any() -> Self {
        Self::at_least(0)
    }

    /// Keeps keyword arguments apart from positionals.
    pub const fn with_keywords(mut self) -> Self {
        self.keywords = true;
        self
    }
}

/// Arguments handed to a native method after binding.
#[derive(Debug, Clone, Default)]
pub struct NativeArgs {
    /// Positional arguments
    pub positional: Vec<Value>,
    /// Keyword arguments (only for natives declared `with_keywords`)
    pub keywords: Keywords,
    /// The block, if one was passed
    pub block: Option<Value>,
}

impl NativeArgs {
    /// Positional arguments only.
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            ..Self::default()
        }
    }

    /// The `i`th positional, or nil.
    pub fn arg(&self, i: usize) -> Value {
        self.positional.get(i).copied().unwrap_or(Value::Nil)
    }

    /// The `i`th positional, if given.
    pub fn get(&self, i: usize) -> Option<Value> {
        self.positional.get(i).copied()
    }

    /// Number of positionals.
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// True if no positionals were passed.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    /// A symbol-keyed keyword argument.
    pub fn keyword(&self, name: &str) -> Option<Value> {
        self.keywords
            .get(&HashKey::Symbol(Symbol::intern(name)))
            .map(|(_, v)| *v)
    }
}

/// A native method registration.
#[derive(Clone, Copy)]
pub struct NativeMethod {
    /// Method name
    pub name: &'static str,
    /// Accepted arguments
    pub arity: Arity,
    /// Implementation
    pub func: NativeFn,
}

impl fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeMethod({})", self.name)
    }
}

/// Method body.
#[derive(Debug, Clone)]
pub enum MethodBody {
    /// Interpreted
    Iseq(Arc<Iseq>),
    /// Host-implemented
    Native(NativeMethod),
}

/// An entry in a class's method table.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    /// Name the method was defined with; `super` inside an alias follows it
    pub original_name: Symbol,
    /// Class the method was defined in
    pub owner: ClassId,
    /// Lexical class of the `def`, used for constants and nested `def`s
    pub cref: ClassId,
    /// Body
    pub body: MethodBody,
}

impl MethodEntry {
    /// A native method owned by `owner`.
    pub fn native(owner: ClassId, method: NativeMethod) -> Self {
        Self {
            original_name: Symbol::intern(method.name),
            owner,
            cref: owner,
            body: MethodBody::Native(method),
        }
    }
}

/// Identity of a frame, unique for the life of the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

/// The method a frame (or the block it created) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodContext {
    /// Name used for `super` lookup
    pub name: Symbol,
    /// Class where lookup for `super` resumes
    pub owner: ClassId,
}

/// Where the `...` pieces of an enclosing method live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardedArgs {
    /// Env holding the forward slots
    pub env: EnvRef,
    /// Slot layout
    pub slots: ForwardSlots,
}

/// What kind of body a frame runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Top-level script
    Top,
    /// Method body
    Method,
    /// Block body
    Block {
        /// Frame that created the block
        creator: FrameId,
        /// Method frame `return` leaves
        home: Option<FrameId>,
        /// Lambda semantics
        lambda: bool,
    },
    /// Class or module body
    Class,
    /// Default-value expression running in its method's env
    Fragment,
}

/// An activation record.
#[derive(Debug)]
pub struct CallFrame {
    /// Unique id
    pub id: FrameId,
    /// Body kind
    pub kind: FrameKind,
    /// Instructions being run
    pub iseq: Arc<Iseq>,
    /// Next instruction
    pub pc: usize,
    /// Operand stack height at entry
    pub stack_base: usize,
    /// Locals
    pub env: EnvRef,
    /// Whether popping this frame may free `env`
    pub owns_env: bool,
    /// `self`
    pub self_value: Value,
    /// Lexical class for `def` and constants
    pub cref: ClassId,
    /// Method this frame belongs to
    pub method: Option<MethodContext>,
    /// Block `yield` invokes
    pub block: Option<Value>,
    /// `...` pieces for nested forwarding
    pub forwarded: Option<ForwardedArgs>,
    /// Active begin/rescue/ensure regions, innermost last
    pub regions: Vec<ActiveRegion>,
}

impl CallFrame {
    /// Source line of the instruction last fetched.
    pub fn current_line(&self) -> u32 {
        let pc = self.pc.saturating_sub(1);
        self.iseq
            .lines
            .get(pc)
            .copied()
            .unwrap_or(self.iseq.first_line)
    }

    /// Label used in backtraces.
    pub fn label(&self) -> String {
        let method = self.method.map(|m| m.name.to_string());
        match self.kind {
            FrameKind::Top => "<main>".to_string(),
            FrameKind::Method | FrameKind::Fragment => {
                method.unwrap_or_else(|| self.iseq.name.clone())
            }
            FrameKind::Block { .. } => {
                format!("block in {}", method.as_deref().unwrap_or("<main>"))
            }
            FrameKind::Class => self.iseq.name.clone(),
        }
    }

    /// Backtrace line for this frame.
    pub fn location(&self) -> String {
        format!("{}:{}:in '{}'", self.iseq.path, self.current_line(), self.label())
    }
}
