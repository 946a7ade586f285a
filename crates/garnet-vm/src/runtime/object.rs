//! Heap objects.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use super::environment::EnvRef;
use super::fiber::FiberId;
use super::function::{ForwardedArgs, FrameId, MethodContext};
use super::symbol::Symbol;
use super::value::{ClassId, ObjRef, Value};
use crate::compiler::Iseq;
use crate::gc::Arena;

/// Instance variable table, ordered by first assignment.
pub type IvarTable = IndexMap<Symbol, Value, FxBuildHasher>;

/// A heap-allocated Ruby object.
#[derive(Debug, Clone)]
pub struct RObject {
    /// The object's class
    pub class: ClassId,
    /// Instance variables
    pub ivars: IvarTable,
    /// Set by `freeze`
    pub frozen: bool,
    /// Builtin payload
    pub kind: ObjectKind,
}

/// Builtin payload of a heap object.
#[derive(Debug, Clone)]
pub enum ObjectKind {
    /// An object with only instance variables
    Plain,
    /// String contents
    String(String),
    /// Array elements
    Array(Vec<Value>),
    /// Hash entries
    Hash(RHash),
    /// Exception state
    Exception(ExceptionData),
    /// A block or lambda
    Proc(ProcData),
    /// Handle onto a fiber record
    Fiber(FiberId),
    /// The `Thread.current` proxy
    Thread,
}

/// Key under which a hash entry is stored.
///
/// Strings hash by content, every other heap object by identity, matching
/// `eql?` for the builtin types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    /// nil
    Nil,
    /// true / false
    Bool(bool),
    /// Integer
    Integer(i64),
    /// Float, by bit pattern
    Float(u64),
    /// Symbol
    Symbol(Symbol),
    /// Class or module
    Class(ClassId),
    /// String contents
    String(String),
    /// Any other object, by identity
    Object(ObjRef),
}

impl HashKey {
    /// Returns the symbol if this key is one.
    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            HashKey::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    /// Best-effort `inspect` of the key, used in error messages.
    pub fn inspect(&self) -> String {
        match self {
            HashKey::Nil => "nil".to_string(),
            HashKey::Bool(b) => b.to_string(),
            HashKey::Integer(n) => n.to_string(),
            HashKey::Float(bits) => format!("{:?}", f64::from_bits(*bits)),
            HashKey::Symbol(s) => s.inspect(),
            HashKey::Class(_) => "#<Class>".to_string(),
            HashKey::String(s) => format!("{s:?}"),
            HashKey::Object(_) => "#<Object>".to_string(),
        }
    }
}

/// Insertion-ordered hash table.
#[derive(Debug, Clone, Default)]
pub struct RHash {
    entries: IndexMap<HashKey, (Value, Value), FxBuildHasher>,
}

impl RHash {
    /// Creates an empty hash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a key.
    pub fn get(&self, key: &HashKey) -> Option<Value> {
        self.entries.get(key).map(|(_, v)| *v)
    }

    /// Inserts or overwrites; an existing key keeps its position.
    pub fn insert(&mut self, key: HashKey, key_value: Value, value: Value) {
        self.entries.insert(key, (key_value, value));
    }

    /// Removes a key, preserving the order of the rest.
    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        self.entries.shift_remove(key).map(|(_, v)| v)
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &HashKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(key, value)` pairs in insertion order.
    pub fn pairs(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries.values().copied()
    }

    /// Iterates entries with their lookup keys.
    pub fn entries(&self) -> impl Iterator<Item = (&HashKey, Value, Value)> + '_ {
        self.entries.iter().map(|(k, (kv, v))| (k, *kv, *v))
    }
}

/// Extra data attached to particular exceptions.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ExceptionDetail {
    /// Nothing extra
    #[default]
    None,
    /// Every keyword that was missing at a call, in declaration order
    MissingKeywords(Vec<Symbol>),
    /// The tag and value of a throw nobody caught
    UncaughtThrow {
        /// The thrown tag
        tag: Value,
        /// The thrown value
        value: Value,
    },
    /// The result carried by a `StopIteration`
    StopIteration(Value),
}

/// State of an exception object.
#[derive(Debug, Clone, Default)]
pub struct ExceptionData {
    /// The message given to `new`, or nil
    pub message: Value,
    /// Captured at first raise
    pub backtrace: Option<Vec<String>>,
    /// The exception being handled when this one was raised
    pub cause: Value,
    /// Class-specific metadata
    pub detail: ExceptionDetail,
}

impl ExceptionData {
    /// Creates exception state with a message.
    pub fn with_message(message: Value) -> Self {
        Self {
            message,
            cause: Value::Nil,
            ..Self::default()
        }
    }
}

/// A closure: a block body plus everything it captured at creation.
#[derive(Debug, Clone)]
pub struct ProcData {
    /// The block body
    pub iseq: Arc<Iseq>,
    /// The creating frame's environment, parent of each invocation's env
    pub env: EnvRef,
    /// `self` at creation
    pub self_value: Value,
    /// Lexical class at creation
    pub cref: ClassId,
    /// The frame that created the block; `break` terminates its pending call
    pub creator: FrameId,
    /// The method frame `return` leaves, if the block was created in one
    pub home: Option<FrameId>,
    /// Method being run when the block was created (for `super`)
    pub method: Option<MethodContext>,
    /// The block `yield` inside this block refers to
    pub method_block: Option<Value>,
    /// `...` arguments visible to the block
    pub forwarded: Option<ForwardedArgs>,
    /// Lambdas bind strictly, and `return`/`break` leave the lambda itself
    pub lambda: bool,
}

/// Storage for every heap object.
#[derive(Default)]
pub struct Heap {
    objects: Arena<RObject>,
}

impl Heap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an object.
    pub fn alloc(&mut self, class: ClassId, kind: ObjectKind) -> ObjRef {
        ObjRef(self.objects.allocate(RObject {
            class,
            ivars: IvarTable::default(),
            frozen: false,
            kind,
        }))
    }

    /// Resolves a handle.
    pub fn get(&self, obj: ObjRef) -> Option<&RObject> {
        self.objects.get(obj.0)
    }

    /// Resolves a handle mutably.
    pub fn get_mut(&mut self, obj: ObjRef) -> Option<&mut RObject> {
        self.objects.get_mut(obj.0)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Returns the string contents of `value`, if it is a String.
    pub fn str(&self, value: Value) -> Option<&str> {
        match &self.get(value.as_object()?)?.kind {
            ObjectKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements of `value`, if it is an Array.
    pub fn array(&self, value: Value) -> Option<&Vec<Value>> {
        match &self.get(value.as_object()?)?.kind {
            ObjectKind::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Mutable elements of `value`, if it is an Array.
    pub fn array_mut(&mut self, value: Value) -> Option<&mut Vec<Value>> {
        match &mut self.get_mut(value.as_object()?)?.kind {
            ObjectKind::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the table of `value`, if it is a Hash.
    pub fn hash(&self, value: Value) -> Option<&RHash> {
        match &self.get(value.as_object()?)?.kind {
            ObjectKind::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    /// Mutable table of `value`, if it is a Hash.
    pub fn hash_mut(&mut self, value: Value) -> Option<&mut RHash> {
        match &mut self.get_mut(value.as_object()?)?.kind {
            ObjectKind::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    /// Returns the exception state of `value`, if it is an exception.
    pub fn exception(&self, value: Value) -> Option<&ExceptionData> {
        match &self.get(value.as_object()?)?.kind {
            ObjectKind::Exception(data) => Some(data),
            _ => None,
        }
    }

    /// Mutable exception state of `value`.
    pub fn exception_mut(&mut self, value: Value) -> Option<&mut ExceptionData> {
        match &mut self.get_mut(value.as_object()?)?.kind {
            ObjectKind::Exception(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the closure data of `value`, if it is a Proc.
    pub fn proc_data(&self, value: Value) -> Option<&ProcData> {
        match &self.get(value.as_object()?)?.kind {
            ObjectKind::Proc(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the fiber behind `value`, if it is a Fiber.
    pub fn fiber_id(&self, value: Value) -> Option<FiberId> {
        match &self.get(value.as_object()?)?.kind {
            ObjectKind::Fiber(id) => Some(*id),
            _ => None,
        }
    }

    /// Computes the lookup key for `value`.
    pub fn hash_key(&self, value: Value) -> HashKey {
        match value {
            Value::Nil => HashKey::Nil,
            Value::Bool(b) => HashKey::Bool(b),
            Value::Integer(n) => HashKey::Integer(n),
            Value::Float(f) => HashKey::Float(f.to_bits()),
            Value::Symbol(s) => HashKey::Symbol(s),
            Value::Class(c) => HashKey::Class(c),
            Value::Object(r) => match self.get(r).map(|o| &o.kind) {
                Some(ObjectKind::String(s)) => HashKey::String(s.clone()),
                _ => HashKey::Object(r),
            },
        }
    }
}
