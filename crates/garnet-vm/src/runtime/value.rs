//! Ruby value representation.

use std::fmt;

use super::symbol::Symbol;
use crate::gc::ArenaRef;

/// Handle to a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(pub(crate) ArenaRef);

/// Handle to a class or module record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) ArenaRef);

/// A Ruby value.
///
/// Values are `Copy` handles: immediates are stored inline and everything else
/// refers into the heap or the class table owned by the execution context.
/// Equality is identity (`equal?`), not `==`.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    /// nil
    Nil,
    /// true / false
    Bool(bool),
    /// Integer (fixnum range only)
    Integer(i64),
    /// Float
    Float(f64),
    /// Symbol
    Symbol(Symbol),
    /// A class or module
    Class(ClassId),
    /// Any heap object
    Object(ObjRef),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    /// `true`
    pub const TRUE: Value = Value::Bool(true);
    /// `false`
    pub const FALSE: Value = Value::Bool(false);

    /// Returns true if this value is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Ruby truthiness: everything except `nil` and `false`.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Returns the integer payload, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the symbol payload, if any.
    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Value::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    /// Returns the heap reference, if any.
    pub fn as_object(&self) -> Option<ObjRef> {
        match self {
            Value::Object(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the class handle, if any.
    pub fn as_class(&self) -> Option<ClassId> {
        match self {
            Value::Class(c) => Some(*c),
            _ => None,
        }
    }

    /// Creates a symbol value from a name.
    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Symbol::intern(name))
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl fmt::Display for Value {
    /// Formats immediates; heap values need the context and print as handles.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n:?}"),
            Value::Symbol(s) => write!(f, ":{s}"),
            Value::Class(c) => write!(f, "#<Class:{}>", c.0.index()),
            Value::Object(r) => write!(f, "#<Object:{}>", r.0.index()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::FALSE.truthy());
        assert!(Value::TRUE.truthy());
        assert!(Value::Integer(0).truthy());
    }

    #[test]
    fn test_identity_equality() {
        assert_eq!(Value::Integer(3), Value::Integer(3));
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::symbol("a"), Value::symbol("a"));
    }

    #[test]
    fn test_display_immediates() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Integer(-4).to_string(), "-4");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::symbol("x").to_string(), ":x");
    }
}
