//! Interned symbols.
//!
//! Symbols are process-wide and never freed, so a [`Symbol`] is a plain index
//! that can be copied freely and compared in O(1).

use std::fmt;
use std::sync::LazyLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// An interned name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

#[derive(Default)]
struct Interner {
    ids: FxHashMap<&'static str, Symbol>,
    names: Vec<&'static str>,
}

static INTERNER: LazyLock<RwLock<Interner>> = LazyLock::new(|| RwLock::new(Interner::default()));

impl Symbol {
    /// Returns the symbol for `name`, interning it on first use.
    pub fn intern(name: &str) -> Symbol {
        if let Some(symbol) = INTERNER.read().ids.get(name) {
            return *symbol;
        }
        let mut interner = INTERNER.write();
        if let Some(symbol) = interner.ids.get(name) {
            return *symbol;
        }
        let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let symbol = Symbol(interner.names.len() as u32);
        interner.names.push(name);
        interner.ids.insert(name, symbol);
        symbol
    }

    /// Returns the symbol's name.
    pub fn as_str(self) -> &'static str {
        INTERNER.read().names[self.0 as usize]
    }

    /// Returns the Ruby `inspect` form, e.g. `:name`.
    pub fn inspect(self) -> String {
        format!(":{}", self.as_str())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::intern(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let a = Symbol::intern("garnet_symbol_test");
        let b = Symbol::intern("garnet_symbol_test");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "garnet_symbol_test");
    }

    #[test]
    fn test_distinct_names() {
        assert_ne!(Symbol::intern("left"), Symbol::intern("right"));
    }

    #[test]
    fn test_symbol_formatting() {
        let sym = Symbol::intern("arg1");
        assert_eq!(sym.inspect(), ":arg1");
        assert_eq!(format!("{sym:?}"), ":arg1");
        assert_eq!(sym.to_string(), "arg1");
    }
}
