//! Global variables.
//!
//! Names map to indices into an arena of entries. An entry is either a
//! storage cell or a virtual variable backed by hooks. `alias` copies the
//! index, so every name in an alias class observes the same entry, and
//! writes mutate the entry in place rather than rebinding the name.

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use tracing::debug;

use super::context::ExecutionContext;
use super::symbol::Symbol;
use super::value::Value;
use crate::gc::{Arena, ArenaRef};
use crate::vm::VmResult;

/// Reads a virtual global.
pub type VirtualGetter = fn(&ExecutionContext) -> Value;

/// Writes a virtual global.
pub type VirtualSetter = fn(&mut ExecutionContext, Value) -> VmResult<()>;

/// Handle to a global entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(ArenaRef);

/// A single mutable slot shared by every aliased name.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageCell {
    /// Current value, nil until assigned
    pub value: Value,
}

/// Hooks behind a virtual global.
#[derive(Debug, Clone, Copy)]
pub struct VirtualGlobal {
    /// Produces the value on read
    pub getter: VirtualGetter,
    /// Handles assignment; `None` makes the variable read-only
    pub setter: Option<VirtualSetter>,
}

/// What a global name resolves to.
#[derive(Debug, Clone, Copy)]
pub enum GlobalEntry {
    /// Plain storage
    Cell(StorageCell),
    /// Hook-backed
    Virtual(VirtualGlobal),
}

/// Outcome of an assignment the table could not complete by itself.
#[derive(Debug, Clone, Copy)]
pub enum GlobalWrite {
    /// The variable has a setter hook that must be run by the caller
    Hook(VirtualSetter),
    /// The variable is read-only
    ReadOnly,
}

/// The global variable table.
#[derive(Default)]
pub struct GlobalTable {
    names: IndexMap<Symbol, GlobalId, FxBuildHasher>,
    entries: Arena<GlobalEntry>,
}

impl GlobalTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry a name resolves to.
    pub fn lookup(&self, name: Symbol) -> Option<&GlobalEntry> {
        let id = self.names.get(&name)?;
        self.entries.get(id.0)
    }

    /// Reads a cell-backed global; unassigned names and virtual globals read
    /// as nil here (virtual reads go through the context).
    pub fn get(&self, name: Symbol) -> Value {
        match self.lookup(name) {
            Some(GlobalEntry::Cell(cell)) => cell.value,
            _ => Value::Nil,
        }
    }

    /// Assigns a global, creating its cell on first write and mutating it in
    /// place afterwards.
    pub fn set(&mut self, name: Symbol, value: Value) -> Result<(), GlobalWrite> {
        let id = self.ensure(name);
        match self.entries.get_mut(id.0) {
            Some(GlobalEntry::Cell(cell)) => {
                cell.value = value;
                Ok(())
            }
            Some(GlobalEntry::Virtual(VirtualGlobal {
                setter: Some(setter),
                ..
            })) => Err(GlobalWrite::Hook(*setter)),
            _ => Err(GlobalWrite::ReadOnly),
        }
    }

    /// Binds `new_name` to the entry of `existing`, creating an empty cell for
    /// `existing` if it was never assigned.
    pub fn alias(&mut self, new_name: Symbol, existing: Symbol) {
        let id = self.ensure(existing);
        if self.names.get(&new_name) == Some(&id) {
            return;
        }
        debug!(new = %new_name, old = %existing, "aliased global");
        self.rebind(new_name, id);
    }

    /// Installs a virtual global, replacing whatever the name resolved to.
    pub fn define_virtual(
        &mut self,
        name: Symbol,
        getter: VirtualGetter,
        setter: Option<VirtualSetter>,
    ) {
        let id = GlobalId(
            self.entries
                .allocate(GlobalEntry::Virtual(VirtualGlobal { getter, setter })),
        );
        self.rebind(name, id);
    }

    /// True once a name has been assigned, aliased or defined.
    pub fn is_defined(&self, name: Symbol) -> bool {
        self.names.contains_key(&name)
    }

    /// True if both names resolve to the same entry.
    pub fn shares_entry(&self, a: Symbol, b: Symbol) -> bool {
        match (self.names.get(&a), self.names.get(&b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// All known names, in definition order.
    pub fn names(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.names.keys().copied()
    }

    /// Number of entries, shared ones counted once.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Points `name` at `id`, releasing the entry it left if no other name
    /// still refers to it.
    fn rebind(&mut self, name: Symbol, id: GlobalId) {
        let Some(previous) = self.names.insert(name, id) else {
            return;
        };
        if previous != id && !self.names.values().any(|other| *other == previous) {
            self.entries.release(previous.0);
        }
    }

    fn ensure(&mut self, name: Symbol) -> GlobalId {
        if let Some(id) = self.names.get(&name) {
            return *id;
        }
        let id = GlobalId(self.entries.allocate(GlobalEntry::Cell(StorageCell::default())));
        self.names.insert(name, id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Symbol {
        Symbol::intern(name)
    }

    #[test]
    fn test_unassigned_reads_nil() {
        let table = GlobalTable::new();
        assert_eq!(table.get(sym("$nothing")), Value::Nil);
        assert!(!table.is_defined(sym("$nothing")));
    }

    #[test]
    fn test_alias_shares_cell() {
        let mut table = GlobalTable::new();
        table.alias(sym("$b"), sym("$a"));
        table.set(sym("$a"), Value::Integer(3)).unwrap();
        assert_eq!(table.get(sym("$b")), Value::Integer(3));

        table.set(sym("$b"), Value::Integer(4)).unwrap();
        assert_eq!(table.get(sym("$a")), Value::Integer(4));
    }

    #[test]
    fn test_alias_chain_is_transitive() {
        let mut table = GlobalTable::new();
        table.alias(sym("$b"), sym("$a"));
        table.set(sym("$a"), Value::Integer(3)).unwrap();
        table.alias(sym("$c"), sym("$b"));
        table.set(sym("$c"), Value::Integer(5)).unwrap();
        for name in ["$a", "$b", "$c"] {
            assert_eq!(table.get(sym(name)), Value::Integer(5));
        }
        assert!(table.shares_entry(sym("$a"), sym("$c")));
    }

    #[test]
    fn test_alias_rebinds_existing_name() {
        let mut table = GlobalTable::new();
        table.set(sym("$x"), Value::Integer(1)).unwrap();
        table.set(sym("$y"), Value::Integer(2)).unwrap();
        table.alias(sym("$x"), sym("$y"));
        assert_eq!(table.get(sym("$x")), Value::Integer(2));
    }

    #[test]
    fn test_repeated_alias_is_noop() {
        let mut table = GlobalTable::new();
        table.alias(sym("$q"), sym("$p"));
        table.alias(sym("$q"), sym("$p"));
        table.alias(sym("$p"), sym("$p"));
        table.set(sym("$p"), Value::TRUE).unwrap();
        assert_eq!(table.get(sym("$q")), Value::TRUE);
        assert_eq!(table.names().count(), 2);
    }

    #[test]
    fn test_virtual_is_read_only_without_setter() {
        fn getter(_: &ExecutionContext) -> Value {
            Value::Integer(42)
        }
        let mut table = GlobalTable::new();
        table.define_virtual(sym("$virt"), getter, None);
        assert!(matches!(
            table.set(sym("$virt"), Value::Nil),
            Err(GlobalWrite::ReadOnly)
        ));
        assert!(matches!(table.lookup(sym("$virt")), Some(GlobalEntry::Virtual(_))));
    }

    #[test]
    fn test_realias_releases_orphaned_cell() {
        let mut table = GlobalTable::new();
        table.set(sym("$own"), Value::Integer(1)).unwrap();
        table.set(sym("$target"), Value::Integer(2)).unwrap();
        assert_eq!(table.entry_count(), 2);

        table.alias(sym("$own"), sym("$target"));
        assert_eq!(table.entry_count(), 1);
        assert_eq!(table.get(sym("$own")), Value::Integer(2));
    }

    #[test]
    fn test_realias_keeps_cell_still_shared() {
        let mut table = GlobalTable::new();
        table.set(sym("$a"), Value::Integer(1)).unwrap();
        table.alias(sym("$b"), sym("$a"));
        table.set(sym("$c"), Value::Integer(3)).unwrap();

        table.alias(sym("$a"), sym("$c"));
        assert_eq!(table.entry_count(), 2);
        assert_eq!(table.get(sym("$b")), Value::Integer(1));
        assert_eq!(table.get(sym("$a")), Value::Integer(3));
    }
}
