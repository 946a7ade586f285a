//! Class and module records.
//!
//! Records live in an arena and are addressed by [`ClassId`]. Each record keeps
//! its linearized ancestor list precomputed; any change to a superclass or
//! include list triggers a recomputation for the whole table.

use std::ops::{Index, IndexMut};

use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHashMap};
use thiserror::Error;
use tracing::trace;

use super::function::MethodEntry;
use super::object::IvarTable;
use super::symbol::Symbol;
use super::value::{ClassId, Value};
use crate::gc::Arena;

/// What a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// A class
    Class,
    /// A module
    Module,
    /// The singleton class of a class or module
    Singleton,
}

/// Which builtin payload `Class#new` allocates for instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    /// Plain objects
    Object,
    /// Strings
    String,
    /// Arrays
    Array,
    /// Hashes
    Hash,
    /// Exceptions
    Exception,
    /// Instances cannot be created with `new`
    Undefined,
}

/// Failures when changing the hierarchy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HierarchyError {
    /// Including a module into itself or into one of its own ancestors
    #[error("cyclic include detected")]
    CyclicInclude,
    /// Including something that is not a module
    #[error("wrong argument type {0} (expected Module)")]
    NotAModule(String),
}

/// One class, module or singleton class.
#[derive(Debug, Clone)]
pub struct ClassRecord {
    /// Fully qualified name, `None` while anonymous
    pub name: Option<String>,
    /// Record kind
    pub kind: ClassKind,
    /// Superclass (classes only)
    pub superclass: Option<ClassId>,
    /// Directly included modules, most recent first
    pub includes: Vec<ClassId>,
    /// Method table
    pub methods: FxHashMap<Symbol, MethodEntry>,
    /// Constant table
    pub constants: IndexMap<Symbol, Value, FxBuildHasher>,
    /// Instance variables of the class object itself
    pub ivars: IvarTable,
    /// Linearized ancestry, most specific first, starting with this record
    pub ancestors: Vec<ClassId>,
    /// Singleton class, created on first singleton method definition
    pub meta: Option<ClassId>,
    /// Instance payload
    pub alloc: AllocKind,
    /// Enclosing class or module of the definition, for constant lookup
    pub lexical_parent: Option<ClassId>,
}

/// The class table.
#[derive(Default)]
pub struct ClassTable {
    classes: Arena<ClassRecord>,
}

impl ClassTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a class or module. Instances of a subclass inherit its
    /// superclass's allocator unless `alloc` overrides it.
    pub fn define(
        &mut self,
        name: Option<String>,
        kind: ClassKind,
        superclass: Option<ClassId>,
        alloc: Option<AllocKind>,
    ) -> ClassId {
        let alloc = alloc
            .or_else(|| superclass.map(|s| self[s].alloc))
            .unwrap_or(AllocKind::Object);
        let id = ClassId(self.classes.allocate(ClassRecord {
            name,
            kind,
            superclass,
            includes: Vec::new(),
            methods: FxHashMap::default(),
            constants: IndexMap::default(),
            ivars: IvarTable::default(),
            ancestors: Vec::new(),
            meta: None,
            alloc,
            lexical_parent: None,
        }));
        let ancestors = self.linearize(id);
        self[id].ancestors = ancestors;
        trace!(class = ?self[id].name, "defined class");
        id
    }

    /// Returns the record for `id` if it exists.
    pub fn get(&self, id: ClassId) -> Option<&ClassRecord> {
        self.classes.get(id.0)
    }

    /// Display name, `#<Class:...>` for anonymous records.
    pub fn name(&self, id: ClassId) -> String {
        match &self[id].name {
            Some(name) => name.clone(),
            None if self[id].kind == ClassKind::Module => format!("#<Module:{:#x}>", id.0.index()),
            None => format!("#<Class:{:#x}>", id.0.index()),
        }
    }

    /// Includes `module` into `target`, recomputing ancestry.
    ///
    /// Including a module that is already an ancestor is a no-op.
    pub fn include(&mut self, target: ClassId, module: ClassId) -> Result<(), HierarchyError> {
        if self[module].kind != ClassKind::Module {
            return Err(HierarchyError::NotAModule(self.name(module)));
        }
        if self[module].ancestors.contains(&target) {
            return Err(HierarchyError::CyclicInclude);
        }
        if self[target].ancestors.contains(&module) {
            return Ok(());
        }
        self[target].includes.insert(0, module);
        self.refresh();
        trace!(target = %self.name(target), module = %self.name(module), "included module");
        Ok(())
    }

    /// Returns the singleton class of `id`, creating it on first use.
    pub fn singleton_class(&mut self, id: ClassId) -> ClassId {
        if let Some(meta) = self[id].meta {
            return meta;
        }
        let name = format!("#<Class:{}>", self.name(id));
        let meta = self.define(Some(name), ClassKind::Singleton, None, Some(AllocKind::Undefined));
        self[id].meta = Some(meta);
        meta
    }

    /// Method resolution order for calls whose receiver is the class or
    /// module `id` itself: singleton classes along the superclass chain,
    /// then `tail` (the ancestry of `Class` or `Module`).
    pub fn singleton_ancestors(&self, id: ClassId, tail: ClassId) -> Vec<ClassId> {
        let mut order = Vec::new();
        let mut current = Some(id);
        while let Some(class) = current {
            if let Some(meta) = self[class].meta {
                for ancestor in &self[meta].ancestors {
                    if !order.contains(ancestor) {
                        order.push(*ancestor);
                    }
                }
            }
            current = self[class].superclass;
        }
        for ancestor in &self[tail].ancestors {
            if !order.contains(ancestor) {
                order.push(*ancestor);
            }
        }
        order
    }

    /// True if `ancestor` appears in the ancestry of `class`.
    pub fn inherits(&self, class: ClassId, ancestor: ClassId) -> bool {
        self[class].ancestors.contains(&ancestor)
    }

    /// Finds a method along `order`, returning the owner and entry.
    pub fn find_method<'a>(
        &'a self,
        order: &[ClassId],
        name: Symbol,
    ) -> Option<(ClassId, &'a MethodEntry)> {
        order
            .iter()
            .find_map(|&class| self[class].methods.get(&name).map(|m| (class, m)))
    }

    /// Finds a method along `order` strictly after `owner` (for `super`).
    pub fn find_super_method<'a>(
        &'a self,
        order: &[ClassId],
        owner: ClassId,
        name: Symbol,
    ) -> Option<(ClassId, &'a MethodEntry)> {
        let start = order.iter().position(|&c| c == owner)? + 1;
        self.find_method(&order[start..], name)
    }

    /// Looks up a constant along the ancestry of `class`.
    pub fn const_get(&self, class: ClassId, name: Symbol) -> Option<Value> {
        self[class]
            .ancestors
            .iter()
            .find_map(|&c| self[c].constants.get(&name).copied())
    }

    fn linearize(&self, id: ClassId) -> Vec<ClassId> {
        let record = &self[id];
        let inherited: &[ClassId] = match record.superclass {
            Some(superclass) => &self[superclass].ancestors,
            None => &[],
        };
        let mut order = vec![id];
        for &module in &record.includes {
            for &ancestor in &self[module].ancestors {
                if !order.contains(&ancestor) && !inherited.contains(&ancestor) {
                    order.push(ancestor);
                }
            }
        }
        order.extend_from_slice(inherited);
        order
    }

    fn refresh(&mut self) {
        let ids: Vec<ClassId> = self.classes.iter().map(|(r, _)| ClassId(r)).collect();
        let mut done: FxHashMap<ClassId, bool> = FxHashMap::default();
        for id in ids {
            self.refresh_one(id, &mut done);
        }
    }

    fn refresh_one(&mut self, id: ClassId, done: &mut FxHashMap<ClassId, bool>) {
        if done.contains_key(&id) {
            return;
        }
        done.insert(id, true);
        let mut deps = self[id].includes.clone();
        deps.extend(self[id].superclass);
        for dep in deps {
            self.refresh_one(dep, done);
        }
        let ancestors = self.linearize(id);
        self[id].ancestors = ancestors;
    }
}

impl Index<ClassId> for ClassTable {
    type Output = ClassRecord;

    fn index(&self, id: ClassId) -> &ClassRecord {
        match self.classes.get(id.0) {
            Some(record) => record,
            None => panic!("dangling class handle {id:?}"),
        }
    }
}

impl IndexMut<ClassId> for ClassTable {
    fn index_mut(&mut self, id: ClassId) -> &mut ClassRecord {
        match self.classes.get_mut(id.0) {
            Some(record) => record,
            None => panic!("dangling class handle {id:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (ClassTable, ClassId) {
        let mut table = ClassTable::new();
        let object = table.define(Some("Object".into()), ClassKind::Class, None, None);
        (table, object)
    }

    #[test]
    fn test_superclass_chain() {
        let (mut t, object) = table();
        let a = t.define(Some("A".into()), ClassKind::Class, Some(object), None);
        let b = t.define(Some("B".into()), ClassKind::Class, Some(a), None);
        assert_eq!(t[b].ancestors, vec![b, a, object]);
        assert!(t.inherits(b, object));
        assert!(!t.inherits(a, b));
    }

    #[test]
    fn test_include_inserts_after_class() {
        let (mut t, object) = table();
        let m = t.define(Some("M".into()), ClassKind::Module, None, None);
        let n = t.define(Some("N".into()), ClassKind::Module, None, None);
        let a = t.define(Some("A".into()), ClassKind::Class, Some(object), None);
        let b = t.define(Some("B".into()), ClassKind::Class, Some(a), None);
        t.include(a, m).unwrap();
        t.include(a, n).unwrap();
        assert_eq!(t[a].ancestors, vec![a, n, m, object]);
        // subclasses see the change
        assert_eq!(t[b].ancestors, vec![b, a, n, m, object]);
    }

    #[test]
    fn test_include_into_module_propagates() {
        let (mut t, object) = table();
        let m = t.define(Some("M".into()), ClassKind::Module, None, None);
        let n = t.define(Some("N".into()), ClassKind::Module, None, None);
        let a = t.define(Some("A".into()), ClassKind::Class, Some(object), None);
        t.include(a, m).unwrap();
        t.include(m, n).unwrap();
        assert_eq!(t[a].ancestors, vec![a, m, n, object]);
    }

    #[test]
    fn test_cyclic_include_rejected() {
        let (mut t, _) = table();
        let m = t.define(Some("M".into()), ClassKind::Module, None, None);
        let n = t.define(Some("N".into()), ClassKind::Module, None, None);
        t.include(m, n).unwrap();
        assert_eq!(t.include(n, m), Err(HierarchyError::CyclicInclude));
        assert_eq!(t.include(m, m), Err(HierarchyError::CyclicInclude));
    }

    #[test]
    fn test_include_class_rejected() {
        let (mut t, object) = table();
        let a = t.define(Some("A".into()), ClassKind::Class, Some(object), None);
        assert!(matches!(t.include(object, a), Err(HierarchyError::NotAModule(_))));
    }

    #[test]
    fn test_alloc_kind_inherited() {
        let (mut t, object) = table();
        let exc = t.define(Some("Exception".into()), ClassKind::Class, Some(object), Some(AllocKind::Exception));
        let custom = t.define(Some("MyError".into()), ClassKind::Class, Some(exc), None);
        assert_eq!(t[custom].alloc, AllocKind::Exception);
    }

    #[test]
    fn test_constants_follow_ancestry() {
        let (mut t, object) = table();
        let a = t.define(Some("A".into()), ClassKind::Class, Some(object), None);
        let b = t.define(Some("B".into()), ClassKind::Class, Some(a), None);
        t[a].constants.insert(Symbol::intern("LIMIT"), Value::Integer(3));
        assert_eq!(t.const_get(b, Symbol::intern("LIMIT")), Some(Value::Integer(3)));
        assert_eq!(t.const_get(object, Symbol::intern("LIMIT")), None);
    }

    #[test]
    fn test_singleton_ancestors() {
        let (mut t, object) = table();
        let module = t.define(Some("Module".into()), ClassKind::Class, Some(object), None);
        let class = t.define(Some("Class".into()), ClassKind::Class, Some(module), None);
        let a = t.define(Some("A".into()), ClassKind::Class, Some(object), None);
        let b = t.define(Some("B".into()), ClassKind::Class, Some(a), None);
        let meta_a = t.singleton_class(a);
        let order = t.singleton_ancestors(b, class);
        assert_eq!(order, vec![meta_a, class, module, object]);
    }
}
