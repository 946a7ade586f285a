//! Fibers and fiber-local storage.
//!
//! A fiber is an explicit snapshot of a call-frame stack plus its operand
//! stack. Switching fibers only changes which snapshot the run loop reads,
//! so suspension happens exactly at `Fiber.yield` / `Fiber#resume` calls.

use std::fmt;
use std::ops::{Index, IndexMut};

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use super::function::CallFrame;
use super::symbol::Symbol;
use super::value::Value;

/// Fiber-local variables, created on first access.
pub type FiberLocals = IndexMap<Symbol, Value, FxBuildHasher>;

/// Handle to a fiber.
///
/// Slots of terminated fibers are reused; the generation tells a reused
/// slot apart from the fiber a stale handle referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId {
    index: u32,
    generation: u32,
}

impl FiberId {
    /// The root fiber, alive for the whole session.
    pub const ROOT: FiberId = FiberId {
        index: 0,
        generation: 0,
    };
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Lifecycle of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Created, never resumed
    Created,
    /// Running, or waiting on a fiber it resumed
    Resumed,
    /// Waiting in `Fiber.yield`
    Suspended,
    /// Body finished or raised
    Terminated,
}

/// One cooperative task.
#[derive(Debug)]
pub struct Fiber {
    /// Id
    pub id: FiberId,
    /// Lifecycle state
    pub state: FiberState,
    /// Call frames, innermost last
    pub frames: Vec<CallFrame>,
    /// Operand stack shared by the frames
    pub stack: Vec<Value>,
    /// Fiber to return to on yield or termination
    pub resumer: Option<FiberId>,
    /// Block run on first resume
    pub body: Option<Value>,
    /// The `Fiber` object handed to Ruby code
    pub handle: Option<Value>,
    /// Exception currently being handled (`$!`)
    pub errinfo: Value,
    /// Run loops whose boundary frame lives on this fiber
    pub loops: usize,
    /// Tags of enclosing `catch` blocks, innermost last
    pub catch_tags: Vec<Value>,
    locals: Option<FiberLocals>,
}

impl Fiber {
    fn new(id: FiberId, state: FiberState, body: Option<Value>) -> Self {
        Self {
            id,
            state,
            frames: Vec::new(),
            stack: Vec::new(),
            resumer: None,
            body,
            handle: None,
            errinfo: Value::Nil,
            loops: 0,
            catch_tags: Vec::new(),
            locals: None,
        }
    }

    /// Whether the fiber can still run.
    pub fn is_alive(&self) -> bool {
        self.state != FiberState::Terminated
    }

    /// Fiber-local storage, if it was ever touched.
    pub fn locals(&self) -> Option<&FiberLocals> {
        self.locals.as_ref()
    }

    /// Fiber-local storage, created on first access.
    pub fn locals_mut(&mut self) -> &mut FiberLocals {
        self.locals.get_or_insert_with(FiberLocals::default)
    }

    /// Reads a fiber-local, nil if unset.
    pub fn local(&self, key: Symbol) -> Value {
        self.locals
            .as_ref()
            .and_then(|l| l.get(&key).copied())
            .unwrap_or(Value::Nil)
    }

    /// Writes a fiber-local.
    pub fn set_local(&mut self, key: Symbol, value: Value) {
        self.locals_mut().insert(key, value);
    }
}

struct Slot {
    generation: u32,
    fiber: Option<Fiber>,
}

/// Every live fiber of a context plus the current-fiber pointer.
#[derive(Debug)]
pub struct FiberTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    current: FiberId,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fiber {
            Some(fiber) => fmt::Debug::fmt(fiber, f),
            None => write!(f, "<free gen {}>", self.generation),
        }
    }
}

impl FiberTable {
    /// A table holding only the root fiber.
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                fiber: Some(Fiber::new(FiberId::ROOT, FiberState::Resumed, None)),
            }],
            free: Vec::new(),
            current: FiberId::ROOT,
        }
    }

    /// The running fiber.
    pub fn current_id(&self) -> FiberId {
        self.current
    }

    /// Makes `id` the running fiber.
    pub fn set_current(&mut self, id: FiberId) {
        self.current = id;
    }

    /// The running fiber.
    pub fn current(&self) -> &Fiber {
        &self[self.current]
    }

    /// The running fiber, mutably.
    pub fn current_mut(&mut self) -> &mut Fiber {
        let id = self.current;
        &mut self[id]
    }

    /// The root fiber.
    pub fn root(&self) -> &Fiber {
        &self[FiberId::ROOT]
    }

    /// Creates a fiber that will run `body` when first resumed, reusing the
    /// slot of a released fiber when one is free.
    pub fn spawn(&mut self, body: Value) -> FiberId {
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                FiberId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    fiber: None,
                });
                FiberId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        self.slots[id.index as usize].fiber = Some(Fiber::new(id, FiberState::Created, Some(body)));
        id
    }

    /// Drops a terminated fiber with its frames and fiber-local storage.
    /// Handles to it resolve to `None` afterwards. The root and the running
    /// fiber are never released.
    pub fn release(&mut self, id: FiberId) -> Option<Fiber> {
        if id == FiberId::ROOT || id == self.current {
            return None;
        }
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let fiber = slot.fiber.take()?;
        self.free.push(id.index);
        Some(fiber)
    }

    /// Looks up a live fiber.
    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.fiber.as_ref())
    }

    /// Looks up a live fiber, mutably.
    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.fiber.as_mut())
    }

    /// Number of live fibers, including the root.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Always false: the root fiber exists from the start.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FiberTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<FiberId> for FiberTable {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        match self.get(id) {
            Some(fiber) => fiber,
            None => panic!("fiber {id} was released"),
        }
    }
}

impl IndexMut<FiberId> for FiberTable {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        match self.get_mut(id) {
            Some(fiber) => fiber,
            None => panic!("fiber {id} was released"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_fiber_exists() {
        let table = FiberTable::new();
        assert_eq!(table.current_id(), FiberId::ROOT);
        assert!(table.root().is_alive());
        assert!(table.root().locals().is_none());
    }

    #[test]
    fn test_locals_created_lazily() {
        let mut table = FiberTable::new();
        let key = Symbol::intern("request_id");
        assert_eq!(table.current().local(key), Value::Nil);
        assert!(table.current().locals().is_none());
        table.current_mut().set_local(key, Value::Integer(9));
        assert_eq!(table.current().local(key), Value::Integer(9));
    }

    #[test]
    fn test_locals_are_per_fiber() {
        let mut table = FiberTable::new();
        let key = Symbol::intern("name");
        let other = table.spawn(Value::Nil);
        table[other].set_local(key, Value::Integer(1));
        assert_eq!(table.root().local(key), Value::Nil);
        assert_eq!(table[other].state, FiberState::Created);
    }

    #[test]
    fn test_released_slot_is_reused_with_new_generation() {
        let mut table = FiberTable::new();
        let first = table.spawn(Value::Nil);
        table[first].set_local(Symbol::intern("k"), Value::Integer(1));
        table[first].state = FiberState::Terminated;
        assert!(table.release(first).is_some());
        assert!(table.get(first).is_none());
        assert_eq!(table.len(), 1);

        let second = table.spawn(Value::Nil);
        assert_ne!(first, second);
        assert!(table.get(first).is_none());
        assert!(table[second].locals().is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_root_and_current_are_never_released() {
        let mut table = FiberTable::new();
        assert!(table.release(FiberId::ROOT).is_none());
        let other = table.spawn(Value::Nil);
        table.set_current(other);
        assert!(table.release(other).is_none());
        assert!(table.get(other).is_some());
    }
}
