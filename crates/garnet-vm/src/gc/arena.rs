//! Handle arena with slot reuse.
//!
//! Entries are addressed by index. Releasing an entry puts its slot on a free
//! list; the next allocation reuses it. Handles to released slots resolve to
//! `None` until the slot is reused.

/// A reference to an entry in an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaRef {
    index: u32,
}

impl ArenaRef {
    /// Creates a new arena reference.
    pub const fn new(index: u32) -> Self {
        Self { index }
    }

    /// Returns the index of this reference.
    pub const fn index(&self) -> usize {
        self.index as usize
    }
}

enum Slot<T> {
    Occupied(T),
    Free { next: Option<u32> },
}

/// A growable arena of `T` with a free list.
///
/// # Memory Layout
///
/// ```text
/// entries: [Occupied][Free ─┐][Occupied][Free ─┐]...
///                           │                  │
/// free_head ────────────────┼──────────────────┘
///                           └─> None
/// ```
pub struct Arena<T> {
    entries: Vec<Slot<T>>,
    free_head: Option<u32>,
    live: usize,
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    /// Creates an empty arena with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_head: None,
            live: 0,
        }
    }

    /// Stores `value` and returns its handle.
    #[inline]
    pub fn allocate(&mut self, value: T) -> ArenaRef {
        self.live += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.entries[index as usize];
            if let Slot::Free { next } = slot {
                self.free_head = *next;
            }
            *slot = Slot::Occupied(value);
            return ArenaRef::new(index);
        }
        let index = self.entries.len() as u32;
        self.entries.push(Slot::Occupied(value));
        ArenaRef::new(index)
    }

    /// Gets a shared reference to an entry.
    #[inline]
    pub fn get(&self, handle: ArenaRef) -> Option<&T> {
        match self.entries.get(handle.index()) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Gets a mutable reference to an entry.
    #[inline]
    pub fn get_mut(&mut self, handle: ArenaRef) -> Option<&mut T> {
        match self.entries.get_mut(handle.index()) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Removes an entry and returns it, making its slot available again.
    pub fn release(&mut self, handle: ArenaRef) -> Option<T> {
        let slot = self.entries.get_mut(handle.index())?;
        if matches!(slot, Slot::Free { .. }) {
            return None;
        }
        let previous = std::mem::replace(
            slot,
            Slot::Free {
                next: self.free_head,
            },
        );
        self.free_head = Some(handle.index);
        self.live -= 1;
        match previous {
            Slot::Occupied(value) => Some(value),
            Slot::Free { .. } => None,
        }
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if the arena holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Drops every entry.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.free_head = None;
        self.live = 0;
    }

    /// Iterates over live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaRef, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied(value) => Some((ArenaRef::new(index as u32), value)),
                Slot::Free { .. } => None,
            })
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
