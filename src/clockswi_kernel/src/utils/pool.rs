//! Fixed-capacity object pool with generation-checked handles.
//!
//! Objects are addressed in two ways:
//!
//!  - [`PoolId`] is handed out to clients. It carries the generation of the
//!    slot at the time of allocation, so an id outliving its object is detected
//!    instead of silently aliasing whatever reuses the slot.
//!  - Raw `usize` indices are used internally, e.g., by [`super::list`] links.
//!    Indexing a vacant slot through [`ops::Index`] panics.
use core::{fmt, ops};

use super::{Init, VecLike};

/// A handle to an object in [`Pool`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId {
    index: u32,
    generation: u32,
}

impl PoolId {
    /// Get the slot index.
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// A slot in [`Pool`]'s backing storage.
#[doc(hidden)]
pub struct Slot<T> {
    generation: u32,
    entry: Entry<T>,
}

enum Entry<T> {
    Used(T),
    /// This slot is free. Points the next free slot.
    Free(Option<usize>),
}

/// Fixed-capacity object pool backed by `Storage`.
pub struct Pool<Storage> {
    slots: Storage,
    first_free: Option<usize>,
    len: usize,
}

impl<Storage: VecLike> Init for Pool<Storage> {
    const INIT: Self = Self {
        slots: Storage::DEFAULT,
        first_free: None,
        len: 0,
    };
}

impl<T, Storage: VecLike<Element = Slot<T>>> Pool<Storage> {
    /// Get the number of objects currently allocated.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocate a slot for `value`. Returns `value` back if the pool is full.
    pub fn allocate(&mut self, value: T) -> Result<PoolId, T> {
        let index = if let Some(index) = self.first_free {
            let slot = &mut self.slots[index];
            self.first_free = match slot.entry {
                Entry::Free(next) => next,
                Entry::Used(_) => unreachable!("free list points to a used slot"),
            };
            slot.entry = Entry::Used(value);
            index
        } else if self.slots.is_full() {
            return Err(value);
        } else {
            self.slots.push(Slot {
                generation: 0,
                entry: Entry::Used(value),
            });
            self.slots.len() - 1
        };

        self.len += 1;
        Ok(PoolId {
            index: index as u32,
            generation: self.slots[index].generation,
        })
    }

    /// Release the object identified by `id`. Returns `None` if `id` is stale.
    pub fn deallocate(&mut self, id: PoolId) -> Option<T> {
        self.get(id)?;

        let slot = &mut self.slots[id.index()];
        slot.generation = slot.generation.wrapping_add(1);
        let entry = core::mem::replace(&mut slot.entry, Entry::Free(self.first_free));
        self.first_free = Some(id.index());
        self.len -= 1;

        match entry {
            Entry::Used(value) => Some(value),
            Entry::Free(_) => unreachable!(),
        }
    }

    /// Get the object identified by `id`. Returns `None` if `id` is stale.
    pub fn get(&self, id: PoolId) -> Option<&T> {
        match self.slots.get(id.index()) {
            Some(Slot {
                generation,
                entry: Entry::Used(value),
            }) if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Get the object identified by `id`. Returns `None` if `id` is stale.
    pub fn get_mut(&mut self, id: PoolId) -> Option<&mut T> {
        match self.slots.get_mut(id.index()) {
            Some(Slot {
                generation,
                entry: Entry::Used(value),
            }) if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Get the current id of the object stored at `index`.
    pub fn id_at(&self, index: usize) -> Option<PoolId> {
        match self.slots.get(index) {
            Some(Slot {
                generation,
                entry: Entry::Used(_),
            }) => Some(PoolId {
                index: index as u32,
                generation: *generation,
            }),
            _ => None,
        }
    }
}

impl<T, Storage: VecLike<Element = Slot<T>>> ops::Index<usize> for Pool<Storage> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        match &self.slots[index].entry {
            Entry::Used(value) => value,
            Entry::Free(_) => panic!("slot {index} is vacant"),
        }
    }
}

impl<T, Storage: VecLike<Element = Slot<T>>> ops::IndexMut<usize> for Pool<Storage> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        match &mut self.slots[index].entry {
            Entry::Used(value) => value,
            Entry::Free(_) => panic!("slot {index} is vacant"),
        }
    }
}
