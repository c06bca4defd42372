//! # Handle Tables
//!
//! Generational slot arenas that hand out typed, copyable handles.
//!
//! A handle is an index plus the generation of the slot at insertion time.
//! Freed slots are reused with a bumped generation, so a handle kept past
//! its object's destruction never aliases a newer object.
//!
//! ```text
//!   slots: [ g1:obj ][ g3:free ][ g1:obj ] ...
//!              ▲
//!   Handle { index: 0, generation: 1 }
//! ```

use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

use crate::error::{Error, Result};

// =============================================================================
// HANDLE
// =============================================================================

/// Typed handle into a [`HandleTable`]
#[repr(C)]
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at issue time
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Packed 64-bit id, stable for the handle's lifetime
    #[inline]
    pub const fn id(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> core::hash::Hash for Handle<T> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = core::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Handle<{}>({}v{})", short, self.index, self.generation)
    }
}

// =============================================================================
// HANDLE TABLE
// =============================================================================

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational arena
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
    limit: usize,
}

impl<T> HandleTable<T> {
    /// Create an empty table (usable in statics)
    pub const fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Create an empty table holding at most `limit` live entries
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            limit,
        }
    }

    /// Number of live entries
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check for no live entries
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Insert a value, returning its handle
    pub fn insert(&mut self, value: T) -> Result<Handle<T>> {
        if self.live >= self.limit {
            return Err(Error::OutOfResources);
        }
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.live += 1;
            return Ok(Handle::new(index, slot.generation));
        }

        let index = u32::try_from(self.slots.len()).map_err(|_| Error::OutOfResources)?;
        self.slots
            .try_reserve(1)
            .map_err(|_| Error::OutOfHostMemory)?;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        self.live += 1;
        Ok(Handle::new(index, 1))
    }

    /// Look up a live entry
    pub fn get(&self, handle: Handle<T>) -> Result<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
            .ok_or(Error::InvalidNullHandle)
    }

    /// Look up a live entry mutably
    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or(Error::InvalidNullHandle)
    }

    /// Check whether a handle still refers to a live entry
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_ok()
    }

    /// Remove an entry, invalidating every copy of its handle
    pub fn remove(&mut self, handle: Handle<T>) -> Result<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(Error::InvalidNullHandle)?;
        let value = slot.value.take().ok_or(Error::InvalidNullHandle)?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(handle.index);
        self.live -= 1;
        Ok(value)
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
