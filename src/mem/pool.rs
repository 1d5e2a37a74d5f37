//! Preallocated object pool with generation-checked keys.
//!
//! Slots are reserved up front and recycled through a free list, so
//! allocation never reaches the global allocator once the pool is built.
//! A retired slot keeps its generation until it is reused: a key to the
//! retired object reports `Retired`, a key that never existed reports
//! `Invalid`.

extern crate alloc;
use alloc::vec::Vec;

/// Why a key did not resolve to a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The key was never handed out by this pool.
    Invalid,
    /// The object behind the key has been retired.
    Retired,
}

enum Entry<T> {
    Occupied(T),
    Retired,
}

struct Slot<T> {
    generation: u32,
    entry: Entry<T>,
}

/// Fixed-capacity pool of `T`.
pub struct ObjectPool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> ObjectPool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// Store `value`, returning its `(index, generation)` key, or give the
    /// value back when the pool is full.
    pub fn insert(&mut self, value: T) -> Result<(u32, u32), T> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.entry = Entry::Occupied(value);
            self.live += 1;
            return Ok((index, slot.generation));
        }
        if self.slots.len() == self.slots.capacity() {
            return Err(value);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Entry::Occupied(value),
        });
        self.live += 1;
        Ok((index, 0))
    }

    pub fn get(&self, index: u32, generation: u32) -> Result<&T, PoolError> {
        let slot = self.slots.get(index as usize).ok_or(PoolError::Invalid)?;
        match (&slot.entry, generation.cmp(&slot.generation)) {
            (Entry::Occupied(value), core::cmp::Ordering::Equal) => Ok(value),
            (_, core::cmp::Ordering::Greater) => Err(PoolError::Invalid),
            _ => Err(PoolError::Retired),
        }
    }

    pub fn get_mut(&mut self, index: u32, generation: u32) -> Result<&mut T, PoolError> {
        let slot = self.slots.get_mut(index as usize).ok_or(PoolError::Invalid)?;
        match (&mut slot.entry, generation.cmp(&slot.generation)) {
            (Entry::Occupied(value), core::cmp::Ordering::Equal) => Ok(value),
            (_, core::cmp::Ordering::Greater) => Err(PoolError::Invalid),
            _ => Err(PoolError::Retired),
        }
    }

    /// Live object in slot `index`, whatever its generation.
    pub fn by_index(&self, index: u32) -> Option<&T> {
        match self.slots.get(index as usize).map(|s| &s.entry) {
            Some(Entry::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    pub fn by_index_mut(&mut self, index: u32) -> Option<&mut T> {
        match self.slots.get_mut(index as usize).map(|s| &mut s.entry) {
            Some(Entry::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Retire the object in slot `index` and hand it back.
    pub fn retire(&mut self, index: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        match core::mem::replace(&mut slot.entry, Entry::Retired) {
            Entry::Occupied(value) => {
                self.free.push(index);
                self.live -= 1;
                Some(value)
            }
            Entry::Retired => None,
        }
    }

    /// Iterate over live objects with their slot index.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| match &s.entry {
            Entry::Occupied(value) => Some((i as u32, value)),
            Entry::Retired => None,
        })
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_until_full() {
        let mut pool = ObjectPool::with_capacity(2);
        assert_eq!(pool.insert("a"), Ok((0, 0)));
        assert_eq!(pool.insert("b"), Ok((1, 0)));
        assert_eq!(pool.insert("c"), Err("c"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_retired_key_is_distinct_from_invalid() {
        let mut pool = ObjectPool::with_capacity(1);
        let (index, generation) = pool.insert(7u32).unwrap();
        assert_eq!(pool.get(index, generation), Ok(&7));
        assert_eq!(pool.get(index, generation + 1), Err(PoolError::Invalid));
        assert_eq!(pool.get(3, 0), Err(PoolError::Invalid));

        assert_eq!(pool.retire(index), Some(7));
        assert_eq!(pool.retire(index), None);
        assert_eq!(pool.get(index, generation), Err(PoolError::Retired));

        // Reuse bumps the generation; the old key stays retired.
        let (i2, g2) = pool.insert(8).unwrap();
        assert_eq!((i2, g2), (index, generation + 1));
        assert_eq!(pool.get(index, generation), Err(PoolError::Retired));
        assert_eq!(pool.get(i2, g2), Ok(&8));
    }

    #[test]
    fn test_iter_skips_retired() {
        let mut pool = ObjectPool::with_capacity(3);
        pool.insert(1).unwrap();
        pool.insert(2).unwrap();
        pool.insert(3).unwrap();
        pool.retire(1);
        let live: alloc::vec::Vec<_> = pool.iter().map(|(i, v)| (i, *v)).collect();
        assert_eq!(live, alloc::vec![(0, 1), (2, 3)]);
        assert_eq!(pool.by_index(1), None);
        *pool.by_index_mut(2).unwrap() = 30;
        assert_eq!(pool.by_index(2), Some(&30));
    }
}
