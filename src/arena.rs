//! A handle table over a fixed pool of equal-size blocks.
//!
//! Blocks are addressed by generation-tagged [`Handle`]s. A handle never owns
//! its block: it is only valid while its generation matches the generation
//! stored in the slot. Freeing bumps the slot generation, so every handle
//! issued before the free is detectably stale, whatever later reuses the slot.

use crate::error::{CapacityError, StaleHandle};
use log::warn;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Byte footprint of a value stored in a block.
pub trait Footprint {
    fn footprint(&self) -> usize;
}

/// A weak reference into a [`HandleTable`] holding `T`s.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32, generation: u32) -> Self {
        Handle {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub(crate) fn stale(&self) -> StaleHandle {
        StaleHandle {
            index: self.index,
            generation: self.generation,
        }
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

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

/// One slot of caller-owned memory. The generation outlives the contents, so
/// it survives [`HandleTable::clear`] and re-binding the memory to a new table.
#[derive(Debug)]
pub struct Block<T> {
    generation: u32,
    value: Option<T>,
}

impl<T> Block<T> {
    pub fn vacant() -> Self {
        Block {
            generation: 0,
            value: None,
        }
    }

    /// A pool of `count` vacant blocks.
    pub fn pool(count: usize) -> Vec<Block<T>> {
        std::iter::repeat_with(Block::vacant).take(count).collect()
    }
}

impl<T> Default for Block<T> {
    fn default() -> Self {
        Block::vacant()
    }
}

#[derive(Debug)]
pub struct HandleTable<'a, T> {
    name: &'static str,
    blocks: &'a mut [Block<T>],
    block_size: usize,
    reusable: Vec<u32>,
    max_used: usize,
}

impl<'a, T: Footprint> HandleTable<'a, T> {
    /// Binds a table to caller-owned `blocks`. Contents left in the blocks
    /// are dropped; generations are kept.
    pub fn new(name: &'static str, blocks: &'a mut [Block<T>], block_size: usize) -> Self {
        for block in blocks.iter_mut() {
            Self::vacate(block);
        }
        let capacity = blocks.len();
        HandleTable {
            name,
            blocks,
            block_size,
            reusable: Vec::with_capacity(capacity),
            max_used: 0,
        }
    }

    /// Stores `value` in a free block, preferring the most recently freed one.
    pub fn alloc(&mut self, value: T) -> Result<Handle<T>, CapacityError> {
        let requested = value.footprint();
        if requested > self.block_size {
            return Err(CapacityError::BlockTooSmall {
                table: self.name,
                requested,
                block_size: self.block_size,
            });
        }

        let index = if let Some(index) = self.reusable.pop() {
            index as usize
        } else if self.max_used < self.blocks.len() && self.max_used <= u32::MAX as usize {
            self.max_used += 1;
            self.max_used - 1
        } else {
            warn!("{} table exhausted ({} blocks)", self.name, self.blocks.len());
            return Err(CapacityError::Exhausted {
                table: self.name,
                num_blocks: self.blocks.len(),
            });
        };

        let block = &mut self.blocks[index];
        block.generation = block.generation.wrapping_add(1);
        block.value = Some(value);
        Ok(Handle::new(index as u32, block.generation))
    }

    /// Releases the block behind `handle` and returns what it held.
    pub fn free(&mut self, handle: Handle<T>) -> Result<T, StaleHandle> {
        let block = self
            .blocks
            .get_mut(handle.index as usize)
            .filter(|block| block.generation == handle.generation)
            .ok_or_else(|| handle.stale())?;
        let value = block.value.take().ok_or_else(|| handle.stale())?;
        block.generation = block.generation.wrapping_add(1);
        self.reusable.push(handle.index);
        Ok(value)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.blocks
            .get(handle.index as usize)
            .filter(|block| block.generation == handle.generation)
            .and_then(|block| block.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.blocks
            .get_mut(handle.index as usize)
            .filter(|block| block.generation == handle.generation)
            .and_then(|block| block.value.as_mut())
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Frees every block at once. Outstanding handles all become stale.
    pub fn clear(&mut self) {
        for block in self.blocks[..self.max_used].iter_mut() {
            Self::vacate(block);
        }
        self.reusable.clear();
        self.max_used = 0;
    }

    fn vacate(block: &mut Block<T>) {
        if block.value.take().is_some() {
            block.generation = block.generation.wrapping_add(1);
        }
    }

    /// Live blocks in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> + '_ {
        self.blocks[..self.max_used]
            .iter()
            .enumerate()
            .filter_map(|(index, block)| {
                let value = block.value.as_ref()?;
                Some((Handle::new(index as u32, block.generation), value))
            })
    }

    /// Blocks currently holding a value.
    pub fn len(&self) -> usize {
        self.max_used - self.reusable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
