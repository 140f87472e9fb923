pub mod direct;
pub mod full;

use std::fmt;

use crate::{cache::Block, memory::MemAddr};

/// Where a cache keeps its blocks. Both calls receive the aligned address.
pub trait Placement: fmt::Debug {
    /// Index of the block currently holding `aligned`, if any.
    fn find(&self, blocks: &[Block], block_size: usize, aligned: MemAddr) -> Option<usize>;
    /// Index of the block that will receive `aligned` on a miss. The cache
    /// finalizes its previous occupant.
    fn choose(&mut self, blocks: &[Block], block_size: usize, aligned: MemAddr) -> usize;
}
