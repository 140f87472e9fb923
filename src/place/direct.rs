use crate::{cache::Block, memory::MemAddr};

use super::Placement;

/// Every aligned address maps to exactly one block.
#[derive(Debug, Default)]
pub struct DirectMapped;

fn index(blocks: &[Block], block_size: usize, aligned: MemAddr) -> usize {
    (aligned / block_size) % blocks.len()
}

impl Placement for DirectMapped {
    fn find(&self, blocks: &[Block], block_size: usize, aligned: MemAddr) -> Option<usize> {
        let idx = index(blocks, block_size, aligned);
        (blocks[idx].tag == Some(aligned)).then_some(idx)
    }

    fn choose(&mut self, blocks: &[Block], block_size: usize, aligned: MemAddr) -> usize {
        index(blocks, block_size, aligned)
    }
}
