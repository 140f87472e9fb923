use crate::{
    cache::Block,
    config::{param_name, Config},
    error::ConfigError,
    memory::MemAddr,
    random::Random,
};

use super::Placement;

/// Any block can hold any address. Empty blocks are filled first, after
/// that a victim is picked uniformly at random.
#[derive(Debug)]
pub struct FullyAssociative {
    rnd: Box<dyn Random>,
}

impl FullyAssociative {
    pub fn new(rnd: Box<dyn Random>) -> Self {
        FullyAssociative { rnd }
    }

    pub fn from_config(
        cfg: &Config,
        prefix: Option<&str>,
        rnd: Box<dyn Random>,
    ) -> Result<Self, ConfigError> {
        match cfg.require(prefix, "replacement_strategy")? {
            "random" => Ok(FullyAssociative::new(rnd)),
            _ => Err(ConfigError::Invalid(param_name(prefix, "replacement_strategy"))),
        }
    }
}

impl Placement for FullyAssociative {
    fn find(&self, blocks: &[Block], _block_size: usize, aligned: MemAddr) -> Option<usize> {
        blocks.iter().position(|b| b.tag == Some(aligned))
    }

    fn choose(&mut self, blocks: &[Block], _block_size: usize, _aligned: MemAddr) -> usize {
        blocks
            .iter()
            .position(|b| b.tag.is_none())
            .unwrap_or_else(|| self.rnd.next(blocks.len()))
    }
}
