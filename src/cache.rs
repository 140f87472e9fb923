use std::{fmt, io};

use log::{debug, info, trace};

use crate::{
    config::{param_name, Config},
    error::ConfigError,
    memory::{AbstractMemory, MemAddr, MemoryCell, MIB},
    place::{direct::DirectMapped, full::FullyAssociative, Placement},
    random::Random,
    stats::Statistics,
};

const MAX_CACHE_SIZE: i32 = 16 * MIB;
const MAX_ACCESS_TIME: i32 = 100_000;
const BLOCK_SIZES: [i32; 3] = [16, 32, 64];

pub type DirectCache = Cache<DirectMapped>;
pub type FullCache = Cache<FullyAssociative>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    WriteThrough,
    WriteBack,
}

impl WritePolicy {
    pub fn from_config(cfg: &Config, prefix: Option<&str>) -> Result<Self, ConfigError> {
        match cfg.require(prefix, "write_strategy")? {
            "write-through" => Ok(WritePolicy::WriteThrough),
            "write-back" => Ok(WritePolicy::WriteBack),
            _ => Err(ConfigError::Invalid(param_name(prefix, "write_strategy"))),
        }
    }

    /// Synchronizes `block` with the layer below before it is reused.
    /// Only a dirty write-back block has anything to push.
    fn finalize(self, block: &mut Block, lower: &mut dyn AbstractMemory, stats: &mut Statistics) {
        match self {
            WritePolicy::WriteThrough => {}
            WritePolicy::WriteBack => {
                if !block.dirty {
                    return;
                }
                if let Some(tag) = block.tag {
                    debug!("write back block {tag:#x}");
                    stats.add_write_back();
                    lower.write(stats, tag, &block.cells);
                }
                block.dirty = false;
            }
        }
    }
}

/// Size and timing shared by both cache organisations.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub block_size: usize,
    pub cache_size: usize,
    pub read_time: u64,
    pub write_time: u64,
}

impl Geometry {
    pub fn from_config(cfg: &Config, prefix: Option<&str>) -> Result<Self, ConfigError> {
        let block_size = cfg.require_int(prefix, "block_size", |v| BLOCK_SIZES.contains(&v))?;
        let cache_size = cfg.require_int(prefix, "cache_size", |v| {
            v > 0 && v <= MAX_CACHE_SIZE && v % block_size == 0
        })?;
        let read_time = cfg.require_int(prefix, "cache_read_time", |v| {
            v > 0 && v <= MAX_ACCESS_TIME
        })?;
        let write_time = cfg.require_int(prefix, "cache_write_time", |v| {
            v > 0 && v <= MAX_ACCESS_TIME
        })?;
        Ok(Geometry {
            block_size: block_size as usize,
            cache_size: cache_size as usize,
            read_time: read_time as u64,
            write_time: write_time as u64,
        })
    }

    pub fn block_count(&self) -> usize {
        self.cache_size / self.block_size
    }
}

#[derive(Debug)]
pub struct Block {
    /// Aligned address held by the block, `None` while empty.
    pub tag: Option<MemAddr>,
    pub cells: Box<[MemoryCell]>,
    /// Holds writes not yet pushed down. Write-back only.
    pub dirty: bool,
}

impl Block {
    fn new(block_size: usize) -> Self {
        Block {
            tag: None,
            cells: vec![MemoryCell::default(); block_size].into_boxed_slice(),
            dirty: false,
        }
    }
}

/// Part of an access that falls inside one block.
#[derive(Debug, PartialEq, Eq)]
struct Span {
    aligned: MemAddr,
    offset: usize,
    pos: usize,
    len: usize,
}

fn align(addr: MemAddr, block_size: usize) -> MemAddr {
    addr & !(block_size - 1)
}

/// Splits `addr..addr + size` at block boundaries. An empty access still
/// yields the block containing `addr`. Accesses running off the top of the
/// address space are clamped.
fn spans(block_size: usize, addr: MemAddr, size: usize) -> impl Iterator<Item = Span> {
    let end = addr.saturating_add(size);
    (align(addr, block_size)..end.max(addr.saturating_add(1)))
        .step_by(block_size)
        .map(move |aligned| {
            let start = addr.max(aligned);
            let stop = end.min(aligned.saturating_add(block_size));
            Span {
                aligned,
                offset: start - aligned,
                pos: start - addr,
                len: stop.saturating_sub(start),
            }
        })
}

/// Block table layered over a lower memory. `P` decides where blocks live.
pub struct Cache<P: Placement> {
    pub blocks: Vec<Block>,
    pub block_size: usize,
    read_time: u64,
    write_time: u64,
    policy: WritePolicy,
    placement: P,
    lower: Box<dyn AbstractMemory>,
}

impl<P: Placement> fmt::Debug for Cache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("placement", &self.placement)
            .field("policy", &self.policy)
            .field("block_size", &self.block_size)
            .field("block_count", &self.blocks.len())
            .field("lower", &self.lower)
            .finish()
    }
}

impl<P: Placement> Cache<P> {
    pub fn new(
        place: P,
        policy: WritePolicy,
        geometry: Geometry,
        lower: Box<dyn AbstractMemory>,
        stats: &mut Statistics,
    ) -> Self {
        assert!(geometry.block_size.is_power_of_two());
        stats.hit_counter_needed = true;
        if policy == WritePolicy::WriteBack {
            stats.write_back_needed = true;
        }
        Cache {
            blocks: (0..geometry.block_count())
                .map(|_| Block::new(geometry.block_size))
                .collect(),
            block_size: geometry.block_size,
            read_time: geometry.read_time,
            write_time: geometry.write_time,
            policy,
            placement: place,
            lower,
        }
    }

    fn find(&self, aligned: MemAddr) -> Option<usize> {
        self.placement.find(&self.blocks, self.block_size, aligned)
    }

    /// Brings the block at `aligned` in, finalizing whoever held the slot.
    fn place(&mut self, stats: &mut Statistics, aligned: MemAddr) -> usize {
        let idx = self.placement.choose(&self.blocks, self.block_size, aligned);
        let block = &mut self.blocks[idx];
        if let Some(old) = block.tag {
            debug!("evict {old:#x} from block {idx} for {aligned:#x}");
            self.policy.finalize(block, self.lower.as_mut(), stats);
        }
        block.tag = Some(aligned);
        self.lower
            .read(stats, aligned, self.block_size, Some(&mut block.cells[..]));
        idx
    }

    fn find_or_place(&mut self, stats: &mut Statistics, aligned: MemAddr) -> (usize, bool) {
        match self.find(aligned) {
            Some(idx) => (idx, true),
            None => (self.place(stats, aligned), false),
        }
    }
}

impl<P: Placement> AbstractMemory for Cache<P> {
    fn read(
        &mut self,
        stats: &mut Statistics,
        addr: MemAddr,
        size: usize,
        mut dst: Option<&mut [MemoryCell]>,
    ) {
        stats.add_clock(self.read_time);
        let mut hit = true;
        for span in spans(self.block_size, addr, size) {
            let (idx, found) = self.find_or_place(stats, span.aligned);
            hit &= found;
            if let Some(dst) = dst.as_deref_mut() {
                let cells = &self.blocks[idx].cells[span.offset..span.offset + span.len];
                if let Some(out) = dst.get_mut(span.pos..span.pos + span.len) {
                    out.copy_from_slice(cells);
                }
            }
        }
        trace!("read {addr:#x}+{size}: {}", if hit { "hit" } else { "miss" });
        if hit {
            stats.add_hit();
        }
    }

    fn write(&mut self, stats: &mut Statistics, addr: MemAddr, src: &[MemoryCell]) {
        stats.add_clock(self.write_time);
        for span in spans(self.block_size, addr, src.len()) {
            let data = &src[span.pos..span.pos + span.len];
            match self.policy {
                WritePolicy::WriteThrough => {
                    if let Some(idx) = self.find(span.aligned) {
                        self.blocks[idx].cells[span.offset..span.offset + span.len]
                            .copy_from_slice(data);
                    }
                }
                WritePolicy::WriteBack => {
                    let (idx, _) = self.find_or_place(stats, span.aligned);
                    let block = &mut self.blocks[idx];
                    block.cells[span.offset..span.offset + span.len].copy_from_slice(data);
                    block.dirty = true;
                }
            }
        }
        if self.policy == WritePolicy::WriteThrough {
            self.lower.write(stats, addr, src);
        }
    }

    fn reveal(&mut self, addr: MemAddr, src: &[MemoryCell]) {
        for span in spans(self.block_size, addr, src.len()) {
            if let Some(idx) = self.find(span.aligned) {
                self.blocks[idx].cells[span.offset..span.offset + span.len]
                    .copy_from_slice(&src[span.pos..span.pos + span.len]);
            }
        }
        self.lower.reveal(addr, src);
    }

    fn flush(&mut self, stats: &mut Statistics) {
        for block in self.blocks.iter_mut().filter(|b| b.tag.is_some()) {
            self.policy.finalize(block, self.lower.as_mut(), stats);
        }
        self.lower.flush(stats);
    }

    fn print_dump(&self, out: &mut dyn io::Write) -> io::Result<()> {
        self.lower.print_dump(out)
    }
}

/// Wraps `lower` in the cache described by the configuration. On error
/// `lower` is dropped along with everything built so far.
pub fn create(
    cfg: &Config,
    prefix: Option<&str>,
    stats: &mut Statistics,
    lower: Box<dyn AbstractMemory>,
    rnd: Box<dyn Random>,
) -> Result<Box<dyn AbstractMemory>, ConfigError> {
    let cache: Box<dyn AbstractMemory> = match cfg.require(prefix, "associativity")? {
        "direct" => {
            let policy = WritePolicy::from_config(cfg, prefix)?;
            let geometry = Geometry::from_config(cfg, prefix)?;
            info!("direct-mapped cache {geometry:?} {policy:?}");
            Box::new(DirectCache::new(DirectMapped, policy, geometry, lower, stats))
        }
        "full" => {
            let policy = WritePolicy::from_config(cfg, prefix)?;
            let place = FullyAssociative::from_config(cfg, prefix, rnd)?;
            let geometry = Geometry::from_config(cfg, prefix)?;
            info!("fully-associative cache {geometry:?} {policy:?}");
            Box::new(FullCache::new(place, policy, geometry, lower, stats))
        }
        _ => return Err(ConfigError::Invalid(param_name(prefix, "associativity"))),
    };
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::Memory, random::tests::Scripted};

    fn cells(bytes: &[u8]) -> Vec<MemoryCell> {
        bytes.iter().copied().map(MemoryCell::known).collect()
    }

    fn geometry(block_size: usize, cache_size: usize) -> Geometry {
        Geometry {
            block_size,
            cache_size,
            read_time: 1,
            write_time: 2,
        }
    }

    fn memory() -> Box<dyn AbstractMemory> {
        Box::new(Memory::new(4096, 10, 20, 1))
    }

    fn direct(policy: WritePolicy, cache_size: usize, stats: &mut Statistics) -> DirectCache {
        DirectCache::new(DirectMapped, policy, geometry(16, cache_size), memory(), stats)
    }

    fn full(policy: WritePolicy, cache_size: usize, picks: &[usize], stats: &mut Statistics) -> FullCache {
        let place = FullyAssociative::new(Box::new(Scripted::new(picks)));
        FullCache::new(place, policy, geometry(16, cache_size), memory(), stats)
    }

    fn backing<P: Placement>(cache: &mut Cache<P>, addr: MemAddr, size: usize) -> Vec<MemoryCell> {
        let mut scratch = Statistics::new();
        let mut out = vec![MemoryCell::default(); size];
        cache.lower.read(&mut scratch, addr, size, Some(&mut out));
        out
    }

    #[test]
    fn splits_accesses_at_block_boundaries() {
        let got: Vec<_> = spans(16, 14, 4).collect();
        assert_eq!(got, vec![
            Span { aligned: 0, offset: 14, pos: 0, len: 2 },
            Span { aligned: 16, offset: 0, pos: 2, len: 2 },
        ]);
        let got: Vec<_> = spans(32, 40, 0).collect();
        assert_eq!(got, vec![Span { aligned: 32, offset: 8, pos: 0, len: 0 }]);
    }

    #[test]
    fn second_read_hits_with_same_bytes() {
        for policy in [WritePolicy::WriteThrough, WritePolicy::WriteBack] {
            let mut stats = Statistics::new();
            let mut cache = direct(policy, 64, &mut stats);
            cache.reveal(0x24, &cells(&[0xAB, 0xCD]));

            let mut first = [MemoryCell::default(); 2];
            let mut second = [MemoryCell::default(); 2];
            cache.read(&mut stats, 0x24, 2, Some(&mut first));
            assert_eq!(stats.hit_counter, 0);
            // cache read plus a 16 cell block from memory
            assert_eq!(stats.clock_counter, 1 + 16 * 10);
            cache.read(&mut stats, 0x24, 2, Some(&mut second));
            assert_eq!(stats.hit_counter, 1);
            assert_eq!(stats.clock_counter, 2 + 16 * 10);
            assert_eq!(first, second);
            assert_eq!(first.to_vec(), cells(&[0xAB, 0xCD]));
        }
    }

    #[test]
    fn write_through_always_forwards() {
        let mut stats = Statistics::new();
        let mut cache = direct(WritePolicy::WriteThrough, 32, &mut stats);
        cache.write(&mut stats, 5, &cells(&[7]));
        assert_eq!(stats.clock_counter, 2 + 20);
        assert_eq!(backing(&mut cache, 5, 1), cells(&[7]));
        // no allocation on a write miss
        assert!(cache.find(0).is_none());

        cache.read(&mut stats, 5, 1, None);
        cache.write(&mut stats, 6, &cells(&[8]));
        assert_eq!(backing(&mut cache, 6, 1), cells(&[8]));
        let idx = cache.find(0).unwrap();
        assert_eq!(cache.blocks[idx].cells[6], MemoryCell::known(8));

        let before = stats.write_back_counter;
        cache.flush(&mut stats);
        assert_eq!(stats.write_back_counter, before);
        assert!(!stats.write_back_needed);
    }

    #[test]
    fn write_back_defers_until_flush() {
        let mut stats = Statistics::new();
        let mut cache = direct(WritePolicy::WriteBack, 32, &mut stats);
        cache.write(&mut stats, 3, &cells(&[0x11, 0x22]));
        // cache write plus the block fetch, no memory write yet
        assert_eq!(stats.clock_counter, 2 + 16 * 10);
        assert_eq!(backing(&mut cache, 3, 2), vec![MemoryCell::default(); 2]);

        cache.flush(&mut stats);
        assert_eq!(stats.write_back_counter, 1);
        assert_eq!(backing(&mut cache, 3, 2), cells(&[0x11, 0x22]));

        cache.flush(&mut stats);
        assert_eq!(stats.write_back_counter, 1);
    }

    #[test]
    fn direct_conflict_writes_back_only_dirty_blocks() {
        let mut stats = Statistics::new();
        // two blocks: 0x00 and 0x20 share index 0
        let mut cache = direct(WritePolicy::WriteBack, 32, &mut stats);
        cache.read(&mut stats, 0x00, 1, None);
        cache.read(&mut stats, 0x20, 1, None);
        assert_eq!(stats.write_back_counter, 0);
        assert!(cache.find(0x00).is_none());

        cache.write(&mut stats, 0x21, &cells(&[5]));
        cache.read(&mut stats, 0x01, 1, None);
        assert_eq!(stats.write_back_counter, 1);
        assert!(cache.find(0x20).is_none());
        assert_eq!(backing(&mut cache, 0x21, 1), cells(&[5]));
    }

    #[test]
    fn neighbouring_blocks_do_not_collide() {
        let mut stats = Statistics::new();
        let mut cache = direct(WritePolicy::WriteThrough, 32, &mut stats);
        cache.write(&mut stats, 0, &cells(&[1]));
        cache.write(&mut stats, 16, &cells(&[2]));
        cache.read(&mut stats, 0, 1, None);
        cache.read(&mut stats, 16, 1, None);
        cache.read(&mut stats, 0, 1, None);
        assert_eq!(stats.hit_counter, 1);
    }

    #[test]
    fn full_cache_fills_empty_blocks_then_evicts_randomly() {
        let mut stats = Statistics::new();
        let mut cache = full(WritePolicy::WriteBack, 64, &[2], &mut stats);
        for i in 0..4 {
            cache.write(&mut stats, i * 0x100, &cells(&[i as u8]));
        }
        assert_eq!(cache.blocks.iter().filter(|b| b.tag.is_some()).count(), 4);
        assert_eq!(stats.write_back_counter, 0);

        cache.read(&mut stats, 0x400, 1, None);
        assert_eq!(stats.write_back_counter, 1);
        assert_eq!(cache.blocks[2].tag, Some(0x400));
        assert!(cache.find(0x200).is_none());
        assert_eq!(backing(&mut cache, 0x200, 1), cells(&[2]));
        assert_eq!(cache.blocks.iter().filter(|b| b.tag.is_some()).count(), 4);

        cache.flush(&mut stats);
        assert_eq!(stats.write_back_counter, 4);
    }

    #[test]
    fn reveal_never_places() {
        let mut stats = Statistics::new();
        let mut cache = full(WritePolicy::WriteBack, 32, &[], &mut stats);
        cache.reveal(0x40, &cells(&[9]));
        assert!(cache.find(0x40).is_none());
        assert_eq!(stats.clock_counter, 0);
        assert_eq!(backing(&mut cache, 0x40, 1), cells(&[9]));

        cache.read(&mut stats, 0x40, 1, None);
        cache.reveal(0x40, &cells(&[10]));
        let idx = cache.find(0x40).unwrap();
        assert_eq!(cache.blocks[idx].cells[0], MemoryCell::known(10));
    }

    #[test]
    fn straddling_read_hits_only_when_both_blocks_resident() {
        let mut stats = Statistics::new();
        let mut cache = direct(WritePolicy::WriteThrough, 64, &mut stats);
        cache.reveal(14, &cells(&[1, 2, 3, 4]));
        cache.read(&mut stats, 12, 1, None);
        let mut out = [MemoryCell::default(); 4];
        cache.read(&mut stats, 14, 4, Some(&mut out));
        assert_eq!(stats.hit_counter, 0);
        cache.read(&mut stats, 14, 4, Some(&mut out));
        assert_eq!(stats.hit_counter, 1);
        assert_eq!(out.to_vec(), cells(&[1, 2, 3, 4]));
    }

    #[test]
    fn blocks_past_memory_end_keep_stale_cells() {
        let mut stats = Statistics::new();
        let mut cache = direct(WritePolicy::WriteBack, 32, &mut stats);
        cache.write(&mut stats, 8192, &cells(&[1]));
        cache.flush(&mut stats);
        assert_eq!(stats.write_back_counter, 1);
        let mut out = [MemoryCell::default(); 1];
        cache.read(&mut stats, 8192, 1, Some(&mut out));
        assert_eq!(out[0], MemoryCell::known(1));
    }

    #[test]
    fn access_at_top_of_address_space_is_clamped() {
        let top = MemAddr::MAX - 7;
        let got: Vec<_> = spans(16, top, 8).collect();
        assert_eq!(got, vec![Span { aligned: MemAddr::MAX - 15, offset: 8, pos: 0, len: 7 }]);

        let mut stats = Statistics::new();
        let mut cache = direct(WritePolicy::WriteBack, 32, &mut stats);
        cache.read(&mut stats, top, 8, None);
        cache.reveal(top, &cells(&[0; 8]));
        cache.write(&mut stats, top, &cells(&[1; 8]));
        cache.flush(&mut stats);
        assert_eq!(stats.write_back_counter, 1);
        assert_eq!(stats.hit_counter, 0);
    }

    fn config(text: &str) -> Config {
        Config::parse(text, "cache.cfg").unwrap()
    }

    fn create_err(text: &str) -> String {
        let mut stats = Statistics::new();
        create(&config(text), None, &mut stats, memory(), Box::new(Scripted::default()))
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn rejects_odd_block_sizes() {
        let err = create_err(
            "associativity = direct\nwrite_strategy = write-back\nblock_size = 17\n\
             cache_size = 1024\ncache_read_time = 1\ncache_write_time = 1\n",
        );
        assert_eq!(err, "Configuration parameter block_size value is invalid");
    }

    #[test]
    fn reports_parameters_in_validation_order() {
        assert_eq!(create_err(""), "Configuration parameter associativity is undefined");
        assert_eq!(
            create_err("associativity = set\n"),
            "Configuration parameter associativity value is invalid"
        );
        assert_eq!(
            create_err("associativity = full\nwrite_strategy = write-around\n"),
            "Configuration parameter write_strategy value is invalid"
        );
        assert_eq!(
            create_err("associativity = full\nwrite_strategy = write-back\nblock_size = 16\n"),
            "Configuration parameter replacement_strategy is undefined"
        );
        assert_eq!(
            create_err(
                "associativity = direct\nwrite_strategy = write-back\nblock_size = 16\n\
                 cache_size = 40\n"
            ),
            "Configuration parameter cache_size value is invalid"
        );
        assert_eq!(
            create_err(
                "associativity = direct\nwrite_strategy = write-back\nblock_size = 16\n\
                 cache_size = 32\ncache_read_time = 100001\n"
            ),
            "Configuration parameter cache_read_time value is invalid"
        );
    }

    #[test]
    fn create_flags_statistics() {
        let mut stats = Statistics::new();
        let cfg = config(
            "associativity = full\nreplacement_strategy = random\nwrite_strategy = write-back\n\
             block_size = 32\ncache_size = 128\ncache_read_time = 1\ncache_write_time = 1\n",
        );
        let cache = create(&cfg, None, &mut stats, memory(), Box::new(Scripted::default()));
        assert!(cache.is_ok());
        assert!(stats.hit_counter_needed);
        assert!(stats.write_back_needed);
    }
}
