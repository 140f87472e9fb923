use std::{fmt, io};

use log::info;

use crate::{config::Config, error::ConfigError, stats::Statistics};

pub type MemAddr = usize;

pub const KIB: i32 = 1024;
pub const MIB: i32 = 1024 * KIB;
pub const GIB: i32 = 1024 * MIB;

const MAX_MEM_SIZE: i32 = GIB;
const DUMP_COLS: usize = 16;

/// One byte of simulated storage. `known` stays false until a real value
/// has been written or revealed into the cell.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCell {
    pub value: u8,
    pub known: bool,
}

impl MemoryCell {
    pub fn known(value: u8) -> Self {
        MemoryCell { value, known: true }
    }
}

impl fmt::Display for MemoryCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.known {
            write!(f, "{:02X}", self.value)
        } else {
            f.write_str("??")
        }
    }
}

/// A layer of the memory hierarchy. Caches own the layer beneath them and
/// forward to it; dropping the top layer releases the whole chain.
pub trait AbstractMemory: fmt::Debug {
    /// Charges read latency and copies `size` cells into `dst` if given.
    /// `None` only touches the hierarchy for its timing and placement.
    fn read(
        &mut self,
        stats: &mut Statistics,
        addr: MemAddr,
        size: usize,
        dst: Option<&mut [MemoryCell]>,
    );
    fn write(&mut self, stats: &mut Statistics, addr: MemAddr, src: &[MemoryCell]);
    /// Injects true values into resident copies and the backing store
    /// without any timing or statistics effect.
    fn reveal(&mut self, addr: MemAddr, src: &[MemoryCell]);
    /// Pushes every buffered write down to the backing store.
    fn flush(&mut self, stats: &mut Statistics);
    /// Prints the contents of the backing store.
    fn print_dump(&self, out: &mut dyn io::Write) -> io::Result<()>;
}

/// Bottom of the hierarchy. Always authoritative, so flushing does nothing.
pub struct Memory {
    cells: Vec<MemoryCell>,
    read_time: u64,
    write_time: u64,
    width: usize,
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("size", &self.cells.len())
            .field("read_time", &self.read_time)
            .field("write_time", &self.write_time)
            .field("width", &self.width)
            .finish()
    }
}

impl Memory {
    pub fn new(size: usize, read_time: u64, write_time: u64, width: usize) -> Self {
        Memory {
            cells: vec![MemoryCell::default(); size],
            read_time,
            write_time,
            width,
        }
    }

    pub fn from_config(cfg: &Config, prefix: Option<&str>) -> Result<Self, ConfigError> {
        let size = cfg.require_int(prefix, "memory_size", |v| {
            v > 0 && v <= MAX_MEM_SIZE && v % KIB == 0
        })?;
        let read_time = cfg.require_int(prefix, "memory_read_time", |v| v > 0)?;
        let write_time = cfg.require_int(prefix, "memory_write_time", |v| v > 0)?;
        let width = cfg.require_int(prefix, "memory_width", |v| v > 0 && v <= MAX_MEM_SIZE)?;
        info!("memory: {size} cells, read {read_time}, write {write_time}, width {width}");
        Ok(Memory::new(
            size as usize,
            read_time as u64,
            write_time as u64,
            width as usize,
        ))
    }

    /// Cycles spent moving `size` cells over a bus `width` cells wide.
    fn access_time(&self, size: usize, per_access: u64) -> u64 {
        size.div_ceil(self.width) as u64 * per_access
    }

    // Addresses past the end of memory are dropped silently
    fn store(&mut self, addr: MemAddr, src: &[MemoryCell]) {
        if addr >= self.cells.len() {
            return;
        }
        let len = src.len().min(self.cells.len() - addr);
        self.cells[addr..addr + len].copy_from_slice(&src[..len]);
    }
}

impl AbstractMemory for Memory {
    fn read(
        &mut self,
        stats: &mut Statistics,
        addr: MemAddr,
        size: usize,
        dst: Option<&mut [MemoryCell]>,
    ) {
        stats.add_clock(self.access_time(size, self.read_time));
        if let Some(dst) = dst {
            if addr >= self.cells.len() {
                return;
            }
            let len = size.min(dst.len()).min(self.cells.len() - addr);
            dst[..len].copy_from_slice(&self.cells[addr..addr + len]);
        }
    }

    fn write(&mut self, stats: &mut Statistics, addr: MemAddr, src: &[MemoryCell]) {
        stats.add_clock(self.access_time(src.len(), self.write_time));
        self.store(addr, src);
    }

    fn reveal(&mut self, addr: MemAddr, src: &[MemoryCell]) {
        self.store(addr, src);
    }

    fn flush(&mut self, _stats: &mut Statistics) {}

    fn print_dump(&self, out: &mut dyn io::Write) -> io::Result<()> {
        for (row, cells) in self.cells.chunks(DUMP_COLS).enumerate() {
            write!(out, "{:08X}", row * DUMP_COLS)?;
            for cell in cells {
                write!(out, " {cell}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
