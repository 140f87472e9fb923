use std::fmt;

use serde::Serialize;

/// Counters shared by every layer of the hierarchy. Layers only ever add to
/// them; the driver reads them once the trace is exhausted.
#[derive(Debug, Default)]
pub struct Statistics {
    pub clock_counter: u64,
    pub read_counter: u64,
    pub write_counter: u64,
    pub hit_counter: u64,
    pub write_back_counter: u64,

    // Set by the layers that make the matching counter meaningful
    pub hit_counter_needed: bool,
    pub write_back_needed: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatisticsReport {
    clock_count: u64,
    reads: u64,
    writes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    read_hits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_block_writes: Option<u64>,
}

impl Statistics {
    pub fn new() -> Self {
        Statistics::default()
    }

    pub fn add_clock(&mut self, cycles: u64) {
        self.clock_counter += cycles;
    }

    pub fn add_hit(&mut self) {
        self.hit_counter += 1;
    }

    pub fn add_read(&mut self) {
        self.read_counter += 1;
    }

    pub fn add_write(&mut self) {
        self.write_counter += 1;
    }

    pub fn add_write_back(&mut self) {
        self.write_back_counter += 1;
    }

    pub fn make_report(&self) -> StatisticsReport {
        StatisticsReport {
            clock_count: self.clock_counter,
            reads: self.read_counter,
            writes: self.write_counter,
            read_hits: self.hit_counter_needed.then_some(self.hit_counter),
            cache_block_writes: self.write_back_needed.then_some(self.write_back_counter),
        }
    }
}

impl fmt::Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "clock count: {}", self.clock_count)?;
        writeln!(f, "reads: {}", self.reads)?;
        writeln!(f, "writes: {}", self.writes)?;
        if let Some(hits) = self.read_hits {
            writeln!(f, "read hits: {hits}")?;
        }
        if let Some(writes) = self.cache_block_writes {
            writeln!(f, "cache block writes: {writes}")?;
        }
        Ok(())
    }
}
