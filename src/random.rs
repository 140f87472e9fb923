use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    config::{param_name, Config},
    error::ConfigError,
};

/// Source of replacement decisions.
pub trait Random: fmt::Debug {
    /// Uniformly distributed integer in `0..n`.
    fn next(&mut self, n: usize) -> usize;
}

#[derive(Debug)]
pub struct SeededRandom {
    seed: u64,
    rng: fastrand::Rng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        SeededRandom {
            seed,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Uses `seed` from the configuration, or the current time when unset.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let name = param_name(None, "seed");
        let seed = match cfg.get_int(&name) {
            Ok(Some(seed)) if seed > 0 => seed as u64,
            Ok(Some(_)) | Err(_) => return Err(ConfigError::Invalid(name)),
            Ok(None) => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        };
        Ok(SeededRandom::new(seed))
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Random for SeededRandom {
    fn next(&mut self, n: usize) -> usize {
        self.rng.usize(0..n)
    }
}
