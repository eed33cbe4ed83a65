use thiserror::Error;

use crate::runtime::RuntimeStatus;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache size must be positive")]
    NonPositiveCacheSize,
    #[error("set-associative organisation requires a set count")]
    MissingSetCount,
    #[error("cache size {cache_size} is smaller than the derived set count {set_count}")]
    DegenerateGeometry { cache_size: usize, set_count: usize },
    #[error("every candidate victim line is locked after {attempts} attempts; locked lines: {locked:?}")]
    EvictionStarvation { attempts: u32, locked: Vec<usize> },
    #[error("a device-to-host flush was required before any command queue was seen")]
    NoCommandQueue,
    #[error("runtime call failed: {0}")]
    Runtime(#[from] RuntimeStatus),
}
