//! Cache lines and per-line coherence state.

use std::fmt;

use crate::runtime::{BufferHandle, HostPtr};

/// Which side holds the authoritative copy of a cached region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoherenceFlag {
    /// Host copy is authoritative; any device copy is stale.
    #[default]
    Host,
    /// Device copy is newer than the host region (dirty on device).
    Device,
    /// Host and device copies agree.
    Both,
}

impl fmt::Display for CoherenceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("HOST"),
            Self::Device => f.write_str("DEVICE"),
            Self::Both => f.write_str("BOTH"),
        }
    }
}

/// One slot in the line table. Empty until an insertion populates it.
#[derive(Debug, Clone, Default)]
pub struct CacheLine {
    pub flag: CoherenceFlag,
    pub age: u64,
    pub size: usize,
    pub tag: Option<HostPtr>,
    pub device: Option<BufferHandle>,
}

impl CacheLine {
    pub fn is_populated(&self) -> bool {
        self.tag.is_some()
    }

    /// Return the line to its empty state, dropping any handle reference.
    /// Releasing the handle through the runtime is the caller's job.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
