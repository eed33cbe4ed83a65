//! Transfer-eliding buffer cache for command-queue compute runtimes.
//!
//! `opal` sits between an application and an accelerator runtime and elides
//! redundant host/device transfers across kernel launches that reuse the
//! same host regions. The application routes its buffer and kernel calls
//! through a [`BufferCache`]; the cache remembers live device handles per
//! host region, tracks which side holds the authoritative copy, and only
//! touches the runtime when a transfer is genuinely needed.

pub use buffer_cache::BufferCache;
pub use config::{CacheConfig, CacheOptions, DecimalSeparator, WritePolicy};
pub use error::CacheError;
pub use geometry::{Geometry, Organisation};
pub use line::{CacheLine, CoherenceFlag};
pub use profile::ProfileRecord;
pub use replacement::ReplacementPolicy;
pub use runtime::{
    BufferHandle, CommandQueueId, ComputeRuntime, DeviceContextId, EventId, HostPtr, KernelId, MemFlags, RuntimeStatus,
    WorkDims,
};
pub use stats::TransferStats;

pub mod buffer_cache;
pub mod config;
pub mod error;
pub mod geometry;
pub mod line;
pub mod profile;
pub mod replacement;
pub mod runtime;
pub mod stats;
