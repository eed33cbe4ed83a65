//! Canonical metric event definitions for the cache instrumentation layer.

use serde::{Deserialize, Serialize};

/// Direction of a host/device data movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
}

/// Structured, type-safe metric events emitted by the cache engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MetricEvent {
    /// A lookup on the line table resolved to a hit or a miss.
    CacheAccess {
        /// Operation that performed the lookup (e.g. "create_buffer").
        operation: String,
        hit: bool,
        bytes: u64,
    },
    /// An underlying runtime transfer finished and its event was probed.
    TransferCompleted {
        direction: TransferDirection,
        bytes: u64,
        duration_us: u64,
    },
    /// A transfer was elided because the device copy could be reused.
    TransferElided {
        direction: TransferDirection,
        bytes: u64,
    },
    /// A populated line was overwritten to make room for a new tag.
    CacheEviction {
        line: u64,
        /// Whether the victim was flushed to the host before overwrite.
        flushed: bool,
        bytes: u64,
    },
    /// An enqueued kernel completed.
    KernelCompleted { duration_us: u64 },
    /// The whole line table was cleared.
    CacheCleared { lines_released: u64 },
}
