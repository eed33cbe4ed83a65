//! The opaque accelerator surface the cache drives.
//!
//! Everything here is identity-only: handles are words handed out by the
//! runtime, host pointers are address-sized tags that are hashed and compared
//! but never dereferenced.

use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

/// A host address used purely as a cache identity. The cache never reads or
/// writes through it; the runtime receives it back verbatim for transfers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostPtr(pub usize);

impl HostPtr {
    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Debug for HostPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostPtr({:#x})", self.0)
    }
}

impl<T> From<*const T> for HostPtr {
    fn from(ptr: *const T) -> Self {
        Self(ptr as usize)
    }
}

impl<T> From<*mut T> for HostPtr {
    fn from(ptr: *mut T) -> Self {
        Self(ptr as usize)
    }
}

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

opaque_id!(
    /// Device-side buffer handle. Owned by the cache from the moment it
    /// enters the line table; callers keep borrowed copies and must not
    /// release them directly.
    BufferHandle
);
opaque_id!(
    /// Runtime context a buffer is created in.
    DeviceContextId
);
opaque_id!(
    /// Command queue transfers and kernels are enqueued on.
    CommandQueueId
);
opaque_id!(
    /// Compiled kernel identity.
    KernelId
);
opaque_id!(
    /// Completion event for an enqueued command.
    EventId
);

bitflags! {
    /// Buffer creation flags. Mirrors the usual command-queue runtime
    /// vocabulary; only `COPY_HOST_PTR` changes the cache's behaviour.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemFlags: u32 {
        const READ_WRITE = 1 << 0;
        const WRITE_ONLY = 1 << 1;
        const READ_ONLY = 1 << 2;
        const USE_HOST_PTR = 1 << 3;
        const ALLOC_HOST_PTR = 1 << 4;
        const COPY_HOST_PTR = 1 << 5;
    }
}

/// ND-range description for a kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkDims {
    pub work_dim: u32,
    pub global_offset: Option<[usize; 3]>,
    pub global_size: [usize; 3],
    pub local_size: Option<[usize; 3]>,
}

impl WorkDims {
    /// One-dimensional launch covering `global` work items.
    pub fn linear(global: usize) -> Self {
        Self {
            work_dim: 1,
            global_offset: None,
            global_size: [global, 1, 1],
            local_size: None,
        }
    }
}

/// Non-success status returned by the accelerator runtime. The cache logs the
/// name and propagates the status unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    #[error("device out of memory")]
    OutOfMemory,
    #[error("invalid buffer handle")]
    InvalidBuffer,
    #[error("invalid command queue")]
    InvalidQueue,
    #[error("invalid kernel")]
    InvalidKernel,
    #[error("invalid event")]
    InvalidEvent,
    #[error("device lost")]
    DeviceLost,
    #[error("runtime failure (status {0})")]
    Other(i32),
}

impl RuntimeStatus {
    /// Numeric status code, for callers that report codes rather than names.
    pub fn code(&self) -> i32 {
        match self {
            Self::OutOfMemory => -6,
            Self::InvalidBuffer => -38,
            Self::InvalidQueue => -36,
            Self::InvalidKernel => -48,
            Self::InvalidEvent => -58,
            Self::DeviceLost => -601,
            Self::Other(code) => *code,
        }
    }
}

/// The command-queue runtime surface the cache consumes.
///
/// Implementations are adapters over a real accelerator API. All methods are
/// fallible with the runtime's own status; `event_elapsed_us` blocks until
/// the event has completed and reports the command's execution time.
pub trait ComputeRuntime {
    fn create_device_buffer(
        &mut self,
        context: DeviceContextId,
        flags: MemFlags,
        size: usize,
        host_ptr: Option<HostPtr>,
    ) -> Result<BufferHandle, RuntimeStatus>;

    #[allow(clippy::too_many_arguments)]
    fn enqueue_write(
        &mut self,
        queue: CommandQueueId,
        buffer: BufferHandle,
        blocking: bool,
        offset: usize,
        size: usize,
        host_ptr: HostPtr,
        wait_list: &[EventId],
    ) -> Result<EventId, RuntimeStatus>;

    #[allow(clippy::too_many_arguments)]
    fn enqueue_read(
        &mut self,
        queue: CommandQueueId,
        buffer: BufferHandle,
        blocking: bool,
        offset: usize,
        size: usize,
        host_ptr: HostPtr,
        wait_list: &[EventId],
    ) -> Result<EventId, RuntimeStatus>;

    fn enqueue_kernel(
        &mut self,
        queue: CommandQueueId,
        kernel: KernelId,
        work: &WorkDims,
        wait_list: &[EventId],
    ) -> Result<EventId, RuntimeStatus>;

    fn set_kernel_arg(&mut self, kernel: KernelId, index: u32, size: usize, value: HostPtr) -> Result<(), RuntimeStatus>;

    fn release_buffer(&mut self, buffer: BufferHandle) -> Result<(), RuntimeStatus>;

    fn event_elapsed_us(&mut self, event: EventId) -> Result<u64, RuntimeStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_ptr_is_identity_only() {
        let a = HostPtr(0x100);
        let b = HostPtr(0x100);
        let c = HostPtr(0x140);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(format!("{a:?}"), "HostPtr(0x100)");
    }

    #[test]
    fn mem_flags_compose() {
        let flags = MemFlags::READ_ONLY | MemFlags::COPY_HOST_PTR;
        assert!(flags.contains(MemFlags::COPY_HOST_PTR));
        assert!(!flags.contains(MemFlags::USE_HOST_PTR));
    }

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(RuntimeStatus::OutOfMemory.code(), -6);
        assert_eq!(RuntimeStatus::Other(-99).code(), -99);
    }
}
