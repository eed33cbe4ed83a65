//! In-memory mock of the accelerator runtime, recording every call so tests
//! can assert on the transfers the cache actually issued.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use opal::{
    BufferHandle, CommandQueueId, ComputeRuntime, DeviceContextId, EventId, HostPtr, KernelId, MemFlags, RuntimeStatus,
    WorkDims,
};

/// One recorded device-to-host or host-to-device transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferCall {
    pub queue: CommandQueueId,
    pub buffer: BufferHandle,
    pub host_ptr: HostPtr,
    pub size: usize,
}

pub struct MockState {
    next_handle: u64,
    next_event: u64,
    /// Microseconds reported for every probed event.
    pub elapsed_us: u64,
    /// When set, `release_buffer` fails with `InvalidBuffer`.
    pub fail_release: bool,
    pub creates: u32,
    pub creates_with_data: u32,
    pub writes: Vec<TransferCall>,
    pub reads: Vec<TransferCall>,
    pub kernels: u32,
    pub releases: Vec<BufferHandle>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            next_handle: 0,
            next_event: 0,
            elapsed_us: 7,
            fail_release: false,
            creates: 0,
            creates_with_data: 0,
            writes: Vec::new(),
            reads: Vec::new(),
            kernels: 0,
            releases: Vec::new(),
        }
    }
}

impl MockState {
    /// Host-to-device shipments: buffers created from host data plus
    /// enqueued writes.
    pub fn h2d_shipments(&self) -> u32 {
        self.creates_with_data + self.writes.len() as u32
    }

    pub fn release_count(&self, handle: BufferHandle) -> usize {
        self.releases.iter().filter(|&&h| h == handle).count()
    }
}

/// Clonable mock; the cache owns one clone, the test keeps another to
/// inspect the shared state afterwards (including after drop).
#[derive(Clone, Default)]
pub struct MockRuntime {
    pub state: Rc<RefCell<MockState>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> std::cell::Ref<'_, MockState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> std::cell::RefMut<'_, MockState> {
        self.state.borrow_mut()
    }
}

impl ComputeRuntime for MockRuntime {
    fn create_device_buffer(
        &mut self,
        _context: DeviceContextId,
        flags: MemFlags,
        _size: usize,
        host_ptr: Option<HostPtr>,
    ) -> Result<BufferHandle, RuntimeStatus> {
        let mut state = self.state.borrow_mut();
        state.creates += 1;
        if host_ptr.is_some() && flags.contains(MemFlags::COPY_HOST_PTR) {
            state.creates_with_data += 1;
        }
        state.next_handle += 1;
        Ok(BufferHandle(state.next_handle))
    }

    fn enqueue_write(
        &mut self,
        queue: CommandQueueId,
        buffer: BufferHandle,
        _blocking: bool,
        _offset: usize,
        size: usize,
        host_ptr: HostPtr,
        _wait_list: &[EventId],
    ) -> Result<EventId, RuntimeStatus> {
        let mut state = self.state.borrow_mut();
        state.writes.push(TransferCall {
            queue,
            buffer,
            host_ptr,
            size,
        });
        state.next_event += 1;
        Ok(EventId(state.next_event))
    }

    fn enqueue_read(
        &mut self,
        queue: CommandQueueId,
        buffer: BufferHandle,
        _blocking: bool,
        _offset: usize,
        size: usize,
        host_ptr: HostPtr,
        _wait_list: &[EventId],
    ) -> Result<EventId, RuntimeStatus> {
        let mut state = self.state.borrow_mut();
        state.reads.push(TransferCall {
            queue,
            buffer,
            host_ptr,
            size,
        });
        state.next_event += 1;
        Ok(EventId(state.next_event))
    }

    fn enqueue_kernel(
        &mut self,
        _queue: CommandQueueId,
        _kernel: KernelId,
        _work: &WorkDims,
        _wait_list: &[EventId],
    ) -> Result<EventId, RuntimeStatus> {
        let mut state = self.state.borrow_mut();
        state.kernels += 1;
        state.next_event += 1;
        Ok(EventId(state.next_event))
    }

    fn set_kernel_arg(&mut self, _kernel: KernelId, _index: u32, _size: usize, _value: HostPtr) -> Result<(), RuntimeStatus> {
        Ok(())
    }

    fn release_buffer(&mut self, buffer: BufferHandle) -> Result<(), RuntimeStatus> {
        let mut state = self.state.borrow_mut();
        state.releases.push(buffer);
        if state.fail_release {
            return Err(RuntimeStatus::InvalidBuffer);
        }
        Ok(())
    }

    fn event_elapsed_us(&mut self, _event: EventId) -> Result<u64, RuntimeStatus> {
        Ok(self.state.borrow().elapsed_us)
    }
}

pub const CTX: DeviceContextId = DeviceContextId(1);
pub const QUEUE: CommandQueueId = CommandQueueId(1);

/// Create a device buffer outside the caching path, the way an application
/// materialises a destination buffer before a write.
pub fn plain_buffer<R: ComputeRuntime>(cache: &mut opal::BufferCache<R>, size: usize) -> BufferHandle {
    cache
        .create_buffer(CTX, MemFlags::READ_WRITE, size, None)
        .expect("plain buffer creation")
}
