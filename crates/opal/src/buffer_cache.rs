//! The cache engine: line table, lock set, coherence tracking, and the
//! transfer-elision protocol over a [`ComputeRuntime`].

use std::path::PathBuf;

use opal_instrumentation::{MetricEvent, TransferDirection, emit_metric};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error, info, info_span, warn};

use crate::config::{CacheConfig, DecimalSeparator, WritePolicy};
use crate::error::CacheError;
use crate::geometry::{Geometry, Organisation};
use crate::line::{CacheLine, CoherenceFlag};
use crate::profile::ProfileRecord;
use crate::replacement::{self, ReplacementPolicy, VictimContext};
use crate::runtime::{
    BufferHandle, CommandQueueId, ComputeRuntime, DeviceContextId, EventId, HostPtr, KernelId, MemFlags, WorkDims,
};
use crate::stats::TransferStats;

/// Transfer-eliding buffer cache over a command-queue compute runtime.
///
/// The cache remembers, per host region previously shipped to the device, the
/// live device handle and which side currently holds the authoritative copy.
/// Device handles are owned by the cache from insertion onward: they are
/// released through the runtime exactly once, on eviction, [`reset_cache`],
/// or drop.
///
/// All operations are issued from a single control flow; the cache has no
/// internal locking and never reorders runtime calls.
///
/// [`reset_cache`]: BufferCache::reset_cache
pub struct BufferCache<R: ComputeRuntime> {
    runtime: R,
    organisation: Organisation,
    policy: ReplacementPolicy,
    write_policy: WritePolicy,
    geometry: Geometry,
    profile_log: PathBuf,
    decimal_separator: DecimalSeparator,
    lines: Vec<CacheLine>,
    fifo_cursors: Vec<usize>,
    /// Lines the in-flight submission depends on; exempt from eviction until
    /// the next clearing point (read entry or kernel-enqueue entry).
    locked: FxHashSet<usize>,
    kernel_args: FxHashMap<KernelId, FxHashSet<HostPtr>>,
    /// Most recent command queue seen; used for cache-initiated flushes.
    queue: Option<CommandQueueId>,
    rng: SmallRng,
    stats: TransferStats,
    live_buffers: u64,
}

impl<R: ComputeRuntime> BufferCache<R> {
    /// Build a cache over `runtime` from a validated configuration.
    pub fn new(runtime: R, config: CacheConfig) -> Result<Self, CacheError> {
        Self::with_rng(runtime, config, SmallRng::from_os_rng())
    }

    /// Like [`BufferCache::new`] with a deterministic RNG seed, for tests and
    /// reproducible benchmark runs.
    pub fn with_seed(runtime: R, config: CacheConfig, seed: u64) -> Result<Self, CacheError> {
        Self::with_rng(runtime, config, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(runtime: R, config: CacheConfig, rng: SmallRng) -> Result<Self, CacheError> {
        let geometry = Geometry::resolve(config.organisation, config.cache_size, config.requested_sets)?;
        info!(
            organisation = %config.organisation,
            policy = %config.replacement_policy,
            sets = geometry.set_count,
            lines = geometry.line_count,
            write_back = config.write_policy.is_write_back(),
            "cache initialised",
        );
        Ok(Self {
            runtime,
            organisation: config.organisation,
            policy: config.replacement_policy,
            write_policy: config.write_policy,
            geometry,
            profile_log: config.profile_log,
            decimal_separator: config.decimal_separator,
            lines: vec![CacheLine::default(); geometry.line_count],
            fifo_cursors: vec![0; geometry.set_count],
            locked: FxHashSet::default(),
            kernel_args: FxHashMap::default(),
            queue: None,
            rng,
            stats: TransferStats::default(),
            live_buffers: 0,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn organisation(&self) -> Organisation {
        self.organisation
    }

    pub fn replacement_policy(&self) -> ReplacementPolicy {
        self.policy
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Device buffers created through this cache and not yet released.
    pub fn live_buffers(&self) -> u64 {
        self.live_buffers
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Coherence flag of the line tagged `host_ptr`, if cached. Does not age
    /// lines; intended for inspection.
    pub fn flag_of(&self, host_ptr: HostPtr) -> Option<CoherenceFlag> {
        let set = self.geometry.set_index(host_ptr);
        self.geometry
            .set_range(set)
            .find(|&idx| self.lines[idx].tag == Some(host_ptr))
            .map(|idx| self.lines[idx].flag)
    }

    /// Create a device buffer for `host_ptr`, reusing a cached device copy
    /// when the caller asked for host-copy semantics and a coherent copy is
    /// already resident.
    pub fn create_buffer(
        &mut self,
        context: DeviceContextId,
        flags: MemFlags,
        size: usize,
        host_ptr: Option<HostPtr>,
    ) -> Result<BufferHandle, CacheError> {
        let Some(tag) = host_ptr.filter(|_| flags.contains(MemFlags::COPY_HOST_PTR)) else {
            // No host-copy semantics requested: forward unchanged.
            let handle = self.runtime.create_device_buffer(context, flags, size, host_ptr)?;
            self.live_buffers += 1;
            return Ok(handle);
        };

        let span = info_span!("cache_op", op = "create_buffer");
        let _enter = span.enter();

        self.stats.bytes_total += size as u64;
        self.stats.bytes_h2d_total += size as u64;

        match self.lookup(tag) {
            Some(idx) if self.lines[idx].flag != CoherenceFlag::Host => {
                self.stats.hits += 1;
                self.stats.bytes_saved += size as u64;
                self.stats.bytes_h2d_saved += size as u64;
                self.locked.insert(idx);
                debug!(line = idx, ?tag, "create_buffer: cache hit");
                emit_metric!(MetricEvent::CacheAccess {
                    operation: "create_buffer".to_string(),
                    hit: true,
                    bytes: size as u64,
                });
                emit_metric!(MetricEvent::TransferElided {
                    direction: TransferDirection::HostToDevice,
                    bytes: size as u64,
                });
                Ok(self.cached_handle(idx))
            }
            stale => {
                // Miss, or a stale Host-flagged line that is reinserted in place.
                self.stats.misses += 1;
                debug!(?tag, "create_buffer: cache miss");
                emit_metric!(MetricEvent::CacheAccess {
                    operation: "create_buffer".to_string(),
                    hit: false,
                    bytes: size as u64,
                });
                let handle = self.runtime.create_device_buffer(context, flags, size, Some(tag))?;
                self.live_buffers += 1;
                self.insert(tag, size, handle, CoherenceFlag::Both, stale)?;
                Ok(handle)
            }
        }
    }

    /// Ship `size` bytes at `host_ptr` to the device, unless a coherent
    /// device copy is already cached. On a hit the caller's handle is
    /// replaced by the cache's authoritative one (and released if it
    /// differs); no underlying write is issued.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_write(
        &mut self,
        queue: CommandQueueId,
        buffer: &mut BufferHandle,
        blocking: bool,
        offset: usize,
        size: usize,
        host_ptr: HostPtr,
        wait_list: &[EventId],
    ) -> Result<(), CacheError> {
        let span = info_span!("cache_op", op = "enqueue_write");
        let _enter = span.enter();

        self.queue = Some(queue);
        self.stats.bytes_total += size as u64;
        self.stats.bytes_h2d_total += size as u64;

        match self.lookup(host_ptr) {
            Some(idx) if self.lines[idx].flag != CoherenceFlag::Host => {
                self.stats.hits += 1;
                self.stats.bytes_saved += size as u64;
                self.stats.bytes_h2d_saved += size as u64;
                let cached = self.cached_handle(idx);
                if *buffer != cached {
                    // The caller materialised a fresh buffer for a region the
                    // cache already holds; the cache's handle is authoritative.
                    self.release_handle(*buffer);
                    *buffer = cached;
                }
                self.locked.insert(idx);
                debug!(line = idx, ?host_ptr, "enqueue_write: cache hit");
                emit_metric!(MetricEvent::CacheAccess {
                    operation: "enqueue_write".to_string(),
                    hit: true,
                    bytes: size as u64,
                });
                emit_metric!(MetricEvent::TransferElided {
                    direction: TransferDirection::HostToDevice,
                    bytes: size as u64,
                });
                return Ok(());
            }
            stale => {
                self.stats.misses += 1;
                debug!(?host_ptr, "enqueue_write: cache miss");
                emit_metric!(MetricEvent::CacheAccess {
                    operation: "enqueue_write".to_string(),
                    hit: false,
                    bytes: size as u64,
                });
                self.insert(host_ptr, size, *buffer, CoherenceFlag::Both, stale)?;
            }
        }

        let event = self
            .runtime
            .enqueue_write(queue, *buffer, blocking, offset, size, host_ptr, wait_list)?;
        let elapsed = self.runtime.event_elapsed_us(event)?;
        self.stats.host_to_device_us += elapsed;
        emit_metric!(MetricEvent::TransferCompleted {
            direction: TransferDirection::HostToDevice,
            bytes: size as u64,
            duration_us: elapsed,
        });
        Ok(())
    }

    /// Read `size` bytes of `buffer` back into `host_ptr`. Under
    /// write-through the underlying read always happens; under write-back it
    /// is skipped and the host region stays stale until an explicit
    /// write-back. Clears the lock set on entry and again before returning.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_read(
        &mut self,
        queue: CommandQueueId,
        buffer: BufferHandle,
        blocking: bool,
        offset: usize,
        size: usize,
        host_ptr: HostPtr,
        wait_list: &[EventId],
    ) -> Result<(), CacheError> {
        let span = info_span!("cache_op", op = "enqueue_read");
        let _enter = span.enter();

        self.locked.clear();
        self.queue = Some(queue);
        self.stats.bytes_total += size as u64;
        self.stats.bytes_d2h_total += size as u64;
        // Optimistic elision credit; unwound below if the read is issued.
        self.stats.bytes_saved += size as u64;
        self.stats.bytes_d2h_saved += size as u64;

        if self.write_policy.is_write_back() {
            emit_metric!(MetricEvent::TransferElided {
                direction: TransferDirection::DeviceToHost,
                bytes: size as u64,
            });
        } else {
            let event = self
                .runtime
                .enqueue_read(queue, buffer, blocking, offset, size, host_ptr, wait_list)?;
            let elapsed = self.runtime.event_elapsed_us(event)?;
            self.stats.device_to_host_us += elapsed;
            self.stats.bytes_saved = self.stats.bytes_saved.saturating_sub(size as u64);
            self.stats.bytes_d2h_saved = self.stats.bytes_d2h_saved.saturating_sub(size as u64);
            emit_metric!(MetricEvent::TransferCompleted {
                direction: TransferDirection::DeviceToHost,
                bytes: size as u64,
                duration_us: elapsed,
            });
        }

        match self.lookup(host_ptr) {
            None => {
                let flag = if self.write_policy.is_write_back() {
                    CoherenceFlag::Device
                } else {
                    CoherenceFlag::Both
                };
                self.insert(host_ptr, size, buffer, flag, None)?;
            }
            Some(idx) => {
                let cached = self.cached_handle(idx);
                if cached != buffer {
                    // The caller re-created a buffer the cache already owns.
                    self.release_handle(buffer);
                }
            }
        }

        self.locked.clear();
        Ok(())
    }

    /// Neutralised application-side release. Handles are owned by the cache
    /// from the moment they enter the line table; they are released on
    /// eviction, [`reset_cache`](BufferCache::reset_cache), or drop, and an
    /// application that kept its redirected `release` calls must not free
    /// them a second time underneath the cache.
    pub fn release_buffer(&mut self, buffer: BufferHandle) -> Result<(), CacheError> {
        debug!(handle = buffer.0, "application release neutralised");
        Ok(())
    }

    /// Record the argument for dirty-marking at launch and forward it.
    pub fn set_kernel_arg(&mut self, kernel: KernelId, index: u32, size: usize, value: HostPtr) -> Result<(), CacheError> {
        self.kernel_args.entry(kernel).or_default().insert(value);
        self.runtime.set_kernel_arg(kernel, index, size, value)?;
        Ok(())
    }

    /// Launch `kernel` and mark every cached line bound as one of its
    /// arguments dirty-on-device. Clears the lock set on entry.
    pub fn enqueue_kernel(
        &mut self,
        queue: CommandQueueId,
        kernel: KernelId,
        work: &WorkDims,
        wait_list: &[EventId],
    ) -> Result<(), CacheError> {
        let span = info_span!("cache_op", op = "enqueue_kernel");
        let _enter = span.enter();

        self.locked.clear();
        self.queue = Some(queue);

        let event = self.runtime.enqueue_kernel(queue, kernel, work, wait_list)?;
        let elapsed = self.runtime.event_elapsed_us(event)?;
        self.stats.kernel_us += elapsed;
        emit_metric!(MetricEvent::KernelCompleted { duration_us: elapsed });

        if let Some(args) = self.kernel_args.get(&kernel) {
            let args: Vec<HostPtr> = args.iter().copied().collect();
            for arg in args {
                self.set_dirty_flag(arg, CoherenceFlag::Device);
            }
        }
        Ok(())
    }

    /// Flush every dirty-on-device line back to its host region. A no-op
    /// under write-through. Idempotent: flushed lines move to `Both` and are
    /// not transferred again.
    pub fn write_back(&mut self) -> Result<(), CacheError> {
        if !self.write_policy.is_write_back() {
            return Ok(());
        }
        for idx in 0..self.lines.len() {
            if self.lines[idx].flag == CoherenceFlag::Device {
                self.flush_line(idx)?;
            }
        }
        Ok(())
    }

    /// Flush the line tagged `host_ptr`, if it is dirty on the device.
    pub fn write_back_buffer(&mut self, host_ptr: HostPtr) -> Result<(), CacheError> {
        if !self.write_policy.is_write_back() {
            return Ok(());
        }
        if let Some(idx) = self.lookup(host_ptr)
            && self.lines[idx].flag == CoherenceFlag::Device
        {
            self.flush_line(idx)?;
        }
        Ok(())
    }

    /// Assert a coherence flag for the line tagged `host_ptr`. Used
    /// internally after kernel launches; exposed so applications can mark a
    /// host region as rewritten (`Host`) without going through the cache.
    pub fn set_dirty_flag(&mut self, host_ptr: HostPtr, flag: CoherenceFlag) {
        if let Some(idx) = self.lookup(host_ptr) {
            self.lines[idx].flag = flag;
        }
    }

    /// Release every cached device handle and empty the table. The lock set
    /// and recorded kernel arguments are cleared with it.
    pub fn reset_cache(&mut self) {
        debug!("clearing cache");
        let populated = self.lines.iter().filter(|line| line.is_populated()).count() as u64;
        let failures = self.release_all();
        if failures > 0 {
            warn!(failures, "failed to release device buffers while clearing the cache");
        }
        for line in &mut self.lines {
            line.clear();
        }
        self.locked.clear();
        self.kernel_args.clear();
        emit_metric!(MetricEvent::CacheCleared { lines_released: populated });
    }

    /// Zero all statistics counters.
    pub fn reset_timers(&mut self) {
        self.stats.reset();
    }

    /// Render the full line table and geometry summary.
    pub fn format_cache(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(out, "{}", "=".repeat(93));
        for (idx, line) in self.lines.iter().enumerate() {
            if self.organisation == Organisation::SetAssociative && idx % self.geometry.lines_per_set == 0 {
                let _ = writeln!(out, "{}", "-".repeat(93));
            }
            let tag = line.tag.map_or_else(|| "-".to_string(), |t| format!("{:#x}", t.addr()));
            let device = line.device.map_or_else(|| "-".to_string(), |d| format!("{}", d.0));
            let _ = writeln!(
                out,
                "Line {idx:<6} Flag: {:<8} Age: {:<6} Tag: {tag:<18} Size: {:<10} Device: {device}",
                line.flag, line.age, line.size,
            );
        }
        let _ = writeln!(out, "{:<30} {}", "Cache organisation:", self.organisation);
        let _ = writeln!(out, "{:<30} {}", "Cache replacement policy:", self.policy);
        let _ = writeln!(out, "{:<30} {}", "Cache number of sets:", self.geometry.set_count);
        let _ = writeln!(out, "{:<30} {}", "Cache number of lines:", self.geometry.line_count);
        let _ = write!(out, "{}", "=".repeat(93));
        out
    }

    pub fn print_cache(&self) {
        println!("{}", self.format_cache());
    }

    /// Print the statistics table.
    pub fn print_time_profile(&self) {
        println!("{}", self.stats);
    }

    /// Append one space-separated profile line (plus `extra` free-form
    /// fields) to the configured log file.
    pub fn write_time_profile_to_file(&self, extra: &[String]) -> std::io::Result<()> {
        self.profile_record().append_to(&self.profile_log, self.decimal_separator, extra)
    }

    /// Snapshot of the fields that go into a profile line.
    pub fn profile_record(&self) -> ProfileRecord<'_> {
        ProfileRecord {
            organisation: self.organisation,
            policy: self.policy,
            geometry: self.geometry,
            stats: &self.stats,
        }
    }

    /// Scan the set `tag` hashes to. Under LRU every scanned line ages and a
    /// match is rejuvenated; other policies short-circuit on the match.
    fn lookup(&mut self, tag: HostPtr) -> Option<usize> {
        let set = self.geometry.set_index(tag);
        let mut found = None;
        for idx in self.geometry.set_range(set) {
            if self.lines[idx].tag == Some(tag) {
                found = Some(idx);
                if self.policy != ReplacementPolicy::Lru {
                    break;
                }
            }
            if self.policy == ReplacementPolicy::Lru {
                self.lines[idx].age += 1;
            }
        }
        if self.policy == ReplacementPolicy::Lru
            && let Some(idx) = found
        {
            self.lines[idx].age = 0;
        }
        found
    }

    /// Overwrite a line with a fresh mapping, flushing and releasing the
    /// victim's resources first, and lock the result.
    ///
    /// `at` pins the index (in-place reinsertion of a stale line); otherwise
    /// the indexer and replacement policy choose the victim.
    fn insert(
        &mut self,
        tag: HostPtr,
        size: usize,
        device: BufferHandle,
        flag: CoherenceFlag,
        at: Option<usize>,
    ) -> Result<usize, CacheError> {
        let idx = match at {
            Some(idx) => idx,
            None => self.pick_slot(tag)?,
        };

        let victim_flushed = self.write_policy.is_write_back() && self.lines[idx].flag == CoherenceFlag::Device;
        if victim_flushed {
            self.flush_line(idx)?;
        }

        if let Some(old) = self.lines[idx].device
            && old != device
        {
            self.release_handle(old);
        }

        if self.lines[idx].is_populated() && self.lines[idx].tag != Some(tag) {
            debug!(line = idx, victim = ?self.lines[idx].tag, incoming = ?tag, "evicting line");
            emit_metric!(MetricEvent::CacheEviction {
                line: idx as u64,
                flushed: victim_flushed,
                bytes: self.lines[idx].size as u64,
            });
        }

        self.lines[idx] = CacheLine {
            flag,
            age: 0,
            size,
            tag: Some(tag),
            device: Some(device),
        };
        self.locked.insert(idx);
        Ok(idx)
    }

    /// Choose the line a new tag lands on. Direct-mapped has one candidate;
    /// when that candidate is locked the fallback is a random unlocked line
    /// anywhere in the table.
    fn pick_slot(&mut self, tag: HostPtr) -> Result<usize, CacheError> {
        let set = self.geometry.set_index(tag);
        let mut ctx = VictimContext {
            lines: &self.lines,
            geometry: &self.geometry,
            locked: &self.locked,
            fifo_cursors: &mut self.fifo_cursors,
            rng: &mut self.rng,
        };
        let picked = if self.organisation == Organisation::DirectMapped {
            if ctx.locked.contains(&set) {
                replacement::random_any(&mut ctx)
            } else {
                Ok(set)
            }
        } else {
            self.policy.pick_victim(set, &mut ctx)
        };
        picked.inspect_err(|err| {
            if matches!(err, CacheError::EvictionStarvation { .. }) {
                error!(%err, "eviction starved; dumping cache state\n{}", self.format_cache());
            }
        })
    }

    /// Copy a dirty line's device buffer back to its host region and settle
    /// the optimistic elision credit.
    fn flush_line(&mut self, idx: usize) -> Result<(), CacheError> {
        let queue = self.queue.ok_or(CacheError::NoCommandQueue)?;
        let CacheLine {
            device: Some(device),
            tag: Some(tag),
            size,
            ..
        } = self.lines[idx].clone()
        else {
            return Ok(());
        };

        let event = self.runtime.enqueue_read(queue, device, true, 0, size, tag, &[])?;
        let elapsed = self.runtime.event_elapsed_us(event)?;
        self.stats.device_to_host_us += elapsed;
        self.stats.bytes_saved = self.stats.bytes_saved.saturating_sub(size as u64);
        self.stats.bytes_d2h_saved = self.stats.bytes_d2h_saved.saturating_sub(size as u64);
        self.lines[idx].flag = CoherenceFlag::Both;
        debug!(line = idx, ?tag, "flushed dirty line to host");
        emit_metric!(MetricEvent::TransferCompleted {
            direction: TransferDirection::DeviceToHost,
            bytes: size as u64,
            duration_us: elapsed,
        });
        Ok(())
    }

    fn cached_handle(&self, idx: usize) -> BufferHandle {
        self.lines[idx].device.expect("populated line holds a device handle")
    }

    /// Release a handle the cache no longer tracks. Failure is reported, not
    /// propagated: the handle has already left the table either way.
    fn release_handle(&mut self, handle: BufferHandle) {
        self.live_buffers = self.live_buffers.saturating_sub(1);
        if let Err(status) = self.runtime.release_buffer(handle) {
            warn!(%status, code = status.code(), "failed to release device buffer");
        }
    }

    /// Release every cached handle, returning the number of failures.
    fn release_all(&mut self) -> u32 {
        let mut failures = 0;
        for idx in 0..self.lines.len() {
            if let Some(handle) = self.lines[idx].device.take() {
                self.live_buffers = self.live_buffers.saturating_sub(1);
                if self.runtime.release_buffer(handle).is_err() {
                    failures += 1;
                }
            }
        }
        failures
    }
}

impl<R: ComputeRuntime> Drop for BufferCache<R> {
    fn drop(&mut self) {
        let failures = self.release_all();
        if failures > 0 {
            warn!(failures, "failed to release device buffers during teardown");
        }
    }
}
