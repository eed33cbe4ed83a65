//! Host-to-device elision behaviour of the create/write paths.

mod common;

use common::{CTX, MockRuntime, QUEUE, plain_buffer};
use opal::{BufferCache, CacheConfig, CoherenceFlag, HostPtr, MemFlags, Organisation, ReplacementPolicy};

fn write_through_cache(runtime: MockRuntime, lines: usize) -> BufferCache<MockRuntime> {
    let config = CacheConfig::new(Organisation::FullyAssociative, ReplacementPolicy::Lru, lines);
    BufferCache::with_seed(runtime, config, 42).unwrap()
}

#[test]
fn repeated_writes_of_the_same_region_hit() {
    let runtime = MockRuntime::new();
    let mut cache = write_through_cache(runtime.clone(), 4);
    let hp = HostPtr(0x100);

    let mut buffer = cache
        .create_buffer(CTX, MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR, 64, Some(hp))
        .unwrap();
    cache.enqueue_write(QUEUE, &mut buffer, true, 0, 64, hp, &[]).unwrap();
    cache.enqueue_write(QUEUE, &mut buffer, true, 0, 64, hp, &[]).unwrap();

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.bytes_h2d_total, 192);
    assert_eq!(stats.bytes_h2d_saved, 128);
    assert_eq!(stats.bytes_total, 192);
    assert_eq!(stats.bytes_saved, 128);
    // Exactly one host-to-device shipment: the populating create.
    assert_eq!(runtime.state().h2d_shipments(), 1);
}

#[test]
fn create_without_host_copy_semantics_bypasses_the_cache() {
    let runtime = MockRuntime::new();
    let mut cache = write_through_cache(runtime.clone(), 4);
    let hp = HostPtr(0x100);

    cache.create_buffer(CTX, MemFlags::READ_WRITE, 64, Some(hp)).unwrap();
    cache.create_buffer(CTX, MemFlags::READ_WRITE, 64, Some(hp)).unwrap();

    let stats = cache.stats();
    assert_eq!(stats.hits + stats.misses, 0);
    assert_eq!(stats.bytes_total, 0);
    assert_eq!(runtime.state().creates, 2);
    assert!(cache.flag_of(hp).is_none());
}

#[test]
fn write_hit_substitutes_the_cached_handle_and_releases_the_callers() {
    let runtime = MockRuntime::new();
    let mut cache = write_through_cache(runtime.clone(), 4);
    let hp = HostPtr(0x200);

    let mut original = plain_buffer(&mut cache, 32);
    cache.enqueue_write(QUEUE, &mut original, true, 0, 32, hp, &[]).unwrap();

    let fresh = plain_buffer(&mut cache, 32);
    let mut caller_view = fresh;
    cache.enqueue_write(QUEUE, &mut caller_view, true, 0, 32, hp, &[]).unwrap();

    // The cache's handle is authoritative; the caller's duplicate is gone.
    assert_eq!(caller_view, original);
    assert_eq!(runtime.state().release_count(fresh), 1);
    assert_eq!(runtime.state().release_count(original), 0);
    assert_eq!(runtime.state().writes.len(), 1);
}

#[test]
fn stale_host_flag_forces_a_refetch_in_place() {
    let runtime = MockRuntime::new();
    let mut cache = write_through_cache(runtime.clone(), 1);
    let hp = HostPtr(0x600);

    let mut buffer = plain_buffer(&mut cache, 16);
    cache.enqueue_write(QUEUE, &mut buffer, true, 0, 16, hp, &[]).unwrap();
    assert_eq!(cache.flag_of(hp), Some(CoherenceFlag::Both));

    // The application rewrote the host region behind the cache's back.
    cache.set_dirty_flag(hp, CoherenceFlag::Host);

    let replacement = cache
        .create_buffer(CTX, MemFlags::READ_ONLY | MemFlags::COPY_HOST_PTR, 16, Some(hp))
        .unwrap();

    assert_ne!(replacement, buffer);
    assert_eq!(cache.flag_of(hp), Some(CoherenceFlag::Both));
    assert_eq!(cache.stats().misses, 2);
    assert_eq!(cache.stats().hits, 0);
    // The stale line was reinserted in place: its old handle was released.
    assert_eq!(runtime.state().release_count(buffer), 1);
    assert_eq!(runtime.state().creates_with_data, 1);
}

#[test]
fn read_then_reinsert_leaves_the_line_unchanged() {
    let runtime = MockRuntime::new();
    let mut cache = write_through_cache(runtime.clone(), 4);
    let hp = HostPtr(0x140);

    let buffer = cache
        .create_buffer(CTX, MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR, 64, Some(hp))
        .unwrap();
    cache.enqueue_read(QUEUE, buffer, true, 0, 64, hp, &[]).unwrap();
    let flag_after_read = cache.flag_of(hp);
    let again = cache
        .create_buffer(CTX, MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR, 64, Some(hp))
        .unwrap();

    assert_eq!(again, buffer);
    assert_eq!(flag_after_read, Some(CoherenceFlag::Both));
    assert_eq!(cache.flag_of(hp), Some(CoherenceFlag::Both));
    // Write-through read really transferred, so nothing was elided d2h.
    assert_eq!(cache.stats().bytes_d2h_total, 64);
    assert_eq!(cache.stats().bytes_d2h_saved, 0);
    assert_eq!(runtime.state().reads.len(), 1);
    assert!(runtime.state().releases.is_empty());
}

#[test]
fn counters_never_move_backwards() {
    let runtime = MockRuntime::new();
    let mut cache = write_through_cache(runtime, 2);
    let mut last_ops = 0;
    let mut last_total = 0;

    for step in 0..12u64 {
        let hp = HostPtr(0x40 * (step % 3) as usize + 0x40);
        let mut buffer = plain_buffer(&mut cache, 16);
        cache.enqueue_write(QUEUE, &mut buffer, true, 0, 16, hp, &[]).unwrap();
        cache.enqueue_read(QUEUE, buffer, true, 0, 16, hp, &[]).unwrap();

        let stats = cache.stats();
        assert!(stats.hits + stats.misses >= last_ops);
        assert!(stats.bytes_total >= last_total);
        assert!(stats.bytes_saved <= stats.bytes_total);
        last_ops = stats.hits + stats.misses;
        last_total = stats.bytes_total;
    }
}
