//! Integration test for allocator teardown.
//!
//! Runs as a single test because it reads the process-wide create and
//! destroy counters of the emulated allocator.

#![cfg(any(target_os = "linux", target_os = "android"))]

use dmaheap::memory::{BufferOptions, SharedBuffer};
use dmaheap::provider::AllocatorProvider;
use dmaheap::testing::{
    emulated_allocators_created, emulated_allocators_destroyed, emulated_config,
    null_create_config,
};

#[test]
fn test_allocator_destroyed_exactly_once() {
    assert_eq!(emulated_allocators_created(), 0);
    assert_eq!(emulated_allocators_destroyed(), 0);

    // Explicit release destroys; a second release and the drop add nothing.
    let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
    assert_eq!(emulated_allocators_created(), 1);
    provider.release();
    assert_eq!(emulated_allocators_destroyed(), 1);
    provider.release();
    assert_eq!(emulated_allocators_destroyed(), 1);
    drop(provider);
    assert_eq!(emulated_allocators_destroyed(), 1);

    // Dropping a ready provider destroys its allocator.
    let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
    let mut buffer =
        SharedBuffer::create_in(&provider, 4096, &BufferOptions::default()).unwrap();
    buffer.get_cpu_pointer().unwrap();
    drop(provider);
    assert_eq!(emulated_allocators_created(), 2);
    assert_eq!(emulated_allocators_destroyed(), 2);

    // The buffer outlives the allocator and still tears down.
    buffer.release();
    assert!(buffer.is_released());
    assert_eq!(emulated_allocators_destroyed(), 2);

    // A failed setup created nothing, so it destroys nothing.
    assert!(AllocatorProvider::with_config(null_create_config()).is_err());
    assert_eq!(emulated_allocators_created(), 2);
    assert_eq!(emulated_allocators_destroyed(), 2);

    // Shutdown of the process-wide instance destroys it once.
    AllocatorProvider::configure(emulated_config()).unwrap();
    let provider = AllocatorProvider::get_instance().unwrap();
    assert_eq!(emulated_allocators_created(), 3);
    AllocatorProvider::shutdown();
    assert_eq!(emulated_allocators_destroyed(), 3);
    AllocatorProvider::shutdown();
    drop(provider);
    assert_eq!(emulated_allocators_destroyed(), 3);
}
