//! Integration test for the process-wide allocator provider.
//!
//! The scenario runs as a single test because every step observes or
//! mutates the one process-wide instance.

#![cfg(any(target_os = "linux", target_os = "android"))]

use dmaheap::memory::{BufferOptions, SharedBuffer, SyncMode};
use dmaheap::provider::AllocatorProvider;
use dmaheap::testing::{
    emulated_allocators_created, emulated_allocators_destroyed, emulated_config,
};
use dmaheap::Error;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_singleton_lifecycle() {
    AllocatorProvider::configure(emulated_config()).unwrap();
    assert!(AllocatorProvider::current().is_none());
    assert_eq!(emulated_allocators_created(), 0);

    // Concurrent first-time initialization yields one allocator.
    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                AllocatorProvider::get_instance().expect("emulated provider available")
            })
        })
        .collect();
    let providers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let first = &providers[0];
    let handle = first.allocator_handle().unwrap();
    for provider in &providers {
        assert!(Arc::ptr_eq(provider, first));
        assert_eq!(provider.allocator_handle(), Some(handle));
    }
    assert_eq!(first.load_count(), 1);
    assert_eq!(emulated_allocators_created(), 1);

    // Configuration is frozen once initialized.
    assert!(matches!(
        AllocatorProvider::configure(emulated_config()),
        Err(Error::InvalidState(_))
    ));

    // Default creation goes through the process-wide instance.
    let mut buffer = SharedBuffer::create(512 * 512 * 4).unwrap();
    assert_eq!(buffer.record_size(), 0x10_0000);
    assert!(buffer.descriptor() >= 0);
    buffer.get_cpu_pointer().unwrap();

    let options = BufferOptions::default().alignment(0x10_0000);
    let large = SharedBuffer::create_with(100, &options).unwrap();
    assert_eq!(large.record_size(), 0x10_0000);
    drop(large);

    // Shutdown while a buffer is alive: once the last Arc goes, the buffer
    // closes its descriptor without the provider.
    drop(providers);
    AllocatorProvider::shutdown();
    assert!(AllocatorProvider::current().is_none());
    assert_eq!(emulated_allocators_destroyed(), 1);
    assert_eq!(buffer.record_size(), 0x10_0000);
    assert!(matches!(buffer.sync_begin(SyncMode::ReadOnly), Err(Error::SyncFailed(_))));
    buffer.release();
    assert!(buffer.is_released());

    // Shutdown is idempotent and the next access re-initializes.
    AllocatorProvider::shutdown();
    let provider = AllocatorProvider::get_instance().unwrap();
    assert_eq!(emulated_allocators_created(), 2);
    assert_eq!(provider.load_count(), 1);
    assert!(SharedBuffer::create(4096).is_ok());

    AllocatorProvider::shutdown();
    assert!(!provider.is_ready());
    assert_eq!(emulated_allocators_destroyed(), 2);
}
