//! Platform heap allocator resolution.
//!
//! The heap allocator lives in a platform library (`libdmabufheap.so` on
//! Android) that may or may not be present. This module loads it at runtime
//! and resolves its three entry points:
//!
//! ```c
//! void *CreateDmabufHeapBufferAllocator();
//! int DmabufHeapAlloc(void *allocator, const char *heap_name, size_t len,
//!                     unsigned int heap_flags, size_t legacy_align);
//! void FreeDmabufHeapBufferAllocator(void *allocator);
//! ```
//!
//! Either all three resolve and the allocator is created, or the facility is
//! reported unavailable. There is no partially working state.
//!
//! # Example
//!
//! ```rust,ignore
//! use dmaheap::provider::AllocatorProvider;
//!
//! match AllocatorProvider::get_instance() {
//!     Some(provider) => {
//!         let record = provider.allocate(4096, 0x1000, "system")?;
//!         // ...
//!     }
//!     None => {
//!         // No DMA heaps here; use ordinary memory.
//!     }
//! }
//! ```

mod allocator;
mod capability;
mod config;

pub use allocator::AllocatorProvider;
pub use capability::{Capabilities, CreateAllocatorFn, DestroyAllocatorFn, HeapAllocFn};
pub use config::{CapabilitySource, ProviderConfig};
