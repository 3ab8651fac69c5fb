//! DMA heap buffers.
//!
//! This module provides the buffer side of dmaheap: allocation records,
//! the owning [`SharedBuffer`], and the cache-coherency protocol around CPU
//! access.
//!
//! # Architecture
//!
//! - [`AllocationRecord`]: Descriptor + aligned size, valid or empty
//! - [`SharedBuffer`]: Owns one record and at most one CPU mapping
//! - [`SyncMode`] / [`CpuAccess`]: Start/end barriers around CPU access
//!
//! # Example
//!
//! ```rust,ignore
//! use dmaheap::memory::{SharedBuffer, SyncMode};
//!
//! let mut buffer = SharedBuffer::create(1024 * 1024)?;
//!
//! let ptr = buffer.get_cpu_pointer()?;
//! buffer.sync_begin(SyncMode::WriteOnly)?;
//! unsafe { ptr.as_ptr().write_bytes(0, buffer.record_size()) };
//! buffer.sync_end(SyncMode::WriteOnly)?;
//!
//! // Unmapped, then closed.
//! drop(buffer);
//! ```

pub mod defaults;
mod dmabuf;
pub(crate) mod record;
mod sync;

pub use dmabuf::{BufferOptions, SharedBuffer};
pub use record::{AllocationRecord, INVALID_FD, aligned_size, check_alignment};
pub use sync::{CpuAccess, SyncMode};
