//! # dmaheap
//!
//! DMA-BUF heap buffers for sharing memory between the CPU and devices
//! (GPU, display, camera, DSP) on Linux and Android.
//!
//! dmaheap allocates buffers through the platform's heap allocator library,
//! maps them for CPU access on demand, brackets CPU access with the kernel's
//! cache-coherency barriers, and tears everything down in the one safe order:
//! unmap, then close.
//!
//! ## Features
//!
//! - **Runtime resolution**: the allocator library is loaded on first use;
//!   its absence is a normal outcome, not an error
//! - **Lazy mapping**: buffers are mapped for the CPU only when asked
//! - **Explicit coherency**: `DMA_BUF_IOCTL_SYNC` begin/end barriers
//! - **Ordered release**: unmap-before-free enforced inside one method
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dmaheap::prelude::*;
//!
//! let Ok(mut buffer) = SharedBuffer::create(512 * 512 * 4) else {
//!     // No DMA heaps on this system.
//!     return;
//! };
//!
//! // Give the descriptor to an importer (EGL, Vulkan, ...).
//! let fd = buffer.descriptor();
//!
//! // Fill it from the CPU.
//! let mut access = buffer.access(SyncMode::WriteOnly)?;
//! access.as_mut_slice().unwrap().fill(0);
//! access.finish()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod memory;
pub mod provider;

#[cfg(all(
    any(target_os = "linux", target_os = "android"),
    any(test, feature = "testing")
))]
pub mod testing;

#[cfg_attr(any(target_os = "linux", target_os = "android"), path = "sys_linux.rs")]
#[cfg_attr(
    not(any(target_os = "linux", target_os = "android")),
    path = "sys_fallback.rs"
)]
mod sys;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::memory::{BufferOptions, CpuAccess, SharedBuffer, SyncMode};
    pub use crate::provider::{AllocatorProvider, ProviderConfig};
}

pub use error::{Error, Result};
