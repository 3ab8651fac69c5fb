//! Error types for dmaheap.

use thiserror::Error;

/// Result type alias using dmaheap's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for DMA heap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The heap allocator facility is not present on this system (library or
    /// one of its symbols missing, or an unsupported platform).
    #[error("dma heap facility unavailable: {0}")]
    FacilityUnavailable(String),

    /// The platform allocator refused the request.
    #[error("dma heap allocation failed: {0}")]
    AllocationFailed(String),

    /// Alignment was zero or not a power of two.
    #[error("invalid alignment {0:#x}: must be a non-zero power of two")]
    InvalidAlignment(usize),

    /// Mapping the buffer into the address space failed.
    #[error("mmap of dma buffer failed: {0}")]
    MappingFailed(#[source] std::io::Error),

    /// The `DMA_BUF_IOCTL_SYNC` cache barrier failed.
    #[error("DMA_BUF_IOCTL_SYNC failed: {0}")]
    SyncFailed(#[source] std::io::Error),

    /// Operation is not valid in the current state (released buffer,
    /// released provider, already-initialized singleton).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// True if this error only means the facility is absent on this host.
    ///
    /// Callers that treat DMA heaps as optional use this to fall back to
    /// ordinary memory instead of failing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::FacilityUnavailable(_))
    }
}
