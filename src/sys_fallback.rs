//! Stub kernel primitives for platforms without DMA-BUF.
//!
//! Every operation reports `Unsupported`; the provider never initializes
//! here, so no buffer reaches these paths in practice.

use rustix::fd::BorrowedFd;
use std::ptr::NonNull;

pub(crate) const SUPPORTED: bool = false;

pub(crate) const DMA_BUF_SYNC_READ: u64 = 1 << 0;
pub(crate) const DMA_BUF_SYNC_WRITE: u64 = 1 << 1;
pub(crate) const DMA_BUF_SYNC_RW: u64 = DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE;
pub(crate) const DMA_BUF_SYNC_START: u64 = 0;
pub(crate) const DMA_BUF_SYNC_END: u64 = 1 << 2;

fn unsupported() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "DMA-BUF is only available on Linux and Android",
    )
}

pub(crate) fn map_shared(_fd: BorrowedFd<'_>, _len: usize) -> std::io::Result<NonNull<u8>> {
    Err(unsupported())
}

pub(crate) unsafe fn unmap(_ptr: NonNull<u8>, _len: usize) -> std::io::Result<()> {
    Err(unsupported())
}

pub(crate) fn dma_buf_sync(_fd: BorrowedFd<'_>, _flags: u64) -> std::io::Result<()> {
    Err(unsupported())
}
