//! Kernel primitives for DMA-BUF descriptors (Linux and Android).

use rustix::fd::{AsRawFd, BorrowedFd};
use rustix::mm::{MapFlags, ProtFlags};
use std::ptr::NonNull;

/// The facility can exist on this platform.
pub(crate) const SUPPORTED: bool = true;

// DMA_BUF_IOCTL_SYNC and its flags, from <linux/dma-buf.h>.
// See: https://www.kernel.org/doc/html/latest/driver-api/dma-buf.html

/// DMA_BUF_IOCTL_SYNC ioctl number: _IOW('b', 0, struct dma_buf_sync)
const DMA_BUF_IOCTL_SYNC: u32 = 0x4008_6200;

pub(crate) const DMA_BUF_SYNC_READ: u64 = 1 << 0;
pub(crate) const DMA_BUF_SYNC_WRITE: u64 = 1 << 1;
pub(crate) const DMA_BUF_SYNC_RW: u64 = DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE;
pub(crate) const DMA_BUF_SYNC_START: u64 = 0;
pub(crate) const DMA_BUF_SYNC_END: u64 = 1 << 2;

/// dma_buf_sync structure for DMA_BUF_IOCTL_SYNC.
#[repr(C)]
struct DmaBufSync {
    flags: u64,
}

/// Map `[0, len)` of `fd` as shared read/write memory.
pub(crate) fn map_shared(fd: BorrowedFd<'_>, len: usize) -> std::io::Result<NonNull<u8>> {
    // SAFETY: a fresh mapping at a kernel-chosen address aliases nothing.
    let ptr = unsafe {
        rustix::mm::mmap(
            std::ptr::null_mut(),
            len,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )?
    };

    NonNull::new(ptr.cast::<u8>())
        .ok_or_else(|| std::io::Error::other("mmap returned null"))
}

/// Unmap a region returned by [`map_shared`].
///
/// # Safety
///
/// `ptr` and `len` must describe exactly one live mapping from
/// [`map_shared`], and nothing may reference it afterwards.
pub(crate) unsafe fn unmap(ptr: NonNull<u8>, len: usize) -> std::io::Result<()> {
    unsafe { rustix::mm::munmap(ptr.as_ptr().cast(), len)? };
    Ok(())
}

/// Issue a cache-coherency barrier on a DMA-BUF descriptor.
///
/// Retries on `EINTR`/`EAGAIN`, which the kernel documents as transient for
/// this ioctl.
pub(crate) fn dma_buf_sync(fd: BorrowedFd<'_>, flags: u64) -> std::io::Result<()> {
    let mut sync = DmaBufSync { flags };
    loop {
        // SAFETY: DMA_BUF_IOCTL_SYNC reads one dma_buf_sync from the pointer,
        // which is valid for the duration of the call.
        let ret = unsafe { libc::ioctl(fd.as_raw_fd(), DMA_BUF_IOCTL_SYNC as _, &mut sync) };
        if ret == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
            _ => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustix::fd::AsFd;

    #[test]
    fn test_ioctl_number() {
        // _IOW('b', 0, u64) = dir(1) << 30 | size(8) << 16 | type('b') << 8 | nr(0)
        let expected = (1u32 << 30) | (8 << 16) | ((b'b' as u32) << 8);
        assert_eq!(DMA_BUF_IOCTL_SYNC, expected);
        assert_eq!(std::mem::size_of::<DmaBufSync>(), 8);
    }

    #[test]
    fn test_map_and_unmap_memfd() {
        let fd = rustix::fs::memfd_create("test_map", rustix::fs::MemfdFlags::CLOEXEC).unwrap();
        rustix::fs::ftruncate(&fd, 4096).unwrap();

        let ptr = map_shared(fd.as_fd(), 4096).unwrap();
        unsafe {
            ptr.as_ptr().write(0xAB);
            assert_eq!(ptr.as_ptr().read(), 0xAB);
            unmap(ptr, 4096).unwrap();
        }
    }

    #[test]
    fn test_sync_on_non_dmabuf_fails() {
        let fd = rustix::fs::memfd_create("test_sync", rustix::fs::MemfdFlags::CLOEXEC).unwrap();
        let err = dma_buf_sync(fd.as_fd(), DMA_BUF_SYNC_START | DMA_BUF_SYNC_READ).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTTY));
    }
}
