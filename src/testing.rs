//! Linked-in allocators for tests and benchmarks.
//!
//! - [`emulated_capabilities`]: emulates the heap allocator with `memfd`, so
//!   buffers can be allocated, mapped and released on any Linux host. Cache
//!   barriers fail on these descriptors (`ENOTTY`), since they are not
//!   DMA-BUFs.
//! - [`kernel_heap_capabilities`]: allocates from `/dev/dma_heap/<name>`
//!   directly, producing real DMA-BUFs where the kernel exposes heaps.
//! - [`udmabuf_capabilities`]: wraps sealed memfds into real DMA-BUFs through
//!   `/dev/udmabuf`, for hosts that have no heaps but do have udmabuf.

use crate::memory::defaults::{CMA_HEAP, SYSTEM_HEAP};
use crate::provider::{Capabilities, ProviderConfig};
use rustix::fd::{AsRawFd, IntoRawFd};
use rustix::fs::{MemfdFlags, Mode, OFlags, SealFlags};
use std::ffi::{CStr, c_char, c_int, c_uint, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Allocators created by the emulated create entry point, process-wide.
static EMULATED_CREATED: AtomicUsize = AtomicUsize::new(0);

/// Allocators destroyed by the emulated destroy entry point, process-wide.
static EMULATED_DESTROYED: AtomicUsize = AtomicUsize::new(0);

/// Heaps the emulated allocator recognizes.
const EMULATED_HEAPS: &[&str] = &[SYSTEM_HEAP, CMA_HEAP];

/// Heap root exposed by the kernel.
const DMA_HEAP_DIR: &str = "/dev/dma_heap";

/// udmabuf control device.
const UDMABUF_DEVICE: &str = "/dev/udmabuf";

/// UDMABUF_CREATE ioctl number: _IOW('u', 0x42, struct udmabuf_create)
const UDMABUF_CREATE: u32 = 0x4018_7542;

/// UDMABUF_FLAGS_CLOEXEC
const UDMABUF_FLAGS_CLOEXEC: u32 = 0x01;

/// udmabuf_create structure for UDMABUF_CREATE.
#[repr(C)]
struct UdmabufCreate {
    memfd: u32,
    flags: u32,
    offset: u64,
    size: u64,
}

/// DMA_HEAP_IOCTL_ALLOC ioctl number: _IOWR('H', 0, struct dma_heap_allocation_data)
const DMA_HEAP_IOCTL_ALLOC: u32 = 0xc018_4800;

/// dma_heap_allocation_data structure for DMA_HEAP_IOCTL_ALLOC.
#[repr(C)]
struct DmaHeapAllocationData {
    /// Requested length in bytes.
    len: u64,
    /// OUTPUT: DMA-BUF file descriptor.
    fd: u32,
    /// Flags for the new descriptor (O_RDWR, O_CLOEXEC).
    fd_flags: u32,
    /// Heap-specific flags.
    heap_flags: u64,
}

fn neg_errno(errno: rustix::io::Errno) -> c_int {
    -errno.raw_os_error()
}

unsafe extern "C" fn emulated_create() -> *mut c_void {
    EMULATED_CREATED.fetch_add(1, Ordering::Relaxed);
    Box::into_raw(Box::new(0u8)).cast()
}

unsafe extern "C" fn emulated_alloc(
    allocator: *mut c_void,
    heap_name: *const c_char,
    len: usize,
    _heap_flags: c_uint,
    _legacy_align: usize,
) -> c_int {
    if allocator.is_null() || heap_name.is_null() || len == 0 {
        return -libc::EINVAL;
    }
    // SAFETY: Callers pass a NUL-terminated heap name.
    let heap = unsafe { CStr::from_ptr(heap_name) };
    let Some(heap) = heap.to_str().ok().filter(|h| EMULATED_HEAPS.contains(h)) else {
        return -libc::ENOENT;
    };

    let fd = match rustix::fs::memfd_create(format!("dmaheap-{heap}"), MemfdFlags::CLOEXEC) {
        Ok(fd) => fd,
        Err(e) => return neg_errno(e),
    };
    if let Err(e) = rustix::fs::ftruncate(&fd, len as u64) {
        return neg_errno(e);
    }
    fd.into_raw_fd()
}

unsafe extern "C" fn emulated_destroy(allocator: *mut c_void) {
    if !allocator.is_null() {
        // SAFETY: Created by Box::into_raw in emulated_create.
        drop(unsafe { Box::from_raw(allocator.cast::<u8>()) });
        EMULATED_DESTROYED.fetch_add(1, Ordering::Relaxed);
    }
}

unsafe extern "C" fn null_create() -> *mut c_void {
    std::ptr::null_mut()
}

unsafe extern "C" fn kernel_alloc(
    allocator: *mut c_void,
    heap_name: *const c_char,
    len: usize,
    heap_flags: c_uint,
    _legacy_align: usize,
) -> c_int {
    if allocator.is_null() || heap_name.is_null() {
        return -libc::EINVAL;
    }
    // SAFETY: Callers pass a NUL-terminated heap name.
    let heap = unsafe { CStr::from_ptr(heap_name) }.to_string_lossy();
    let path = format!("{DMA_HEAP_DIR}/{heap}");

    let heap_fd = match rustix::fs::open(path, OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty()) {
        Ok(fd) => fd,
        Err(e) => return neg_errno(e),
    };

    let mut data = DmaHeapAllocationData {
        len: len as u64,
        fd: 0,
        fd_flags: (libc::O_RDWR | libc::O_CLOEXEC) as u32,
        heap_flags: heap_flags as u64,
    };
    // SAFETY: DMA_HEAP_IOCTL_ALLOC reads and writes one
    // dma_heap_allocation_data, valid for the duration of the call.
    let ret = unsafe { libc::ioctl(heap_fd.as_raw_fd(), DMA_HEAP_IOCTL_ALLOC as _, &mut data) };
    if ret < 0 {
        return last_errno();
    }
    data.fd as c_int
}

fn last_errno() -> c_int {
    -std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

unsafe extern "C" fn udmabuf_alloc(
    allocator: *mut c_void,
    heap_name: *const c_char,
    len: usize,
    _heap_flags: c_uint,
    _legacy_align: usize,
) -> c_int {
    if allocator.is_null() || heap_name.is_null() || len == 0 {
        return -libc::EINVAL;
    }
    // SAFETY: Callers pass a NUL-terminated heap name.
    let heap = unsafe { CStr::from_ptr(heap_name) };
    if !heap.to_str().is_ok_and(|h| EMULATED_HEAPS.contains(&h)) {
        return -libc::ENOENT;
    }

    let device = match rustix::fs::open(UDMABUF_DEVICE, OFlags::RDWR | OFlags::CLOEXEC, Mode::empty()) {
        Ok(fd) => fd,
        Err(e) => return neg_errno(e),
    };
    // udmabuf requires a shrink-sealed memfd; the dma-buf keeps its pages
    // alive after the memfd is closed.
    let memfd = match rustix::fs::memfd_create(
        "dmaheap-udmabuf",
        MemfdFlags::CLOEXEC | MemfdFlags::ALLOW_SEALING,
    ) {
        Ok(fd) => fd,
        Err(e) => return neg_errno(e),
    };
    if let Err(e) = rustix::fs::ftruncate(&memfd, len as u64) {
        return neg_errno(e);
    }
    if let Err(e) = rustix::fs::fcntl_add_seals(&memfd, SealFlags::SHRINK) {
        return neg_errno(e);
    }

    let mut create = UdmabufCreate {
        memfd: memfd.as_raw_fd() as u32,
        flags: UDMABUF_FLAGS_CLOEXEC,
        offset: 0,
        size: len as u64,
    };
    // SAFETY: UDMABUF_CREATE reads one udmabuf_create, valid for the call.
    let ret = unsafe { libc::ioctl(device.as_raw_fd(), UDMABUF_CREATE as _, &mut create) };
    if ret < 0 {
        return last_errno();
    }
    ret
}

/// Capabilities emulating the heap allocator with memfd.
///
/// Recognizes the `"system"` and `"linux,cma"` heaps; other names fail with
/// `ENOENT`.
pub fn emulated_capabilities() -> Capabilities {
    Capabilities::new(emulated_create, emulated_alloc, emulated_destroy)
}

/// Provider configuration using [`emulated_capabilities`].
pub fn emulated_config() -> ProviderConfig {
    ProviderConfig::linked(emulated_capabilities())
}

/// Number of allocators the emulated create entry point has produced in
/// this process.
pub fn emulated_allocators_created() -> usize {
    EMULATED_CREATED.load(Ordering::Relaxed)
}

/// Number of allocators the emulated destroy entry point has freed in this
/// process. Shared by every linked configuration in this module.
pub fn emulated_allocators_destroyed() -> usize {
    EMULATED_DESTROYED.load(Ordering::Relaxed)
}

/// Provider configuration whose create entry point returns null.
pub fn null_create_config() -> ProviderConfig {
    ProviderConfig::linked(Capabilities::new(null_create, emulated_alloc, emulated_destroy))
}

/// Capabilities allocating from the kernel's DMA heaps.
pub fn kernel_heap_capabilities() -> Capabilities {
    Capabilities::new(emulated_create, kernel_alloc, emulated_destroy)
}

/// Provider configuration using [`kernel_heap_capabilities`].
pub fn kernel_heap_config() -> ProviderConfig {
    ProviderConfig::linked(kernel_heap_capabilities())
}

/// Capabilities creating DMA-BUFs through `/dev/udmabuf`.
///
/// Recognizes the same heap names as [`emulated_capabilities`]. Len must be
/// page-aligned, which the provider's alignment guarantees.
pub fn udmabuf_capabilities() -> Capabilities {
    Capabilities::new(emulated_create, udmabuf_alloc, emulated_destroy)
}

/// Provider configuration using [`udmabuf_capabilities`].
pub fn udmabuf_config() -> ProviderConfig {
    ProviderConfig::linked(udmabuf_capabilities())
}

/// Whether `/dev/udmabuf` exists and can be opened for writing.
pub fn udmabuf_available() -> bool {
    rustix::fs::open(UDMABUF_DEVICE, OFlags::RDWR | OFlags::CLOEXEC, Mode::empty()).is_ok()
}

/// Whether `/dev/dma_heap/<heap>` exists and can be opened.
pub fn kernel_heap_available(heap: &str) -> bool {
    rustix::fs::open(
        format!("{DMA_HEAP_DIR}/{heap}"),
        OFlags::RDONLY | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .is_ok()
}
