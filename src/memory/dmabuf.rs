//! DMA-BUF heap buffers with lazy CPU mapping.
//!
//! A [`SharedBuffer`] owns one heap allocation and, once requested, one CPU
//! mapping of it. The descriptor can be handed to a GPU or display importer
//! (EGL `EGL_LINUX_DMA_BUF_EXT`, Vulkan external memory) while the CPU reads
//! and writes the same pages.
//!
//! # Example
//!
//! ```rust,ignore
//! use dmaheap::memory::{SharedBuffer, SyncMode};
//!
//! let mut buffer = SharedBuffer::create(512 * 512 * 4)?;
//! let fd = buffer.descriptor(); // hand to an importer
//!
//! let mut access = buffer.access(SyncMode::WriteOnly)?;
//! access.as_mut_slice().unwrap().fill(0xFF);
//! access.finish()?;
//! ```

use super::record::{AllocationRecord, check_alignment};
use super::sync::{CpuAccess, SyncMode, SyncPhase, sync_flags};
use crate::error::{Error, Result};
use crate::memory::defaults::{DEFAULT_ALIGNMENT, DEFAULT_HEAP};
use crate::provider::AllocatorProvider;
use rustix::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

/// Allocation parameters for [`SharedBuffer::create_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferOptions {
    /// Size alignment; must be a non-zero power of two.
    pub alignment: usize,
    /// Kernel heap to allocate from.
    pub heap_name: String,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            heap_name: DEFAULT_HEAP.to_string(),
        }
    }
}

impl BufferOptions {
    /// Set the alignment.
    pub fn alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the heap name.
    pub fn heap_name(mut self, heap_name: impl Into<String>) -> Self {
        self.heap_name = heap_name.into();
        self
    }
}

/// One DMA heap allocation with an optional CPU mapping.
///
/// # Lifecycle
///
/// Created by allocation ([`create`](Self::create)) or by wrapping a
/// descriptor owned elsewhere ([`borrow_raw`](Self::borrow_raw)). Released by
/// [`release`](Self::release) or on drop, which always unmaps the CPU view
/// before the descriptor is closed.
///
/// # Cache coherency
///
/// Callers must bracket every CPU read or write with
/// [`sync_begin`](Self::sync_begin) / [`sync_end`](Self::sync_end) in a mode
/// matching the access, or use [`access`](Self::access). This is not checked.
///
/// # Thread Safety
///
/// `SharedBuffer` is `Send + Sync`. Barriers and accessors take `&self`;
/// mapping, unmapping and release require `&mut self`.
pub struct SharedBuffer {
    /// Descriptor and aligned size.
    record: AllocationRecord,
    /// Size passed to `create` (before alignment).
    requested_size: usize,
    /// CPU mapping of `[0, record.size())`, created lazily.
    mapping: Option<NonNull<u8>>,
    /// Whether release closes the descriptor.
    owns_allocation: bool,
    /// Provider that allocated the record. Not kept alive by the buffer.
    provider: Weak<AllocatorProvider>,
}

impl SharedBuffer {
    /// Allocate `size` bytes from the system heap with page alignment.
    ///
    /// # Errors
    ///
    /// [`Error::FacilityUnavailable`] on systems without the heap allocator;
    /// see [`create_in`](Self::create_in) for the rest.
    pub fn create(size: usize) -> Result<Self> {
        Self::create_with(size, &BufferOptions::default())
    }

    /// Allocate `size` bytes with explicit alignment and heap.
    ///
    /// Uses the process-wide [`AllocatorProvider`], initializing it if
    /// needed. The alignment is validated before the provider is touched.
    pub fn create_with(size: usize, options: &BufferOptions) -> Result<Self> {
        check_alignment(options.alignment)?;
        let provider = AllocatorProvider::try_get_instance().inspect_err(|e| {
            tracing::debug!("SharedBuffer::create: no allocator provider: {}", e);
        })?;
        Self::create_in(&provider, size, options)
    }

    /// Allocate from a specific provider.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAlignment`] for a zero or non-power-of-two alignment
    /// - [`Error::AllocationFailed`] for a zero size, or if the heap refused
    ///   the request (unknown heap, exhaustion)
    /// - [`Error::InvalidState`] if the provider has been released
    pub fn create_in(
        provider: &Arc<AllocatorProvider>,
        size: usize,
        options: &BufferOptions,
    ) -> Result<Self> {
        check_alignment(options.alignment)?;
        let record = provider.allocate(size, options.alignment, &options.heap_name)?;

        Ok(Self {
            record,
            requested_size: size,
            mapping: None,
            owns_allocation: true,
            provider: Arc::downgrade(provider),
        })
    }

    /// Wrap a DMA-BUF descriptor owned elsewhere.
    ///
    /// The buffer maps and syncs the descriptor like an allocated one, but
    /// release never closes it.
    ///
    /// # Safety
    ///
    /// `fd` must be an open DMA-BUF descriptor of at least `size` bytes that
    /// stays open for the lifetime of the returned buffer.
    pub unsafe fn borrow_raw(fd: RawFd, size: usize) -> Result<Self> {
        if fd < 0 {
            return Err(Error::InvalidState("negative descriptor"));
        }
        if size == 0 {
            return Err(Error::AllocationFailed("size must be greater than 0".into()));
        }
        // SAFETY: Caller guarantees the descriptor is open. It is forgotten,
        // never closed, on release.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        let record = AllocationRecord::new(owned, size)
            .ok_or_else(|| Error::AllocationFailed("size must be greater than 0".into()))?;

        Ok(Self {
            record,
            requested_size: size,
            mapping: None,
            owns_allocation: false,
            provider: Weak::new(),
        })
    }

    /// Issue the start-of-access barrier for `mode`.
    ///
    /// # Errors
    ///
    /// [`Error::SyncFailed`] with the kernel's error; the buffer is left as
    /// it was. [`Error::InvalidState`] if the buffer was released.
    pub fn sync_begin(&self, mode: SyncMode) -> Result<()> {
        self.sync(SyncPhase::Begin, mode)
    }

    /// Issue the end-of-access barrier for `mode`.
    pub fn sync_end(&self, mode: SyncMode) -> Result<()> {
        self.sync(SyncPhase::End, mode)
    }

    fn sync(&self, phase: SyncPhase, mode: SyncMode) -> Result<()> {
        let fd = self
            .record
            .as_fd()
            .ok_or(Error::InvalidState("buffer released"))?;

        crate::sys::dma_buf_sync(fd, sync_flags(phase, mode)).map_err(|e| {
            tracing::error!(
                fd = self.record.raw_fd(),
                ?phase,
                ?mode,
                "error preparing the cache for buffer access: {}",
                e
            );
            Error::SyncFailed(e)
        })?;
        tracing::trace!(fd = self.record.raw_fd(), ?phase, ?mode, "dma buffer synced");
        Ok(())
    }

    /// Get the CPU address of the buffer, mapping it on first use.
    ///
    /// The mapping is readable, writable and shared, and spans the aligned
    /// [`record_size`](Self::record_size). Later calls return the same
    /// pointer until [`unmap`](Self::unmap) or release. A failed mapping is
    /// not cached, so the call can be retried.
    ///
    /// The pointer must not be used after the buffer is unmapped, released
    /// or dropped.
    pub fn get_cpu_pointer(&mut self) -> Result<NonNull<u8>> {
        if let Some(ptr) = self.mapping {
            return Ok(ptr);
        }

        let fd = self
            .record
            .as_fd()
            .ok_or(Error::InvalidState("buffer released"))?;
        let len = self.record.size();

        let ptr = crate::sys::map_shared(fd, len).map_err(|e| {
            tracing::error!(fd = self.record.raw_fd(), len, "mmap of dma buffer failed: {}", e);
            Error::MappingFailed(e)
        })?;

        tracing::debug!(fd = self.record.raw_fd(), len, "mapped dma buffer");
        self.mapping = Some(ptr);
        Ok(ptr)
    }

    /// Drop the CPU mapping, if any.
    ///
    /// Idempotent. A later [`get_cpu_pointer`](Self::get_cpu_pointer) maps
    /// again (possibly at a different address).
    ///
    /// # Errors
    ///
    /// Returns the `munmap` error and keeps the mapping recorded.
    pub fn unmap(&mut self) -> Result<()> {
        let Some(ptr) = self.mapping else {
            return Ok(());
        };

        // SAFETY: ptr/len describe the mapping created in get_cpu_pointer,
        // and &mut self guarantees no CpuAccess borrows it.
        unsafe { crate::sys::unmap(ptr, self.record.size())? };
        self.mapping = None;
        tracing::debug!(fd = self.record.raw_fd(), "unmapped dma buffer");
        Ok(())
    }

    /// Open a bracketed CPU access window.
    ///
    /// Maps the buffer if needed and issues the start barrier; the returned
    /// guard issues the end barrier.
    pub fn access(&mut self, mode: SyncMode) -> Result<CpuAccess<'_>> {
        let ptr = self.get_cpu_pointer()?;
        self.sync_begin(mode)?;
        Ok(CpuAccess::new(self, ptr, mode))
    }

    /// Unmap the CPU view, then free the allocation if this buffer owns it.
    ///
    /// The order is fixed: the descriptor is never closed while a mapping of
    /// it exists in this buffer. Calling `release` again does nothing.
    pub fn release(&mut self) {
        if !self.record.is_valid() {
            tracing::debug!("SharedBuffer::release: already released");
            return;
        }

        if let Err(e) = self.unmap() {
            // The mapping keeps its own reference to the buffer, so closing
            // the descriptor below is still sound; the mapping leaks.
            tracing::error!(fd = self.record.raw_fd(), "munmap failed, leaking mapping: {}", e);
            self.mapping = None;
        }

        if !self.owns_allocation {
            self.record.forget();
            return;
        }

        match self.provider.upgrade() {
            Some(provider) => provider.free(&mut self.record),
            None => {
                tracing::warn!(
                    fd = self.record.raw_fd(),
                    "SharedBuffer::release: allocator provider gone, closing descriptor directly"
                );
                self.record.close();
            }
        }
    }

    /// Duplicate the descriptor for an importer.
    ///
    /// The buffer keeps its own descriptor; the importer gets an independent
    /// reference to the same allocation.
    pub fn try_clone_descriptor(&self) -> Result<OwnedFd> {
        let fd = self
            .record
            .as_fd()
            .ok_or(Error::InvalidState("buffer released"))?;
        Ok(rustix::io::fcntl_dupfd_cloexec(fd, 0)?)
    }

    /// The size passed at creation.
    #[inline]
    pub fn requested_size(&self) -> usize {
        self.requested_size
    }

    /// The aligned allocation size (0 after release).
    #[inline]
    pub fn record_size(&self) -> usize {
        self.record.size()
    }

    /// The raw descriptor, or -1 after release.
    #[inline]
    pub fn descriptor(&self) -> RawFd {
        self.record.raw_fd()
    }

    /// Borrow the descriptor, or `None` after release.
    #[inline]
    pub fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        self.record.as_fd()
    }

    /// Whether release closes the descriptor.
    #[inline]
    pub fn owns_allocation(&self) -> bool {
        self.owns_allocation
    }

    /// Whether a CPU mapping currently exists.
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Whether the buffer has been released.
    #[inline]
    pub fn is_released(&self) -> bool {
        !self.record.is_valid()
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

// SAFETY: The descriptor can be used from any thread, and the mapping is
// only created or destroyed through &mut self.
unsafe impl Send for SharedBuffer {}

// SAFETY: &self methods only issue ioctls or read plain fields.
unsafe impl Sync for SharedBuffer {}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("fd", &self.record.raw_fd())
            .field("requested_size", &self.requested_size)
            .field("record_size", &self.record.size())
            .field("mapped", &self.mapping.is_some())
            .field("owns_allocation", &self.owns_allocation)
            .finish()
    }
}
