//! Cache-coherency barriers and scoped CPU access.
//!
//! A DMA-BUF can be read or written by devices that do not snoop the CPU
//! caches. Every CPU access must therefore sit between a start barrier and
//! an end barrier with a matching direction:
//!
//! ```rust,ignore
//! buffer.sync_begin(SyncMode::ReadOnly)?;
//! // read through the CPU pointer
//! buffer.sync_end(SyncMode::ReadOnly)?;
//! ```
//!
//! [`CpuAccess`] pairs the two calls for you.

use super::dmabuf::SharedBuffer;
use crate::error::Result;
use crate::sys::{
    DMA_BUF_SYNC_END, DMA_BUF_SYNC_READ, DMA_BUF_SYNC_RW, DMA_BUF_SYNC_START, DMA_BUF_SYNC_WRITE,
};
use std::ptr::NonNull;

/// Direction of a CPU access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// CPU reads only.
    ReadOnly,
    /// CPU writes only.
    WriteOnly,
    /// CPU reads and writes.
    ReadWrite,
}

impl SyncMode {
    /// Does this mode allow CPU reads?
    #[inline]
    pub fn can_read(self) -> bool {
        matches!(self, SyncMode::ReadOnly | SyncMode::ReadWrite)
    }

    /// Does this mode allow CPU writes?
    #[inline]
    pub fn can_write(self) -> bool {
        matches!(self, SyncMode::WriteOnly | SyncMode::ReadWrite)
    }

    fn access_flags(self) -> u64 {
        match self {
            SyncMode::ReadOnly => DMA_BUF_SYNC_READ,
            SyncMode::WriteOnly => DMA_BUF_SYNC_WRITE,
            SyncMode::ReadWrite => DMA_BUF_SYNC_RW,
        }
    }
}

/// Start or end of an access window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncPhase {
    Begin,
    End,
}

/// `struct dma_buf_sync` flags for a barrier.
pub(crate) fn sync_flags(phase: SyncPhase, mode: SyncMode) -> u64 {
    let phase = match phase {
        SyncPhase::Begin => DMA_BUF_SYNC_START,
        SyncPhase::End => DMA_BUF_SYNC_END,
    };
    phase | mode.access_flags()
}

/// A bracketed CPU access window on a [`SharedBuffer`].
///
/// Created by [`SharedBuffer::access`], which maps the buffer and issues the
/// start barrier. The end barrier is issued by [`finish`](Self::finish), or
/// on drop if `finish` was not called (errors are then only logged).
///
/// The guard borrows the buffer mutably, so the mapping cannot be dropped
/// while the window is open.
pub struct CpuAccess<'a> {
    buffer: &'a mut SharedBuffer,
    ptr: NonNull<u8>,
    len: usize,
    mode: SyncMode,
    finished: bool,
}

impl<'a> CpuAccess<'a> {
    pub(crate) fn new(buffer: &'a mut SharedBuffer, ptr: NonNull<u8>, mode: SyncMode) -> Self {
        let len = buffer.record_size();
        Self {
            buffer,
            ptr,
            len,
            mode,
            finished: false,
        }
    }

    /// The access direction of this window.
    #[inline]
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Length of the mapped region (the aligned record size).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the mapped region is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the mapped region as a byte slice.
    ///
    /// Available in every mode: a write-only window may still read back what
    /// it wrote, although device writes are not guaranteed to be visible.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes while the buffer is borrowed.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Get the mapped region as a mutable byte slice.
    ///
    /// Returns `None` for a read-only window.
    #[inline]
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if self.mode.can_write() {
            // SAFETY: ptr is valid for len bytes, and we have &mut self.
            Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
        } else {
            None
        }
    }

    /// Issue the end barrier and close the window.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.buffer.sync_end(self.mode)
    }
}

impl Drop for CpuAccess<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.buffer.sync_end(self.mode) {
                tracing::warn!(fd = self.buffer.descriptor(), "end barrier on drop failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for CpuAccess<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuAccess")
            .field("fd", &self.buffer.descriptor())
            .field("len", &self.len)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_flags() {
        assert_eq!(sync_flags(SyncPhase::Begin, SyncMode::ReadOnly), 0b001);
        assert_eq!(sync_flags(SyncPhase::Begin, SyncMode::WriteOnly), 0b010);
        assert_eq!(sync_flags(SyncPhase::Begin, SyncMode::ReadWrite), 0b011);
    }

    #[test]
    fn test_end_flags() {
        assert_eq!(sync_flags(SyncPhase::End, SyncMode::ReadOnly), 0b101);
        assert_eq!(sync_flags(SyncPhase::End, SyncMode::WriteOnly), 0b110);
        assert_eq!(sync_flags(SyncPhase::End, SyncMode::ReadWrite), 0b111);
    }

    #[test]
    fn test_mode_directions() {
        assert!(SyncMode::ReadOnly.can_read());
        assert!(!SyncMode::ReadOnly.can_write());
        assert!(!SyncMode::WriteOnly.can_read());
        assert!(SyncMode::WriteOnly.can_write());
        assert!(SyncMode::ReadWrite.can_read());
        assert!(SyncMode::ReadWrite.can_write());
    }
}
