//! Allocation record: a DMA-BUF descriptor and its aligned size.

use crate::error::{Error, Result};
use rustix::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};

/// Raw descriptor value reported for a freed or empty record.
pub const INVALID_FD: RawFd = -1;

/// Reject alignments that are zero or not a power of two.
pub fn check_alignment(alignment: usize) -> Result<()> {
    if alignment.is_power_of_two() {
        Ok(())
    } else {
        Err(Error::InvalidAlignment(alignment))
    }
}

/// Round `size` up to a multiple of `alignment`.
///
/// # Errors
///
/// - [`Error::InvalidAlignment`] if `alignment` is zero or not a power of two
/// - [`Error::AllocationFailed`] if `size` is zero or rounding overflows
pub fn aligned_size(size: usize, alignment: usize) -> Result<usize> {
    check_alignment(alignment)?;
    if size == 0 {
        return Err(Error::AllocationFailed("size must be greater than 0".into()));
    }
    size
        .checked_add(alignment - 1)
        .map(|padded| padded & !(alignment - 1))
        .ok_or_else(|| {
            Error::AllocationFailed(format!("size {size} overflows when aligned to {alignment:#x}"))
        })
}

/// One heap allocation.
///
/// A record either holds an open descriptor with a non-zero size, or nothing
/// with size zero. The constructors keep those two states the only ones
/// reachable.
#[derive(Debug, Default)]
pub struct AllocationRecord {
    descriptor: Option<OwnedFd>,
    size: usize,
}

impl AllocationRecord {
    /// Create a record for a freshly allocated descriptor.
    ///
    /// Returns `None` if `size` is zero.
    pub fn new(descriptor: OwnedFd, size: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }
        Some(Self {
            descriptor: Some(descriptor),
            size,
        })
    }

    /// The empty record.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Whether the record holds an open descriptor.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.descriptor.is_some()
    }

    /// Aligned size in bytes (0 when invalid).
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Raw descriptor, or [`INVALID_FD`].
    #[inline]
    pub fn raw_fd(&self) -> RawFd {
        self.descriptor
            .as_ref()
            .map_or(INVALID_FD, |fd| fd.as_raw_fd())
    }

    /// Borrow the descriptor.
    #[inline]
    pub fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        self.descriptor.as_ref().map(|fd| fd.as_fd())
    }

    /// Close the descriptor and reset to the empty state.
    ///
    /// Returns `false` if the record was already empty.
    pub(crate) fn close(&mut self) -> bool {
        self.size = 0;
        // Dropping the OwnedFd closes it.
        self.descriptor.take().is_some()
    }

    /// Reset to the empty state without closing the descriptor.
    ///
    /// Used for records that wrap a descriptor owned by someone else.
    pub(crate) fn forget(&mut self) -> Option<RawFd> {
        self.size = 0;
        self.descriptor.take().map(IntoRawFd::into_raw_fd)
    }

    /// Take the descriptor out, leaving the record empty.
    pub fn into_fd(self) -> Option<OwnedFd> {
        self.descriptor
    }
}
