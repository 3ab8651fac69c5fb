//! Default allocation parameters and platform names.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dmaheap::memory::{defaults, SharedBuffer, BufferOptions};
//!
//! let options = BufferOptions::default()
//!     .alignment(defaults::LARGE_ALIGNMENT)
//!     .heap_name(defaults::SYSTEM_HEAP);
//! let buffer = SharedBuffer::create_with(defaults::RGBA_512_FRAME_SIZE, &options)?;
//! ```

// =============================================================================
// Alignment
// =============================================================================

/// Default allocation alignment (one 4 KiB page).
pub const DEFAULT_ALIGNMENT: usize = 0x1000;

/// Alignment for large allocations (1 MiB).
///
/// Some DSPs can only hold a small number of mappings; rounding large
/// buffers up to this size keeps the mapping count down.
pub const LARGE_ALIGNMENT: usize = 0x10_0000;

// =============================================================================
// Heaps
// =============================================================================

/// Generic system heap, present on every kernel with DMA heaps enabled.
pub const SYSTEM_HEAP: &str = "system";

/// Physically contiguous heap (CMA), when the platform exposes one.
pub const CMA_HEAP: &str = "linux,cma";

/// Heap used when none is specified.
pub const DEFAULT_HEAP: &str = SYSTEM_HEAP;

// =============================================================================
// Platform library
// =============================================================================

/// Platform library providing the heap allocator.
pub const DEFAULT_LIBRARY: &str = "libdmabufheap.so";

/// Environment variable overriding [`DEFAULT_LIBRARY`].
pub const LIBRARY_ENV: &str = "DMAHEAP_LIBRARY";

/// Symbol creating the allocator object.
pub const CREATE_SYMBOL: &[u8] = b"CreateDmabufHeapBufferAllocator\0";

/// Symbol allocating a buffer from a named heap.
pub const ALLOC_SYMBOL: &[u8] = b"DmabufHeapAlloc\0";

/// Symbol destroying the allocator object.
pub const DESTROY_SYMBOL: &[u8] = b"FreeDmabufHeapBufferAllocator\0";

// =============================================================================
// Sizes
// =============================================================================

/// 512x512 RGBA frame (512 * 512 * 4 = 1,048,576 bytes).
pub const RGBA_512_FRAME_SIZE: usize = 512 * 512 * 4;

/// 1080p RGBA frame (1920 * 1080 * 4 = 8,294,400 bytes).
pub const RGBA_1080P_FRAME_SIZE: usize = 1920 * 1080 * 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignments_are_powers_of_two() {
        assert!(DEFAULT_ALIGNMENT.is_power_of_two());
        assert!(LARGE_ALIGNMENT.is_power_of_two());
    }

    #[test]
    fn test_symbols_nul_terminated() {
        for sym in [CREATE_SYMBOL, ALLOC_SYMBOL, DESTROY_SYMBOL] {
            assert_eq!(sym.last(), Some(&0));
            assert_eq!(sym.iter().filter(|&&b| b == 0).count(), 1);
        }
    }

    #[test]
    fn test_frame_sizes() {
        assert_eq!(RGBA_512_FRAME_SIZE, 1_048_576);
        assert_eq!(RGBA_1080P_FRAME_SIZE, 8_294_400);
    }
}
