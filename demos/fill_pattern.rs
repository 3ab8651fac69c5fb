//! # Fill Pattern
//!
//! Allocates a 512x512 RGBA frame from the system DMA heap, writes a
//! gradient into it from the CPU, and reads it back inside a read window.
//!
//! ```text
//! [DmabufHeapAlloc] -> [mmap] -> [SYNC_START|WRITE] fill [SYNC_END|WRITE]
//!                              -> [SYNC_START|READ]  check [SYNC_END|READ]
//! ```
//!
//! The allocator library is taken from `DMAHEAP_LIBRARY` (default
//! `libdmabufheap.so`). On systems without it the example says so and exits.
//!
//! Run: `cargo run --example fill_pattern`

use dmaheap::memory::defaults::RGBA_512_FRAME_SIZE;
use dmaheap::prelude::*;

const WIDTH: usize = 512;
const HEIGHT: usize = 512;

fn pixel(x: usize, y: usize) -> [u8; 4] {
    [(x / 2) as u8, (y / 2) as u8, ((x + y) / 4) as u8, 0xFF]
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("dmaheap=debug")
        .init();

    println!("=== DMA Heap Fill Pattern Example ===\n");

    let mut buffer = match SharedBuffer::create(RGBA_512_FRAME_SIZE) {
        Ok(buffer) => buffer,
        Err(e) if e.is_unavailable() => {
            println!("DMA heaps are not available here: {}", e);
            println!("Set DMAHEAP_LIBRARY to point at the allocator library.");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    println!("Allocated buffer:");
    println!("  descriptor:     {}", buffer.descriptor());
    println!("  requested size: {} bytes", buffer.requested_size());
    println!("  record size:    {} bytes", buffer.record_size());

    {
        let mut access = buffer.access(SyncMode::WriteOnly)?;
        let Some(data) = access.as_mut_slice() else {
            return Err(Error::InvalidState("write window is not writable"));
        };
        for (i, px) in data[..WIDTH * HEIGHT * 4].chunks_exact_mut(4).enumerate() {
            px.copy_from_slice(&pixel(i % WIDTH, i / WIDTH));
        }
        access.finish()?;
    }
    println!("\nWrote {}x{} gradient", WIDTH, HEIGHT);

    let mismatches = {
        let access = buffer.access(SyncMode::ReadOnly)?;
        let mismatches = access.as_slice()[..WIDTH * HEIGHT * 4]
            .chunks_exact(4)
            .enumerate()
            .filter(|(i, px)| *px != pixel(i % WIDTH, i / WIDTH))
            .count();
        access.finish()?;
        mismatches
    };
    println!("Read back: {} mismatched pixels", mismatches);

    buffer.release();
    println!("Released: {}", buffer.is_released());

    AllocatorProvider::shutdown();
    Ok(())
}
