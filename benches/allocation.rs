//! DMA heap buffer benchmarks, run against the memfd-emulated allocator.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use dmaheap::memory::{BufferOptions, SharedBuffer};
use dmaheap::provider::AllocatorProvider;
use dmaheap::testing::emulated_config;
use std::sync::Arc;

fn bench_create_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_release");
    let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
    let options = BufferOptions::default();

    for size in [4096usize, 64 * 1024, 512 * 512 * 4] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let buffer = SharedBuffer::create_in(&provider, size, &options).unwrap();
                std::hint::black_box(buffer.descriptor());
            });
        });
    }

    group.finish();
}

fn bench_map_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_fill");
    let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
    let options = BufferOptions::default();

    for size in [4096usize, 512 * 512 * 4] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut buffer = SharedBuffer::create_in(&provider, size, &options).unwrap();
            b.iter(|| {
                let ptr = buffer.get_cpu_pointer().unwrap();
                unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0xAB, size) };
                buffer.unmap().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_concurrent_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_create");
    let provider = AllocatorProvider::with_config(emulated_config()).unwrap();

    group.throughput(Throughput::Elements(100));
    group.bench_function("4_threads_25_buffers_each", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let provider = Arc::clone(&provider);
                    std::thread::spawn(move || {
                        let options = BufferOptions::default();
                        for _ in 0..25 {
                            let buffer = SharedBuffer::create_in(&provider, 4096, &options).unwrap();
                            std::hint::black_box(buffer.record_size());
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_create_release, bench_map_fill, bench_concurrent_create);
criterion_main!(benches);
