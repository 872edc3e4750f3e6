//! Circular buffer hot-path benchmark.
//!
//! `push` is the cost every instrumented function pays twice (enter and
//! exit), so it has to stay in the low-nanosecond range. Chunk export
//! runs on the flush worker and matters far less, but is measured to
//! keep the zero-copy claim honest.
//!
//! ```bash
//! cargo bench --bench circular_buffer
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use spoor::circular_buffer::{CircularBuffer, OwnedBufferSlice};
use spoor::event::{Event, EventKind};

fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("circular_buffer_push");
    for capacity in [1_024_usize, 16_384] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let mut buffer: CircularBuffer<Event> =
                    CircularBuffer::Owned(OwnedBufferSlice::new(capacity));
                let mut i = 0_u64;
                b.iter(|| {
                    buffer.push(black_box(Event::new(
                        EventKind::FunctionEntry,
                        i,
                        i as i64,
                    )));
                    i = i.wrapping_add(1);
                });
            },
        );
    }
    group.finish();
}

fn bench_contiguous_memory_chunks(c: &mut Criterion) {
    let mut buffer: CircularBuffer<Event> =
        CircularBuffer::Owned(OwnedBufferSlice::new(16_384));
    // Wrap the buffer so the export takes the two-chunk path.
    for i in 0..20_000_u64 {
        buffer.push(Event::new(EventKind::FunctionEntry, i, i as i64));
    }
    c.bench_function("circular_buffer_chunks_wrapped", |b| {
        b.iter(|| {
            let chunks = black_box(&buffer).contiguous_memory_chunks();
            black_box(chunks.len())
        });
    });
}

criterion_group!(benches, bench_push, bench_contiguous_memory_chunks);
criterion_main!(benches);
