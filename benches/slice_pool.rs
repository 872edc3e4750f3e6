//! Slice pool borrow/return benchmark.
//!
//! A thread pays one borrow per buffer lifetime, so borrow cost is
//! amortized across thousands of pushes; this benchmark keeps it honest
//! anyway and compares the reserved fast path against the allocating
//! dynamic path.
//!
//! ```bash
//! cargo bench --bench slice_pool
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use spoor::event::Event;
use spoor::slice_pool::{
    DynamicSlicePool, DynamicSlicePoolOptions, ReservedSlicePool,
    ReservedSlicePoolOptions,
};

fn bench_reserved_borrow_return(c: &mut Criterion) {
    let pool: ReservedSlicePool<Event> =
        ReservedSlicePool::new(ReservedSlicePoolOptions {
            capacity: 1 << 20,
            slice_capacity: 1 << 14,
        });
    c.bench_function("reserved_pool_borrow_return", |b| {
        b.iter(|| {
            let slice = pool.borrow(black_box(1 << 14));
            black_box(slice.is_ok())
        });
    });
}

fn bench_dynamic_borrow_return(c: &mut Criterion) {
    let pool: DynamicSlicePool<Event> =
        DynamicSlicePool::new(DynamicSlicePoolOptions {
            capacity: 1 << 20,
            slice_capacity: 1 << 14,
            borrow_cas_attempts: 8,
        });
    c.bench_function("dynamic_pool_borrow_return", |b| {
        b.iter(|| {
            let slice = pool.borrow(black_box(1 << 14));
            black_box(slice.is_ok())
        });
    });
}

criterion_group!(benches, bench_reserved_borrow_return, bench_dynamic_borrow_return);
criterion_main!(benches);
