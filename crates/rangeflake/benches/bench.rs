use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rangeflake::{
    AtomicAllocator, BitLayout, IdAllocator, LockAllocator, SystemClock, TimeSource, WorkerId,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};

// Number of IDs generated per benchmark iteration (per-thread for
// multi-threaded).
const TOTAL_IDS: usize = 4096;

fn make<A: IdAllocator<SystemClock>>() -> A {
    let layout = BitLayout::default();
    let worker = WorkerId::new(1, &layout).expect("worker id fits");
    let epoch = SystemClock.current_millis() - 60_000;
    A::new(layout, worker, epoch, SystemClock)
}

/// Single-threaded throughput against the wall clock, including any
/// spin-waits when a millisecond's sequence runs out.
fn bench_allocator<A: IdAllocator<SystemClock>>(c: &mut Criterion, group_name: &str) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        let allocator = make::<A>();
        b.iter(|| {
            for _ in 0..TOTAL_IDS {
                black_box(allocator.next_id());
            }
        });
    });

    group.finish();
}

/// Many threads hammering one shared allocator.
fn bench_allocator_threaded<A>(c: &mut Criterion, group_name: &str, thread_counts: &[usize])
where
    A: IdAllocator<SystemClock> + Send + Sync,
{
    let mut group = c.benchmark_group(group_name);

    for &threads in thread_counts {
        group.throughput(Throughput::Elements((threads * TOTAL_IDS) as u64));
        group.bench_function(format!("elems/{TOTAL_IDS}/threads/{threads}"), |b| {
            b.iter_custom(|iters| {
                let allocator = Arc::new(make::<A>());
                let barrier = Arc::new(Barrier::new(threads + 1));

                let start = scope(|s| {
                    for _ in 0..threads {
                        let allocator = Arc::clone(&allocator);
                        let barrier = Arc::clone(&barrier);
                        s.spawn(move || {
                            barrier.wait();
                            for _ in 0..iters {
                                for _ in 0..TOTAL_IDS {
                                    black_box(allocator.next_id());
                                }
                            }
                        });
                    }
                    barrier.wait();
                    Instant::now()
                });

                start.elapsed()
            });
        });
    }

    group.finish();
}

fn benches(c: &mut Criterion) {
    let threads = [1, 2, 4, 8, num_cpus::get()];

    bench_allocator::<LockAllocator<SystemClock>>(c, "lock");
    bench_allocator::<AtomicAllocator<SystemClock>>(c, "atomic");
    bench_allocator_threaded::<LockAllocator<SystemClock>>(c, "lock/threaded", &threads);
    bench_allocator_threaded::<AtomicAllocator<SystemClock>>(c, "atomic/threaded", &threads);
}

criterion_group!(all, benches);
criterion_main!(all);
