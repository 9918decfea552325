//! Criterion benchmarks for timed queue hot paths.
//!
//! Key metrics:
//! - Insert throughput with in-order and shuffled timestamps
//! - Pop latency from either end of a populated queue
//! - Concurrent producer/consumer throughput
//!
//! Run with: cargo bench --bench timed_queue

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sensor_logger::data::TimedQueue;
use std::sync::Arc;
use std::thread;

fn timestamp(offset_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(offset_ms)
}

/// Insert batches of readings, either already ordered or interleaved.
fn timed_queue_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("timed_queue_insert");

    for size in [1_000usize, 10_000, 100_000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("ordered", size), &size, |b, &size| {
            b.iter(|| {
                let queue = TimedQueue::new();
                for i in 0..size {
                    queue.insert(timestamp(i as i64), "reading:temperature", i as f64);
                }
                black_box(queue.size());
            });
        });

        // Odd offsets count down, even offsets count up
        group.bench_with_input(BenchmarkId::new("interleaved", size), &size, |b, &size| {
            b.iter(|| {
                let queue = TimedQueue::new();
                for i in 0..size as i64 {
                    let offset = if i % 2 == 0 { i } else { -i };
                    queue.insert(timestamp(offset), "reading:temperature", i as f64);
                }
                black_box(queue.size());
            });
        });
    }

    group.finish();
}

/// Pop a single element from a queue holding 100k readings.
fn timed_queue_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("timed_queue_pop");
    let queue = TimedQueue::new();
    for i in 0..100_000 {
        queue.insert(timestamp(i), "reading:humidity", i as f64);
    }

    group.bench_function("oldest", |b| {
        b.iter(|| {
            let reading = queue.pop_oldest_nowait();
            if let Some(reading) = reading {
                queue.push(black_box(reading));
            }
        });
    });

    group.bench_function("youngest", |b| {
        b.iter(|| {
            let reading = queue.pop_youngest_nowait();
            if let Some(reading) = reading {
                queue.push(black_box(reading));
            }
        });
    });

    group.finish();
}

/// Producers insert while consumers drain with blocking pops.
fn timed_queue_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("timed_queue_concurrent");
    const PER_PRODUCER: usize = 1_000;

    for thread_count in [1usize, 2, 4] {
        group.throughput(Throughput::Elements((thread_count * PER_PRODUCER) as u64));
        group.bench_with_input(
            BenchmarkId::new("producers_consumers", thread_count),
            &thread_count,
            |b, &thread_count| {
                b.iter(|| {
                    let queue = Arc::new(TimedQueue::new());

                    let consumers: Vec<_> = (0..thread_count)
                        .map(|_| {
                            let queue = Arc::clone(&queue);
                            thread::spawn(move || {
                                let mut taken = 0usize;
                                while queue.pop_oldest().is_some() {
                                    taken += 1;
                                }
                                taken
                            })
                        })
                        .collect();

                    let producers: Vec<_> = (0..thread_count)
                        .map(|p| {
                            let queue = Arc::clone(&queue);
                            thread::spawn(move || {
                                for i in 0..PER_PRODUCER {
                                    queue.insert(
                                        timestamp((i * thread_count + p) as i64),
                                        "reading:pressure",
                                        i as f64,
                                    );
                                }
                            })
                        })
                        .collect();

                    for producer in producers {
                        producer.join().unwrap();
                    }
                    queue.close();
                    let taken: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
                    assert_eq!(taken, thread_count * PER_PRODUCER);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    timed_queue_insert,
    timed_queue_pop,
    timed_queue_concurrent
);
criterion_main!(benches);
