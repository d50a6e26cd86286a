//! Criterion benchmarks for sample queue hot paths.
//!
//! Key metrics:
//! - Enqueue throughput (scans/sec) for typical hardware buffer sizes
//! - Newest-N and count-indexed retrieval latency on a full queue
//! - Edge search cost over a full capacity window
//! - Reader latency while a producer thread is enqueuing
//!
//! Run with: cargo bench --bench sample_queue

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_aiq::config::{StreamConfig, SyncChannel, SyncConfig};
use rust_aiq::sim::SyntheticSource;
use rust_aiq::SampleQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn stream(n_chans: usize) -> StreamConfig {
    StreamConfig {
        name: "bench".to_string(),
        sample_rate_hz: 30_000.0,
        n_chans,
        capacity_secs: 2.0,
        block_max_scans: 100,
        sync: SyncChannel::Bit {
            chan: n_chans - 1,
            bit: 6,
        },
    }
}

/// Queue filled to capacity, plus the source that filled it.
fn full_queue(n_chans: usize) -> (SampleQueue, SyntheticSource) {
    let cfg = stream(n_chans);
    let queue = SampleQueue::from_config(&cfg).unwrap();
    let mut source = SyntheticSource::new(&cfg, &SyncConfig::default(), 0.0, 11);
    while source.next_ct() < queue.max_cts() + 3000 {
        source.produce(&queue, 3000).unwrap();
    }
    (queue, source)
}

/// Enqueue throughput for various hardware buffer sizes.
fn enqueue_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");

    for &(n_chans, scans) in &[(4usize, 500usize), (4, 5000), (385, 300), (385, 3000)] {
        let cfg = stream(n_chans);
        let queue = SampleQueue::from_config(&cfg).unwrap();
        let mut source = SyntheticSource::new(&cfg, &SyncConfig::default(), 0.0, 1);
        let template = source.next_buffer(scans);
        let mut head_ct = 0u64;
        let mut now_t = 0.0;

        group.throughput(Throughput::Elements(scans as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("{n_chans}ch"), scans),
            &scans,
            |b, &scans| {
                b.iter(|| {
                    now_t += scans as f64 / cfg.sample_rate_hz;
                    queue
                        .enqueue(black_box(&template.data), now_t, head_ct, scans)
                        .unwrap();
                    head_ct += scans as u64;
                });
            },
        );
    }

    group.finish();
}

/// Retrieval latency on a full queue.
fn retrieval_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("retrieve");
    let (queue, _source) = full_queue(32);
    let mut blocks = Vec::new();

    for n in [100usize, 3000, 30_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("newest_n", n), &n, |b, &n| {
            b.iter(|| queue.get_newest_n_scans(&mut blocks, black_box(n)).unwrap());
        });
        let from = queue.q_head_ct() + 1234;
        group.bench_with_input(BenchmarkId::new("n_from_ct", n), &n, |b, &n| {
            b.iter(|| queue.get_n_scans_from_ct(&mut blocks, black_box(from), n).unwrap());
        });
    }

    let mut mono = vec![0i16; 3000];
    group.bench_function("newest_mono_3000", |b| {
        b.iter(|| queue.get_newest_n_scans_mono(black_box(&mut mono), 0).unwrap());
    });

    group.finish();
}

/// Edge search across a full capacity window.
fn edge_search(c: &mut Criterion) {
    let (queue, _source) = full_queue(32);
    let head = queue.q_head_ct();

    c.bench_function("find_bit_rising_edge_full_window", |b| {
        b.iter(|| queue.find_bit_rising_edge(black_box(head), 31, 6, 5));
    });

    let mut invert = |data: &mut [i16], n_chans: usize| {
        for scan in data.chunks_exact_mut(n_chans) {
            scan[0] = -scan[0];
        }
    };
    c.bench_function("find_flt_rising_edge_full_window", |b| {
        b.iter(|| queue.find_flt_rising_edge(black_box(head), 0, 20_000, 5, &mut invert));
    });
}

/// Reader latency with a concurrent producer.
fn concurrent_read(c: &mut Criterion) {
    let (queue, mut source) = full_queue(32);
    let queue = Arc::new(queue);
    let stop = Arc::new(AtomicBool::new(false));

    let producer = {
        let queue = queue.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                source.produce(&queue, 300).unwrap();
            }
        })
    };

    let mut blocks = Vec::new();
    c.bench_function("newest_n_3000_under_enqueue", |b| {
        b.iter(|| queue.get_newest_n_scans(&mut blocks, black_box(3000)).unwrap());
    });

    stop.store(true, Ordering::Relaxed);
    producer.join().unwrap();
}

criterion_group!(
    benches,
    enqueue_throughput,
    retrieval_latency,
    edge_search,
    concurrent_read
);
criterion_main!(benches);
