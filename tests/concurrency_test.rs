//! One producer thread and several reader threads sharing a queue.
//!
//! Readers check every block they receive for internal consistency: the
//! ramp on channel 0 must agree with the block's `head_ct` for every scan,
//! and consecutive blocks must be contiguous.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use rust_aiq::config::{StreamConfig, SyncChannel, SyncConfig};
use rust_aiq::sim::SyntheticSource;
use rust_aiq::{Miss, SampleBlock, SampleQueue};

const N_READERS: usize = 4;
const BUFFERS: usize = 400;
const SCANS: usize = 250;

fn stream() -> StreamConfig {
    StreamConfig {
        name: "stress".to_string(),
        sample_rate_hz: 25_000.0,
        n_chans: 4,
        capacity_secs: 0.5,
        block_max_scans: 64,
        sync: SyncChannel::Bit { chan: 3, bit: 0 },
    }
}

fn check_blocks(blocks: &[SampleBlock]) {
    let mut next: Option<u64> = None;
    for block in blocks {
        assert_eq!(block.data.len(), block.n_scans() * block.n_chans());
        if let Some(expected) = next {
            assert_eq!(block.head_ct, expected, "blocks not contiguous");
        }
        for scan in 0..block.n_scans() {
            let ct = block.head_ct + scan as u64;
            assert_eq!(block.sample(scan, 0), (ct % 32768) as i16, "torn block at {ct}");
        }
        next = Some(block.end_ct());
    }
}

#[test]
fn test_concurrent_enqueue_and_queries() {
    let cfg = stream();
    let queue = Arc::new(SampleQueue::from_config(&cfg).unwrap());
    let done = Arc::new(AtomicBool::new(false));
    let checked = Arc::new(AtomicU64::new(0));

    let producer = {
        let queue = queue.clone();
        let done = done.clone();
        let cfg = cfg.clone();
        thread::spawn(move || {
            let mut source = SyntheticSource::new(&cfg, &SyncConfig::default(), 0.0, 3);
            for _ in 0..BUFFERS {
                source.produce(&queue, SCANS).unwrap();
                thread::yield_now();
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..N_READERS)
        .map(|r| {
            let queue = queue.clone();
            let done = done.clone();
            let checked = checked.clone();
            thread::spawn(move || {
                let mut blocks = Vec::new();
                let mut mono = vec![0i16; 300];
                loop {
                    let finished = done.load(Ordering::Acquire);
                    match queue.get_newest_n_scans(&mut blocks, 500 + r * 100) {
                        Ok(_) => check_blocks(&blocks),
                        Err(miss) => assert_eq!(miss, Miss::Empty),
                    }

                    let head = queue.q_head_ct();
                    if let Ok(n) = queue.get_n_scans_from_ct(&mut blocks, head + 10, 1000) {
                        assert!(n <= 1000);
                        check_blocks(&blocks);
                    }

                    if let Ok(first) = queue.get_newest_n_scans_mono(&mut mono, 0) {
                        for (k, &v) in mono.iter().enumerate() {
                            assert_eq!(v, ((first + k as u64) % 32768) as i16);
                        }
                    }

                    if let Ok(t) = queue.map_ct_to_time(head + 50) {
                        // The scan may have been evicted in between.
                        if let Ok(ct) = queue.map_time_to_ct(t) {
                            assert!(ct + 1 >= head + 50);
                        }
                    }

                    let _ = queue.find_bit_rising_edge(head, 3, 0, 3);
                    if let Ok(block) = queue.copy_one_block_from_ct(head + 1) {
                        check_blocks(std::slice::from_ref(&block));
                    }

                    checked.fetch_add(1, Ordering::Relaxed);
                    if finished {
                        break;
                    }
                }
            })
        })
        .collect();

    producer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(queue.cur_count(), (BUFFERS * SCANS) as u64);
    assert!(queue.q_cts() <= queue.max_cts());
    assert!(checked.load(Ordering::Relaxed) > 0);
}
