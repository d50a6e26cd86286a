//! Edge polling against a queue that keeps growing between searches.

use rust_aiq::config::{StreamConfig, SyncChannel, SyncConfig};
use rust_aiq::data::{BlockFilter, EdgeSearch, FilterType, IirBlockFilter, IirFilterConfig};
use rust_aiq::sim::SyntheticSource;
use rust_aiq::SampleQueue;

fn stream() -> StreamConfig {
    StreamConfig {
        name: "edges".to_string(),
        sample_rate_hz: 1024.0,
        n_chans: 2,
        capacity_secs: 5.0,
        block_max_scans: 100,
        sync: SyncChannel::Bit { chan: 1, bit: 4 },
    }
}

#[test]
fn test_polling_finds_every_edge_once() {
    let cfg = stream();
    let sync = SyncConfig {
        enabled: true,
        source_period_secs: 0.125,
        inarow: 5,
    };
    let queue = SampleQueue::from_config(&cfg).unwrap();
    let mut source = SyntheticSource::new(&cfg, &sync, 0.0, 1);

    let mut resume_ct = 0;
    let mut edges = Vec::new();
    // Odd-sized buffers so edges and debounce runs straddle poll boundaries.
    for _ in 0..55 {
        source.produce(&queue, 37).unwrap();
        loop {
            match queue.find_bit_rising_edge(resume_ct, 1, 4, sync.inarow) {
                EdgeSearch::Found(ct) => {
                    edges.push(ct);
                    resume_ct = ct + 1;
                }
                EdgeSearch::Pending { resume_ct: next } => {
                    resume_ct = next;
                    break;
                }
                EdgeSearch::OutOfRange(miss) => panic!("unexpected miss {miss:?}"),
            }
        }
    }

    // Rises every 128 scans; the one at 0 was already high when polling began.
    let expected: Vec<u64> = (1..=15).map(|k| k * 128).collect();
    assert_eq!(edges, expected);
}

#[test]
fn test_glitches_shorter_than_inarow_are_ignored() {
    let q = SampleQueue::new(1000.0, 1, 2.0).unwrap();
    let level = |ct: u64| match ct {
        300..=301 => 500,
        420..=423 => 500,
        600.. => 500,
        _ => -500,
    };
    let data: Vec<i16> = (0..1000).map(level).collect();
    q.enqueue(&data, 0.999, 0, 1000).unwrap();

    assert_eq!(q.find_rising_edge(0, 0, 0, 5), EdgeSearch::Found(600));
    assert_eq!(q.find_rising_edge(0, 0, 0, 4), EdgeSearch::Found(420));
    assert_eq!(q.find_rising_edge(0, 0, 0, 2), EdgeSearch::Found(300));
    assert_eq!(q.find_rising_edge(0, 0, 0, 0), EdgeSearch::Found(300));
    assert_eq!(q.find_falling_edge(421, 0, 0, 3), EdgeSearch::Found(424));
}

#[test]
fn test_resume_point_reexamines_unfinished_run() {
    let q = SampleQueue::new(1000.0, 1, 5.0).unwrap();
    let low = vec![0i16; 1000];
    q.enqueue(&low, 0.999, 0, 1000).unwrap();
    let high = vec![100i16; 3];
    q.enqueue(&high, 1.002, 1000, 3).unwrap();

    let first = q.find_rising_edge(0, 0, 50, 5);
    assert_eq!(first, EdgeSearch::Pending { resume_ct: 999 });

    let more = vec![100i16; 2];
    q.enqueue(&more, 1.004, 1003, 2).unwrap();
    let resume = first.resume_ct().unwrap();
    assert_eq!(q.find_rising_edge(resume, 0, 50, 5), EdgeSearch::Found(1000));
}

#[test]
fn test_lowpass_search_carries_filter_state_across_blocks() {
    // Channel 1 steps from 0 to 10000 at scan 290 under a Nyquist-rate
    // square wave of +/-8000 that defeats a raw threshold search.
    let q = SampleQueue::new(1000.0, 2, 5.0).unwrap();
    let data: Vec<i16> = (0..600u64)
        .flat_map(|ct| {
            let step = if ct >= 290 { 10_000 } else { 0 };
            let hum = if ct % 2 == 0 { 8_000 } else { -8_000 };
            [ct as i16, step + hum]
        })
        .collect();
    q.enqueue(&data, 0.599, 0, 600).unwrap();
    assert_eq!(q.block_count(), 6);

    assert!(matches!(
        q.find_rising_edge(0, 1, 5_000, 3),
        EdgeSearch::Pending { .. }
    ));

    let config = IirFilterConfig {
        filter_type: FilterType::Lowpass,
        f0: 20.0,
        fs: 1000.0,
        q: None,
        chan: 1,
    };
    // The filtered step crosses 5000 just after the block boundary at 300.
    let mut filter = IirBlockFilter::new(&config).unwrap();
    assert_eq!(
        q.find_flt_rising_edge(0, 1, 5_000, 3, &mut filter),
        EdgeSearch::Found(301)
    );

    // Restarting the delay line at every block delays the crossing.
    let mut per_block = IirBlockFilter::new(&config).unwrap();
    let mut restarted = |data: &mut [i16], n_chans: usize| {
        per_block.reset();
        per_block.apply(data, n_chans);
    };
    assert_eq!(
        q.find_flt_rising_edge(0, 1, 5_000, 3, &mut restarted),
        EdgeSearch::Found(311)
    );
}
