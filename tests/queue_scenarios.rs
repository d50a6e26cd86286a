//! End-to-end queue behaviour with ramp data: capacity, retrieval and time
//! mapping.

use rust_aiq::data::cat_blocks;
use rust_aiq::{Miss, SampleBlock, SampleQueue};

/// Interleaved buffer whose channel 0 is `ct mod 32768`.
fn ramp(head_ct: u64, n_scans: usize, n_chans: usize) -> Vec<i16> {
    (head_ct..head_ct + n_scans as u64)
        .flat_map(|ct| {
            let mut scan = vec![0i16; n_chans];
            scan[0] = (ct % 32768) as i16;
            scan
        })
        .collect()
}

fn feed(q: &SampleQueue, buffers: usize, scans: usize) {
    let srate = q.sample_rate();
    for i in 0..buffers {
        let head_ct = (i * scans) as u64;
        let data = ramp(head_ct, scans, q.n_chans());
        let now_t = (head_ct + scans as u64 - 1) as f64 / srate;
        q.enqueue(&data, now_t, head_ct, scans).unwrap();
    }
}

fn chan0(blocks: &[SampleBlock]) -> Vec<i16> {
    let n_chans = blocks.first().map_or(1, SampleBlock::n_chans);
    cat_blocks(blocks)
        .unwrap()
        .chunks_exact(n_chans)
        .map(|s| s[0])
        .collect()
}

fn expected(from_ct: u64, n: usize) -> Vec<i16> {
    (from_ct..from_ct + n as u64)
        .map(|ct| (ct % 32768) as i16)
        .collect()
}

#[test]
fn test_thirty_kilohertz_one_second_window() {
    let q = SampleQueue::new(30_000.0, 5, 1.0).unwrap();
    assert_eq!(q.max_cts(), 30_000);

    feed(&q, 10, 3500);

    assert_eq!(q.cur_count(), 35_000);
    assert_eq!(q.q_head_ct(), 5_000);
    assert_eq!(q.q_cts(), 30_000);

    let mut dst = Vec::new();
    assert_eq!(q.get_n_scans_from_ct(&mut dst, 20_000, 100), Ok(100));
    assert_eq!(chan0(&dst), expected(20_000, 100));

    // Ramp wraps at 32768.
    assert_eq!(q.get_n_scans_from_ct(&mut dst, 32_700, 200), Ok(200));
    let values = chan0(&dst);
    assert_eq!(values[67], 32767);
    assert_eq!(values[68], 0);
}

#[test]
fn test_round_trip_at_interior_boundary_and_spanning_positions() {
    let q = SampleQueue::new(1000.0, 3, 3.5).unwrap();
    feed(&q, 12, 350);
    // Each buffer splits into blocks of 100, 100, 75, 75.
    assert_eq!(q.q_head_ct(), 700);
    let mut dst = Vec::new();

    for &(from_ct, n) in &[(1234, 17), (1250, 75), (1400, 1), (1050, 700), (4199, 1)] {
        assert_eq!(q.get_n_scans_from_ct(&mut dst, from_ct, n), Ok(n), "from {from_ct}");
        assert_eq!(chan0(&dst), expected(from_ct, n), "from {from_ct}");
        assert_eq!(dst[0].head_ct, from_ct);
        let total: usize = dst.iter().map(SampleBlock::n_scans).sum();
        assert_eq!(total, n);
    }

    assert_eq!(q.get_n_scans_from_ct(&mut dst, 0, 10), Err(Miss::TooEarly));
    assert_eq!(q.get_n_scans_from_ct(&mut dst, 4200, 10), Err(Miss::TooLate));
}

#[test]
fn test_newest_n_matches_count_query() {
    let q = SampleQueue::new(2000.0, 2, 1.5).unwrap();
    feed(&q, 9, 480);
    let held = q.q_cts() as usize;
    let mut newest = Vec::new();
    let mut by_ct = Vec::new();

    for n in [1, 99, 100, 101, 480, 2000, held] {
        assert_eq!(q.get_newest_n_scans(&mut newest, n), Ok(n));
        let from = q.cur_count() - n as u64;
        assert_eq!(q.get_n_scans_from_ct(&mut by_ct, from, n), Ok(n));
        assert_eq!(cat_blocks(&newest).unwrap(), cat_blocks(&by_ct).unwrap(), "n = {n}");
    }

    // Asking for more than is held returns what there is.
    assert_eq!(q.get_newest_n_scans(&mut newest, held + 500), Ok(held));
}

#[test]
fn test_time_mapping_recovers_count() {
    let q = SampleQueue::new(2500.0, 1, 2.0).unwrap();
    feed(&q, 20, 333);

    let head = q.q_head_ct();
    let end = q.cur_count();
    for ct in (head..end).step_by(97).chain([head, end - 1]) {
        let t = q.map_ct_to_time(ct).unwrap();
        let back = q.map_time_to_ct(t).unwrap();
        assert!(back.abs_diff(ct) <= 1, "ct {ct} -> {t} -> {back}");
    }

    let newest_t = q.map_ct_to_time(end - 1).unwrap();
    assert_eq!(q.map_time_to_ct(newest_t + 1.0), Err(Miss::TooLate));
    assert_eq!(q.map_time_to_ct(0.0), Err(Miss::TooEarly));
}

#[test]
fn test_retrieval_by_time() {
    let q = SampleQueue::new(1000.0, 2, 3.0).unwrap();
    feed(&q, 4, 500);
    let mut dst = Vec::new();

    assert_eq!(q.get_n_scans_from_t(&mut dst, 1.25, 50), Ok(50));
    assert_eq!(dst[0].head_ct, 1250);
    assert_eq!(chan0(&dst), expected(1250, 50));

    // Between two scans the later one is first.
    assert_eq!(q.get_n_scans_from_t(&mut dst, 1.2502, 50), Ok(50));
    assert_eq!(chan0(&dst), expected(1251, 50));

    let n = q.get_all_scans_from_t(&mut dst, 1.9002).unwrap();
    assert_eq!(n, 99);
    assert_eq!(dst[0].head_ct, 1901);
    assert!(q.map_ct_to_time(1901).unwrap() >= 1.9002);
}

#[test]
fn test_mono_and_stereo_fill_exactly() {
    let q = SampleQueue::new(1000.0, 3, 2.0).unwrap();
    feed(&q, 3, 400);

    let mut mono = vec![0i16; 250];
    assert_eq!(q.get_n_scans_from_ct_mono(&mut mono, 800, 0), Ok(800));
    assert_eq!(mono, expected(800, 250));

    assert_eq!(q.get_newest_n_scans_mono(&mut mono, 0), Ok(950));
    assert_eq!(mono, expected(950, 250));

    let mut stereo = vec![0i16; 2 * 10];
    assert_eq!(q.get_newest_n_scans_stereo(&mut stereo, 0, 1), Ok(1190));
    assert_eq!(stereo[0], 1190);
    assert_eq!(stereo[1], 0);
    assert_eq!(stereo[18], 1199);

    // Exact-length reads never fill partially.
    let mut big = vec![0i16; 2000];
    assert_eq!(q.get_newest_n_scans_mono(&mut big, 0), Err(Miss::Insufficient));
    assert_eq!(q.get_n_scans_from_ct_mono(&mut mono, 1100, 0), Err(Miss::Insufficient));
    assert_eq!(q.get_n_scans_from_ct_mono(&mut mono, 0, 3), Err(Miss::NoSuchChannel));
}
