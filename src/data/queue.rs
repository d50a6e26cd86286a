//! Sliding-window sample queue shared by one producer and many readers.
//!
//! `SampleQueue` holds the most recent `capacity_secs` of a stream as an
//! ordered run of [`SampleBlock`]s. The acquisition thread appends with
//! [`enqueue`](SampleQueue::enqueue); display, disk writer, audio and trigger
//! consumers read copies through the query methods below.
//!
//! # Thread Safety
//!
//! One `parking_lot::Mutex` guards the block sequence and the running scan
//! total. Every public method takes the lock for its whole duration and never
//! waits on anything else while holding it, so hold times are bounded by the
//! amount of data copied. Readers receive owned copies; nothing they hold is
//! affected by later eviction.
//!
//! # Misses
//!
//! Asking for data the window does not cover is routine and reported with
//! [`Miss`]. Exact-length audio reads (`*_mono`, `*_stereo`) fail with
//! [`Miss::Insufficient`] rather than returning a short buffer.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::StreamConfig;
use crate::data::block::SampleBlock;
use crate::data::walker::seek;
use crate::error::{AiqError, AiqResult, Miss};

/// Largest block built by a single enqueue unless configured otherwise.
pub const DEFAULT_BLOCK_MAX_SCANS: usize = 100;

/// Fraction of a scan period within which a scan counts as "at" a requested
/// time.
const SCAN_TIME_TOLERANCE: f64 = 1e-3;

/// Mutable queue contents, only reachable under the lock.
#[derive(Debug, Default)]
struct QueueState {
    blocks: VecDeque<SampleBlock>,
    cur_cts: u64,
    t_zero: f64,
}

impl QueueState {
    fn head_ct(&self) -> Option<u64> {
        self.blocks.front().map(|b| b.head_ct)
    }

    fn end_ct(&self) -> Option<u64> {
        self.blocks.back().map(SampleBlock::end_ct)
    }

    /// Index of the block holding `ct`, searching from the newest end.
    ///
    /// A count lost in an enqueue gap was never retained and reports
    /// `TooEarly`.
    fn locate(&self, ct: u64) -> Result<usize, Miss> {
        let (idx, _) = seek(&self.blocks, ct)?;
        if self.blocks[idx].head_ct > ct {
            return Err(Miss::TooEarly);
        }
        Ok(idx)
    }

    fn time_to_ct(&self, t: f64, srate: f64) -> Result<u64, Miss> {
        let (front, back) = self
            .blocks
            .front()
            .zip(self.blocks.back())
            .ok_or(Miss::Empty)?;
        if t > back.tail_t {
            return Err(Miss::TooLate);
        }
        if t < front.head_t(srate) {
            return Err(Miss::TooEarly);
        }
        let block = self
            .blocks
            .iter()
            .rev()
            .find(|b| t >= b.head_t(srate))
            .ok_or(Miss::TooEarly)?;
        let offset = ((t - block.head_t(srate)) * srate).round() as u64;
        Ok((block.head_ct + offset).min(block.end_ct() - 1))
    }

    /// First retained scan acquired at or after `t`.
    fn first_ct_at_or_after(&self, t: f64, srate: f64) -> Result<u64, Miss> {
        let ct = self.time_to_ct(t, srate)?;
        let idx = self.locate(ct)?;
        let block = &self.blocks[idx];
        let scan_t = block.tail_t - (block.end_ct() - 1 - ct) as f64 / srate;
        if scan_t >= t - SCAN_TIME_TOLERANCE / srate {
            Ok(ct)
        } else if ct + 1 < block.end_ct() {
            Ok(ct + 1)
        } else {
            // `t` follows the block's last scan; the next block starts later.
            self.blocks
                .get(idx + 1)
                .map(|b| b.head_ct)
                .ok_or(Miss::TooLate)
        }
    }

    fn ct_to_time(&self, ct: u64, srate: f64) -> Result<f64, Miss> {
        let idx = self.locate(ct)?;
        let block = &self.blocks[idx];
        Ok(block.tail_t - (block.end_ct() - 1 - ct) as f64 / srate)
    }

    /// Copy scans from `from_ct` onward into `dst`, at most `n_max` of them.
    ///
    /// Blocks on either side of an enqueue gap are copied as they are; their
    /// `head_ct` shows the missing counts.
    fn copy_from(
        &self,
        dst: &mut Vec<SampleBlock>,
        from_ct: u64,
        n_max: usize,
        srate: f64,
    ) -> Result<usize, Miss> {
        let (idx, mut skip) = seek(&self.blocks, from_ct)?;
        dst.clear();

        let mut total = 0usize;
        for block in self.blocks.range(idx..) {
            if total >= n_max {
                break;
            }
            let take = (block.n_scans() - skip).min(n_max - total);
            if skip == 0 && take == block.n_scans() {
                dst.push(block.clone());
            } else {
                dst.push(block.window(skip, take, srate));
            }
            total += take;
            skip = 0;
        }
        Ok(total)
    }

    /// Copy the channels in `chans` for `dst.len() / chans.len()` scans
    /// starting at `from_ct`, interleaved in `dst`.
    ///
    /// The scans must be an unbroken run of counts and `dst` must hold a whole
    /// number of scans; otherwise `Insufficient`.
    fn fill_channels(&self, dst: &mut [i16], from_ct: u64, chans: &[usize]) -> Result<(), Miss> {
        if dst.len() % chans.len() != 0 {
            return Err(Miss::Insufficient);
        }
        let n_scans = (dst.len() / chans.len()) as u64;
        let (head, end) = self.head_ct().zip(self.end_ct()).ok_or(Miss::Empty)?;
        if n_scans == 0 {
            return Ok(());
        }
        if from_ct < head {
            return Err(Miss::TooEarly);
        }
        if from_ct >= end {
            return Err(Miss::TooLate);
        }
        if from_ct + n_scans > end {
            return Err(Miss::Insufficient);
        }

        let (mut idx, mut scan) = seek(&self.blocks, from_ct)?;
        if self.blocks[idx].head_ct > from_ct {
            return Err(Miss::Insufficient);
        }
        let stop = from_ct + n_scans;
        let mut covered = self.blocks[idx].end_ct();
        for block in self.blocks.range(idx + 1..) {
            if covered >= stop {
                break;
            }
            if block.head_ct != covered {
                return Err(Miss::Insufficient);
            }
            covered = block.end_ct();
        }

        for out in dst.chunks_exact_mut(chans.len()) {
            while scan >= self.blocks[idx].n_scans() {
                idx += 1;
                scan = 0;
            }
            let block = &self.blocks[idx];
            for (o, &chan) in out.iter_mut().zip(chans) {
                *o = block.sample(scan, chan);
            }
            scan += 1;
        }
        Ok(())
    }
}

/// Block sizes for an enqueue of `n_whole` scans with per-block cap `cap`.
///
/// Full-size blocks are emitted until at most two blocks' worth remain; the
/// remainder is then split into two near-equal halves.
fn block_sizes(n_whole: usize, cap: usize) -> Vec<usize> {
    if n_whole <= cap {
        return vec![n_whole];
    }
    let mut sizes = Vec::with_capacity(n_whole / cap + 2);
    let mut rem = n_whole;
    while rem > 2 * cap {
        sizes.push(cap);
        rem -= cap;
    }
    let half = rem / 2;
    sizes.push(rem - half);
    sizes.push(half);
    sizes
}

/// Bounded, time-ordered queue of acquired scans for one stream.
#[derive(Debug)]
pub struct SampleQueue {
    srate: f64,
    n_chans: usize,
    max_cts: u64,
    block_max_scans: usize,
    state: Mutex<QueueState>,
}

impl SampleQueue {
    /// Create a queue retaining `capacity_secs` of `n_chans`-channel data at
    /// `srate` Hz, with the default per-block cap.
    pub fn new(srate: f64, n_chans: usize, capacity_secs: f64) -> AiqResult<Self> {
        if !(srate.is_finite() && srate > 0.0) {
            return Err(AiqError::Configuration(format!(
                "sample rate must be positive, got {srate}"
            )));
        }
        if n_chans == 0 {
            return Err(AiqError::Configuration(
                "queue needs at least one channel".to_string(),
            ));
        }
        if !(capacity_secs.is_finite() && capacity_secs > 0.0) {
            return Err(AiqError::Configuration(format!(
                "capacity must be positive, got {capacity_secs} s"
            )));
        }
        let max_cts = (capacity_secs * srate).round() as u64;
        if max_cts == 0 {
            return Err(AiqError::Configuration(format!(
                "capacity of {capacity_secs} s holds no scans at {srate} Hz"
            )));
        }

        let block_max_scans = DEFAULT_BLOCK_MAX_SCANS.min(max_cts as usize);
        debug!(srate, n_chans, max_cts, block_max_scans, "SampleQueue created");

        Ok(Self {
            srate,
            n_chans,
            max_cts,
            block_max_scans,
            state: Mutex::new(QueueState::default()),
        })
    }

    /// Override the largest block a single enqueue may build.
    pub fn with_block_max_scans(mut self, block_max_scans: usize) -> AiqResult<Self> {
        if block_max_scans == 0 || block_max_scans as u64 > self.max_cts {
            return Err(AiqError::Configuration(format!(
                "block_max_scans must be in 1..={}, got {block_max_scans}",
                self.max_cts
            )));
        }
        self.block_max_scans = block_max_scans;
        Ok(self)
    }

    /// Build a queue from a stream's configuration.
    pub fn from_config(config: &StreamConfig) -> AiqResult<Self> {
        Self::new(config.sample_rate_hz, config.n_chans, config.capacity_secs)?
            .with_block_max_scans(config.block_max_scans)
    }

    /// Sample rate in Hz.
    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.srate
    }

    /// Channels per scan.
    #[inline]
    pub fn n_chans(&self) -> usize {
        self.n_chans
    }

    /// Nominal capacity in scans.
    #[inline]
    pub fn max_cts(&self) -> u64 {
        self.max_cts
    }

    /// Largest block built by one enqueue.
    #[inline]
    pub fn block_max_scans(&self) -> usize {
        self.block_max_scans
    }

    /// Absolute time of scan 0.
    pub fn t_zero(&self) -> f64 {
        self.state.lock().t_zero
    }

    /// Record the absolute time of scan 0. Called by the producer at run start.
    pub fn set_t_zero(&self, t_zero: f64) {
        self.state.lock().t_zero = t_zero;
    }

    /// Append `n_whole` scans from `src`, evicting the oldest blocks to stay
    /// within capacity.
    ///
    /// `head_ct` is the scan count of the first scan in `src` and `now_t` the
    /// absolute time of its last scan. Inputs larger than the block cap are
    /// split, with tail times interpolated linearly from the previous tail to
    /// `now_t`. All new blocks are built before the queue is touched, so a
    /// failed allocation leaves the queue as it was.
    ///
    /// Counts need not continue the newest block. A gap (scans lost upstream)
    /// is logged and accepted, and times after it restart from
    /// `now_t - n_whole / srate` rather than interpolating across the gap. Scans already retained are dropped
    /// from the front of `src`.
    pub fn enqueue(&self, src: &[i16], now_t: f64, head_ct: u64, n_whole: usize) -> AiqResult<()> {
        if n_whole == 0 {
            return Ok(());
        }
        let expected = n_whole * self.n_chans;
        if src.len() < expected {
            warn!(
                expected,
                actual = src.len(),
                "enqueue buffer shorter than declared scan count"
            );
            return Err(AiqError::ShapeMismatch {
                expected,
                actual: src.len(),
            });
        }

        let mut state = self.state.lock();

        let (mut src, mut head_ct, mut n_whole) = (src, head_ct, n_whole);
        let prev_tail = match state.blocks.back() {
            Some(back) if back.end_ct() == head_ct => Some(back.tail_t),
            Some(back) if back.end_ct() < head_ct => {
                warn!(
                    expected = back.end_ct(),
                    actual = head_ct,
                    lost = head_ct - back.end_ct(),
                    "enqueue scan count gap"
                );
                None
            }
            Some(back) => {
                let repeated = back.end_ct() - head_ct;
                if repeated >= n_whole as u64 {
                    warn!(head_ct, n_whole, end_ct = back.end_ct(), "enqueue of retained scans ignored");
                    return Ok(());
                }
                let repeated = repeated as usize;
                warn!(head_ct, repeated, "enqueue overlaps retained scans");
                src = &src[repeated * self.n_chans..];
                head_ct = back.end_ct();
                n_whole -= repeated;
                Some(back.tail_t)
            }
            None => None,
        };

        let sizes = block_sizes(n_whole, self.block_max_scans);
        let mut fresh = Vec::new();
        fresh
            .try_reserve_exact(sizes.len())
            .map_err(|_| AiqError::Allocation { scans: n_whole })?;

        if let [only] = sizes.as_slice() {
            fresh.push(SampleBlock::new(src, 0, *only, self.n_chans, head_ct, now_t)?);
        } else {
            let t0 = prev_tail.unwrap_or(now_t - n_whole as f64 / self.srate);
            let span = now_t - t0;
            let mut offset = 0usize;
            for len in &sizes {
                let end = offset + len;
                let tail_t = t0 + span * end as f64 / n_whole as f64;
                fresh.push(SampleBlock::new(
                    src,
                    offset,
                    *len,
                    self.n_chans,
                    head_ct + offset as u64,
                    tail_t,
                )?);
                offset = end;
            }
            trace!(n_whole, blocks = sizes.len(), "enqueue split input");
        }

        state.blocks.extend(fresh);
        state.cur_cts += n_whole as u64;

        let mut evicted = 0usize;
        while state.cur_cts > self.max_cts {
            match state.blocks.pop_front() {
                Some(old) => {
                    state.cur_cts -= old.n_scans() as u64;
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            trace!(evicted, cur_cts = state.cur_cts, "evicted oldest blocks");
        }

        Ok(())
    }

    /// Scan count of the oldest retained scan, or 0 when empty.
    pub fn q_head_ct(&self) -> u64 {
        self.state.lock().head_ct().unwrap_or(0)
    }

    /// Scan count following the newest retained scan, or 0 when empty.
    pub fn cur_count(&self) -> u64 {
        self.state.lock().end_ct().unwrap_or(0)
    }

    /// Synonym for [`cur_count`](Self::cur_count).
    pub fn end_ct(&self) -> u64 {
        self.cur_count()
    }

    /// Scans currently retained.
    pub fn q_cts(&self) -> u64 {
        self.state.lock().cur_cts
    }

    /// Retained scans as a fraction of nominal capacity.
    pub fn fill_fraction(&self) -> f64 {
        self.q_cts() as f64 / self.max_cts as f64
    }

    /// Number of retained blocks.
    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.state.lock().blocks.is_empty()
    }

    /// Scan count acquired at absolute time `t`.
    pub fn map_time_to_ct(&self, t: f64) -> Result<u64, Miss> {
        self.state.lock().time_to_ct(t, self.srate)
    }

    /// Absolute time at which scan `ct` was acquired.
    pub fn map_ct_to_time(&self, ct: u64) -> Result<f64, Miss> {
        self.state.lock().ct_to_time(ct, self.srate)
    }

    /// Copy every retained scan at or after time `from_t` into `dst`.
    ///
    /// Returns the number of scans copied.
    pub fn get_all_scans_from_t(
        &self,
        dst: &mut Vec<SampleBlock>,
        from_t: f64,
    ) -> Result<usize, Miss> {
        let state = self.state.lock();
        let from_ct = state.first_ct_at_or_after(from_t, self.srate)?;
        state.copy_from(dst, from_ct, usize::MAX, self.srate)
    }

    /// Copy every retained scan at or after `from_ct` into `dst`.
    pub fn get_all_scans_from_ct(
        &self,
        dst: &mut Vec<SampleBlock>,
        from_ct: u64,
    ) -> Result<usize, Miss> {
        self.state
            .lock()
            .copy_from(dst, from_ct, usize::MAX, self.srate)
    }

    /// Copy at most `n_max` scans, the first acquired at or after `from_t`,
    /// into `dst`.
    pub fn get_n_scans_from_t(
        &self,
        dst: &mut Vec<SampleBlock>,
        from_t: f64,
        n_max: usize,
    ) -> Result<usize, Miss> {
        let state = self.state.lock();
        let from_ct = state.first_ct_at_or_after(from_t, self.srate)?;
        state.copy_from(dst, from_ct, n_max, self.srate)
    }

    /// Copy at most `n_max` scans starting at `from_ct` into `dst`.
    pub fn get_n_scans_from_ct(
        &self,
        dst: &mut Vec<SampleBlock>,
        from_ct: u64,
        n_max: usize,
    ) -> Result<usize, Miss> {
        self.state.lock().copy_from(dst, from_ct, n_max, self.srate)
    }

    /// Copy the newest `n_max` scans (fewer if less is retained) into `dst`.
    pub fn get_newest_n_scans(&self, dst: &mut Vec<SampleBlock>, n_max: usize) -> Result<usize, Miss> {
        let state = self.state.lock();
        if state.blocks.is_empty() {
            return Err(Miss::Empty);
        }
        dst.clear();

        let mut total = 0usize;
        let mut start = state.blocks.len();
        while start > 0 && total < n_max {
            start -= 1;
            total += state.blocks[start].n_scans();
        }
        let skip = total.saturating_sub(n_max);

        for (i, block) in state.blocks.range(start..).enumerate() {
            if i == 0 && skip > 0 {
                dst.push(block.window(skip, usize::MAX, self.srate));
            } else {
                dst.push(block.clone());
            }
        }
        Ok(total - skip)
    }

    /// Fill `dst` with channel `chan` for `dst.len()` scans from `from_ct`.
    ///
    /// Returns `from_ct` on success.
    pub fn get_n_scans_from_ct_mono(
        &self,
        dst: &mut [i16],
        from_ct: u64,
        chan: usize,
    ) -> Result<u64, Miss> {
        self.check_chans(&[chan])?;
        self.state.lock().fill_channels(dst, from_ct, &[chan])?;
        Ok(from_ct)
    }

    /// Fill `dst` with interleaved `(left, right)` channel pairs for
    /// `dst.len() / 2` scans from `from_ct`.
    pub fn get_n_scans_from_ct_stereo(
        &self,
        dst: &mut [i16],
        from_ct: u64,
        left: usize,
        right: usize,
    ) -> Result<u64, Miss> {
        self.check_chans(&[left, right])?;
        self.state
            .lock()
            .fill_channels(dst, from_ct, &[left, right])?;
        Ok(from_ct)
    }

    /// Fill `dst` with the newest `dst.len()` scans of channel `chan`.
    ///
    /// Returns the scan count of the first scan copied.
    pub fn get_newest_n_scans_mono(&self, dst: &mut [i16], chan: usize) -> Result<u64, Miss> {
        self.check_chans(&[chan])?;
        let state = self.state.lock();
        let from_ct = Self::newest_start(&state, dst.len())?;
        state.fill_channels(dst, from_ct, &[chan])?;
        Ok(from_ct)
    }

    /// Fill `dst` with the newest `dst.len() / 2` scans of `(left, right)`.
    pub fn get_newest_n_scans_stereo(
        &self,
        dst: &mut [i16],
        left: usize,
        right: usize,
    ) -> Result<u64, Miss> {
        self.check_chans(&[left, right])?;
        let state = self.state.lock();
        let from_ct = Self::newest_start(&state, dst.len() / 2)?;
        state.fill_channels(dst, from_ct, &[left, right])?;
        Ok(from_ct)
    }

    /// Clone the single retained block that holds `from_ct`, untrimmed.
    pub fn copy_one_block_from_ct(&self, from_ct: u64) -> Result<SampleBlock, Miss> {
        let state = self.state.lock();
        let idx = state.locate(from_ct)?;
        Ok(state.blocks[idx].clone())
    }

    /// Run `f` against the block sequence with the lock held.
    pub(crate) fn with_blocks<R>(&self, f: impl FnOnce(&VecDeque<SampleBlock>) -> R) -> R {
        f(&self.state.lock().blocks)
    }

    fn check_chans(&self, chans: &[usize]) -> Result<(), Miss> {
        if chans.iter().all(|&c| c < self.n_chans) {
            Ok(())
        } else {
            Err(Miss::NoSuchChannel)
        }
    }

    fn newest_start(state: &QueueState, n_scans: usize) -> Result<u64, Miss> {
        let end = state.end_ct().ok_or(Miss::Empty)?;
        if state.cur_cts < n_scans as u64 {
            return Err(Miss::Insufficient);
        }
        Ok(end - n_scans as u64)
    }
}
