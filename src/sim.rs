//! Synthetic acquisition source.
//!
//! Generates interleaved 16-bit buffers the way a hardware stream would hand
//! them to [`SampleQueue::enqueue`]:
//!
//! - channel 0 is a ramp, `ct mod 32768`, so readers can check continuity
//! - the sync channel carries a square wave of the configured period, high
//!   (bit set, or above threshold) during the first half of each period of
//!   true time
//! - every other channel is low-amplitude seeded noise
//!
//! The source's sample clock may run fast or slow by `skew_ppm`, and it can
//! report a start time that differs from the true one. Both are invisible to
//! naive count-to-time mapping and are what sync alignment corrects.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::config::{StreamConfig, SyncChannel, SyncConfig};
use crate::data::queue::SampleQueue;
use crate::error::AiqResult;

const NOISE_AMPLITUDE: i16 = 64;

/// One generated producer buffer.
#[derive(Debug, Clone)]
pub struct SimBuffer {
    /// Interleaved samples, `n_scans * n_chans` long.
    pub data: Vec<i16>,
    /// Scan count of the first scan.
    pub head_ct: u64,
    /// True time of the last scan.
    pub now_t: f64,
    /// Scans in `data`.
    pub n_scans: usize,
}

/// Per-stream synthetic producer.
#[derive(Debug)]
pub struct SyntheticSource {
    srate: f64,
    n_chans: usize,
    sync: SyncChannel,
    period_secs: f64,
    t_zero: f64,
    reported_t_zero: f64,
    skew_ppm: f64,
    next_ct: u64,
    rng: StdRng,
}

impl SyntheticSource {
    /// Source for `stream` starting at true time `t_zero`.
    pub fn new(stream: &StreamConfig, sync: &SyncConfig, t_zero: f64, seed: u64) -> Self {
        Self {
            srate: stream.sample_rate_hz,
            n_chans: stream.n_chans,
            sync: stream.sync,
            period_secs: sync.source_period_secs,
            t_zero,
            reported_t_zero: t_zero,
            skew_ppm: 0.0,
            next_ct: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Run the sample clock `ppm` parts per million fast (negative: slow).
    pub fn with_skew_ppm(mut self, ppm: f64) -> Self {
        self.skew_ppm = ppm;
        self
    }

    /// Report a start time off by `error_secs` from the true one.
    pub fn with_t_zero_error(mut self, error_secs: f64) -> Self {
        self.reported_t_zero = self.t_zero + error_secs;
        self
    }

    /// Scan count of the next scan to be generated.
    pub fn next_ct(&self) -> u64 {
        self.next_ct
    }

    /// Start time the source reports to its queue.
    pub fn reported_t_zero(&self) -> f64 {
        self.reported_t_zero
    }

    /// True time at which scan `ct` is taken.
    pub fn scan_time(&self, ct: u64) -> f64 {
        self.t_zero + ct as f64 / (self.srate * (1.0 + self.skew_ppm * 1e-6))
    }

    fn sync_high(&self, t: f64) -> bool {
        (t / self.period_secs).rem_euclid(1.0) < 0.5
    }

    fn sync_value(&self, high: bool) -> i16 {
        match self.sync {
            SyncChannel::Bit { bit, .. } => {
                if high {
                    (1u16 << bit.min(15)) as i16
                } else {
                    0
                }
            }
            SyncChannel::Analog { .. } => {
                if high {
                    i16::MAX
                } else {
                    i16::MIN
                }
            }
        }
    }

    /// Generate the next `n_scans` scans.
    pub fn next_buffer(&mut self, n_scans: usize) -> SimBuffer {
        let head_ct = self.next_ct;
        let sync_chan = self.sync.chan();
        let mut data = Vec::with_capacity(n_scans * self.n_chans);

        for ct in head_ct..head_ct + n_scans as u64 {
            let high = self.sync_high(self.scan_time(ct));
            for chan in 0..self.n_chans {
                let v = if chan == sync_chan {
                    self.sync_value(high)
                } else if chan == 0 {
                    (ct % 32768) as i16
                } else {
                    self.rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE)
                };
                data.push(v);
            }
        }

        self.next_ct += n_scans as u64;
        let now_t = self.scan_time(self.next_ct.saturating_sub(1));
        SimBuffer {
            data,
            head_ct,
            now_t,
            n_scans,
        }
    }

    /// Generate `n_scans` scans and enqueue them. Records the start time on
    /// the queue before the first buffer.
    ///
    /// Returns the queue's new end count.
    pub fn produce(&mut self, queue: &SampleQueue, n_scans: usize) -> AiqResult<u64> {
        if self.next_ct == 0 {
            queue.set_t_zero(self.reported_t_zero);
        }
        let buf = self.next_buffer(n_scans);
        queue.enqueue(&buf.data, buf.now_t, buf.head_ct, buf.n_scans)?;
        trace!(head_ct = buf.head_ct, n_scans, "synthetic buffer enqueued");
        Ok(buf.head_ct + n_scans as u64)
    }
}
