//! Cross-stream time alignment from a shared sync signal.
//!
//! Every stream records the same periodic square wave (on a digital bit or
//! an analog channel). Each stream's clock maps scan counts to absolute time
//! as `t_zero + ct / srate`, which drifts when the sample clocks or the start
//! times disagree. [`sync_dst_t_abs`] corrects that mapping by locating the
//! nearest sync edge in both streams and carrying the source's offset from its
//! edge over to the destination's edge.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::{StreamConfig, SyncChannel, SyncConfig};
use crate::data::edge::{EdgePolarity, EdgeSearch, EdgeSignal};
use crate::data::queue::SampleQueue;
use crate::error::{AiqError, AiqResult};

/// Convert an analog threshold in volts to signed 16-bit sample counts.
pub fn volts_to_counts(volts: f64, v_range: f64) -> i16 {
    (volts / v_range * 32768.0)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

/// Per-stream sync state.
#[derive(Debug, Clone)]
pub struct StreamSync {
    queue: Arc<SampleQueue>,
    t_zero: f64,
    srate: f64,
    chan: usize,
    bit: Option<u32>,
    thresh: i16,
    /// Absolute time from the last alignment.
    pub t_abs: f64,
    /// Whether `t_abs` was corrected using sync edges.
    pub by_sync: bool,
}

impl StreamSync {
    /// Set up sync for stream `ip` of `streams`, reading from `queue`.
    ///
    /// Captures the queue's time origin, so call this once the producer has
    /// recorded it.
    pub fn init(
        queue: Arc<SampleQueue>,
        ip: usize,
        streams: &[StreamConfig],
        sync: &SyncConfig,
    ) -> AiqResult<Self> {
        let stream = streams.get(ip).ok_or_else(|| {
            AiqError::Configuration(format!("no stream at index {ip} ({} configured)", streams.len()))
        })?;

        let (chan, bit, thresh) = match stream.sync {
            SyncChannel::Bit { chan, bit } => {
                if bit > 15 {
                    return Err(AiqError::Configuration(format!(
                        "stream '{}': sync bit {bit} outside 0-15",
                        stream.name
                    )));
                }
                (chan, Some(bit), 0)
            }
            SyncChannel::Analog {
                chan,
                thresh_volts,
                v_range,
            } => {
                if !(v_range.is_finite() && v_range > 0.0) {
                    return Err(AiqError::Configuration(format!(
                        "stream '{}': v_range must be positive, got {v_range}",
                        stream.name
                    )));
                }
                (chan, None, volts_to_counts(thresh_volts, v_range))
            }
        };
        if chan >= queue.n_chans() {
            return Err(AiqError::Configuration(format!(
                "stream '{}': sync channel {chan} outside {} channels",
                stream.name,
                queue.n_chans()
            )));
        }

        let t_zero = queue.t_zero();
        let srate = queue.sample_rate();
        debug!(
            stream = %stream.name,
            chan,
            ?bit,
            thresh,
            t_zero,
            enabled = sync.enabled,
            "StreamSync initialised"
        );

        Ok(Self {
            queue,
            t_zero,
            srate,
            chan,
            bit,
            thresh,
            t_abs: t_zero,
            by_sync: false,
        })
    }

    /// Queue this stream reads from.
    pub fn queue(&self) -> &Arc<SampleQueue> {
        &self.queue
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.srate
    }

    /// Threshold in counts for analog sync; 0 for bit sync.
    pub fn thresh(&self) -> i16 {
        self.thresh
    }

    /// The sync signal as an edge-search input.
    pub fn signal(&self) -> EdgeSignal {
        match self.bit {
            Some(bit) => EdgeSignal::Bit {
                chan: self.chan,
                bit,
            },
            None => EdgeSignal::Threshold {
                chan: self.chan,
                thresh: self.thresh,
            },
        }
    }

    /// Naive absolute time of scan `ct`.
    #[inline]
    pub fn ct_to_t_abs(&self, ct: u64) -> f64 {
        self.t_zero + ct as f64 / self.srate
    }

    /// Naive scan count at absolute time `t_abs`, floored at 0.
    #[inline]
    pub fn t_abs_to_ct(&self, t_abs: f64) -> u64 {
        ((t_abs - self.t_zero) * self.srate).round().max(0.0) as u64
    }

    /// Find the sync rising edge near `from_ct`.
    ///
    /// The search starts 1.5 sync periods before `from_ct` (or at the oldest
    /// retained scan) so the window spans at least one whole period.
    pub fn find_edge(&self, from_ct: u64, sync: &SyncConfig) -> EdgeSearch {
        let back = (1.5 * sync.source_period_secs * self.srate).round() as u64;
        self.queue.find_edge_in_window(
            from_ct.saturating_sub(back),
            self.signal(),
            EdgePolarity::Rising,
            sync.inarow,
        )
    }
}

/// Absolute time in `dst`'s clock of scan `src_ct` of `src`.
///
/// Sets `dst.t_abs` and `dst.by_sync`. Falls back to the naive mapping when
/// sync is disabled or either stream has no edge in range.
pub fn sync_dst_t_abs(src_ct: u64, src: &StreamSync, dst: &mut StreamSync, sync: &SyncConfig) -> f64 {
    let naive = src.ct_to_t_abs(src_ct);
    dst.t_abs = naive;
    dst.by_sync = false;

    if !sync.enabled {
        return naive;
    }

    let Some(src_edge) = src.find_edge(src_ct, sync).found() else {
        trace!(src_ct, "no source sync edge");
        return naive;
    };
    let dst_from = dst.t_abs_to_ct(src.ct_to_t_abs(src_edge));
    let Some(dst_edge) = dst.find_edge(dst_from, sync).found() else {
        trace!(src_ct, dst_from, "no destination sync edge");
        return naive;
    };

    let mut t = dst.ct_to_t_abs(dst_edge) + (src_ct as f64 - src_edge as f64) / src.srate;

    // Edges repeat every period; keep the one nearest the naive estimate.
    let period = sync.source_period_secs;
    if t - naive > 0.5 * period {
        t -= period;
    } else if naive - t > 0.5 * period {
        t += period;
    }

    dst.t_abs = t;
    dst.by_sync = true;
    t
}

/// Align every stream in `streams` to scan `src_ct` of stream `i_src`.
///
/// The source's own `t_abs` is set to its naive time.
pub fn sync_dst_t_abs_mult(
    src_ct: u64,
    i_src: usize,
    streams: &mut [StreamSync],
    sync: &SyncConfig,
) -> AiqResult<()> {
    let n = streams.len();
    let (before, rest) = streams.split_at_mut(i_src.min(n));
    let Some((src, after)) = rest.split_first_mut() else {
        return Err(AiqError::Configuration(format!(
            "no stream at index {i_src} ({n} configured)"
        )));
    };

    src.t_abs = src.ct_to_t_abs(src_ct);
    src.by_sync = false;

    for dst in before.iter_mut().chain(after.iter_mut()) {
        sync_dst_t_abs(src_ct, src, dst, sync);
    }
    Ok(())
}
