//! Immutable chunks of interleaved multi-channel samples.
//!
//! A `SampleBlock` is the unit of storage inside a [`SampleQueue`]. Blocks are
//! built once at enqueue time and never mutated while they live in the queue;
//! readers always receive clones, which they may trim freely.
//!
//! [`SampleQueue`]: crate::data::queue::SampleQueue

use std::borrow::Cow;

use crate::error::{AiqError, AiqResult};

/// A contiguous run of scans sharing one head count and one tail timestamp.
///
/// `data` is interleaved `n_chans` samples per scan. Scan `k` of the block
/// (absolute count `head_ct + k`) occupies `data[k * n_chans..(k + 1) * n_chans]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    /// Interleaved 16-bit samples.
    pub data: Vec<i16>,
    /// Absolute scan count of the first scan.
    pub head_ct: u64,
    /// Absolute time (seconds) of the last scan.
    pub tail_t: f64,
    n_chans: usize,
}

impl SampleBlock {
    /// Copy `len` scans starting `offset` scans into `src`.
    ///
    /// Fails with [`AiqError::Allocation`] if the copy cannot be reserved and
    /// with [`AiqError::ShapeMismatch`] if `src` is too short.
    pub fn new(
        src: &[i16],
        offset: usize,
        len: usize,
        n_chans: usize,
        head_ct: u64,
        tail_t: f64,
    ) -> AiqResult<Self> {
        let start = offset * n_chans;
        let end = start + len * n_chans;
        let slice = src.get(start..end).ok_or(AiqError::ShapeMismatch {
            expected: end,
            actual: src.len(),
        })?;

        let mut data = Vec::new();
        data.try_reserve_exact(slice.len())
            .map_err(|_| AiqError::Allocation { scans: len })?;
        data.extend_from_slice(slice);

        Ok(Self {
            data,
            head_ct,
            tail_t,
            n_chans,
        })
    }

    /// Channels per scan.
    #[inline]
    pub fn n_chans(&self) -> usize {
        self.n_chans
    }

    /// Number of whole scans held.
    #[inline]
    pub fn n_scans(&self) -> usize {
        self.data.len() / self.n_chans
    }

    /// Scan count one past the last scan.
    #[inline]
    pub fn end_ct(&self) -> u64 {
        self.head_ct + self.n_scans() as u64
    }

    /// Whether `ct` falls inside `[head_ct, end_ct)`.
    #[inline]
    pub fn contains_ct(&self, ct: u64) -> bool {
        ct >= self.head_ct && ct < self.end_ct()
    }

    /// Sample of channel `chan` in block-relative scan `scan`.
    #[inline]
    pub fn sample(&self, scan: usize, chan: usize) -> i16 {
        self.data[scan * self.n_chans + chan]
    }

    /// Absolute time of the first scan, assuming constant rate `srate`.
    #[inline]
    pub fn head_t(&self, srate: f64) -> f64 {
        self.tail_t - (self.n_scans().saturating_sub(1)) as f64 / srate
    }

    /// Copy `take` scans starting `skip` scans into this block.
    ///
    /// The copy's `head_ct` and `tail_t` describe exactly the scans it holds;
    /// `tail_t` is pulled back at rate `srate` for scans dropped from the end.
    pub(crate) fn window(&self, skip: usize, take: usize, srate: f64) -> SampleBlock {
        let have = self.n_scans();
        let skip = skip.min(have);
        let take = take.min(have - skip);
        let dropped_tail = have - skip - take;
        SampleBlock {
            data: self.data[skip * self.n_chans..(skip + take) * self.n_chans].to_vec(),
            head_ct: self.head_ct + skip as u64,
            tail_t: self.tail_t - dropped_tail as f64 / srate,
            n_chans: self.n_chans,
        }
    }
}

/// Flatten retrieved blocks into one contiguous buffer.
///
/// The single-block case borrows the block's own data; only two or more blocks
/// are copied. An empty slice yields an empty borrowed buffer.
pub fn cat_blocks(blocks: &[SampleBlock]) -> AiqResult<Cow<'_, [i16]>> {
    match blocks {
        [] => Ok(Cow::Borrowed(&[])),
        [only] => Ok(Cow::Borrowed(only.data.as_slice())),
        many => {
            let total: usize = many.iter().map(|b| b.data.len()).sum();
            let mut flat = Vec::new();
            flat.try_reserve_exact(total).map_err(|_| {
                tracing::warn!(samples = total, "cat_blocks allocation failed");
                AiqError::Allocation {
                    scans: many.iter().map(SampleBlock::n_scans).sum(),
                }
            })?;
            for block in many {
                flat.extend_from_slice(&block.data);
            }
            Ok(Cow::Owned(flat))
        }
    }
}
