//! Per-block transforms applied during filtered edge searches.
//!
//! A filtered search hands each block's samples, copied, to a [`BlockFilter`]
//! before testing them. The callback runs while the queue lock is held, so it
//! must not block and must not call back into the same queue.
//!
//! Any `FnMut(&mut [i16], usize)` closure is a `BlockFilter`. For the common
//! case of conditioning one channel before thresholding, [`IirBlockFilter`]
//! wraps a second-order `biquad` section.

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Q_BUTTERWORTH_F64};
use serde::{Deserialize, Serialize};

use crate::error::{AiqError, AiqResult};

/// In-place transform over one block of interleaved samples.
pub trait BlockFilter {
    /// Transform `data` (interleaved, `n_chans` per scan) in place.
    fn apply(&mut self, data: &mut [i16], n_chans: usize);
}

impl<F> BlockFilter for F
where
    F: FnMut(&mut [i16], usize),
{
    fn apply(&mut self, data: &mut [i16], n_chans: usize) {
        self(data, n_chans)
    }
}

/// The type of IIR filter to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    /// Pass frequencies below `f0`.
    Lowpass,
    /// Pass frequencies above `f0`.
    Highpass,
    /// Pass a band centred on `f0`.
    Bandpass,
    /// Reject a band centred on `f0` (notch).
    Bandstop,
}

/// Configuration for an [`IirBlockFilter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IirFilterConfig {
    /// Filter response.
    pub filter_type: FilterType,
    /// Cutoff or centre frequency in Hz.
    pub f0: f64,
    /// Sample rate of the stream in Hz.
    pub fs: f64,
    /// Quality factor. Butterworth when absent.
    pub q: Option<f64>,
    /// Channel within each scan to filter; other channels pass through.
    pub chan: usize,
}

/// Biquad filter over a single channel of interleaved blocks.
///
/// State carries over between calls, so consecutive blocks are filtered as one
/// continuous signal. Call [`reset`](Self::reset) before reusing the filter on
/// a discontinuous stretch.
pub struct IirBlockFilter {
    filter: DirectForm1<f64>,
    coeffs: Coefficients<f64>,
    chan: usize,
}

impl IirBlockFilter {
    /// Design the filter described by `config`.
    pub fn new(config: &IirFilterConfig) -> AiqResult<Self> {
        let coeffs = Self::design_filter(config)?;
        Ok(Self {
            filter: DirectForm1::<f64>::new(coeffs),
            coeffs,
            chan: config.chan,
        })
    }

    fn design_filter(config: &IirFilterConfig) -> AiqResult<Coefficients<f64>> {
        let kind = match config.filter_type {
            FilterType::Lowpass => biquad::Type::LowPass,
            FilterType::Highpass => biquad::Type::HighPass,
            FilterType::Bandpass => biquad::Type::BandPass,
            FilterType::Bandstop => biquad::Type::Notch,
        };
        Coefficients::<f64>::from_params(
            kind,
            config.fs.hz(),
            config.f0.hz(),
            config.q.unwrap_or(Q_BUTTERWORTH_F64),
        )
        .map_err(|e| {
            AiqError::Configuration(format!(
                "cannot design {:?} filter at f0={} Hz, fs={} Hz: {:?}",
                config.filter_type, config.f0, config.fs, e
            ))
        })
    }

    /// Clear the filter's delay line.
    pub fn reset(&mut self) {
        self.filter = DirectForm1::<f64>::new(self.coeffs);
    }
}

impl BlockFilter for IirBlockFilter {
    fn apply(&mut self, data: &mut [i16], n_chans: usize) {
        if self.chan >= n_chans {
            return;
        }
        for scan in data.chunks_exact_mut(n_chans) {
            let y = self.filter.run(f64::from(scan[self.chan]));
            scan[self.chan] = y.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        }
    }
}
