//! Debounced edge detection over retained scans.
//!
//! Searches walk forward from a starting scan count with a [`ScanCursor`],
//! looking for a fresh transition into the "on" level that then holds for
//! `inarow` consecutive scans. Because the cursor steps across block
//! boundaries transparently, a run may start in one block and be confirmed
//! in the next.
//!
//! When nothing is confirmed before the newest scan, the search returns a
//! resume point instead of failing outright. Polling the same signal again
//! from that point examines only new data, and a run still being confirmed
//! at the end of the window is picked up again rather than lost.

use crate::data::filter::BlockFilter;
use crate::data::queue::SampleQueue;
use crate::data::walker::{BlockWalker, FilteredBlockWalker, ScanCursor};
use crate::error::Miss;

/// Direction of the transition to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePolarity {
    /// Low to high.
    Rising,
    /// High to low.
    Falling,
}

/// How the searched signal is encoded in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSignal {
    /// High while the channel value exceeds `thresh`.
    Threshold {
        /// Channel index within each scan.
        chan: usize,
        /// Level the value must exceed to be high.
        thresh: i16,
    },
    /// High while bit `bit` of a digital word channel is set.
    Bit {
        /// Word channel index within each scan.
        chan: usize,
        /// Bit position, 0..16.
        bit: u32,
    },
    /// High only while both channels exceed their thresholds.
    Coincident {
        /// First channel.
        chan_a: usize,
        /// Threshold for the first channel.
        thresh_a: i16,
        /// Second channel.
        chan_b: usize,
        /// Threshold for the second channel.
        thresh_b: i16,
    },
}

impl EdgeSignal {
    fn fits(&self, n_chans: usize) -> bool {
        match *self {
            EdgeSignal::Threshold { chan, .. } => chan < n_chans,
            EdgeSignal::Bit { chan, bit } => chan < n_chans && bit < 16,
            EdgeSignal::Coincident { chan_a, chan_b, .. } => chan_a < n_chans && chan_b < n_chans,
        }
    }

    #[inline]
    fn is_high<C: ScanCursor>(&self, cursor: &C) -> bool {
        match *self {
            EdgeSignal::Threshold { chan, thresh } => cursor.value(chan) > thresh,
            EdgeSignal::Bit { chan, bit } => (cursor.value(chan) as u16 >> bit) & 1 == 1,
            EdgeSignal::Coincident {
                chan_a,
                thresh_a,
                chan_b,
                thresh_b,
            } => cursor.value(chan_a) > thresh_a && cursor.value(chan_b) > thresh_b,
        }
    }
}

/// Outcome of an edge search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSearch {
    /// Scan count where the accepted transition starts.
    Found(u64),
    /// No edge confirmed yet; poll again from `resume_ct` once more data
    /// has arrived.
    Pending {
        /// Where the next search should start.
        resume_ct: u64,
    },
    /// The search could not start.
    OutOfRange(Miss),
}

impl EdgeSearch {
    /// Edge scan count if one was found.
    pub fn found(self) -> Option<u64> {
        match self {
            EdgeSearch::Found(ct) => Some(ct),
            _ => None,
        }
    }

    /// Resume point if the search is still pending.
    pub fn resume_ct(self) -> Option<u64> {
        match self {
            EdgeSearch::Pending { resume_ct } => Some(resume_ct),
            _ => None,
        }
    }
}

fn scan_for_edge<C: ScanCursor>(
    cursor: &mut C,
    signal: &EdgeSignal,
    polarity: EdgePolarity,
    inarow: usize,
) -> EdgeSearch {
    let inarow = inarow.max(1);
    let want_high = polarity == EdgePolarity::Rising;
    let is_on = |c: &C| signal.is_high(c) == want_high;

    // A transition already under way at the start is not a fresh edge.
    while is_on(cursor) {
        if !cursor.advance() {
            return EdgeSearch::Pending {
                resume_ct: cursor.ct(),
            };
        }
    }

    let mut candidate: Option<u64> = None;
    let mut run = 0usize;
    while cursor.advance() {
        if is_on(cursor) {
            if run == 0 {
                candidate = Some(cursor.ct());
            }
            run += 1;
            if run >= inarow {
                if let Some(ct) = candidate {
                    return EdgeSearch::Found(ct);
                }
            }
        } else {
            run = 0;
        }
    }

    // Candidates are always preceded by an off scan, so `ct - 1` is valid.
    let resume_ct = match candidate {
        Some(ct) => ct - 1,
        None => cursor.ct(),
    };
    EdgeSearch::Pending { resume_ct }
}

impl SampleQueue {
    /// Search forward from `from_ct` for a debounced edge.
    ///
    /// With a `filter`, each block is transformed (on a copy) before its
    /// samples are tested. The filter runs with the queue locked and must not
    /// block or touch this queue.
    pub fn find_edge(
        &self,
        from_ct: u64,
        signal: EdgeSignal,
        polarity: EdgePolarity,
        inarow: usize,
        filter: Option<&mut dyn BlockFilter>,
    ) -> EdgeSearch {
        self.search_edge(from_ct, false, signal, polarity, inarow, filter)
    }

    /// Unfiltered [`find_edge`](Self::find_edge) that starts at the oldest
    /// retained scan when `from_ct` has already been evicted.
    ///
    /// The start is clamped under the same lock as the search, so eviction
    /// between the two cannot turn the search into a `TooEarly` miss.
    pub fn find_edge_in_window(
        &self,
        from_ct: u64,
        signal: EdgeSignal,
        polarity: EdgePolarity,
        inarow: usize,
    ) -> EdgeSearch {
        self.search_edge(from_ct, true, signal, polarity, inarow, None)
    }

    fn search_edge(
        &self,
        from_ct: u64,
        clamp_to_head: bool,
        signal: EdgeSignal,
        polarity: EdgePolarity,
        inarow: usize,
        filter: Option<&mut dyn BlockFilter>,
    ) -> EdgeSearch {
        if !signal.fits(self.n_chans()) {
            return EdgeSearch::OutOfRange(Miss::NoSuchChannel);
        }

        let mut from_ct = from_ct;
        let result = self.with_blocks(|blocks| {
            if clamp_to_head {
                if let Some(front) = blocks.front() {
                    from_ct = from_ct.max(front.head_ct);
                }
            }
            match filter {
                Some(filter) => FilteredBlockWalker::new(blocks, from_ct, filter)
                    .map(|mut w| scan_for_edge(&mut w, &signal, polarity, inarow)),
                None => BlockWalker::new(blocks, from_ct)
                    .map(|mut w| scan_for_edge(&mut w, &signal, polarity, inarow)),
            }
        });

        match result {
            Ok(outcome) => outcome,
            Err(Miss::TooLate) => EdgeSearch::Pending { resume_ct: from_ct },
            Err(miss) => {
                tracing::trace!(from_ct, ?miss, "edge search out of range");
                EdgeSearch::OutOfRange(miss)
            }
        }
    }

    /// Rising edge on an analog channel crossing `thresh`.
    pub fn find_rising_edge(&self, from_ct: u64, chan: usize, thresh: i16, inarow: usize) -> EdgeSearch {
        self.find_edge(
            from_ct,
            EdgeSignal::Threshold { chan, thresh },
            EdgePolarity::Rising,
            inarow,
            None,
        )
    }

    /// Falling edge on an analog channel crossing `thresh`.
    pub fn find_falling_edge(&self, from_ct: u64, chan: usize, thresh: i16, inarow: usize) -> EdgeSearch {
        self.find_edge(
            from_ct,
            EdgeSignal::Threshold { chan, thresh },
            EdgePolarity::Falling,
            inarow,
            None,
        )
    }

    /// Rising edge of bit `bit` in word channel `chan`.
    pub fn find_bit_rising_edge(&self, from_ct: u64, chan: usize, bit: u32, inarow: usize) -> EdgeSearch {
        self.find_edge(
            from_ct,
            EdgeSignal::Bit { chan, bit },
            EdgePolarity::Rising,
            inarow,
            None,
        )
    }

    /// Falling edge of bit `bit` in word channel `chan`.
    pub fn find_bit_falling_edge(&self, from_ct: u64, chan: usize, bit: u32, inarow: usize) -> EdgeSearch {
        self.find_edge(
            from_ct,
            EdgeSignal::Bit { chan, bit },
            EdgePolarity::Falling,
            inarow,
            None,
        )
    }

    /// Rising edge on a filtered analog channel.
    pub fn find_flt_rising_edge(
        &self,
        from_ct: u64,
        chan: usize,
        thresh: i16,
        inarow: usize,
        filter: &mut dyn BlockFilter,
    ) -> EdgeSearch {
        self.find_edge(
            from_ct,
            EdgeSignal::Threshold { chan, thresh },
            EdgePolarity::Rising,
            inarow,
            Some(filter),
        )
    }

    /// Falling edge on a filtered analog channel.
    pub fn find_flt_falling_edge(
        &self,
        from_ct: u64,
        chan: usize,
        thresh: i16,
        inarow: usize,
        filter: &mut dyn BlockFilter,
    ) -> EdgeSearch {
        self.find_edge(
            from_ct,
            EdgeSignal::Threshold { chan, thresh },
            EdgePolarity::Falling,
            inarow,
            Some(filter),
        )
    }

    /// Rising edge of the coincidence of two thresholded channels.
    pub fn find_dual_rising_edge(
        &self,
        from_ct: u64,
        (chan_a, thresh_a): (usize, i16),
        (chan_b, thresh_b): (usize, i16),
        inarow: usize,
    ) -> EdgeSearch {
        self.find_edge(
            from_ct,
            EdgeSignal::Coincident {
                chan_a,
                thresh_a,
                chan_b,
                thresh_b,
            },
            EdgePolarity::Rising,
            inarow,
            None,
        )
    }

    /// Falling edge of the coincidence of two thresholded channels.
    pub fn find_dual_falling_edge(
        &self,
        from_ct: u64,
        (chan_a, thresh_a): (usize, i16),
        (chan_b, thresh_b): (usize, i16),
        inarow: usize,
    ) -> EdgeSearch {
        self.find_edge(
            from_ct,
            EdgeSignal::Coincident {
                chan_a,
                thresh_a,
                chan_b,
                thresh_b,
            },
            EdgePolarity::Falling,
            inarow,
            None,
        )
    }
}
