//! Scan-by-scan cursors that step across block boundaries.
//!
//! Both walkers address samples with a `(block index, scan offset)` pair into
//! the queue's block sequence, so crossing from one block into the next is an
//! index bump rather than pointer arithmetic. They borrow the block sequence,
//! which means they only exist while the queue lock is held.

use std::collections::VecDeque;

use crate::data::block::SampleBlock;
use crate::data::filter::BlockFilter;
use crate::error::Miss;

/// Forward cursor over retained scans.
pub trait ScanCursor {
    /// Sample of `chan` at the current scan.
    fn value(&self, chan: usize) -> i16;

    /// Step to the next scan. Returns `false` (and marks the cursor exhausted)
    /// when no further scan is retained.
    fn advance(&mut self) -> bool;

    /// Absolute scan count of the current scan.
    fn ct(&self) -> u64;

    /// Whether a previous `advance` ran off the newest block.
    fn is_exhausted(&self) -> bool;
}

/// `(block index, scan offset)` of the first retained scan at or after `ct`.
///
/// A count lost in an enqueue gap resolves to the head of the block after the
/// gap. Searches from the newest end.
pub(crate) fn seek(blocks: &VecDeque<SampleBlock>, ct: u64) -> Result<(usize, usize), Miss> {
    let Some(idx) = blocks.iter().rposition(|b| b.head_ct <= ct) else {
        return match blocks.front() {
            Some(_) => Err(Miss::TooEarly),
            None => Err(Miss::Empty),
        };
    };
    let block = &blocks[idx];
    if ct < block.end_ct() {
        Ok((idx, (ct - block.head_ct) as usize))
    } else if idx + 1 < blocks.len() {
        Ok((idx + 1, 0))
    } else {
        Err(Miss::TooLate)
    }
}

/// Cursor over the raw retained samples.
#[derive(Debug, Clone)]
pub struct BlockWalker<'a> {
    blocks: &'a VecDeque<SampleBlock>,
    block: usize,
    scan: usize,
    exhausted: bool,
}

impl<'a> BlockWalker<'a> {
    /// Position a walker on scan `from_ct`.
    pub fn new(blocks: &'a VecDeque<SampleBlock>, from_ct: u64) -> Result<Self, Miss> {
        let (front, back) = match (blocks.front(), blocks.back()) {
            (Some(front), Some(back)) => (front, back),
            _ => return Err(Miss::Empty),
        };
        if from_ct < front.head_ct {
            return Err(Miss::TooEarly);
        }
        if from_ct >= back.end_ct() {
            return Err(Miss::TooLate);
        }
        let (block, scan) = seek(blocks, from_ct)?;

        Ok(Self {
            blocks,
            block,
            scan,
            exhausted: false,
        })
    }

    /// Index of the block under the cursor.
    #[inline]
    pub fn block_index(&self) -> usize {
        self.block
    }

    #[inline]
    fn current(&self) -> &'a SampleBlock {
        &self.blocks[self.block]
    }
}

impl ScanCursor for BlockWalker<'_> {
    #[inline]
    fn value(&self, chan: usize) -> i16 {
        self.current().sample(self.scan, chan)
    }

    fn advance(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        if self.scan + 1 < self.current().n_scans() {
            self.scan += 1;
            return true;
        }
        if self.block + 1 < self.blocks.len() {
            self.block += 1;
            self.scan = 0;
            return true;
        }
        self.exhausted = true;
        false
    }

    #[inline]
    fn ct(&self) -> u64 {
        self.current().head_ct + self.scan as u64
    }

    #[inline]
    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Cursor that runs each block through a [`BlockFilter`] before reading it.
///
/// The filter sees a scratch copy of the whole block the first time the cursor
/// enters it; the queue's own samples are never touched.
pub struct FilteredBlockWalker<'a, 'f> {
    inner: BlockWalker<'a>,
    filter: &'f mut dyn BlockFilter,
    scratch: Vec<i16>,
    n_chans: usize,
}

impl<'a, 'f> FilteredBlockWalker<'a, 'f> {
    /// Position a filtering walker on scan `from_ct`.
    pub fn new(
        blocks: &'a VecDeque<SampleBlock>,
        from_ct: u64,
        filter: &'f mut dyn BlockFilter,
    ) -> Result<Self, Miss> {
        let inner = BlockWalker::new(blocks, from_ct)?;
        let n_chans = inner.current().n_chans();
        let mut walker = Self {
            inner,
            filter,
            scratch: Vec::new(),
            n_chans,
        };
        walker.load_block();
        Ok(walker)
    }

    fn load_block(&mut self) {
        self.scratch.clear();
        self.scratch.extend_from_slice(&self.inner.current().data);
        self.filter.apply(&mut self.scratch, self.n_chans);
    }
}

impl ScanCursor for FilteredBlockWalker<'_, '_> {
    #[inline]
    fn value(&self, chan: usize) -> i16 {
        self.scratch[self.inner.scan * self.n_chans + chan]
    }

    fn advance(&mut self) -> bool {
        let before = self.inner.block;
        if !self.inner.advance() {
            return false;
        }
        if self.inner.block != before {
            self.load_block();
        }
        true
    }

    #[inline]
    fn ct(&self) -> u64 {
        self.inner.ct()
    }

    #[inline]
    fn is_exhausted(&self) -> bool {
        self.inner.is_exhausted()
    }
}
