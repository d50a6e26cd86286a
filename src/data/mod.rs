//! Sample storage, retrieval and scanning.
pub mod block;
pub mod edge;
pub mod filter;
pub mod queue;
pub mod walker;

pub use block::{cat_blocks, SampleBlock};
pub use edge::{EdgePolarity, EdgeSearch, EdgeSignal};
pub use filter::{BlockFilter, FilterType, IirBlockFilter, IirFilterConfig};
pub use queue::SampleQueue;
pub use walker::{BlockWalker, FilteredBlockWalker, ScanCursor};
