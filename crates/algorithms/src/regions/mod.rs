//! Region selection: exclusion filtering and batch partitioning

mod batch;
mod filter;

pub use batch::{batch_count, select_batch, Batch};
pub use filter::exclude_regions;
