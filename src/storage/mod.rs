//! Local Process State
//!
//! Everything the monitor keeps on its own disk rather than in the series
//! store: the ingestion watermark (sled) and the process lock file.

pub mod lockfile;
pub mod watermark;

pub use lockfile::ProcessLock;
pub use watermark::{Watermark, WatermarkError, WatermarkStore};
