//! Ingestion watermark
//!
//! `last_processed_time` is the only cross-cycle state of the ingestion job.
//! It never moves backwards, and it is persisted in sled after every
//! successful calibrated write so a restart does not re-emit points.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Key holding the watermark as big-endian epoch milliseconds.
const WATERMARK_KEY: &[u8] = b"last_processed_time";

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("watermark database error: {0}")]
    Database(#[from] sled::Error),

    #[error("corrupt watermark value: {0}")]
    Corrupt(String),
}

/// High-water mark of calibrated raw samples.
///
/// Monotonically non-decreasing: [`Watermark::advance`] keeps the maximum
/// of the current and the offered timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
    last_processed: Option<DateTime<Utc>>,
}

impl Watermark {
    pub const fn new(last_processed: Option<DateTime<Utc>>) -> Self {
        Self { last_processed }
    }

    pub const fn get(&self) -> Option<DateTime<Utc>> {
        self.last_processed
    }

    /// True if a sample at `ts` has not been processed yet.
    pub fn admits(&self, ts: DateTime<Utc>) -> bool {
        self.last_processed.map_or(true, |w| ts > w)
    }

    /// Move forward to `ts`; earlier timestamps are ignored.
    /// Returns true if the watermark moved.
    pub fn advance(&mut self, ts: DateTime<Utc>) -> bool {
        if self.admits(ts) {
            self.last_processed = Some(ts);
            true
        } else {
            false
        }
    }
}

/// sled-backed persistence for [`Watermark`].
#[derive(Clone)]
pub struct WatermarkStore {
    db: Arc<sled::Db>,
}

impl WatermarkStore {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WatermarkError> {
        let db = sled::open(path.as_ref())?;
        tracing::debug!(path = ?path.as_ref(), "Watermark store opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Persisted watermark, if any.
    pub fn load(&self) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let Some(bytes) = self.db.get(WATERMARK_KEY)? else {
            return Ok(None);
        };
        let raw: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| WatermarkError::Corrupt(format!("expected 8 bytes, got {}", bytes.len())))?;
        let millis = i64::from_be_bytes(raw);
        DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| WatermarkError::Corrupt(format!("timestamp {millis} out of range")))
    }

    /// Persist `watermark` (no-op when unset) and flush.
    pub fn save(&self, watermark: Watermark) -> Result<(), WatermarkError> {
        if let Some(ts) = watermark.get() {
            self.db
                .insert(WATERMARK_KEY, ts.timestamp_millis().to_be_bytes().to_vec())?;
            self.db.flush()?;
        }
        Ok(())
    }

    /// Forget the persisted watermark (`--reset-watermark`).
    pub fn clear(&self) -> Result<(), WatermarkError> {
        self.db.remove(WATERMARK_KEY)?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn t(mins: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(mins)
    }

    #[test]
    fn unset_watermark_admits_everything() {
        let w = Watermark::default();
        assert!(w.admits(t(0)));
    }

    #[test]
    fn advance_never_moves_backwards() {
        let mut w = Watermark::default();
        assert!(w.advance(t(10)));
        assert!(!w.advance(t(5)));
        assert!(!w.advance(t(10)));
        assert_eq!(w.get(), Some(t(10)));
        assert!(!w.admits(t(10)));
        assert!(w.admits(t(11)));
    }

    #[test]
    fn save_load_and_clear() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::open(dir.path().join("state.db")).unwrap();
        assert_eq!(store.load().unwrap(), None);

        store.save(Watermark::default()).unwrap();
        assert_eq!(store.load().unwrap(), None);

        store.save(Watermark::new(Some(t(42)))).unwrap();
        assert_eq!(store.load().unwrap(), Some(t(42)));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
