//! Persisted "max seen time" watermark.
//!
//! Lives in device-local state, outside the license file, so winding the OS
//! clock back cannot bring an expired license back to life.

use chrono::{DateTime, Duration, TimeZone, Utc};
use reelvault_core::fsutil;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{LicenseError, Result};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatermarkFile {
    max_seen_ms: i64,
}

/// Reads and advances the clock watermark.
#[derive(Debug)]
pub struct WatermarkStore {
    path: PathBuf,
    cached: Option<DateTime<Utc>>,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: None,
        }
    }

    /// Current watermark, reading the file on first use.
    pub async fn load(&mut self) -> Result<Option<DateTime<Utc>>> {
        if self.cached.is_some() {
            return Ok(self.cached);
        }
        let Some(bytes) = fsutil::read_optional(&self.path).await? else {
            return Ok(None);
        };
        let file: WatermarkFile = serde_json::from_slice(&bytes)
            .map_err(|e| LicenseError::WatermarkCorrupted(e.to_string()))?;
        let at = Utc
            .timestamp_millis_opt(file.max_seen_ms)
            .single()
            .ok_or_else(|| LicenseError::WatermarkCorrupted(format!("{}", file.max_seen_ms)))?;
        self.cached = Some(at);
        Ok(self.cached)
    }

    /// `Some(watermark)` when `now` lies more than `tolerance` before it.
    pub async fn check(
        &mut self,
        now: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load().await?.filter(|mark| now < *mark - tolerance))
    }

    /// Store `max(watermark, now)`.
    pub async fn advance(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let next = match self.load().await? {
            Some(mark) if mark >= now => return Ok(mark),
            _ => now,
        };
        let body = serde_json::to_vec(&WatermarkFile {
            max_seen_ms: next.timestamp_millis(),
        })?;
        fsutil::write_atomic(&self.path, &body).await?;
        self.cached = Some(next);
        tracing::debug!(watermark = %next, "advanced clock watermark");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_watermark_never_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = WatermarkStore::new(dir.path().join("wm.json"));
        assert!(store
            .check(Utc::now(), Duration::minutes(5))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rollback_beyond_tolerance_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wm.json");
        let now = Utc::now();
        WatermarkStore::new(&path).advance(now).await.unwrap();

        let mut store = WatermarkStore::new(&path);
        let tol = Duration::minutes(5);
        assert!(store.check(now - Duration::minutes(4), tol).await.unwrap().is_none());
        assert!(store.check(now - Duration::minutes(6), tol).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_advance_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = WatermarkStore::new(dir.path().join("wm.json"));
        let now = Utc::now();
        store.advance(now).await.unwrap();
        let kept = store.advance(now - Duration::days(1)).await.unwrap();
        assert_eq!(kept.timestamp_millis(), now.timestamp_millis());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wm.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let mut store = WatermarkStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(LicenseError::WatermarkCorrupted(_))
        ));
    }
}
