//! The usage ledger.
//!
//! Every mutation builds the next document on a copy, persists it, and only
//! then replaces the in-memory state. A failed write leaves both the file and
//! the ledger unchanged.

use chrono::Duration;
use reelvault_core::{fsutil, Clock, SecretKey};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::anomaly::{detect_burst, detect_rollback, AnomalyRecord};
use crate::document::{open_document, seal_document, IntegrityReport, LedgerDocument};
use crate::entry::{LedgerEntry, PlayEvent};
use crate::error::{LedgerError, Result};

/// Ledger settings.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub path: PathBuf,
    /// How far ahead of the clock an event may claim to be.
    pub future_skew_tolerance: Duration,
    /// Plays of one item allowed inside `burst_window` before a burst is recorded.
    pub burst_threshold: usize,
    pub burst_window: Duration,
    /// Entries kept per item. `None` keeps everything.
    pub retention_per_item: Option<usize>,
}

impl LedgerConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            future_skew_tolerance: Duration::minutes(5),
            burst_threshold: 10,
            burst_window: Duration::seconds(60),
            retention_per_item: Some(1_000),
        }
    }
}

/// Result of a successful [`UsageLedger::record_play`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub entry: LedgerEntry,
    /// Non-blocking anomalies recorded with the entry.
    pub anomalies: Vec<AnomalyRecord>,
}

/// Document plus a fresh integrity report.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerExport {
    pub document: LedgerDocument,
    pub integrity: IntegrityReport,
}

impl LedgerExport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LedgerError::Malformed(e.to_string()))
    }
}

/// Hash-chained playback record, persisted encrypted.
pub struct UsageLedger {
    config: LedgerConfig,
    key: SecretKey,
    clock: Arc<dyn Clock>,
    doc: LedgerDocument,
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLedger")
            .field("path", &self.config.path)
            .field("global_sequence", &self.doc.global_sequence)
            .field("items", &self.doc.items.len())
            .finish_non_exhaustive()
    }
}

impl UsageLedger {
    /// Open the ledger file, or start an empty one if it does not exist.
    ///
    /// A file that fails to decrypt is a hard error. Integrity issues in a
    /// file that decrypts are logged, not fatal.
    pub async fn open(config: LedgerConfig, key: SecretKey, clock: Arc<dyn Clock>) -> Result<Self> {
        let doc = match fsutil::read_optional(&config.path).await? {
            Some(bytes) => open_document(&bytes, &key)?,
            None => LedgerDocument::default(),
        };

        let report = doc.validate();
        if !report.is_clean() {
            tracing::warn!(issues = report.issues.len(), path = %config.path.display(), "ledger integrity issues on open");
        }
        tracing::info!(
            entries = report.entries_checked,
            sequence = doc.global_sequence,
            "ledger opened"
        );

        Ok(Self {
            config,
            key,
            clock,
            doc,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn document(&self) -> &LedgerDocument {
        &self.doc
    }

    /// Entries of one item, oldest first.
    pub fn entries(&self, media_id: &str) -> &[LedgerEntry] {
        self.doc
            .items
            .get(media_id)
            .map_or(&[][..], |item| item.entries.as_slice())
    }

    pub fn anomalies(&self) -> &[AnomalyRecord] {
        &self.doc.anomalies
    }

    /// Record a finished playback at the current time.
    pub async fn record_play(&mut self, media_id: &str, played_ms: u64, session_id: &str) -> Result<RecordOutcome> {
        let now = self.clock.now_millis();
        self.record_play_at(PlayEvent::new(media_id, played_ms, session_id), now)
            .await
    }

    /// Record a playback the caller timestamped itself (Unix milliseconds).
    pub async fn record_play_at(&mut self, event: PlayEvent, timestamp: i64) -> Result<RecordOutcome> {
        if event.media_id.is_empty() {
            return Err(LedgerError::Malformed("empty media id".into()));
        }

        let tolerance_ms = self.config.future_skew_tolerance.num_milliseconds();
        if timestamp > self.clock.now_millis().saturating_add(tolerance_ms) {
            tracing::warn!(timestamp, media_id = %event.media_id, "future event rejected");
            return Err(LedgerError::FutureTimestamp {
                timestamp,
                tolerance_ms,
            });
        }

        if let Some(anomaly) = detect_rollback(self.doc.last_timestamp, timestamp) {
            tracing::error!(details = %anomaly.details, "ledger write blocked");
            return Err(LedgerError::AnomalyBlocked(anomaly));
        }

        let mut next = self.doc.clone();
        let item = next.items.entry(event.media_id.clone()).or_default();

        let mut anomalies = Vec::new();
        if let Some(burst) = detect_burst(
            &item.entries,
            &event.media_id,
            timestamp,
            self.config.burst_threshold,
            self.config.burst_window.num_milliseconds(),
        ) {
            tracing::warn!(details = %burst.details, "burst anomaly recorded");
            anomalies.push(burst);
        }

        let sequence = next.global_sequence + 1;
        let media_id = event.media_id.clone();
        let entry = LedgerEntry::new(timestamp, item.head(), sequence, event);
        item.entries.push(entry.clone());
        if let Some(max) = self.config.retention_per_item {
            prune_item(item, max);
        }

        next.global_sequence = sequence;
        next.last_timestamp = Some(timestamp);
        next.anomalies.extend(anomalies.iter().cloned());
        next.reseal_item(&media_id);

        self.commit(next).await?;
        tracing::debug!(sequence, media_id = %media_id, "play recorded");
        Ok(RecordOutcome { entry, anomalies })
    }

    /// Recompute every hash, link and checksum. Never mutates.
    pub fn validate_integrity(&self) -> IntegrityReport {
        self.doc.validate()
    }

    /// Keep at most `max_per_item` newest entries of each item. Returns how
    /// many entries were dropped.
    pub async fn prune_to(&mut self, max_per_item: usize) -> Result<usize> {
        let mut next = self.doc.clone();
        let dropped: usize = next
            .items
            .values_mut()
            .map(|item| prune_item(item, max_per_item))
            .sum();
        if dropped == 0 {
            return Ok(0);
        }
        next.reseal_all();
        self.commit(next).await?;
        tracing::info!(dropped, max_per_item, "ledger pruned");
        Ok(dropped)
    }

    /// Mark an anomaly as resolved.
    pub async fn resolve_anomaly(&mut self, index: usize) -> Result<()> {
        let mut next = self.doc.clone();
        let anomaly = next
            .anomalies
            .get_mut(index)
            .ok_or(LedgerError::UnknownAnomaly(index))?;
        if anomaly.resolved {
            return Ok(());
        }
        anomaly.resolved = true;
        next.global_checksum = next.compute_global_checksum();
        self.commit(next).await
    }

    /// Snapshot for diagnostics.
    pub fn export(&self) -> LedgerExport {
        LedgerExport {
            document: self.doc.clone(),
            integrity: self.doc.validate(),
        }
    }

    async fn commit(&mut self, next: LedgerDocument) -> Result<()> {
        let bytes = seal_document(&next, &self.key)?;
        fsutil::write_atomic(&self.config.path, &bytes).await?;
        self.doc = next;
        Ok(())
    }
}

/// Drop the oldest entries beyond `max`, moving the anchor forward.
fn prune_item(item: &mut crate::document::ItemChain, max: usize) -> usize {
    let excess = item.entries.len().saturating_sub(max);
    if excess == 0 {
        return 0;
    }
    let dropped: Vec<_> = item.entries.drain(..excess).collect();
    if let Some(last) = dropped.last() {
        item.anchor = last.current_hash;
    }
    excess
}
