//! Anomaly records and detectors.

use serde::{Deserialize, Serialize};

use crate::entry::LedgerEntry;

/// How bad an anomaly is. Only [`Severity::High`] blocks a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn blocks(self) -> bool {
        self == Severity::High
    }

    fn tag(self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnomalyKind {
    /// Event time earlier than the last recorded time.
    ClockRollback,
    /// Too many plays of one item in a short window.
    Burst,
}

impl AnomalyKind {
    fn tag(self) -> u8 {
        match self {
            AnomalyKind::ClockRollback => 0,
            AnomalyKind::Burst => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// Unix milliseconds.
    pub timestamp: i64,
    pub kind: AnomalyKind,
    pub details: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    pub resolved: bool,
}

impl AnomalyRecord {
    pub(crate) fn write_to(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(&[self.kind.tag(), self.severity.tag(), u8::from(self.resolved)]);
        hasher.update(&(self.details.len() as u32).to_le_bytes());
        hasher.update(self.details.as_bytes());
        match &self.media_id {
            Some(id) => {
                hasher.update(&[1]);
                hasher.update(&(id.len() as u32).to_le_bytes());
                hasher.update(id.as_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }
}

/// Event time went backwards relative to the ledger.
pub fn detect_rollback(last_timestamp: Option<i64>, timestamp: i64) -> Option<AnomalyRecord> {
    let last = last_timestamp?;
    (timestamp < last).then(|| AnomalyRecord {
        timestamp,
        kind: AnomalyKind::ClockRollback,
        details: format!("event at {timestamp} ms precedes last recorded {last} ms"),
        severity: Severity::High,
        media_id: None,
        resolved: false,
    })
}

/// More than `threshold` plays of one item, including this one, within `window_ms`.
pub fn detect_burst(
    history: &[LedgerEntry],
    media_id: &str,
    timestamp: i64,
    threshold: usize,
    window_ms: i64,
) -> Option<AnomalyRecord> {
    let since = timestamp.saturating_sub(window_ms);
    let recent = history
        .iter()
        .rev()
        .take_while(|e| e.timestamp >= since)
        .count()
        + 1;
    (recent > threshold).then(|| AnomalyRecord {
        timestamp,
        kind: AnomalyKind::Burst,
        details: format!("{recent} plays of {media_id} within {window_ms} ms"),
        severity: Severity::Medium,
        media_id: Some(media_id.to_string()),
        resolved: false,
    })
}
