//! Structured outcomes of a validation attempt.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;

use crate::revocation::RevocationReason;

/// Why a license did not unlock this device.
///
/// Each variant maps to a stable [`message_key`](RejectionReason::message_key)
/// the host localizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// System time is behind the persisted watermark.
    ClockRollback {
        now: DateTime<Utc>,
        watermark: DateTime<Utc>,
    },
    /// No structurally valid license at any known location.
    NoLicense,
    /// The license names a key that is not trusted.
    UnknownKeyId { kid: String },
    /// Signature did not verify. Deliberately carries no detail.
    SignatureInvalid,
    Revoked {
        reason: RevocationReason,
        revoked_at: DateTime<Utc>,
    },
    NotYetValid { not_before: DateTime<Utc> },
    Expired { expiry: DateTime<Utc> },
    /// The removable media serial differs from the bound one.
    MediaMismatch,
    /// The machine fingerprint differs from the bound one.
    DeviceMismatch,
    /// The passphrase did not open the key envelope.
    WrongPassphrase,
    /// Passphrase unlock requested but no envelope is provisioned.
    NoKeyEnvelope,
}

impl RejectionReason {
    /// Stable message id for localization.
    pub fn message_key(&self) -> &'static str {
        match self {
            RejectionReason::ClockRollback { .. } => "license.clock_rollback",
            RejectionReason::NoLicense => "license.not_found",
            RejectionReason::UnknownKeyId { .. } => "license.unknown_key",
            RejectionReason::SignatureInvalid => "license.signature_invalid",
            RejectionReason::Revoked { .. } => "license.revoked",
            RejectionReason::NotYetValid { .. } => "license.not_yet_valid",
            RejectionReason::Expired { .. } => "license.expired",
            RejectionReason::MediaMismatch => "license.media_mismatch",
            RejectionReason::DeviceMismatch => "license.device_mismatch",
            RejectionReason::WrongPassphrase => "license.wrong_passphrase",
            RejectionReason::NoKeyEnvelope => "license.no_key_envelope",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::ClockRollback { now, watermark } => {
                write!(f, "system clock {now} is behind last seen time {watermark}")
            }
            RejectionReason::NoLicense => f.write_str("no valid license found"),
            RejectionReason::UnknownKeyId { kid } => write!(f, "license signed by unknown key {kid}"),
            RejectionReason::SignatureInvalid => f.write_str("license signature invalid"),
            RejectionReason::Revoked { reason, revoked_at } => {
                write!(f, "license revoked ({}) at {revoked_at}", reason.as_str())
            }
            RejectionReason::NotYetValid { not_before } => {
                write!(f, "license not valid before {not_before}")
            }
            RejectionReason::Expired { expiry } => write!(f, "license expired at {expiry}"),
            RejectionReason::MediaMismatch => f.write_str("license is bound to different removable media"),
            RejectionReason::DeviceMismatch => f.write_str("license is bound to a different machine"),
            RejectionReason::WrongPassphrase => f.write_str("wrong passphrase"),
            RejectionReason::NoKeyEnvelope => f.write_str("no passphrase key envelope provisioned"),
        }
    }
}

/// Result of a validation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Unlocked {
        license_id: String,
        features: BTreeSet<String>,
    },
    Rejected(RejectionReason),
}

impl Verdict {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Verdict::Unlocked { .. })
    }

    pub fn rejection(&self) -> Option<&RejectionReason> {
        match self {
            Verdict::Rejected(reason) => Some(reason),
            Verdict::Unlocked { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_keys_unique() {
        let now = Utc::now();
        let all = [
            RejectionReason::ClockRollback { now, watermark: now },
            RejectionReason::NoLicense,
            RejectionReason::UnknownKeyId { kid: "k".into() },
            RejectionReason::SignatureInvalid,
            RejectionReason::Revoked {
                reason: RevocationReason::Refund,
                revoked_at: now,
            },
            RejectionReason::NotYetValid { not_before: now },
            RejectionReason::Expired { expiry: now },
            RejectionReason::MediaMismatch,
            RejectionReason::DeviceMismatch,
            RejectionReason::WrongPassphrase,
            RejectionReason::NoKeyEnvelope,
        ];
        let keys: std::collections::BTreeSet<_> = all.iter().map(|r| r.message_key()).collect();
        assert_eq!(keys.len(), all.len());
    }
}
