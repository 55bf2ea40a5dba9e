//! Proptest generators for property-based testing.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use reelvault_core::{Blake3Hash, Keypair, SecretKey};
use reelvault_ledger::PlayEvent;
use reelvault_license::LicenseRecord;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random symmetric key.
pub fn secret_key() -> impl Strategy<Value = SecretKey> {
    any::<[u8; 32]>().prop_map(SecretKey::from_bytes)
}

/// Generate a random Blake3Hash.
pub fn blake3_hash() -> impl Strategy<Value = Blake3Hash> {
    any::<[u8; 32]>().prop_map(Blake3Hash)
}

/// A media id that is also a plain file name.
pub fn media_id() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}".prop_map(String::from)
}

/// Media content up to `max_len` bytes.
pub fn media_bytes(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// A single-byte mutation of a buffer of length `len`: an index and a
/// non-zero XOR mask.
pub fn byte_flip(len: usize) -> impl Strategy<Value = (usize, u8)> {
    (0..len.max(1), 1u8..=255)
}

/// Apply a [`byte_flip`] to a copy of `bytes`.
pub fn flip(bytes: &[u8], (index, mask): (usize, u8)) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if let Some(b) = out.get_mut(index) {
        *b ^= mask;
    }
    out
}

pub fn play_event() -> impl Strategy<Value = PlayEvent> {
    (media_id(), 0u64..=10_800_000, "[a-z0-9]{8}")
        .prop_map(|(id, played_ms, session)| PlayEvent::new(id, played_ms, session))
}

/// Parameters for generating a license record.
#[derive(Debug, Clone)]
pub struct LicenseParams {
    pub license_id: String,
    pub kid: String,
    pub machine_fingerprint: String,
    pub removable_serial: Option<String>,
    pub issued_at_secs: i64,
    pub valid_days: i64,
    pub features: Vec<String>,
}

impl Arbitrary for LicenseParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            "LIC-[0-9]{4}",
            "[a-z]{3,8}-[0-9]",
            "[0-9a-f]{32}",
            proptest::option::of("[A-Z0-9-]{4,12}"),
            1_600_000_000i64..=1_900_000_000i64,
            1i64..=3650,
            prop::collection::vec("[a-z]{3,10}", 0..5),
        )
            .prop_map(
                |(license_id, kid, machine_fingerprint, removable_serial, issued_at_secs, valid_days, features)| {
                    LicenseParams {
                        license_id,
                        kid,
                        machine_fingerprint,
                        removable_serial,
                        issued_at_secs,
                        valid_days,
                        features,
                    }
                },
            )
            .boxed()
    }
}

/// Build a license record from parameters.
pub fn license_from_params(params: &LicenseParams) -> LicenseRecord {
    let issued_at = Utc
        .timestamp_opt(params.issued_at_secs, 0)
        .single()
        .unwrap_or_else(Utc::now);
    LicenseRecord {
        license_id: params.license_id.clone(),
        kid: params.kid.clone(),
        machine_fingerprint: params.machine_fingerprint.clone(),
        removable_serial: params.removable_serial.clone(),
        issued_at,
        not_before: None,
        expiry: issued_at + Duration::days(params.valid_days),
        features: params.features.iter().cloned().collect(),
    }
}
