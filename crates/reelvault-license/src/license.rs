//! Signed license records and their on-disk encodings.
//!
//! A license blob wraps `{"data": LicenseRecord, "signature": base64}`. Two
//! encodings exist:
//!
//! - **Compressed**: `base64(zlib(json))`, the preferred form.
//! - **Plain**: the JSON itself, kept as a fallback.
//!
//! The encoding is a discriminated union: JSON always starts with `{`, and
//! base64 never does.
//!
//! The signature covers the canonical JSON of the `data` value exactly as it
//! was received, so fields this build does not know about are still covered.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use reelvault_core::{canonical_json, Ed25519PublicKey, Ed25519Signature, Keypair};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::{Read, Write};

use crate::error::{LicenseError, Result};

/// Upper bound on an inflated license document.
const MAX_INFLATED_LEN: u64 = 1024 * 1024;

/// The signed content of a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    pub license_id: String,
    /// Key-id of the issuer key that signed this license.
    pub kid: String,
    /// 32-hex-char device fingerprint this license is bound to.
    pub machine_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removable_serial: Option<String>,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    pub features: BTreeSet<String>,
}

impl LicenseRecord {
    /// Secret bound into the vault master key: the license id and the exact
    /// machine/media pair it was issued for.
    pub fn binding_secret(&self) -> String {
        format!(
            "{}|{}|{}",
            self.license_id,
            self.machine_fingerprint,
            self.removable_serial.as_deref().unwrap_or("")
        )
    }

    /// Whether `now` lies in `[notBefore, expiry]`.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |nb| now >= nb) && now <= self.expiry
    }
}

/// Discriminant for license blob encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseEncoding {
    Compressed,
    Plain,
}

impl LicenseEncoding {
    /// Decide from the first non-whitespace byte.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes.iter().find(|b| !b.is_ascii_whitespace())? {
            b'{' => Some(LicenseEncoding::Plain),
            _ => Some(LicenseEncoding::Compressed),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    data: Value,
    signature: String,
}

/// A license record with its detached signature.
#[derive(Debug, Clone)]
pub struct SignedLicense {
    record: LicenseRecord,
    data: Value,
    signature: Ed25519Signature,
}

impl SignedLicense {
    /// Sign a record with an issuer keypair.
    pub fn sign(record: LicenseRecord, keypair: &Keypair) -> Result<Self> {
        let data = serde_json::to_value(&record)?;
        let signature = keypair.sign(&canonical_json(&data));
        Ok(Self {
            record,
            data,
            signature,
        })
    }

    /// Decode either encoding. Any structural problem is `MalformedLicense`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let json = match LicenseEncoding::sniff(bytes) {
            None => return Err(LicenseError::MalformedLicense("empty blob".into())),
            Some(LicenseEncoding::Plain) => bytes.to_vec(),
            Some(LicenseEncoding::Compressed) => inflate(bytes)?,
        };

        let envelope: Envelope = serde_json::from_slice(&json)
            .map_err(|e| LicenseError::MalformedLicense(e.to_string()))?;
        let record: LicenseRecord = serde_json::from_value(envelope.data.clone())
            .map_err(|e| LicenseError::MalformedLicense(e.to_string()))?;
        let sig_bytes = BASE64
            .decode(envelope.signature.as_bytes())
            .map_err(|e| LicenseError::MalformedLicense(format!("signature: {e}")))?;
        let signature = Ed25519Signature::from_slice(&sig_bytes)
            .map_err(|e| LicenseError::MalformedLicense(e.to_string()))?;

        Ok(Self {
            record,
            data: envelope.data,
            signature,
        })
    }

    /// Encode into the given form.
    pub fn encode(&self, encoding: LicenseEncoding) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(&Envelope {
            data: self.data.clone(),
            signature: BASE64.encode(self.signature.as_bytes()),
        })?;
        match encoding {
            LicenseEncoding::Plain => Ok(json),
            LicenseEncoding::Compressed => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
                encoder.write_all(&json)?;
                Ok(BASE64.encode(encoder.finish()?).into_bytes())
            }
        }
    }

    /// Exact bytes the signature covers.
    pub fn signed_bytes(&self) -> Vec<u8> {
        canonical_json(&self.data)
    }

    /// Verify against an issuer key.
    pub fn verify(&self, key: &Ed25519PublicKey) -> Result<()> {
        key.verify(&self.signed_bytes(), &self.signature)?;
        Ok(())
    }

    pub fn record(&self) -> &LicenseRecord {
        &self.record
    }

    pub fn into_record(self) -> LicenseRecord {
        self.record
    }
}

fn inflate(text: &[u8]) -> Result<Vec<u8>> {
    let trimmed: Vec<u8> = text
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let compressed = BASE64
        .decode(&trimmed)
        .map_err(|e| LicenseError::MalformedLicense(format!("base64: {e}")))?;

    let mut out = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .take(MAX_INFLATED_LEN + 1)
        .read_to_end(&mut out)
        .map_err(|e| LicenseError::MalformedLicense(format!("zlib: {e}")))?;
    if out.len() as u64 > MAX_INFLATED_LEN {
        return Err(LicenseError::MalformedLicense("inflated blob too large".into()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn record() -> LicenseRecord {
        let now = Utc::now();
        LicenseRecord {
            license_id: "LIC-0001".into(),
            kid: "k1".into(),
            machine_fingerprint: "0123456789abcdef0123456789abcdef".into(),
            removable_serial: Some("USB-42".into()),
            issued_at: now,
            not_before: None,
            expiry: now + Duration::days(30),
            features: ["play".to_string(), "export".to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn test_both_encodings_decode_and_verify() {
        let kp = Keypair::generate();
        let lic = SignedLicense::sign(record(), &kp).unwrap();

        for enc in [LicenseEncoding::Compressed, LicenseEncoding::Plain] {
            let blob = lic.encode(enc).unwrap();
            assert_eq!(LicenseEncoding::sniff(&blob), Some(enc));
            let back = SignedLicense::decode(&blob).unwrap();
            back.verify(&kp.public_key()).unwrap();
            assert_eq!(back.record(), lic.record());
        }
    }

    #[test]
    fn test_camel_case_wire_names() {
        let kp = Keypair::generate();
        let blob = SignedLicense::sign(record(), &kp)
            .unwrap()
            .encode(LicenseEncoding::Plain)
            .unwrap();
        let text = String::from_utf8(blob).unwrap();
        for field in ["licenseId", "machineFingerprint", "removableSerial", "issuedAt"] {
            assert!(text.contains(field), "missing {field}");
        }
        assert!(!text.contains("notBefore"));
    }

    #[test]
    fn test_reformatted_plain_json_still_verifies() {
        let kp = Keypair::generate();
        let blob = SignedLicense::sign(record(), &kp)
            .unwrap()
            .encode(LicenseEncoding::Plain)
            .unwrap();
        let value: Value = serde_json::from_slice(&blob).unwrap();
        let pretty = serde_json::to_vec_pretty(&value).unwrap();
        SignedLicense::decode(&pretty)
            .unwrap()
            .verify(&kp.public_key())
            .unwrap();
    }

    #[test]
    fn test_unknown_fields_are_signed() {
        let kp = Keypair::generate();
        let lic = SignedLicense::sign(record(), &kp).unwrap();
        let mut value: Value =
            serde_json::from_slice(&lic.encode(LicenseEncoding::Plain).unwrap()).unwrap();
        value["data"]["extra"] = Value::String("smuggled".into());
        let tampered = SignedLicense::decode(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert!(tampered.verify(&kp.public_key()).is_err());
    }

    #[test]
    fn test_garbage_is_malformed() {
        for blob in [&b""[..], b"   ", b"!!!!", b"{not json", b"eJzLSM3JyQcABiwCFQ=="] {
            assert!(matches!(
                SignedLicense::decode(blob),
                Err(LicenseError::MalformedLicense(_))
            ));
        }
    }

    #[test]
    fn test_window() {
        let mut r = record();
        let now = r.issued_at;
        assert!(r.is_within_window(now));
        assert!(!r.is_within_window(r.expiry + Duration::seconds(1)));
        r.not_before = Some(now + Duration::hours(1));
        assert!(!r.is_within_window(now));
    }

    fn verifies(blob: &[u8], key: &Ed25519PublicKey) -> bool {
        SignedLicense::decode(blob)
            .map(|l| l.verify(key).is_ok())
            .unwrap_or(false)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_any_single_byte_mutation_fails(idx in any::<prop::sample::Index>(), delta in 1u8..=255, compressed in any::<bool>()) {
            let kp = Keypair::from_seed(&[9u8; 32]);
            let enc = if compressed { LicenseEncoding::Compressed } else { LicenseEncoding::Plain };
            let mut blob = SignedLicense::sign(record(), &kp).unwrap().encode(enc).unwrap();
            let i = idx.index(blob.len());
            blob[i] = blob[i].wrapping_add(delta);
            prop_assert!(!verifies(&blob, &kp.public_key()));
        }
    }
}
