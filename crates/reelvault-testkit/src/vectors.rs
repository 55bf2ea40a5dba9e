//! Golden test vectors for key derivation and device binding.
//!
//! Issuer tooling computes fingerprints and vault keys independently of the
//! player. These vectors pin the exact outputs so both sides stay in step.

use reelvault_core::{derive_master_key, derive_sub_key, KdfParams, KeyPurpose, SecretKey};
use reelvault_license::{DeviceFingerprint, HardwareAttributes};

/// Hardware attributes and the fingerprint they hash to.
#[derive(Debug, Clone)]
pub struct FingerprintVector {
    pub name: &'static str,
    pub platform: &'static str,
    pub arch: &'static str,
    pub hostname: &'static str,
    pub cpu_model: &'static str,
    pub cpu_count: usize,
    pub total_ram_gb: u64,
    /// Expected 32-hex-char fingerprint.
    pub expected: &'static str,
}

impl FingerprintVector {
    pub fn attributes(&self) -> HardwareAttributes {
        HardwareAttributes {
            platform: self.platform.into(),
            arch: self.arch.into(),
            hostname: self.hostname.into(),
            cpu_model: self.cpu_model.into(),
            cpu_count: self.cpu_count,
            total_ram_gb: self.total_ram_gb,
        }
    }
}

/// A binding secret and salt and the scrypt master key they stretch to.
#[derive(Debug, Clone)]
pub struct MasterKeyVector {
    pub name: &'static str,
    pub secret: &'static str,
    pub salt: [u8; 16],
    pub log_n: u8,
    pub expected: &'static str,
}

/// A master key, context and purpose and the HKDF sub-key they produce.
#[derive(Debug, Clone)]
pub struct SubKeyVector {
    pub name: &'static str,
    pub master: [u8; 32],
    pub context: &'static [u8],
    pub purpose: KeyPurpose,
    pub expected: &'static str,
}

pub fn fingerprint_vectors() -> Vec<FingerprintVector> {
    vec![
        FingerprintVector {
            name: "fixture machine",
            platform: "linux",
            arch: "x86_64",
            hostname: "screening-room",
            cpu_model: "Test CPU @ 3.0GHz",
            cpu_count: 8,
            total_ram_gb: 16,
            expected: "180fcf6faff2e25d7b3693e00dec77a0",
        },
        FingerprintVector {
            name: "arm laptop",
            platform: "macos",
            arch: "aarch64",
            hostname: "edit-bay",
            cpu_model: "Apple M2",
            cpu_count: 8,
            total_ram_gb: 24,
            expected: "cce2c15d0e3e179eb6ef3119e69a775d",
        },
        FingerprintVector {
            name: "nothing probed",
            platform: "windows",
            arch: "x86_64",
            hostname: "",
            cpu_model: "",
            cpu_count: 0,
            total_ram_gb: 0,
            expected: "97edacdae061db519e4814794ba31cf1",
        },
    ]
}

pub fn master_key_vectors() -> Vec<MasterKeyVector> {
    vec![
        MasterKeyVector {
            name: "license bound to media",
            secret: "LIC-0001|180fcf6faff2e25d7b3693e00dec77a0|RV-0001-A",
            salt: [0x11; 16],
            log_n: 4,
            expected: "fbdcfa2a429149c9e49a92007a9f83dadbb24411b7023582484ab20e3b4857c7",
        },
        MasterKeyVector {
            name: "license without media serial",
            secret: "LIC-0002|cce2c15d0e3e179eb6ef3119e69a775d|",
            salt: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
            log_n: 4,
            expected: "029f4607af4cf707e73f0fa86c6ce0e632f8d2d41b8b836571e2fe90d9305e8b",
        },
    ]
}

pub fn sub_key_vectors() -> Vec<SubKeyVector> {
    vec![
        SubKeyVector {
            name: "manifest key",
            master: [0x42; 32],
            context: b"LIC-0001",
            purpose: KeyPurpose::Manifest,
            expected: "ef74d75e0d235af287146120f8807f2cf4317c559bc3648648328a03e13db3c2",
        },
        SubKeyVector {
            name: "media key",
            master: [0x42; 32],
            context: b"LIC-0001",
            purpose: KeyPurpose::Media,
            expected: "184198c3006ad6998852d0d3075044e53ec0569048163531eb1853c51763fc51",
        },
        SubKeyVector {
            name: "ledger key",
            master: [0x42; 32],
            context: b"LIC-0001",
            purpose: KeyPurpose::Ledger,
            expected: "19ffc47296d77faa761692739a36e6127e0d8ba0d6b6b8fa04e90ae8eb440b42",
        },
        SubKeyVector {
            name: "container file key",
            master: [0x00; 32],
            context: &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
            purpose: KeyPurpose::MediaFile,
            expected: "0a34256bc836ef505c5ea59fb77165c17e476b084c3ff2cbba8760ade4e82990",
        },
    ]
}

/// Run every vector. Returns `(name, matches, actual)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    let mut out = Vec::new();
    for v in fingerprint_vectors() {
        let actual = DeviceFingerprint::from_attributes(v.attributes()).hash().to_string();
        out.push((v.name.to_string(), actual == v.expected, actual));
    }
    for v in master_key_vectors() {
        let params = KdfParams {
            log_n: v.log_n,
            r: 8,
            p: 1,
        };
        let actual = derive_master_key(v.secret.as_bytes(), &v.salt, &params)
            .map(|k| hex::encode(k.as_bytes()))
            .unwrap_or_else(|e| format!("error: {e}"));
        out.push((v.name.to_string(), actual == v.expected, actual));
    }
    for v in sub_key_vectors() {
        let actual = derive_sub_key(&SecretKey::from_bytes(v.master), v.context, v.purpose)
            .map(|k| hex::encode(k.as_bytes()))
            .unwrap_or_else(|e| format!("error: {e}"));
        out.push((v.name.to_string(), actual == v.expected, actual));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_match() {
        for (name, matches, actual) in verify_all_vectors() {
            assert!(matches, "vector '{name}' produced {actual}");
        }
    }

    #[test]
    fn test_fixture_machine_vector_matches_probe() {
        let v = &fingerprint_vectors()[0];
        assert_eq!(v.attributes(), crate::fixtures::test_attributes());
    }

    #[test]
    fn test_purposes_separate_keys() {
        let keys: Vec<_> = sub_key_vectors()
            .iter()
            .filter(|v| v.master == [0x42; 32])
            .map(|v| v.expected)
            .collect();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
