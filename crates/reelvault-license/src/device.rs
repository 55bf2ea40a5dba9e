//! Device fingerprinting for license binding.
//!
//! The fingerprint is the first 32 hex characters of
//! `SHA-256(platform|arch|hostname|cpu_model|cpu_count|ram_gb)`.
//!
//! Matching is exact. Any hardware change, including a RAM upgrade that moves
//! the rounded gigabyte count, invalidates the binding and needs a reissued
//! license.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;

/// Length of the fingerprint hash in hex characters.
pub const FINGERPRINT_LEN: usize = 32;

/// Raw attributes the fingerprint is computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareAttributes {
    pub platform: String,
    pub arch: String,
    pub hostname: String,
    pub cpu_model: String,
    pub cpu_count: usize,
    /// Total RAM in gigabytes, rounded to the nearest integer.
    pub total_ram_gb: u64,
}

impl HardwareAttributes {
    /// The pipe-joined string that gets hashed.
    pub fn canonical_string(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.platform,
            self.arch,
            self.hostname,
            self.cpu_model,
            self.cpu_count,
            self.total_ram_gb
        )
    }
}

/// Source of hardware attributes.
pub trait HardwareProbe: Send + Sync {
    fn attributes(&self) -> HardwareAttributes;
}

/// Reads attributes from the running operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl HardwareProbe for SystemProbe {
    fn attributes(&self) -> HardwareAttributes {
        HardwareAttributes {
            platform: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            hostname: get_hostname(),
            cpu_model: get_cpu_model(),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            total_ram_gb: get_total_ram_bytes()
                .map(round_to_gb)
                .unwrap_or(0),
        }
    }
}

/// Fixed attributes, for tests and for hosts that probe hardware themselves.
#[derive(Debug, Clone)]
pub struct StaticProbe(pub HardwareAttributes);

impl HardwareProbe for StaticProbe {
    fn attributes(&self) -> HardwareAttributes {
        self.0.clone()
    }
}

/// A computed device fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    hash: String,
    attributes: HardwareAttributes,
}

impl DeviceFingerprint {
    /// Hash the given attributes.
    pub fn from_attributes(attributes: HardwareAttributes) -> Self {
        let digest = Sha256::digest(attributes.canonical_string().as_bytes());
        let mut hash = hex::encode(digest);
        hash.truncate(FINGERPRINT_LEN);
        Self { hash, attributes }
    }

    /// The 32-hex-char hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn attributes(&self) -> &HardwareAttributes {
        &self.attributes
    }

    /// Exact comparison against a license's bound fingerprint.
    pub fn matches(&self, bound: &str) -> bool {
        self.hash == bound
    }
}

/// The identity of the machine and removable media the player runs from.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    fingerprint: DeviceFingerprint,
    removable_serial: Option<String>,
}

impl DeviceIdentity {
    /// Compute the fingerprint from a probe. No removable media is assumed.
    pub fn compute(probe: &dyn HardwareProbe) -> Self {
        let fingerprint = DeviceFingerprint::from_attributes(probe.attributes());
        tracing::debug!(fingerprint = %fingerprint.hash(), "computed device fingerprint");
        Self {
            fingerprint,
            removable_serial: None,
        }
    }

    /// Attach the serial of the removable media, as reported by the host.
    pub fn with_removable_serial(mut self, serial: Option<String>) -> Self {
        self.removable_serial = serial;
        self
    }

    pub fn fingerprint(&self) -> &DeviceFingerprint {
        &self.fingerprint
    }

    pub fn removable_serial(&self) -> Option<&str> {
        self.removable_serial.as_deref()
    }

    /// Byte-for-byte serial comparison. `None` when no media is present.
    pub fn removable_serial_matches(&self, bound: &str) -> Option<bool> {
        self.removable_serial
            .as_deref()
            .map(|present| present.as_bytes() == bound.as_bytes())
    }
}

fn round_to_gb(bytes: u64) -> u64 {
    const GB: u64 = 1024 * 1024 * 1024;
    (bytes + GB / 2) / GB
}

/// Gets the machine hostname.
fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Gets the primary CPU model string.
fn get_cpu_model() -> String {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("model name") || l.starts_with("Hardware"))
                    .and_then(|l| l.split_once(':'))
                    .map(|(_, v)| v.trim().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(target_os = "macos")]
    {
        sysctl("machdep.cpu.brand_string").unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(target_os = "windows")]
    {
        env::var("PROCESSOR_IDENTIFIER").unwrap_or_else(|_| "unknown".to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        "unknown".to_string()
    }
}

/// Gets total physical memory in bytes.
fn get_total_ram_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/proc/meminfo").ok()?;
        let line = content.lines().find(|l| l.starts_with("MemTotal:"))?;
        let kb: u64 = line
            .trim_start_matches("MemTotal:")
            .trim()
            .trim_end_matches("kB")
            .trim()
            .parse()
            .ok()?;
        Some(kb * 1024)
    }

    #[cfg(target_os = "macos")]
    {
        sysctl("hw.memsize")?.parse().ok()
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

#[cfg(target_os = "macos")]
fn sysctl(name: &str) -> Option<String> {
    std::process::Command::new("sysctl")
        .arg("-n")
        .arg(name)
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
