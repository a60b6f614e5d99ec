//! Seal and verification-record data model, status machine, and guards.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SealError};

// ---------------------------------------------------------------------------
// Status and tamper classification
// ---------------------------------------------------------------------------

/// Lifecycle status of a seal.  `Tampered`, `Removed`, and `Expired` are
/// terminal: there is no recovery path, administrative or otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SealStatus {
    Provisioned,
    Attached,
    Verified,
    Tampered,
    Removed,
    Expired,
}

impl SealStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Tampered | Self::Removed | Self::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioned => "provisioned",
            Self::Attached => "attached",
            Self::Verified => "verified",
            Self::Tampered => "tampered",
            Self::Removed => "removed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "provisioned" => Ok(Self::Provisioned),
            "attached" => Ok(Self::Attached),
            "verified" => Ok(Self::Verified),
            "tampered" => Ok(Self::Tampered),
            "removed" => Ok(Self::Removed),
            "expired" => Ok(Self::Expired),
            other => Err(SealError::Store(format!("unknown seal status '{other}'"))),
        }
    }
}

impl std::fmt::Display for SealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of why a verification failed or looked suspicious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TamperIndicator {
    None,
    SignatureMismatch,
    CounterAnomaly,
    LocationMismatch,
    PhysicalDamage,
}

impl TamperIndicator {
    /// Indicators that terminate the seal (as opposed to the
    /// `LocationMismatch` warning class).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::SignatureMismatch | Self::CounterAnomaly | Self::PhysicalDamage
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SignatureMismatch => "signature_mismatch",
            Self::CounterAnomaly => "counter_anomaly",
            Self::LocationMismatch => "location_mismatch",
            Self::PhysicalDamage => "physical_damage",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "signature_mismatch" => Ok(Self::SignatureMismatch),
            "counter_anomaly" => Ok(Self::CounterAnomaly),
            "location_mismatch" => Ok(Self::LocationMismatch),
            "physical_damage" => Ok(Self::PhysicalDamage),
            other => Err(SealError::Store(format!(
                "unknown tamper indicator '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for TamperIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit transition table for the seal state machine.  Everything not
/// listed here is forbidden; terminal states have no exits.
pub fn may_transition(from: SealStatus, to: SealStatus) -> bool {
    use SealStatus::*;
    matches!(
        (from, to),
        (Provisioned, Attached)
            | (Provisioned, Tampered)
            | (Attached, Verified)
            | (Attached, Tampered)
            | (Attached, Removed)
            | (Attached, Expired)
            | (Verified, Verified)
            | (Verified, Tampered)
            | (Verified, Removed)
            | (Verified, Expired)
    )
}

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One physical tamper-evident tag's digital identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seal {
    pub id: Uuid,
    /// Normalized (uppercase) hardware UID, 8 or 14 hex chars.
    pub serial_number: String,
    /// Set exactly once, at attach.
    pub shipment_id: Option<String>,
    pub status: SealStatus,
    pub public_key_pem: String,
    /// AES-256-GCM blob (`nonce:tag:ciphertext` hex triple).  Exists only to
    /// drive the simulated reader; production tags keep the key on-chip.
    pub encrypted_private_key: String,
    /// Outstanding challenge the next reading must sign over.
    pub challenge: String,
    pub expected_read_count: i64,
    pub actual_read_count: i64,
    pub attached_at: Option<String>,
    pub attached_by: Option<String>,
    pub attached_location: Option<String>,
    pub attached_lat: Option<f64>,
    pub attached_lng: Option<f64>,
    pub removed_at: Option<String>,
    pub removed_by: Option<String>,
    pub removed_location: Option<String>,
    pub removed_reason: Option<String>,
    pub tamper_indicator: TamperIndicator,
    pub tamper_details: Option<String>,
    pub expires_at: Option<String>,
    pub provisioned_at: String,
}

impl Seal {
    /// `Provisioned && shipment_id == null`.
    pub fn can_attach(&self) -> bool {
        self.status == SealStatus::Provisioned && self.shipment_id.is_none()
    }

    /// Verification is only meaningful while attached.
    pub fn can_verify(&self) -> bool {
        matches!(self.status, SealStatus::Attached | SealStatus::Verified)
    }

    pub fn can_remove(&self) -> bool {
        matches!(self.status, SealStatus::Attached | SealStatus::Verified)
    }

    /// Lazy expiry check against an RFC 3339 UTC timestamp.  Seals without
    /// `expires_at` never expire.
    pub fn is_expired(&self, now_utc: &str) -> bool {
        match &self.expires_at {
            Some(expiry) => now_utc > expiry.as_str(),
            None => false,
        }
    }
}

/// Immutable audit entry produced by every verify call, successful or not.
/// Never mutated or deleted; the append-only history feeds the integrity
/// scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: Uuid,
    pub seal_id: Uuid,
    pub verified_by: String,
    pub verified_at: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
    /// Counter value as reported by the device, trusted nowhere.
    pub read_counter: i64,
    /// Signature exactly as provided, base64 DER.
    pub signature_b64: String,
    /// The challenge the signature was checked against.
    pub challenge: String,
    pub is_valid: bool,
    pub tamper_indicator: TamperIndicator,
    pub tamper_details: Option<String>,
    pub device_info: Option<String>,
}

// ---------------------------------------------------------------------------
// Serial number validation
// ---------------------------------------------------------------------------

/// NFC hardware UIDs are 4 or 7 bytes, so serials are exactly 8 or 14 hex
/// characters.
static SERIAL_RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
    regex::Regex::new(r"^(?:[0-9A-Fa-f]{8}|[0-9A-Fa-f]{14})$").unwrap()
});

pub fn is_valid_serial_number(serial: &str) -> bool {
    SERIAL_RE.is_match(serial)
}

/// Uppercase-normalize a serial after validating its shape.
pub fn normalize_serial(serial: &str) -> Result<String> {
    let trimmed = serial.trim();
    if !is_valid_serial_number(trimmed) {
        return Err(SealError::Validation(format!(
            "invalid serial '{trimmed}': expected 8 or 14 hex characters"
        )));
    }
    Ok(trimmed.to_ascii_uppercase())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util;

    fn sample_seal(status: SealStatus) -> Seal {
        Seal {
            id: Uuid::new_v4(),
            serial_number: "04ABCDEF".to_string(),
            shipment_id: None,
            status,
            public_key_pem: String::new(),
            encrypted_private_key: String::new(),
            challenge: String::new(),
            expected_read_count: 0,
            actual_read_count: 0,
            attached_at: None,
            attached_by: None,
            attached_location: None,
            attached_lat: None,
            attached_lng: None,
            removed_at: None,
            removed_by: None,
            removed_location: None,
            removed_reason: None,
            tamper_indicator: TamperIndicator::None,
            tamper_details: None,
            expires_at: None,
            provisioned_at: util::now_utc_rfc3339(),
        }
    }

    #[test]
    fn valid_serials() {
        assert!(is_valid_serial_number("04ABCDEF"));
        assert!(is_valid_serial_number("04abcdef"));
        assert!(is_valid_serial_number("04AB12CD34EF56"));
    }

    #[test]
    fn invalid_serials() {
        assert!(!is_valid_serial_number(""));
        assert!(!is_valid_serial_number("04ABCDE")); // 7 chars
        assert!(!is_valid_serial_number("04ABCDEF1")); // 9 chars
        assert!(!is_valid_serial_number("04AB12CD34EF5")); // 13 chars
        assert!(!is_valid_serial_number("04AB12CD34EF567")); // 15 chars
        assert!(!is_valid_serial_number("04ABCDEG")); // non-hex
        assert!(!is_valid_serial_number("04 BCDEF")); // space
    }

    #[test]
    fn normalize_uppercases() {
        assert_eq!(normalize_serial(" 04abcdef ").unwrap(), "04ABCDEF");
        assert!(normalize_serial("nope").is_err());
    }

    #[test]
    fn attach_guard() {
        let mut seal = sample_seal(SealStatus::Provisioned);
        assert!(seal.can_attach());
        seal.shipment_id = Some("S1".into());
        assert!(!seal.can_attach());

        for status in [
            SealStatus::Attached,
            SealStatus::Verified,
            SealStatus::Tampered,
            SealStatus::Removed,
            SealStatus::Expired,
        ] {
            assert!(!sample_seal(status).can_attach());
        }
    }

    #[test]
    fn verify_guard() {
        assert!(sample_seal(SealStatus::Attached).can_verify());
        assert!(sample_seal(SealStatus::Verified).can_verify());
        assert!(!sample_seal(SealStatus::Provisioned).can_verify());
        assert!(!sample_seal(SealStatus::Tampered).can_verify());
        assert!(!sample_seal(SealStatus::Removed).can_verify());
        assert!(!sample_seal(SealStatus::Expired).can_verify());
    }

    #[test]
    fn remove_guard() {
        assert!(sample_seal(SealStatus::Attached).can_remove());
        assert!(sample_seal(SealStatus::Verified).can_remove());
        assert!(!sample_seal(SealStatus::Provisioned).can_remove());
        assert!(!sample_seal(SealStatus::Removed).can_remove());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use SealStatus::*;
        for from in [Tampered, Removed, Expired] {
            for to in [Provisioned, Attached, Verified, Tampered, Removed, Expired] {
                assert!(!may_transition(from, to), "{from} -> {to} must be closed");
            }
        }
    }

    #[test]
    fn expected_transitions_allowed() {
        use SealStatus::*;
        assert!(may_transition(Provisioned, Attached));
        assert!(may_transition(Attached, Verified));
        assert!(may_transition(Verified, Verified));
        assert!(may_transition(Verified, Tampered));
        assert!(may_transition(Attached, Expired));
        assert!(!may_transition(Provisioned, Verified));
        assert!(!may_transition(Provisioned, Removed));
    }

    #[test]
    fn expiry_check() {
        let mut seal = sample_seal(SealStatus::Attached);
        assert!(!seal.is_expired("2030-01-01T00:00:00Z"));
        seal.expires_at = Some("2026-01-01T00:00:00Z".into());
        assert!(seal.is_expired("2026-01-02T00:00:00Z"));
        assert!(!seal.is_expired("2025-12-31T00:00:00Z"));
        // Boundary: not expired at the exact instant.
        assert!(!seal.is_expired("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        use SealStatus::*;
        for s in [Provisioned, Attached, Verified, Tampered, Removed, Expired] {
            assert_eq!(SealStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(SealStatus::parse("bogus").is_err());
    }

    #[test]
    fn indicator_round_trips_through_strings() {
        use TamperIndicator::*;
        for t in [
            None,
            SignatureMismatch,
            CounterAnomaly,
            LocationMismatch,
            PhysicalDamage,
        ] {
            assert_eq!(TamperIndicator::parse(t.as_str()).unwrap(), t);
        }
        assert!(TamperIndicator::parse("bogus").is_err());
    }
}
