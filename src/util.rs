//! Hashing, encoding, and time helpers.

use base64::Engine as _;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::error::{Result, ResultExt as _};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

// ---------------------------------------------------------------------------
// Base64
// ---------------------------------------------------------------------------

pub fn b64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .ctx_validation("invalid base64")
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// All timestamps in the system are RFC 3339 UTC strings; being
/// fixed-offset UTC they compare correctly as plain strings.

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// RFC 3339 timestamp `days` from now (maintenance-sweep cutoffs).
pub fn utc_rfc3339_after_days(days: u32) -> String {
    (OffsetDateTime::now_utc() + Duration::days(i64::from(days)))
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Validate that `s` parses as an RFC 3339 timestamp.
pub fn validate_rfc3339(s: &str, label: &str) -> Result<()> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map(|_| ())
        .ctx_validation(&format!("{label} must be an RFC 3339 timestamp"))
}

// ---------------------------------------------------------------------------
// Version constants (set by build.rs)
// ---------------------------------------------------------------------------

pub const GIT_HASH: &str = env!("SEALTRACE_GIT_HASH");
pub const BUILD_TS: &str = env!("SEALTRACE_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("sealtrace v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
