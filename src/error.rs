//! Structured error types for the sealtrace library.
//!
//! Every public library function returns [`Result<T>`] which carries a
//! domain-specific [`SealError`].  Verification outcomes that detect tampering
//! are *not* errors: they come back as successful operations with
//! `is_valid = false` and a populated tamper indicator.  An `Err` always means
//! the protocol could not run at all.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Domain-specific error type for the sealtrace library.
#[derive(Error, Debug)]
pub enum SealError {
    /// Malformed input: serial number, challenge, timestamp, or CSV shape.
    /// Surfaced to callers as a client error; never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// Serial number or seal id not present in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation attempted from a status that forbids it.  An expected,
    /// normal outcome for callers -- not a bug.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Cryptographic failure, including AEAD authentication failure on the
    /// stored private key.  Callers must treat this as a security event:
    /// a blob that fails to authenticate is either corrupted storage or
    /// tamper evidence, and must never be silently swallowed.
    #[error("crypto: {0}")]
    Crypto(String),

    /// Missing or malformed configuration (e.g. the master key).  Fatal at
    /// process startup.
    #[error("config: {0}")]
    Config(String),

    /// Persistence-port failure that is not a plain database error.
    #[error("store: {0}")]
    Store(String),

    /// Direct database errors (auto-converted via `?` in the sqlite store).
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    /// Catch-all for errors that do not fit a specific domain.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, SealError>;

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that adds domain-specific context to any `Result<T, E>`.
///
/// Usage mirrors `anyhow::Context` but tags the error with the originating
/// subsystem so that callers can categorise failures.
///
/// ```ignore
/// SigningKey::from_pkcs8_pem(pem).ctx_crypto("parse private key")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_validation(self, msg: &str) -> Result<T>;
    fn ctx_crypto(self, msg: &str) -> Result<T>;
    fn ctx_config(self, msg: &str) -> Result<T>;
    fn ctx_store(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_validation(self, msg: &str) -> Result<T> {
        self.map_err(|e| SealError::Validation(format!("{msg}: {e}")))
    }
    fn ctx_crypto(self, msg: &str) -> Result<T> {
        self.map_err(|e| SealError::Crypto(format!("{msg}: {e}")))
    }
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| SealError::Config(format!("{msg}: {e}")))
    }
    fn ctx_store(self, msg: &str) -> Result<T> {
        self.map_err(|e| SealError::Store(format!("{msg}: {e}")))
    }
}

/// Same as [`ResultExt`] but for `Option<T>` (converts `None` into an error).
pub trait OptionExt<T> {
    fn required_config(self, msg: &str) -> Result<T>;
    fn required_store(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required_config(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| SealError::Config(msg.to_string()))
    }
    fn required_store(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| SealError::Store(msg.to_string()))
    }
}
