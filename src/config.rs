//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. `sealtrace.toml` next to the executable
//! 2. the platform config directory (`~/.config/sealtrace/config.toml`)
//! 3. Environment variable overrides (e.g. `SEALTRACE_MASTER_KEY`)
//!
//! CLI arguments always take precedence over config file values.
//!
//! The master key is deliberately *not* given a default: a process without a
//! usable key must refuse to start rather than fail per-request.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ResultExt as _};

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SealtraceConfig {
    pub paths: PathsConfig,
    pub verify: VerifyConfig,
    pub provision: ProvisionConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub db: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Largest unexplained forward jump of the read counter that is still
    /// treated as plausible.
    pub counter_max_jump: i64,
    /// Distance between attach and verify coordinates beyond which a reading
    /// is flagged as a location mismatch.
    pub location_tolerance_km: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Upper bound on seals provisioned in one batch call.
    pub batch_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Path to a JSON-lines structured log file for SIEM integration.
    /// Empty string means no file logging.
    pub json_log_file: String,
    /// Whether to also output JSON to stdout (for container/SIEM pipelines).
    pub json_stdout: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Master key for private-key-at-rest encryption: either 64 hex chars
    /// (raw 32-byte key) or a passphrase, in which case `master_key_salt`
    /// must also be set.  Supplied externally; never embedded.
    #[serde(default)]
    pub master_key: Option<String>,
    /// Hex-encoded salt for passphrase-derived master keys.
    #[serde(default)]
    pub master_key_salt: Option<String>,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SealtraceConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            verify: VerifyConfig::default(),
            provision: ProvisionConfig::default(),
            logging: LoggingConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from("sealtrace.db"),
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            counter_max_jump: 10,
            location_tolerance_km: 50.0,
        }
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self { batch_limit: 100 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            master_key: None,
            master_key_salt: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl SealtraceConfig {
    /// Try to load from a specific path.  Returns `Ok(default)` if the file
    /// does not exist; returns `Err` if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        let cfg: SealtraceConfig = toml::from_str(&text).ctx_config("parse config TOML")?;
        Ok(cfg)
    }

    /// Load config using the standard search order:
    /// 1. Explicit path (if given)
    /// 2. `sealtrace.toml` next to the running binary
    /// 3. Platform-standard config directory
    /// 4. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        // Next to executable.
        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name("sealtrace.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        // Platform-standard config directory.
        #[cfg(windows)]
        {
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                let candidate = PathBuf::from(local).join("sealtrace").join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        #[cfg(not(windows))]
        {
            if let Some(home) = std::env::var_os("HOME") {
                let candidate = PathBuf::from(home)
                    .join(".config")
                    .join("sealtrace")
                    .join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("SEALTRACE_MASTER_KEY") {
            self.security.master_key = Some(key);
        }
        if let Ok(salt) = std::env::var("SEALTRACE_MASTER_KEY_SALT") {
            self.security.master_key_salt = Some(salt);
        }
        if let Ok(db) = std::env::var("SEALTRACE_DB") {
            self.paths.db = PathBuf::from(db);
        }
        if let Ok(level) = std::env::var("SEALTRACE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = SealtraceConfig::default();
        assert_eq!(cfg.verify.counter_max_jump, 10);
        assert_eq!(cfg.provision.batch_limit, 100);
        assert_eq!(cfg.paths.db, PathBuf::from("sealtrace.db"));
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.security.master_key.is_none());
    }

    #[test]
    fn load_missing_file_returns_default() {
        let cfg = SealtraceConfig::load_from(Path::new("nonexistent_file_xyz.toml")).unwrap();
        assert_eq!(cfg.verify.counter_max_jump, 10);
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[verify]
counter_max_jump = 5
location_tolerance_km = 10.0
"#;
        let cfg: SealtraceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.verify.counter_max_jump, 5);
        assert!((cfg.verify.location_tolerance_km - 10.0).abs() < f64::EPSILON);
        // Other sections should be defaults.
        assert_eq!(cfg.provision.batch_limit, 100);
    }

    #[test]
    fn parse_security_section() {
        let toml_str = r#"
[security]
master_key = "0000000000000000000000000000000000000000000000000000000000000000"
"#;
        let cfg: SealtraceConfig = toml::from_str(toml_str).unwrap();
        assert!(cfg.security.master_key.is_some());
        assert!(cfg.security.master_key_salt.is_none());
    }
}
