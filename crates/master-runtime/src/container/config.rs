//! # Master Configuration
//!
//! Unified configuration for all subsystems and runtime parameters.
//!
//! ## Sources (later wins)
//!
//! 1. Built-in defaults
//! 2. TOML file named by `FM_CONFIG`
//! 3. Environment: `FM_LISTEN_ADDR`, `FM_BASE_DIR`, `FM_AUTO_ACCEPT`,
//!    `FM_LOG_LEVEL`
//!
//! ## Security Requirements
//!
//! - Auto-accept is off unless explicitly configured
//! - Production start refuses an RSA floor below 2048 bits

use fm_01_key_store::AutoAcceptPolicy;
use fm_02_auth_handshake::AuthConfig;
use fm_04_job_bus::JobBusConfig;
use serde::Deserialize;
use shared_types::MAX_FRAME_LEN;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the TOML config file.
pub const ENV_CONFIG: &str = "FM_CONFIG";
/// Environment override for `network.listen_addr`.
pub const ENV_LISTEN_ADDR: &str = "FM_LISTEN_ADDR";
/// Environment override for `storage.base_dir`.
pub const ENV_BASE_DIR: &str = "FM_BASE_DIR";
/// Environment override for `auth.auto_accept`.
pub const ENV_AUTO_ACCEPT: &str = "FM_AUTO_ACCEPT";
/// Environment override for `log_level`.
pub const ENV_LOG_LEVEL: &str = "FM_LOG_LEVEL";

/// Smallest RSA modulus accepted for a production start.
pub const PRODUCTION_MIN_RSA_BITS: usize = 2048;

/// Complete master configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterConfig {
    /// `tracing` filter directive (e.g. `info`, `fm_04_job_bus=debug`).
    pub log_level: String,
    /// Listener and framing.
    pub network: NetworkConfig,
    /// On-disk layout root.
    pub storage: StorageConfig,
    /// Handshake and key acceptance.
    pub auth: AuthSection,
    /// Session lifetime.
    pub sessions: SessionsConfig,
    /// Job tracking and cache retention.
    pub jobs: JobsConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthSection::default(),
            sessions: SessionsConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl MasterConfig {
    /// Defaults, then the `FM_CONFIG` file if set, then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the named file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(ENV_CONFIG) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply the `FM_*` overrides found by `lookup`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(addr) = get(ENV_LISTEN_ADDR) {
            self.network.listen_addr = addr;
        }
        if let Some(dir) = get(ENV_BASE_DIR) {
            self.storage.base_dir = PathBuf::from(dir);
        }
        if let Some(policy) = get(ENV_AUTO_ACCEPT) {
            self.auth.auto_accept = policy;
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
    }

    /// Structural checks every start must pass.
    ///
    /// # Errors
    ///
    /// Returns `Err` if:
    /// - `listen_addr` is not a socket address
    /// - `max_frame_len` is zero or above the protocol limit
    /// - any interval or timeout is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        let frame = self.network.max_frame_len;
        if frame == 0 || frame > MAX_FRAME_LEN {
            return Err(ConfigError::FrameLimit {
                value: frame,
                max: MAX_FRAME_LEN,
            });
        }
        if self.network.outbox_capacity == 0 {
            return Err(ConfigError::Zero("network.outbox_capacity"));
        }

        let intervals = [
            ("auth.handshake_timeout_secs", self.auth.handshake_timeout_secs),
            ("auth.recheck_interval_secs", self.auth.recheck_interval_secs),
            ("auth.pending_hold_timeout_secs", self.auth.pending_hold_timeout_secs),
            ("sessions.idle_timeout_secs", self.sessions.idle_timeout_secs),
            ("sessions.sweep_interval_secs", self.sessions.sweep_interval_secs),
            ("jobs.job_timeout_secs", self.jobs.job_timeout_secs),
            ("jobs.clean_interval_secs", self.jobs.clean_interval_secs),
        ];
        if let Some((field, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Zero(field));
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus the security floor for a real
    /// deployment.
    ///
    /// # Errors
    ///
    /// Returns `Err` if structural validation fails or `min_rsa_bits` is
    /// below [`PRODUCTION_MIN_RSA_BITS`].
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.auth.min_rsa_bits < PRODUCTION_MIN_RSA_BITS {
            return Err(ConfigError::WeakKeyFloor {
                bits: self.auth.min_rsa_bits,
                min: PRODUCTION_MIN_RSA_BITS,
            });
        }
        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.network
            .listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(self.network.listen_addr.clone()))
    }

    /// Handshake settings for `AuthService`.
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            handshake_timeout: Duration::from_secs(self.auth.handshake_timeout_secs),
            min_rsa_bits: self.auth.min_rsa_bits,
            max_outstanding_challenges: self.auth.max_outstanding_challenges,
        }
    }

    /// First-contact acceptance policy for the key store.
    #[must_use]
    pub fn auto_accept_policy(&self) -> AutoAcceptPolicy {
        AutoAcceptPolicy::from_config_str(&self.auth.auto_accept)
    }

    /// Job tracking settings for `JobBus`.
    #[must_use]
    pub fn job_bus_config(&self) -> JobBusConfig {
        JobBusConfig {
            job_timeout: Duration::from_secs(self.jobs.job_timeout_secs),
            keep_jobs_hours: self.jobs.keep_jobs_hours,
            archive_jobs: self.jobs.archive_jobs,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Cannot read config file {path}: {source}")]
    Read {
        /// File named by `FM_CONFIG`.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for `MasterConfig`.
    #[error("Invalid config: {0}")]
    Parse(String),

    /// `network.listen_addr` does not parse.
    #[error("Invalid listen address: {0}")]
    InvalidListenAddr(String),

    /// `network.max_frame_len` out of range.
    #[error("max_frame_len {value} must be between 1 and {max}")]
    FrameLimit {
        /// Configured value.
        value: usize,
        /// Protocol limit.
        max: usize,
    },

    /// A duration, interval or capacity is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// RSA floor too low for production.
    #[error(
        "SECURITY VIOLATION: auth.min_rsa_bits is {bits}, production requires at least {min}"
    )]
    WeakKeyFloor {
        /// Configured floor.
        bits: usize,
        /// Required floor.
        min: usize,
    },
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Address the master listens on for minions.
    pub listen_addr: String,
    /// Largest accepted frame, in bytes.
    pub max_frame_len: usize,
    /// Outbound queue depth per connection.
    pub outbox_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4506".to_string(),
            max_frame_len: MAX_FRAME_LEN,
            outbox_capacity: 256,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Root of `minions/`, `job_cache/`, `job_cache_archive/` and `events/`.
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data"),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    /// Seconds a minion has to answer its challenge.
    pub handshake_timeout_secs: u64,
    /// Smallest accepted RSA modulus.
    pub min_rsa_bits: usize,
    /// `off`, `all`, or a comma-separated glob list.
    pub auto_accept: String,
    /// Keep pending minions connected and re-check their key.
    pub pending_hold: bool,
    /// Seconds between re-checks of a held minion.
    pub recheck_interval_secs: u64,
    /// Seconds a pending minion is held before the connection is closed.
    pub pending_hold_timeout_secs: u64,
    /// Upper bound on challenges awaiting an answer.
    pub max_outstanding_challenges: usize,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: AuthConfig::DEFAULT_HANDSHAKE_TIMEOUT.as_secs(),
            min_rsa_bits: AuthConfig::DEFAULT_MIN_RSA_BITS,
            auto_accept: "off".to_string(),
            pending_hold: false,
            recheck_interval_secs: 10,
            pending_hold_timeout_secs: 300,
            max_outstanding_challenges: AuthConfig::DEFAULT_MAX_OUTSTANDING,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionsConfig {
    /// Sessions without traffic for this long are revoked.
    pub idle_timeout_secs: u64,
    /// Period of the maintenance sweep.
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            sweep_interval_secs: 30,
        }
    }
}

/// Job configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsConfig {
    /// Seconds a job is tracked waiting for returns.
    pub job_timeout_secs: u64,
    /// Hours a job stays in the cache; `0` keeps jobs forever.
    pub keep_jobs_hours: u64,
    /// Archive cleaned jobs instead of deleting them.
    pub archive_jobs: bool,
    /// Period of the job cache cleaner.
    pub clean_interval_secs: u64,
    /// Record bus events in the event archive.
    pub event_return: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: JobBusConfig::DEFAULT_JOB_TIMEOUT.as_secs(),
            keep_jobs_hours: JobBusConfig::DEFAULT_KEEP_JOBS_HOURS,
            archive_jobs: false,
            clean_interval_secs: 3600,
            event_return: true,
        }
    }
}
