//! Configuration file management.
//!
//! The daemon reads `$VOX_DATA_DIR/config.toml` and falls back to defaults
//! for any missing section or key. Provider and encryption secrets may be
//! supplied through the environment instead of the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vox_consensus::{ConsensusConfig, ValidationConfig};
use vox_ledger::payout::PayoutConfig;
use vox_ledger::rates::DEFAULT_RATE_TTL;
use vox_ledger::royalty::DEFAULT_REMIXER_BPS;
use vox_ledger::RoyaltySplit;
use vox_payments::exchange::DEFAULT_MINOR_PER_USD;
use vox_payments::http::DEFAULT_BASE_URL;
use vox_payments::WithdrawalConfig;

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "VOX_DATA_DIR";

/// Environment variable overriding `provider.secret_key`.
pub const PROVIDER_SECRET_ENV: &str = "VOX_PROVIDER_SECRET";

/// Environment variable overriding `encryption.key`.
pub const ENCRYPTION_KEY_ENV: &str = "VOX_ENCRYPTION_KEY";

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub withdrawals: WithdrawalConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = `$VOX_DATA_DIR` or `$HOME/.vox`.
    #[serde(default)]
    pub data_dir: String,
    /// Database file name inside the data directory.
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

/// Reward rates, multipliers and remix shares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// How long a loaded rate table is trusted before it is re-read.
    #[serde(default = "default_rate_ttl_secs")]
    pub rate_ttl_secs: u64,
    /// Remixer's share of a remix award, in basis points.
    #[serde(default = "default_remixer_bps")]
    pub remixer_bps: u32,
    #[serde(default)]
    pub payout: PayoutConfig,
}

/// Transfer provider credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Secret API key. Also keys webhook signatures. Empty = withdrawals disabled.
    #[serde(default)]
    pub secret_key: String,
    /// Payout currency minor units per USD.
    #[serde(default = "default_minor_per_usd")]
    pub minor_per_usd: i64,
}

/// Destination-account encryption.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Hex-encoded 32-byte key. Empty = withdrawals disabled.
    #[serde(default)]
    pub key: String,
}

/// Notification outbox drain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Failed deliveries before a row is parked as `failed`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Largest page returned by `outbox_pending`.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive: "debug" | "info" | "warn" | "error",
    /// or a full `EnvFilter` directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions

fn default_db_file() -> String {
    "vox.db".to_string()
}

fn default_rate_ttl_secs() -> u64 {
    DEFAULT_RATE_TTL.as_secs()
}

fn default_remixer_bps() -> u32 {
    DEFAULT_REMIXER_BPS
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_minor_per_usd() -> i64 {
    DEFAULT_MINOR_PER_USD
}

fn default_max_attempts() -> u32 {
    5
}

fn default_page_limit() -> u32 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            db_file: default_db_file(),
        }
    }
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            rate_ttl_secs: default_rate_ttl_secs(),
            remixer_bps: default_remixer_bps(),
            payout: PayoutConfig::default(),
        }
    }
}

impl RewardsConfig {
    pub fn rate_ttl(&self) -> Duration {
        Duration::from_secs(self.rate_ttl_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            secret_key: String::new(),
            minor_per_usd: default_minor_per_usd(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("secret_key_set", &!self.secret_key.is_empty())
            .field("minor_per_usd", &self.minor_per_usd)
            .finish()
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key_set", &!self.key.is_empty())
            .finish()
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            page_limit: default_page_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location and apply
    /// environment overrides.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path` without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Replace secrets with non-empty values from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(PROVIDER_SECRET_ENV).filter(|s| !s.is_empty()) {
            self.provider.secret_key = secret;
        }
        if let Some(key) = lookup(ENCRYPTION_KEY_ENV).filter(|s| !s.is_empty()) {
            self.encryption.key = key;
        }
    }

    /// Reject values the engines cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.royalty_split()?;
        if self.consensus.threshold == 0 {
            return Err(ConfigError::Invalid(
                "consensus.threshold must be at least 1".into(),
            ));
        }
        if self.consensus.trust_floor > self.consensus.trust_ceiling {
            return Err(ConfigError::Invalid(
                "consensus.trust_floor exceeds consensus.trust_ceiling".into(),
            ));
        }
        if self.withdrawals.min_amount <= 0 || self.withdrawals.daily_cap <= 0 {
            return Err(ConfigError::Invalid(
                "withdrawal amounts must be positive".into(),
            ));
        }
        if self.provider.minor_per_usd <= 0 {
            return Err(ConfigError::Invalid(
                "provider.minor_per_usd must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Remix split built from `rewards.remixer_bps`.
    pub fn royalty_split(&self) -> Result<RoyaltySplit, ConfigError> {
        RoyaltySplit::new(self.rewards.remixer_bps).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Whether the transfer provider secret and encryption key are both set.
    pub fn withdrawals_enabled(&self) -> bool {
        !self.provider.secret_key.is_empty() && !self.encryption.key.is_empty()
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Get the database file path.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.db_file)
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".vox"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/vox"))
    }
}
