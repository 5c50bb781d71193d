//! # Sync Configuration
//!
//! Configuration management for the terminal sync agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ATRIO_SERVER_URL=https://venue.example.com                         │
//! │     ATRIO_DEVICE_ID=abc-123                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/atrio-pos/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.atrio.pos/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     30s sync interval, 30s heartbeat, 10-attempt ceiling               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"  # set by pairing
//! name = "Register 1"
//!
//! [server]
//! base_url = "https://venue.example.com"
//! connect_timeout_secs = 10
//! request_timeout_secs = 30
//!
//! [sync]
//! interval_secs = 30
//! batch_size = 50
//! max_attempts = 10
//! max_attempts_policy = { mode = "retain" }
//!
//! [heartbeat]
//! interval_secs = 30
//! failure_threshold = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Device identifier assigned by the venue server.
    /// `None` until the terminal is paired or logs in with a PIN.
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable device name (e.g., "Register 1", "Patio Tablet").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            id: None,
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Venue server endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL of the venue API (e.g., "https://venue.example.com").
    #[serde(default)]
    pub base_url: String,

    /// TCP connect timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout (seconds). Applies to every call including
    /// batch submission; the engine's pass budget sits above this.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            base_url: String::new(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// What happens to a record that has exhausted its submission attempts.
///
/// ## Policy Comparison
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  RETAIN (Default)                   │  PURGE_AFTER_DAYS                 │
/// │  ────────────────                   │  ─────────────────                │
/// │  • Record stays in the queue        │  • Record stays visible for       │
/// │    indefinitely with its last error │    `days` days, then is deleted   │
/// │  • Operator resolves it manually    │  • For venues that prefer a       │
/// │    (clear_failure, or export)       │    bounded queue over manual      │
/// │  • Nothing is ever deleted silently │    review of stale failures       │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
///
/// There is no silent-deletion mode: purging is explicit, bounded, and
/// logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum MaxAttemptsPolicy {
    /// Keep exhausted records until an operator acts on them.
    #[default]
    Retain,

    /// Delete exhausted records once they are older than `days` days.
    PurgeAfterDays { days: u32 },
}

/// Sync engine behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between automatic drain passes (seconds).
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Maximum queue records submitted per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// First retry delay (milliseconds). Doubles per attempt.
    #[serde(default = "default_base_retry_delay")]
    pub base_retry_delay_ms: u64,

    /// Upper bound on the per-record retry delay (milliseconds).
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Submission attempts before a record leaves automatic retry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    /// Time budget for one drain pass (seconds). A pass that exceeds this
    /// is abandoned so the next tick is never blocked by a hung call.
    #[serde(default = "default_max_pass_secs")]
    pub max_pass_secs: u64,

    /// Policy for records that exhausted their attempts.
    #[serde(default)]
    pub max_attempts_policy: MaxAttemptsPolicy,
}

fn default_sync_interval() -> u64 {
    30
}
fn default_batch_size() -> u32 {
    50
}
fn default_base_retry_delay() -> u64 {
    1_000
}
fn default_max_retry_delay() -> u64 {
    60_000
}
fn default_max_attempts() -> i64 {
    10
}
fn default_max_pass_secs() -> u64 {
    25
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            interval_secs: default_sync_interval(),
            batch_size: default_batch_size(),
            base_retry_delay_ms: default_base_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            max_attempts: default_max_attempts(),
            max_pass_secs: default_max_pass_secs(),
            max_attempts_policy: MaxAttemptsPolicy::default(),
        }
    }
}

// =============================================================================
// Heartbeat Settings
// =============================================================================

/// Connectivity monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    /// Interval between heartbeats (seconds).
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,

    /// Consecutive transient failures before the state flips to Degraded.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        HeartbeatSettings {
            interval_secs: default_heartbeat_interval(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete terminal sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific settings.
    #[serde(default)]
    pub device: DeviceSettings,

    /// Venue server endpoint.
    #[serde(default)]
    pub server: ServerSettings,

    /// Sync engine behavior.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Heartbeat behavior.
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.server.base_url.is_empty() {
            return Err(SyncError::MissingServerUrl);
        }

        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            return Err(SyncError::InvalidUrl(format!(
                "Server URL must start with http:// or https://, got: {}",
                self.server.base_url
            )));
        }
        Url::parse(&self.server.base_url)?;

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.max_attempts <= 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.sync.base_retry_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "base_retry_delay_ms must be greater than 0".into(),
            ));
        }

        if self.sync.max_retry_delay_ms < self.sync.base_retry_delay_ms {
            return Err(SyncError::InvalidConfig(
                "max_retry_delay_ms must be at least base_retry_delay_ms".into(),
            ));
        }

        if self.heartbeat.failure_threshold == 0 {
            return Err(SyncError::InvalidConfig(
                "failure_threshold must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("ATRIO_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = Some(id);
        }

        if let Ok(name) = std::env::var("ATRIO_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(url) = std::env::var("ATRIO_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.base_url = url;
        }

        if let Ok(interval) = std::env::var("ATRIO_SYNC_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.sync.interval_secs = secs;
            }
        }

        if let Ok(size) = std::env::var("ATRIO_SYNC_BATCH_SIZE") {
            if let Ok(n) = size.parse::<u32>() {
                self.sync.batch_size = n;
            }
        }

        if let Ok(interval) = std::env::var("ATRIO_HEARTBEAT_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.heartbeat.interval_secs = secs;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "atrio", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Returns the default credential file path (lives beside the config).
    pub fn default_credential_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "atrio", "pos")
            .map(|dirs| dirs.config_dir().join("credential.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.server.base_url = "https://venue.example.com".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.sync.interval_secs, 30);
        assert_eq!(config.sync.max_attempts, 10);
        assert_eq!(config.heartbeat.failure_threshold, 3);
        assert_eq!(config.sync.max_attempts_policy, MaxAttemptsPolicy::Retain);
    }

    #[test]
    fn test_config_validation() {
        let mut config = valid_config();
        assert!(config.validate().is_ok());

        // Missing server URL should fail
        config.server.base_url = String::new();
        assert!(matches!(
            config.validate(),
            Err(SyncError::MissingServerUrl)
        ));

        // Non-HTTP scheme should fail
        config.server.base_url = "ws://venue.example.com".to_string();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        // Zero batch size should fail
        config.server.base_url = "http://localhost:8443".to_string();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_bounds_validation() {
        let mut config = valid_config();
        config.sync.max_retry_delay_ms = 500;
        config.sync.base_retry_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_attempts_policy_toml() {
        let toml_str = r#"
            [server]
            base_url = "https://venue.example.com"

            [sync]
            max_attempts_policy = { mode = "purge_after_days", days = 14 }
        "#;
        let config: SyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.sync.max_attempts_policy,
            MaxAttemptsPolicy::PurgeAfterDays { days: 14 }
        );

        // Default when omitted
        let config: SyncConfig = toml::from_str("[server]\nbase_url = \"http://x\"").unwrap();
        assert_eq!(config.sync.max_attempts_policy, MaxAttemptsPolicy::Retain);
    }

    #[test]
    fn test_toml_serialization() {
        let config = valid_config();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[device]"));
        assert!(toml_str.contains("[sync]"));
        assert!(toml_str.contains("[heartbeat]"));
    }
}
