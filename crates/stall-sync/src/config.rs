//! # Sync Configuration
//!
//! Configuration for the device-side sync agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STALL_SYNC_MODE=offline                                            │
//! │     STALL_TENANT_ID=market-co                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pos/stall.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.stall.pos/stall.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     SyncMode::Auto, auto-generated device id, 60s interval             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Saturday stall"
//!
//! [operator]
//! tenant_id = "market-co"
//! operator_id = "maria"
//!
//! [sync]
//! mode = "auto"  # auto | manual | offline
//! interval_secs = 60
//! max_attempts = 10
//!
//! [storage]
//! local_db = "/var/lib/stall/local.db"
//! authority_db = "/var/lib/stall/authority.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stall_core::OperatorContext;

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::RetryPolicy;

// =============================================================================
// Sync Mode
// =============================================================================

/// How the agent decides when to talk to the ledger.
///
/// ```text
/// AUTO     timer + connectivity regained + manual triggers
/// MANUAL   connectivity regained + manual triggers, no timer
/// OFFLINE  never contacts the ledger, every sale is queued
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Auto,
    Manual,
    Offline,
}

impl SyncMode {
    /// Returns true if sync is enabled at all.
    pub fn is_sync_enabled(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }

    /// Returns true if the periodic timer should fire cycles.
    pub fn uses_timer(&self) -> bool {
        matches!(self, SyncMode::Auto)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Auto => write!(f, "auto"),
            SyncMode::Manual => write!(f, "manual"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SyncMode::Auto),
            "manual" => Ok(SyncMode::Manual),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: auto, manual, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Stall Till".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Operator Configuration
// =============================================================================

/// The tenant and operator this device sells for.
///
/// One device serves one operator at a time, which makes the device the only
/// writer of its queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorConfig {
    #[serde(default)]
    pub tenant_id: String,

    #[serde(default)]
    pub operator_id: String,
}

// =============================================================================
// Sync Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,

    /// Seconds between scheduled sync cycles.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Queue entries read per page while draining. A drain still walks the
    /// whole queue.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failed attempts after which an entry is flagged as stuck.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    /// Delay before the first retry of a failed entry (seconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on the retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Days a synced entry is kept before it is purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_interval() -> u64 {
    60
}
fn default_batch_size() -> usize {
    100
}
fn default_max_attempts() -> i64 {
    10
}
fn default_initial_backoff() -> u64 {
    2
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_backoff() -> u64 {
    300
}
fn default_retention_days() -> u32 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            interval_secs: default_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_secs: default_max_backoff(),
            retention_days: default_retention_days(),
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_secs(self.initial_backoff_secs),
            multiplier: self.backoff_multiplier,
            max: Duration::from_secs(self.max_backoff_secs),
            max_attempts: self.max_attempts,
        }
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Where the two SQLite files live. Unset paths resolve under the platform
/// data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Device-local queue and catalog snapshot.
    #[serde(default)]
    pub local_db: Option<PathBuf>,

    /// Authoritative store the ledger commits into.
    #[serde(default)]
    pub authority_db: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub operator: OperatorConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (stall.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading stall config from file");
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
            warn!("Failed to load stall config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Stall config saved");
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("device.id must not be empty".into()));
        }

        if self.operator.tenant_id.trim().is_empty() || self.operator.operator_id.trim().is_empty() {
            return Err(SyncError::MissingOperator);
        }

        let sync = &self.sync;
        if sync.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "interval_secs must be greater than 0".into(),
            ));
        }
        if sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }
        if sync.max_attempts <= 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if sync.backoff_multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(
                "backoff_multiplier must be at least 1.0".into(),
            ));
        }
        if sync.initial_backoff_secs > sync.max_backoff_secs {
            return Err(SyncError::InvalidConfig(format!(
                "initial_backoff_secs ({}) exceeds max_backoff_secs ({})",
                sync.initial_backoff_secs, sync.max_backoff_secs
            )));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `STALL_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("STALL_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }
        if let Some(name) = lookup("STALL_DEVICE_NAME") {
            self.device.name = name;
        }
        if let Some(tenant) = lookup("STALL_TENANT_ID") {
            self.operator.tenant_id = tenant;
        }
        if let Some(operator) = lookup("STALL_OPERATOR_ID") {
            self.operator.operator_id = operator;
        }

        if let Some(mode) = lookup("STALL_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Some(interval) = lookup("STALL_SYNC_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(secs) => self.sync.interval_secs = secs,
                Err(_) => warn!(value = %interval, "Invalid STALL_SYNC_INTERVAL_SECS"),
            }
        }

        if let Some(path) = lookup("STALL_LOCAL_DB") {
            self.storage.local_db = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("STALL_AUTHORITY_DB") {
            self.storage.authority_db = Some(PathBuf::from(path));
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stall", "pos")
            .map(|dirs| dirs.config_dir().join("stall.toml"))
    }

    fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("com", "stall", "pos")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    pub fn operator_context(&self) -> OperatorContext {
        OperatorContext::new(&self.operator.tenant_id, &self.operator.operator_id)
    }

    pub fn local_db_path(&self) -> PathBuf {
        self.storage
            .local_db
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("local.db"))
    }

    pub fn authority_db_path(&self) -> PathBuf {
        self.storage
            .authority_db
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("authority.db"))
    }
}
