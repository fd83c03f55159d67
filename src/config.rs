//! Configuration management for Deskgate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::error::{DeskError, Result};
use crate::frontend::{AuthLevel, LocationId};

/// Environment variable prefix, e.g. `DESKGATE__RESOURCE__VM_NAME`.
const ENV_PREFIX: &str = "DESKGATE";

/// Main configuration for the Deskgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeskConfig {
    /// The controlled virtual machine
    #[serde(default)]
    pub resource: ResourceConfig,

    /// Cooldown, vote and stream timings
    #[serde(default)]
    pub arbitration: ArbitrationConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resource (virtual machine) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Name of the VirtualBox machine
    #[serde(default)]
    pub vm_name: String,

    /// Snapshot restored on reset
    #[serde(default)]
    pub snapshot: String,

    /// Path to the VBoxManage binary
    #[serde(default = "default_vboxmanage")]
    pub vboxmanage: PathBuf,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            vm_name: String::new(),
            snapshot: String::new(),
            vboxmanage: default_vboxmanage(),
        }
    }
}

fn default_vboxmanage() -> PathBuf {
    PathBuf::from("VBoxManage")
}

/// Arbitration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationConfig {
    /// Length of a restriction window in seconds
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Locations where input commands are accepted and cooldowns apply
    #[serde(default)]
    pub restricted_locations: Vec<u64>,

    /// Level at or above which a requester is an admin
    #[serde(default = "default_admin_level")]
    pub admin_level: u32,

    /// Minimum level required to start a reset vote
    #[serde(default = "default_vote_level")]
    pub vote_level: u32,

    /// How long a reset vote stays open, in seconds
    #[serde(default = "default_vote_window")]
    pub vote_window_secs: u64,

    /// Wait after relaunching the machine before it is usable, in seconds
    #[serde(default = "default_settle")]
    pub settle_secs: u64,

    /// Delay between live stream frames, in seconds
    #[serde(default = "default_live_interval")]
    pub live_interval_secs: u64,

    /// Upper bound on the power-down wait, in milliseconds
    #[serde(default = "default_power_down_timeout")]
    pub power_down_timeout_ms: u64,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            restricted_locations: Vec::new(),
            admin_level: default_admin_level(),
            vote_level: default_vote_level(),
            vote_window_secs: default_vote_window(),
            settle_secs: default_settle(),
            live_interval_secs: default_live_interval(),
            power_down_timeout_ms: default_power_down_timeout(),
        }
    }
}

fn default_cooldown() -> u64 {
    30
}

fn default_admin_level() -> u32 {
    AuthLevel::ADMIN.0
}

fn default_vote_level() -> u32 {
    1
}

fn default_vote_window() -> u64 {
    20
}

fn default_settle() -> u64 {
    20
}

fn default_live_interval() -> u64 {
    5
}

fn default_power_down_timeout() -> u64 {
    10_000
}

impl ArbitrationConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn vote_window(&self) -> Duration {
        Duration::from_secs(self.vote_window_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn live_interval(&self) -> Duration {
        Duration::from_secs(self.live_interval_secs)
    }

    pub fn power_down_timeout(&self) -> Duration {
        Duration::from_millis(self.power_down_timeout_ms)
    }

    pub fn admin_level(&self) -> AuthLevel {
        AuthLevel(self.admin_level)
    }

    pub fn vote_level(&self) -> AuthLevel {
        AuthLevel(self.vote_level)
    }

    pub fn restricted_locations(&self) -> HashSet<LocationId> {
        self.restricted_locations
            .iter()
            .copied()
            .map(LocationId)
            .collect()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DeskConfig {
    /// Load configuration from an optional YAML file layered under
    /// `DESKGATE__*` environment variables.
    ///
    /// Not validated; call [`DeskConfig::validate`] once command line
    /// overrides are applied.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("arbitration.restricted_locations")
                .try_parsing(true),
        );

        let config: DeskConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DeskError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: DeskConfig =
            serde_yaml::from_str(yaml).map_err(|e| DeskError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings the controller cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.resource.vm_name.trim().is_empty() {
            return Err(DeskError::Config("resource.vm_name is required".to_string()));
        }
        if self.resource.snapshot.trim().is_empty() {
            return Err(DeskError::Config("resource.snapshot is required".to_string()));
        }

        let arbitration = &self.arbitration;
        for (name, value) in [
            ("cooldown_secs", arbitration.cooldown_secs),
            ("vote_window_secs", arbitration.vote_window_secs),
            ("live_interval_secs", arbitration.live_interval_secs),
            ("power_down_timeout_ms", arbitration.power_down_timeout_ms),
        ] {
            if value == 0 {
                return Err(DeskError::Config(format!(
                    "arbitration.{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}
