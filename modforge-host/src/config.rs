//! Configuration file loading and management
//!
//! This module handles loading and parsing the host configuration from
//! `$XDG_CONFIG_HOME/modforge/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use modforge_runtime::{Permission, ViolationKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Host process configuration
    #[serde(default)]
    pub host: HostConfig,
    /// Mod discovery configuration
    #[serde(default)]
    pub mods: ModsConfig,
    /// Security configuration
    #[serde(default)]
    pub security: SecurityConfig,
    /// Extra permissions registered on top of the built-in catalog
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
}

/// Host process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
    /// Frame rate of the tick loop
    /// Default: 60
    pub tick_rate_hz: u32,
    /// Stop after this many frames instead of waiting for Ctrl+C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_ticks: Option<u64>,
}

/// Mod discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModsConfig {
    /// Directories scanned for mods, in priority order
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    /// Also scan the user mods directory
    /// Default: true
    pub include_user_dir: bool,
    /// Mod ids that are discovered but never loaded
    #[serde(default)]
    pub disabled: Vec<String>,
}

/// Security configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// Unit names resolved by the host instead of from mod directories
    #[serde(default)]
    pub host_units: Vec<String>,
    /// Patterns added to the built-in blacklist
    #[serde(default)]
    pub blacklist: BlacklistAdditions,
}

/// Extra blacklist patterns, per category
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlacklistAdditions {
    #[serde(default)]
    pub assemblies: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

impl BlacklistAdditions {
    /// Every pattern paired with its category.
    pub fn entries(&self) -> Vec<(ViolationKind, &str)> {
        let mut entries = Vec::new();
        for (kind, patterns) in [
            (ViolationKind::Assembly, &self.assemblies),
            (ViolationKind::Namespace, &self.namespaces),
            (ViolationKind::Type, &self.types),
            (ViolationKind::Member, &self.members),
        ] {
            entries.extend(patterns.iter().map(|p| (kind, p.as_str())));
        }
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty()
            && self.namespaces.is_empty()
            && self.types.is_empty()
            && self.members.is_empty()
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            tick_rate_hz: 60,
            run_ticks: None,
        }
    }
}

impl Default for ModsConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            include_user_dir: true,
            disabled: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Time between two frames.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate_hz.max(1)))
    }
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/modforge/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "raibid-labs", "modforge")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    pub fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    fn default_config_content() -> String {
        r#"# Modforge Host Configuration
# This file configures the modforge-host behavior.

[host]
# Log level: trace, debug, info, warn, error
# RUST_LOG overrides this when set.
# Default: "info"
log_level = "info"

# Frames per second of the tick loop
# Default: 60
tick_rate_hz = 60

# Stop after this many frames instead of waiting for Ctrl+C
# run_ticks = 600

[mods]
# Directories scanned for mods, in order. A broken mod.toml or a mod id
# found twice aborts startup before anything loads.
directories = []

# Also scan the user mods directory ($XDG_DATA_HOME/modforge/mods)
# Default: true
include_user_dir = true

# Mod ids that are discovered but never loaded
disabled = []

[security]
# Unit names that resolve to the host instead of to mod code units.
# "modforge.api" and "std" are always host-provided.
host_units = []

# Patterns added to the built-in blacklist. `*` matches any run of
# characters, including dots.
[security.blacklist]
assemblies = []
namespaces = []
types = []
members = []

# Extra permissions, registered after the built-in catalog.
# Registering an existing id replaces it.
#
# [[permissions]]
# id = "telemetry"
# parent_id = "network"
# risk = "medium"
# description = "Send anonymous usage reports"
# namespaces = ["host.telemetry"]
"#
        .to_string()
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are valid and within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.host.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.host.log_level,
                LOG_LEVELS.join(", ")
            );
        }

        if self.host.tick_rate_hz == 0 {
            anyhow::bail!("host.tick_rate_hz must be greater than 0");
        }

        for permission in &self.permissions {
            if permission.id.trim().is_empty() {
                anyhow::bail!("Permission ids must not be empty");
            }
        }

        Ok(())
    }
}
