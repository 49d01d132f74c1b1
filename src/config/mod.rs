//! Configuration storage

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::AvatarId;
use crate::office::zones::ZoneLayout;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name shown to other participants
    pub display_name: Option<String>,
    /// Character skin
    pub avatar: AvatarId,
    /// WebSocket relay, e.g. ws://127.0.0.1:7400
    pub relay_url: Option<String>,
    /// Zone layout TOML; the built-in floor plan when unset
    pub layout_path: Option<PathBuf>,
    /// Hosted assistant endpoint; the offline stub answers when unset
    pub assist_endpoint: Option<String>,
    /// Proximity and timing knobs
    pub session: SessionConfig,
}

/// Tunables for the proximity session, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub proximity_radius: f64,
    pub publish_interval_ms: u64,
    pub stale_after_secs: u64,
    pub sweep_interval_secs: u64,
    pub retry_interval_ms: u64,
    pub negotiation_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            proximity_radius: 100.0,
            publish_interval_ms: 200,
            stale_after_secs: 45,
            sweep_interval_secs: 5,
            retry_interval_ms: 1000,
            negotiation_timeout_secs: 10,
        }
    }
}

/// Validated settings handed to the session components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub proximity_radius: f64,
    pub publish_interval: Duration,
    /// Idle republish period; a third of the staleness threshold.
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
    pub sweep_interval: Duration,
    pub retry_interval: Duration,
    pub negotiation_timeout: Duration,
}

impl SessionConfig {
    /// Check ranges and derive durations.
    pub fn settings(&self) -> Result<SessionSettings> {
        if !self.proximity_radius.is_finite() || self.proximity_radius < 0.0 {
            bail!(
                "session.proximity_radius must be a non-negative number (got {})",
                self.proximity_radius
            );
        }
        if !(50..=1000).contains(&self.publish_interval_ms) {
            bail!(
                "session.publish_interval_ms must be within 50..=1000 (got {})",
                self.publish_interval_ms
            );
        }
        if self.sweep_interval_secs == 0 {
            bail!("session.sweep_interval_secs must be at least 1");
        }
        if self.stale_after_secs <= self.sweep_interval_secs {
            bail!(
                "session.stale_after_secs ({}) must exceed session.sweep_interval_secs ({})",
                self.stale_after_secs,
                self.sweep_interval_secs
            );
        }
        if self.retry_interval_ms < self.publish_interval_ms {
            bail!(
                "session.retry_interval_ms ({}) must not be below session.publish_interval_ms ({})",
                self.retry_interval_ms,
                self.publish_interval_ms
            );
        }
        if self.negotiation_timeout_secs == 0 {
            bail!("session.negotiation_timeout_secs must be at least 1");
        }

        let stale_after = Duration::from_secs(self.stale_after_secs);
        Ok(SessionSettings {
            proximity_radius: self.proximity_radius,
            publish_interval: Duration::from_millis(self.publish_interval_ms),
            heartbeat_interval: stale_after / 3,
            stale_after,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            negotiation_timeout: Duration::from_secs(self.negotiation_timeout_secs),
        })
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "virtual-office", "virtual-office")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn session_settings(&self) -> Result<SessionSettings> {
        self.session.settings()
    }

    /// Load the configured zone layout, or the built-in one.
    pub fn zone_layout(&self) -> Result<ZoneLayout> {
        match self.layout_path {
            Some(ref path) => ZoneLayout::load(path)
                .with_context(|| format!("Failed to load layout {}", path.display())),
            None => Ok(ZoneLayout::default_office()),
        }
    }

    pub fn display_name(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "guest".to_string())
    }
}
