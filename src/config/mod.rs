// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Configuration module

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::adapters::StdoutFormat;
use crate::error::PulseError;
use crate::middleware::PrivacyLevel;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Replace the real plugins with the simulator
    pub demo_mode: bool,

    pub privacy: PrivacyConfig,

    pub fusion: FusionConfig,

    pub sessions: SessionConfig,

    pub token_stats: TokenStatsConfig,

    pub pipeline: PipelineConfig,

    pub plugins: PluginsConfig,

    pub adapters: AdaptersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            demo_mode: false,
            privacy: PrivacyConfig::default(),
            fusion: FusionConfig::default(),
            sessions: SessionConfig::default(),
            token_stats: TokenStatsConfig::default(),
            pipeline: PipelineConfig::default(),
            plugins: PluginsConfig::default(),
            adapters: AdaptersConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| PulseError::ConfigIo {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml(&content).with_context(|| format!("parsing {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(PulseError::ConfigParse)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| PulseError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("pulsecat"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Detail payload redaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub enabled: bool,
    pub level: PrivacyLevel,
    /// Bypass all filtering
    pub dev_mode: bool,
    /// Detail keys kept at the internal level; everything passes when unset
    pub whitelist: Option<Vec<String>>,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: PrivacyLevel::Internal,
            dev_mode: false,
            whitelist: None,
        }
    }
}

/// Fusion vote and smoothing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Raw vote winners retained
    pub history_size: usize,
    /// Most recent winners inspected by the smoothing rule
    pub smoothing_window: usize,
    /// Statuses scoring at least this share of the winner are listed as runners-up
    pub runner_up_ratio: f64,
    pub max_confidence: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            history_size: 10,
            smoothing_window: 3,
            runner_up_ratio: 0.8,
            max_confidence: 0.99,
        }
    }
}

/// Session lifecycle timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity before an active session turns idle; twice this ends it
    pub timeout_minutes: u64,
    /// How long ended sessions stay queryable
    pub retention_minutes: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 10,
            retention_minutes: 60,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenStatsConfig {
    pub enabled: bool,
}

impl Default for TokenStatsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Plugin to pipeline plumbing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded queue between plugin tasks and the pipeline task
    pub channel_capacity: usize,
    /// Upper bound on a single adapter `send`
    pub adapter_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            adapter_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub claude_log: LogPluginConfig,
    pub claude_process: ProcessPluginConfig,
    pub simulator: SimulatorConfig,
}

/// Transcript tailing plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogPluginConfig {
    pub enabled: bool,
    /// Transcript root; `~/.claude/projects` when unset
    pub projects_dir: Option<PathBuf>,
    pub track_subagents: bool,
    /// Report transient API errors too
    pub show_all_errors: bool,
    pub check_interval_ms: u64,
    pub weight: f64,
}

impl Default for LogPluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            projects_dir: None,
            track_subagents: true,
            show_all_errors: false,
            check_interval_ms: 250,
            weight: 0.9,
        }
    }
}

impl LogPluginConfig {
    pub fn resolved_projects_dir(&self) -> PathBuf {
        match &self.projects_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude")
                .join("projects"),
        }
    }
}

/// CPU sampling plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessPluginConfig {
    pub enabled: bool,
    /// Case-insensitive name or command line keywords
    pub process_names: Vec<String>,
    pub check_interval_ms: u64,
    /// CPU measurement window inside one detection cycle
    pub sample_ms: u64,
    pub weight: f64,
}

impl Default for ProcessPluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            process_names: vec!["claude".to_string(), "anthropic".to_string()],
            check_interval_ms: 1000,
            sample_ms: 500,
            weight: 0.6,
        }
    }
}

/// Demo signal source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub check_interval_ms: u64,
    /// Chance per cycle of moving to another status
    pub change_probability: f64,
    pub weight: f64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 2000,
            change_probability: 0.35,
            weight: 0.8,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    pub websocket: WebSocketConfig,
    pub http: HttpConfig,
    pub stdout: StdoutConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8765,
            max_clients: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub cors: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdoutConfig {
    pub enabled: bool,
    pub format: StdoutFormat,
}

impl Default for StdoutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: StdoutFormat::Simple,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: "localhost".to_string(),
            port: 1883,
            client_id: "pulsecat".to_string(),
            username: None,
            password: None,
            topic_prefix: "pulsecat".to_string(),
            keep_alive_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            demo_mode = true

            [privacy]
            level = "public"

            [adapters.websocket]
            port = 9000
            "#,
        )
        .unwrap();

        assert!(config.demo_mode);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.privacy.level, PrivacyLevel::Public);
        assert!(config.privacy.enabled);
        assert_eq!(config.adapters.websocket.port, 9000);
        assert_eq!(config.adapters.websocket.max_clients, 32);
        assert_eq!(config.sessions.timeout_minutes, 10);
        assert_eq!(config.plugins.claude_process.process_names, vec!["claude", "anthropic"]);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::from_toml("demo_mode = [").is_err());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load(&path).unwrap();
        assert_eq!(created, loaded);
    }
}
