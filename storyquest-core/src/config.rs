//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/storyquest/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/storyquest/` (~/.config/storyquest/)
//! - Data: `$XDG_DATA_HOME/storyquest/` (~/.local/share/storyquest/)
//! - State/Logs: `$XDG_STATE_HOME/storyquest/` (~/.local/state/storyquest/)

use crate::achievements::FIRST_STORY;
use crate::error::{Error, Result};
use crate::graph::DEFAULT_ROOT_ID;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Story content settings
    #[serde(default)]
    pub story: StoryConfig,

    /// Achievement rules
    #[serde(default)]
    pub achievements: AchievementsConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Story content settings
#[derive(Debug, Deserialize, Clone)]
pub struct StoryConfig {
    /// Id of the scene every traversal starts from
    #[serde(default = "default_root_node")]
    pub root_node: String,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            root_node: default_root_node(),
        }
    }
}

fn default_root_node() -> String {
    DEFAULT_ROOT_ID.to_string()
}

/// Achievement rule settings
#[derive(Debug, Deserialize, Clone)]
pub struct AchievementsConfig {
    /// Name of the achievement for a child's first completed story
    #[serde(default = "default_first_story")]
    pub first_story: String,

    /// Award the achievement named by the ending a reader reaches
    #[serde(default = "default_ending_badges")]
    pub ending_badges: bool,
}

impl Default for AchievementsConfig {
    fn default() -> Self {
        Self {
            first_story: default_first_story(),
            ending_badges: default_ending_badges(),
        }
    }
}

fn default_first_story() -> String {
    FIRST_STORY.to_string()
}

fn default_ending_badges() -> bool {
    true
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.story.root_node.trim().is_empty() {
            return Err(Error::Config("story.root_node must not be empty".to_string()));
        }
        if self.achievements.first_story.trim().is_empty() {
            return Err(Error::Config(
                "achievements.first_story must not be empty".to_string(),
            ));
        }
        if self.logging.max_files == 0 {
            return Err(Error::Config(
                "logging.max_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/storyquest/config.toml` (~/.config/storyquest/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("storyquest").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/storyquest/` (~/.local/share/storyquest/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("storyquest")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/storyquest/` (~/.local/state/storyquest/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("storyquest")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/storyquest/data.db` (~/.local/share/storyquest/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path prefix; rotated files get a date suffix
    ///
    /// `$XDG_STATE_HOME/storyquest/storyquest.log` (~/.local/state/storyquest/storyquest.log)
    pub fn log_prefix() -> PathBuf {
        Self::state_dir().join(crate::logging::LOG_FILE_PREFIX)
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// CLI binaries call this before anything reads the paths above.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
