//! Configuration for chat-graph

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chat-graph")
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("graph.db")
}

/// What list operations return when nothing matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyListPolicy {
    /// Empty result is an error
    #[default]
    NotFound,
    /// Empty result is an empty list
    Empty,
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How long a connection waits for the write lock, in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub empty_list_policy: EmptyListPolicy,

    /// Default tracing directive, overridden by RUST_LOG
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Buffered events per subscriber before slow ones lag
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_log_filter() -> String {
    "chat_graph=info".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            empty_list_policy: EmptyListPolicy::default(),
            log_filter: default_log_filter(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }
}
