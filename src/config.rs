use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::index::Scope;
use crate::sync::cache::CacheSettings;
use crate::sync::client::MAX_PAGE_SIZE;
use crate::sync::retry::RetryPolicy;

pub const APP_DIR: &str = "taskboard";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join(APP_DIR)
}

pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

fn default_base_url() -> String {
    "http://localhost:3000/api/v1".into()
}

fn default_token_env() -> String {
    "TASKBOARD_TOKEN".into()
}

fn default_items_poll() -> PollConfig {
    PollConfig {
        interval_secs: 15,
        stale_after_secs: 300,
    }
}

fn default_audit_poll() -> PollConfig {
    PollConfig {
        interval_secs: 15,
        stale_after_secs: 60,
    }
}

fn default_page_size() -> usize {
    50
}

fn default_audit_window() -> usize {
    500
}

fn default_history_window() -> usize {
    30
}

fn default_min_search_len() -> usize {
    2
}

fn default_search_debounce_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub stale_after_secs: u64,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub transient_retries: u32,
    pub rate_limit_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transient_retries: 3,
            rate_limit_retries: 2,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BoardConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_items_poll")]
    pub items_poll: PollConfig,
    #[serde(default = "default_audit_poll")]
    pub audit_poll: PollConfig,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_audit_window")]
    pub audit_window: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_min_search_len")]
    pub min_search_len: usize,
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    #[serde(default)]
    pub default_scope: Scope,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Longest a single list request may take.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub debug_logging: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            user_id: None,
            items_poll: default_items_poll(),
            audit_poll: default_audit_poll(),
            page_size: default_page_size(),
            audit_window: default_audit_window(),
            history_window: default_history_window(),
            min_search_len: default_min_search_len(),
            search_debounce_ms: default_search_debounce_ms(),
            default_scope: Scope::default(),
            retry: RetryConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            debug_logging: false,
        }
    }
}

impl BoardConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&default_config_path())
    }

    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Bearer token from the configured environment variable, if set.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_transient_retries: self.retry.transient_retries,
            max_rate_limit_retries: self.retry.rate_limit_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            items_interval: Duration::from_secs(self.items_poll.interval_secs.max(1)),
            items_stale_after: Duration::from_secs(self.items_poll.stale_after_secs),
            audit_interval: Duration::from_secs(self.audit_poll.interval_secs.max(1)),
            audit_stale_after: Duration::from_secs(self.audit_poll.stale_after_secs),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
            audit_window: self.audit_window.clamp(1, MAX_PAGE_SIZE),
            history_window: self.history_window.clamp(1, MAX_PAGE_SIZE),
            min_search_len: self.min_search_len,
            search_debounce: Duration::from_millis(self.search_debounce_ms),
            default_scope: self.default_scope,
            retry: self.retry_policy(),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }
}
