use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Bounded-attempts polling policy for DOM and authentication waits.
///
/// Every long wait in the system is a loop of `attempts` probes spaced
/// `interval_ms` apart; tests pass zero-length intervals to run the same
/// loops without wall-clock delay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl PollPolicy {
    pub fn new(attempts: u32, interval_ms: u64) -> Self {
        Self {
            attempts,
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Zero-delay policy for tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Run Chrome without a visible window.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Minimum delay between DOM-touching operations, in milliseconds.
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,

    /// Retry count for individual DOM interactions (click, type).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_max_contacts")]
    pub max_contacts: usize,
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Chat names excluded from every scan, exact match.
    #[serde(default)]
    pub muted_chats: Vec<String>,

    /// Age in seconds after which a cached chat list is rescanned before use.
    #[serde(default = "default_chat_cache_ttl_secs")]
    pub chat_cache_ttl_secs: u64,

    /// Background liveness monitor interval in seconds.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Session-restore authentication polling: up to `attempts` checks
    /// spaced `intervalMs` apart before the restore is declared failed.
    #[serde(default = "default_auth_poll")]
    pub auth_poll: PollPolicy,

    /// Grace period after navigation before the first DOM probe, seconds.
    #[serde(default = "default_page_load_delay_secs")]
    pub page_load_delay_secs: u64,
}

fn default_headless() -> bool {
    true
}
fn default_rate_limit_delay_ms() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_contacts() -> usize {
    100
}
fn default_max_conversations() -> usize {
    50
}
fn default_max_messages() -> usize {
    100
}
fn default_chat_cache_ttl_secs() -> u64 {
    5
}
fn default_monitor_interval_secs() -> u64 {
    30
}
fn default_auth_poll() -> PollPolicy {
    PollPolicy::new(12, 30_000)
}
fn default_page_load_delay_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            max_retries: default_max_retries(),
            max_contacts: default_max_contacts(),
            max_conversations: default_max_conversations(),
            max_messages: default_max_messages(),
            muted_chats: Vec::new(),
            chat_cache_ttl_secs: default_chat_cache_ttl_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            auth_poll: default_auth_poll(),
            page_load_delay_secs: default_page_load_delay_secs(),
        }
    }
}

impl Config {
    /// Load config from a JSON file, falling back to defaults when the
    /// file is missing. A present-but-invalid file is an error: silently
    /// ignoring a typo'd config is worse than refusing to start.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => {
                let config = serde_json::from_str(&data)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.json")).unwrap();
        assert!(config.headless);
        assert_eq!(config.auth_poll.attempts, 12);
        assert!(config.muted_chats.is_empty());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"headless": false, "mutedChats": ["Archived"]}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert!(!config.headless);
        assert_eq!(config.muted_chats, vec!["Archived".to_string()]);
        assert_eq!(config.max_messages, 100);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.rate_limit_delay_ms = 250;
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.rate_limit_delay_ms, 250);
    }
}
