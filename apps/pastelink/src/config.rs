use std::env;
#[cfg(test)]
use std::sync::Mutex;

use thiserror::Error;
use transport_webrtc::config::DEFAULT_STUN_URL;

use crate::probe::{DEFAULT_PROBE_BYTES, MIB};
use crate::session::{DEFAULT_CHANNEL_LABEL, SessionSettings};

pub const ENV_STUN_URLS: &str = "PASTELINK_STUN_URLS";
pub const ENV_CHANNEL_LABEL: &str = "PASTELINK_CHANNEL_LABEL";
pub const ENV_PROBE_MIB: &str = "PASTELINK_PROBE_MIB";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a positive whole number of MiB, got '{value}'")]
    InvalidProbeSize { var: &'static str, value: String },
    #[error("{0}")]
    InvalidKey(String),
    #[error("either --key or --passphrase is required")]
    MissingKey,
}

/// Settings read from the environment; CLI flags override them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub stun_urls: Vec<String>,
    pub channel_label: String,
    pub probe_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stun_urls: vec![DEFAULT_STUN_URL.to_string()],
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            probe_bytes: DEFAULT_PROBE_BYTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(urls) = env::var(ENV_STUN_URLS) {
            config.stun_urls = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(label) = env::var(ENV_CHANNEL_LABEL) {
            let label = label.trim();
            if !label.is_empty() {
                config.channel_label = label.to_string();
            }
        }

        if let Ok(value) = env::var(ENV_PROBE_MIB) {
            let mib = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|mib| *mib > 0)
                .ok_or_else(|| ConfigError::InvalidProbeSize {
                    var: ENV_PROBE_MIB,
                    value: value.clone(),
                })?;
            config.probe_bytes = mib.saturating_mul(MIB);
        }

        Ok(config)
    }

    /// Replace the STUN list with the command line's choice, if any.
    pub fn apply_stun_overrides(&mut self, urls: &[String], no_stun: bool) {
        if no_stun {
            self.stun_urls.clear();
        } else if !urls.is_empty() {
            self.stun_urls = urls.to_vec();
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            channel_label: self.channel_label.clone(),
            probe_bytes: self.probe_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    // Environment variables are process-wide.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn clear() {
        unsafe {
            env::remove_var(ENV_STUN_URLS);
            env::remove_var(ENV_CHANNEL_LABEL);
            env::remove_var(ENV_PROBE_MIB);
        }
    }

    #[test]
    fn test_defaults_without_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        let config = Config::from_env().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.stun_urls, vec![DEFAULT_STUN_URL.to_string()]);
        assert_eq!(config.channel_label, "chat");
        assert_eq!(config.probe_bytes, 20 * MIB);
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        unsafe {
            env::set_var(ENV_STUN_URLS, "stun:a.example:3478, ,stun:b.example:3478");
            env::set_var(ENV_CHANNEL_LABEL, "bulk");
            env::set_var(ENV_PROBE_MIB, "4");
        }
        let config = Config::from_env().unwrap();
        clear();

        assert_eq!(
            config.stun_urls,
            vec!["stun:a.example:3478".to_string(), "stun:b.example:3478".to_string()]
        );
        assert_eq!(config.channel_label, "bulk");
        assert_eq!(config.probe_bytes, 4 * MIB);
    }

    #[test]
    fn test_invalid_probe_size() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        unsafe {
            env::set_var(ENV_PROBE_MIB, "0");
        }
        let result = Config::from_env();
        clear();
        assert!(matches!(result, Err(ConfigError::InvalidProbeSize { .. })));
    }

    #[test]
    fn test_cli_stun_overrides() {
        let mut config = Config::default();
        config.apply_stun_overrides(&["stun:c.example:3478".to_string()], false);
        assert_eq!(config.stun_urls, vec!["stun:c.example:3478".to_string()]);
        config.apply_stun_overrides(&[], true);
        assert!(config.stun_urls.is_empty());
    }
}
