//! Monitor configuration.
//!
//! Same lookup as the server: first argument, else `pulseboard-monitor.toml`
//! in the working directory. `PULSEBOARD_URL` overrides the hub URL.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_FILE: &str = "pulseboard-monitor.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Hub WebSocket URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Keep the dashboard moving with synthetic values while disconnected.
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    /// Seconds between dashboard summaries in the log.
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:5000/ws".into()
}

fn default_true() -> bool {
    true
}

fn default_report_interval() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: default_url(),
            fallback_enabled: default_true(),
            report_interval_secs: default_report_interval(),
        }
    }
}

impl Config {
    /// Loads `path` (defaults when missing) and applies `PULSEBOARD_URL`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config: Config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };
        if let Ok(url) = std::env::var("PULSEBOARD_URL") {
            config.url = url;
        }
        Ok(config)
    }
}

pub fn path_from_args(mut args: impl Iterator<Item = String>) -> PathBuf {
    args.nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.url, "ws://127.0.0.1:5000/ws");
        assert!(config.fallback_enabled);
        assert_eq!(config.report_interval_secs, 10);
    }

    #[test]
    fn config_partial_toml() {
        let config: Config = toml::from_str("fallback_enabled = false").unwrap();
        assert!(!config.fallback_enabled);
        assert_eq!(config.url, default_url());
    }

    #[test]
    fn config_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("monitor.toml");
        let config = Config {
            report_interval_secs: 2,
            ..Config::default()
        };
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.report_interval_secs, 2);
        assert!(loaded.fallback_enabled);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = Config::load(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(loaded.report_interval_secs, 10);
    }

    #[test]
    fn path_defaults_to_working_directory_file() {
        let args = ["pulseboard-monitor"].map(String::from);
        assert_eq!(path_from_args(args.into_iter()), PathBuf::from(DEFAULT_FILE));
    }
}
