//! Server configuration.
//!
//! Read from `pulseboard-server.toml` in the working directory, or from the
//! path given as the first argument. Every field has a default, and
//! `PULSEBOARD_PORT` overrides the port.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_FILE: &str = "pulseboard-server.toml";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the `/ws` listener binds.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Listener port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between `metrics_updated` broadcasts.
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Run one simulated training session on start.
    #[serde(default = "default_true")]
    pub simulate_training: bool,

    #[serde(default = "default_training_epochs")]
    pub training_epochs: u32,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    5000
}

fn default_metrics_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_training_epochs() -> u32 {
    200
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            metrics_interval_secs: default_metrics_interval(),
            simulate_training: default_true(),
            training_epochs: default_training_epochs(),
        }
    }
}

impl Config {
    /// Loads `path`, falling back to defaults when it does not exist, then
    /// applies environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(port) = var("PULSEBOARD_PORT") {
            self.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PULSEBOARD_PORT {port:?}: {e}"))?;
        }
        Ok(())
    }
}

/// Config path: first argument after the program name, else the default file.
pub fn path_from_args(mut args: impl Iterator<Item = String>) -> PathBuf {
    args.nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FILE))
}
