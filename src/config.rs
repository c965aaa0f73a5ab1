// src/config.rs
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::text_record::{self, DEFAULT_LANGUAGE};

pub const CONFIG_PATH_ENV: &str = "NFC_TEXT_CONFIG";
pub const BIND_ENV: &str = "NFC_TEXT_BIND";
pub const LANGUAGE_ENV: &str = "NFC_TEXT_LANGUAGE";
pub const POLL_MS_ENV: &str = "NFC_TEXT_POLL_MS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// WebSocket listen address.
    pub bind: SocketAddr,
    /// Language tag used when a write request names none.
    pub language: String,
    /// PC/SC status-change timeout between command checks.
    pub poll_interval_ms: u64,
    /// Whether tags are handled as soon as the service starts.
    pub dispatch_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from(([127, 0, 0, 1], 3500)),
            language: DEFAULT_LANGUAGE.to_string(),
            poll_interval_ms: 500,
            dispatch_on_start: true,
        }
    }
}

impl Config {
    /// Reads the TOML file named by `NFC_TEXT_CONFIG` (if any), then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let file = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Some(read_file(Path::new(&path))?),
            None => None,
        };
        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn from_sources(
        file: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config: Config = match file {
            Some(contents) => toml::from_str(contents).context("Invalid config file")?,
            None => Config::default(),
        };

        if let Some(bind) = env(BIND_ENV) {
            config.bind = bind
                .parse()
                .with_context(|| format!("{} is not a socket address: {}", BIND_ENV, bind))?;
        }
        if let Some(language) = env(LANGUAGE_ENV) {
            config.language = language;
        }
        if let Some(poll) = env(POLL_MS_ENV) {
            config.poll_interval_ms = poll
                .parse()
                .with_context(|| format!("{} is not a number: {}", POLL_MS_ENV, poll))?;
        }

        text_record::validate_language(&config.language).context("Invalid default language")?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
