use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::protocol::DEFAULT_HOSTNAME;
use crate::{Error, Result};

/// Environment variable holding a base64-obfuscated password.
pub const PASSWORD_ENV: &str = "FRISQUET_CONNECT_PASSWORD";

pub const DEFAULT_HISTORY_INTERVAL_SECS: u64 = 15 * 60;
pub const MIN_HISTORY_INTERVAL_SECS: u64 = 5 * 60;

fn default_hostname() -> String {
    DEFAULT_HOSTNAME.to_string()
}

fn default_history_interval() -> u64 {
    DEFAULT_HISTORY_INTERVAL_SECS
}

/// Platform config block, as written in the host's JSON config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub history_disabled: bool,
    #[serde(default = "default_history_interval")]
    pub history_interval: u64,
}

impl Config {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            hostname: default_hostname(),
            username: username.into(),
            password: password.into(),
            site_id: None,
            history_disabled: false,
            history_interval: DEFAULT_HISTORY_INTERVAL_SECS,
        }
    }

    /// Parse a config block, apply the environment password override and validate.
    pub fn from_value(value: Value) -> Result<Self> {
        Self::from_value_with(value, env_password_override().as_deref())
    }

    /// Parse a config block with an explicit (encoded) password override.
    pub fn from_value_with(value: Value, password_override: Option<&str>) -> Result<Self> {
        let config: Config = serde_json::from_value(value)?;
        let config = config.with_password_override(password_override)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with(path, env_password_override().as_deref())
    }

    pub fn from_file_with(path: impl AsRef<Path>, password_override: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading config");
        let contents = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&contents)?;
        Self::from_value_with(value, password_override)
    }

    /// Replace the password with the decoded override, when one is given.
    pub fn with_password_override(mut self, encoded: Option<&str>) -> Result<Self> {
        if let Some(encoded) = encoded.map(str::trim).filter(|s| !s.is_empty()) {
            self.password = decode_password(encoded)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("hostname", &self.hostname),
            ("username", &self.username),
            ("password", &self.password),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("missing \"{field}\" config field")));
            }
        }
        Ok(())
    }

    pub fn history_interval(&self) -> Duration {
        Duration::from_secs(self.history_interval.max(MIN_HISTORY_INTERVAL_SECS))
    }
}

fn env_password_override() -> Option<String> {
    std::env::var(PASSWORD_ENV).ok()
}

pub fn decode_password(encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Config(format!("invalid {PASSWORD_ENV}: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Config(format!("invalid {PASSWORD_ENV}: {e}")))
}
