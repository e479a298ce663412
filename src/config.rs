// src/config.rs

//! Manages proxy configuration: loading from TOML, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// The configuration for the proxy frontend and its client sessions.
///
/// Every field carries a serde default so a partial file (or an empty one)
/// yields a runnable configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProxyConfig {
    /// The address the frontend listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// The password clients must present via AUTH. `None` disables the
    /// authentication gate entirely.
    #[serde(default)]
    pub password: Option<String>,

    /// The global admission cap: the maximum number of concurrently
    /// connected client sessions.
    #[serde(default = "default_proxy_max_clients")]
    pub proxy_max_clients: usize,

    /// The per-session in-flight request cap. This bounds the task channel
    /// between the session's reader and writer and is the sole source of
    /// client-facing backpressure.
    #[serde(default = "default_session_max_pipeline")]
    pub session_max_pipeline: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:19000".to_string()
}

fn default_proxy_max_clients() -> usize {
    1000
}

fn default_session_max_pipeline() -> usize {
    10000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            password: None,
            proxy_max_clients: default_proxy_max_clients(),
            session_max_pipeline: default_session_max_pipeline(),
        }
    }
}

impl ProxyConfig {
    /// Loads and validates a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: ProxyConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the session core relies on.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            return Err(anyhow!("listen_addr cannot be empty"));
        }
        if self.proxy_max_clients == 0 {
            return Err(anyhow!("proxy_max_clients cannot be 0"));
        }
        if self.session_max_pipeline == 0 {
            return Err(anyhow!("session_max_pipeline cannot be 0"));
        }
        if let Some(password) = &self.password {
            if password.is_empty() {
                return Err(anyhow!("password cannot be empty; omit it to disable auth"));
            }
        }
        Ok(())
    }
}
