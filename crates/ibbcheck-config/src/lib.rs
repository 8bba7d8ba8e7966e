#![deny(unsafe_code)]

//! Configuration loading and validation for ibbcheck.
//!
//! Loads TOML configuration files and validates them before any connection is
//! attempted. [`HarnessConfig`] is the central configuration structure; the
//! [`jid`] module provides XMPP address parsing.

/// XMPP address parsing and matching.
pub mod jid;

pub use jid::{Jid, JidError};

use std::path::Path;
use std::time::Duration;

use ibbcheck_macros::{Redact, Validate};
use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid JID {value:?}: {source}")]
    Jid {
        value: String,
        #[source]
        source: JidError,
    },

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Account and server the daemon connects with.
    pub client: ClientConfig,

    /// Run tuning.
    #[serde(default)]
    pub run: RunConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The `[client]` section: one XMPP account on one server.
#[derive(Clone, Serialize, Deserialize, Redact, Validate)]
pub struct ClientConfig {
    /// Account JID, optionally with a resource.
    #[validate(non_empty, max_len = 3071)]
    pub jid: String,

    #[redact]
    #[validate(non_empty)]
    pub password: String,

    /// Server address to connect to.
    #[serde(default = "default_host")]
    #[validate(non_empty)]
    pub host: String,

    #[serde(default = "default_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5222
}

/// The `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RunConfig {
    /// Overall deadline for one run, in seconds. Zero disables it.
    #[serde(default = "default_deadline_secs")]
    #[validate(range(max = 86400))]
    pub deadline_secs: u64,

    /// IBB block size used when opening a stream.
    #[serde(default = "default_block_size")]
    #[validate(range(min = 1, max = 65535))]
    pub block_size: u16,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            block_size: default_block_size(),
        }
    }
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_block_size() -> u16 {
    4096
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "warn", "debug", "trace").
    #[serde(default = "default_log_level")]
    #[validate(one_of("trace", "debug", "info", "warn", "error"))]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl HarnessConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), jid = %config.client.jid, "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Field constraints are reported together; the JID is only parsed once
    /// they pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let sections = [
            ("client", self.client.validate()),
            ("run", self.run.validate()),
            ("logging", self.logging.validate()),
        ];
        for (section, result) in sections {
            if let Err(errors) = result {
                problems.extend(errors.into_iter().map(|e| format!("{section}.{e}")));
            }
        }
        if !problems.is_empty() {
            return Err(ConfigError::Validation(problems.join("; ")));
        }

        self.client_jid()?;
        Ok(())
    }

    /// The configured account JID, parsed.
    pub fn client_jid(&self) -> Result<Jid, ConfigError> {
        Jid::parse(&self.client.jid).map_err(|source| ConfigError::Jid {
            value: self.client.jid.clone(),
            source,
        })
    }

    /// `host:port` of the server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.client.host, self.client.port)
    }

    /// The overall run deadline, if one is configured.
    pub fn deadline(&self) -> Option<Duration> {
        match self.run.deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
