//! Loopback test harness.
//!
//! [`TestHarness`] writes a config file into a temporary directory, loads it
//! the way the CLI does and provisions a [`Hub`] for it. Daemons built from
//! the harness connect to that hub.

use std::path::PathBuf;

use ibbcheck_config::HarnessConfig;
use ibbcheck_core::Daemon;
use ibbcheck_loopback::Hub;
use tempfile::TempDir;

use crate::config::TestConfigBuilder;

/// A hub plus the config it was provisioned from.
///
/// The temp directory is deleted automatically when this value is dropped.
pub struct TestHarness {
    pub hub: Hub,
    pub config: HarnessConfig,
    pub config_path: PathBuf,
    _temp_dir: TempDir,
}

impl TestHarness {
    /// Load `toml_content` from a temporary file and provision a hub for it.
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("ibbcheck.toml");
        tokio::fs::write(&config_path, toml_content)
            .await
            .expect("failed to write test config");

        let config = HarnessConfig::load(&config_path)
            .await
            .expect("failed to load test config");
        let hub = Hub::for_config(&config).expect("failed to provision hub");

        Self {
            hub,
            config,
            config_path,
            _temp_dir: temp_dir,
        }
    }

    pub async fn from_builder(builder: TestConfigBuilder) -> Self {
        Self::with_toml(&builder.toml()).await
    }

    pub async fn default_config() -> Self {
        Self::from_builder(TestConfigBuilder::new()).await
    }

    /// A daemon for the configured account bound to `resource`.
    pub fn daemon(&self, resource: &str) -> Daemon {
        Daemon::configure(&self.config, self.hub.connector())
            .and_then(|daemon| daemon.with_resource(resource))
            .expect("failed to configure test daemon")
    }
}
