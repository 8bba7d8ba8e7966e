//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create [`HarnessConfig`] values without
//! repeating TOML boilerplate across crate boundaries.

use ibbcheck_config::{ClientConfig, HarnessConfig, LoggingConfig, RunConfig};

pub const TEST_JID: &str = "tester@localhost";
pub const TEST_PASSWORD: &str = "hunter2";

/// Fluent builder for [`HarnessConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .block_size(7)
///     .deadline_secs(5)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: HarnessConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: HarnessConfig {
                client: ClientConfig {
                    jid: TEST_JID.to_string(),
                    password: TEST_PASSWORD.to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 5222,
                },
                run: RunConfig::default(),
                logging: LoggingConfig::default(),
            },
        }
    }

    pub fn jid(mut self, jid: &str) -> Self {
        self.config.client.jid = jid.to_string();
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.config.client.password = password.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.client.port = port;
        self
    }

    pub fn block_size(mut self, block_size: u16) -> Self {
        self.config.run.block_size = block_size;
        self
    }

    /// `0` disables the deadline.
    pub fn deadline_secs(mut self, secs: u64) -> Self {
        self.config.run.deadline_secs = secs;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> HarnessConfig {
        self.config
    }

    /// The configuration as a TOML document, for tests that go through a
    /// file.
    pub fn toml(&self) -> String {
        toml::to_string(&self.config).expect("test config serializes")
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
