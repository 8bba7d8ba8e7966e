//! Daemon lifecycle: configure, connect, run a scenario, tear down.

use std::sync::Arc;
use std::time::Duration;

use ibbcheck_config::{ConfigError, HarnessConfig};
use tracing::{debug, error, info, warn};

use crate::build_info;
use crate::deadline::{Deadline, Phase};
use crate::error::RunError;
use crate::scenario::Scenario;
use crate::transport::{ClientDescriptor, Connection, Connector, TransportError};

/// One harness process: a configured client and the connector that brings it
/// online.
pub struct Daemon {
    descriptor: ClientDescriptor,
    connector: Arc<dyn Connector>,
    deadline: Option<Duration>,
}

impl Daemon {
    /// Validate `config` and build a daemon that is not connected yet.
    pub fn configure(
        config: &HarnessConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let descriptor = ClientDescriptor::from_config(config)?;
        debug!(jid = %descriptor.jid(), addr = %descriptor.addr(), "daemon configured");
        Ok(Self {
            descriptor,
            connector,
            deadline: config.deadline(),
        })
    }

    /// Bind `resource` instead of the configured or a server-assigned one.
    pub fn with_resource(mut self, resource: &str) -> Result<Self, ConfigError> {
        let jid = self.descriptor.credentials.jid.bare();
        let full = jid.with_resource(resource).map_err(|source| ConfigError::Jid {
            value: format!("{jid}/{resource}"),
            source,
        })?;
        self.descriptor.credentials.jid = full;
        Ok(self)
    }

    /// Override the configured run deadline. `None` disables it.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn descriptor(&self) -> &ClientDescriptor {
        &self.descriptor
    }

    /// Connect, run `scenario`, and disconnect.
    ///
    /// The connection is released on every path. A scenario error or panic,
    /// or dropping this future, still tears the connection down.
    pub async fn run_scoped<S: Scenario>(&self, scenario: &S) -> Result<S::Output, RunError> {
        let deadline = Deadline::new(self.deadline);
        info!(
            scenario = scenario.name(),
            jid = %self.descriptor.jid(),
            addr = %self.descriptor.addr(),
            version = build_info::LONG_VERSION,
            "run starting"
        );

        let conn = deadline
            .run(Phase::Connect, self.connector.connect(&self.descriptor))
            .await?
            .map_err(|e| {
                error!(addr = %self.descriptor.addr(), error = %e, "connect failed");
                RunError::ConnectFailed(e)
            })?;
        let guard = ConnectionGuard::new(conn);
        info!(jid = %guard.connection().local_jid(), "connected");

        // Scenarios bound their own suspension points; this catches any
        // that do not.
        let result = deadline
            .run(Phase::Scenario, scenario.run(guard.connection(), deadline))
            .await
            .and_then(|outcome| outcome);
        match &result {
            Ok(_) => info!(scenario = scenario.name(), "scenario finished"),
            Err(e) => warn!(scenario = scenario.name(), error = %e, "scenario failed"),
        }

        if let Err(e) = guard.release().await {
            // The scenario's outcome is what the run reports.
            warn!(error = %e, "disconnect failed");
        }
        result
    }
}

/// Owns the live connection for the duration of a run.
struct ConnectionGuard {
    conn: Box<dyn Connection>,
    released: bool,
}

impl ConnectionGuard {
    fn new(conn: Box<dyn Connection>) -> Self {
        Self {
            conn,
            released: false,
        }
    }

    fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    async fn release(mut self) -> Result<(), TransportError> {
        self.released = true;
        let jid = self.conn.local_jid().clone();
        let result = self.conn.disconnect().await;
        debug!(%jid, ok = result.is_ok(), "connection released");
        result
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                jid = %self.conn.local_jid(),
                "run aborted, dropping connection without a clean disconnect"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ibbcheck_config::Jid;
    use tokio::sync::mpsc;

    use super::*;
    use crate::BoxFuture;
    use crate::stanza::Message;
    use crate::transport::{ByteStream, IncomingStream};

    #[derive(Default)]
    struct Counters {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        drops: AtomicUsize,
    }

    struct FakeConnector {
        counters: Arc<Counters>,
        refuse: bool,
        last_jid: Mutex<Option<Jid>>,
    }

    struct FakeConnection {
        jid: Jid,
        counters: Arc<Counters>,
    }

    impl Connector for FakeConnector {
        fn connect<'a>(
            &'a self,
            descriptor: &'a ClientDescriptor,
        ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>> {
            Box::pin(async move {
                if self.refuse {
                    return Err(TransportError::Refused {
                        addr: descriptor.addr(),
                    });
                }
                self.counters.connects.fetch_add(1, Ordering::SeqCst);
                *self.last_jid.lock().unwrap() = Some(descriptor.jid().clone());
                let conn: Box<dyn Connection> = Box::new(FakeConnection {
                    jid: descriptor.jid().clone(),
                    counters: Arc::clone(&self.counters),
                });
                Ok(conn)
            })
        }
    }

    impl Connection for FakeConnection {
        fn local_jid(&self) -> &Jid {
            &self.jid
        }

        fn send(&self, _message: Message) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }

        fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
            None
        }

        fn take_offers(&self) -> Option<mpsc::UnboundedReceiver<Box<dyn IncomingStream>>> {
            None
        }

        fn open_stream<'a>(
            &'a self,
            peer: &'a Jid,
            _sid: &'a str,
            _block_size: u16,
        ) -> BoxFuture<'a, Result<Box<dyn ByteStream>, TransportError>> {
            Box::pin(async move { Err(TransportError::Unavailable(peer.to_string())) })
        }

        fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
            self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    impl Drop for FakeConnection {
        fn drop(&mut self) {
            self.counters.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    enum Body {
        Succeed,
        Fail,
        Panic,
        Hang,
    }

    impl Scenario for Body {
        type Output = String;

        fn name(&self) -> &'static str {
            "fake"
        }

        fn run<'a>(
            &'a self,
            conn: &'a dyn Connection,
            _deadline: Deadline,
        ) -> BoxFuture<'a, Result<String, RunError>> {
            Box::pin(async move {
                match self {
                    Body::Succeed => Ok(conn.local_jid().to_string()),
                    Body::Fail => Err(RunError::Stream(TransportError::Stream("boom".into()))),
                    Body::Panic => panic!("scenario panicked"),
                    Body::Hang => {
                        std::future::pending::<()>().await;
                        unreachable!()
                    }
                }
            })
        }
    }

    fn config() -> HarnessConfig {
        HarnessConfig::parse(
            r#"
            [client]
            jid = "tester@localhost"
            password = "hunter2"

            [run]
            deadline_secs = 0
            "#,
        )
        .unwrap()
    }

    fn daemon(refuse: bool) -> (Daemon, Arc<Counters>, Arc<FakeConnector>) {
        let counters = Arc::new(Counters::default());
        let connector = Arc::new(FakeConnector {
            counters: Arc::clone(&counters),
            refuse,
            last_jid: Mutex::new(None),
        });
        let daemon = Daemon::configure(&config(), connector.clone()).unwrap();
        (daemon, counters, connector)
    }

    fn released(counters: &Counters) -> (usize, usize) {
        (
            counters.disconnects.load(Ordering::SeqCst),
            counters.drops.load(Ordering::SeqCst),
        )
    }

    #[tokio::test]
    async fn test_success_releases_once() {
        let (daemon, counters, _) = daemon(false);
        let out = daemon.run_scoped(&Body::Succeed).await.unwrap();
        assert_eq!(out, "tester@localhost");
        assert_eq!(released(&counters), (1, 1));
    }

    #[tokio::test]
    async fn test_failure_releases_once_and_propagates() {
        let (daemon, counters, _) = daemon(false);
        let err = daemon.run_scoped(&Body::Fail).await.unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert_eq!(released(&counters), (1, 1));
    }

    #[tokio::test]
    async fn test_panic_still_drops_connection() {
        let (daemon, counters, _) = daemon(false);
        let daemon = Arc::new(daemon);
        let task = tokio::spawn({
            let daemon = Arc::clone(&daemon);
            async move { daemon.run_scoped(&Body::Panic).await }
        });
        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(released(&counters), (0, 1));
    }

    #[tokio::test]
    async fn test_cancellation_drops_connection() {
        let (daemon, counters, _) = daemon(false);
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            daemon.run_scoped(&Body::Hang),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(released(&counters), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_releases() {
        let (daemon, counters, _) = daemon(false);
        let daemon = daemon.with_deadline(Some(Duration::from_secs(1)));
        let err = daemon.run_scoped(&Body::Hang).await.unwrap_err();
        assert!(matches!(err, RunError::Timeout(Phase::Scenario)));
        assert_eq!(err.exit_code(), 5);
        assert_eq!(released(&counters), (1, 1));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (daemon, counters, _) = daemon(true);
        let err = daemon.run_scoped(&Body::Succeed).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::ConnectFailed(TransportError::Refused { .. })
        ));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(counters.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_with_resource_pins_bound_jid() {
        let (daemon, _, connector) = daemon(false);
        let daemon = daemon.with_resource("bench").unwrap();
        daemon.run_scoped(&Body::Succeed).await.unwrap();
        assert_eq!(
            connector.last_jid.lock().unwrap().as_ref().map(ToString::to_string),
            Some("tester@localhost/bench".to_string())
        );
    }

    #[test]
    fn test_configure_rejects_invalid_config() {
        let mut config = config();
        config.client.password.clear();
        let connector = Arc::new(FakeConnector {
            counters: Arc::default(),
            refuse: false,
            last_jid: Mutex::new(None),
        });
        let err = Daemon::configure(&config, connector).err().unwrap();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
