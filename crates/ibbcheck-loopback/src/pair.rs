//! Run both roles against one hub in a single process.
//!
//! The sender and receiver are separate daemons sharing one account, told
//! apart by resource. They only meet through the hub: rendezvous signals and
//! the stream.

use ibbcheck_config::{ConfigError, HarnessConfig};
use ibbcheck_core::scenario::{RECEIVER_PAYLOAD, SENDER_PAYLOAD};
use ibbcheck_core::{Daemon, RecvIbb, RunError, SendIbb, TransferReport};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::hub::{Fault, Hub};

pub const SENDER_RESOURCE: &str = "ibbcheck-send";
pub const RECEIVER_RESOURCE: &str = "ibbcheck-recv";

#[derive(Debug, Clone, Default)]
pub struct PairOptions {
    /// Session id both roles agree on. Random when unset.
    pub sid: Option<String>,
    /// Make the sender's stream close fail with this cause.
    pub close_fault: Option<String>,
}

/// What each role ended with.
#[derive(Debug)]
pub struct PairOutcome {
    pub sender: Result<TransferReport, RunError>,
    /// `None` when the sender finished before the receiver could start.
    pub receiver: Option<Result<TransferReport, RunError>>,
}

impl PairOutcome {
    pub fn is_success(&self) -> bool {
        self.sender.is_ok() && matches!(self.receiver, Some(Ok(_)))
    }

    /// Exit status of the run: the sender's failure first, then the
    /// receiver's. A receiver that never ran is a generic failure.
    pub fn exit_code(&self) -> u8 {
        if let Err(e) = &self.sender {
            return e.exit_code();
        }
        match &self.receiver {
            Some(Ok(_)) => 0,
            Some(Err(e)) => e.exit_code(),
            None => 1,
        }
    }

    /// `(role, error)` for each role that failed.
    pub fn failures(&self) -> Vec<(&'static str, &RunError)> {
        let mut failures = Vec::new();
        if let Err(e) = &self.sender {
            failures.push(("sender", e));
        }
        if let Some(Err(e)) = &self.receiver {
            failures.push(("receiver", e));
        }
        failures
    }
}

/// Build a hub for `config`, apply the options' faults and run the pair.
pub async fn run_pair(
    config: &HarnessConfig,
    options: &PairOptions,
) -> Result<PairOutcome, ConfigError> {
    let hub = Hub::for_config(config)?;
    if let Some(cause) = &options.close_fault {
        let jid = config.client_jid()?.bare();
        let jid = with_resource(&jid, SENDER_RESOURCE)?;
        hub.inject(Fault::CloseError {
            jid,
            cause: cause.clone(),
        });
    }
    run_pair_on(&hub, config, options).await
}

/// Run the pair against an existing hub.
pub async fn run_pair_on(
    hub: &Hub,
    config: &HarnessConfig,
    options: &PairOptions,
) -> Result<PairOutcome, ConfigError> {
    let account = config.client_jid()?.bare();
    let sender_jid = with_resource(&account, SENDER_RESOURCE)?;

    let sender_daemon =
        Daemon::configure(config, hub.connector())?.with_resource(SENDER_RESOURCE)?;
    let receiver_daemon =
        Daemon::configure(config, hub.connector())?.with_resource(RECEIVER_RESOURCE)?;

    let mut send = SendIbb::new(account.clone())
        .announced()
        .block_size(config.run.block_size)
        .verify_against(RECEIVER_PAYLOAD);
    if let Some(sid) = &options.sid {
        send = send.session_id(sid.clone());
    }
    let recv = RecvIbb::new(sender_jid.clone())
        .session_id(options.sid.clone())
        .verify_against(SENDER_PAYLOAD);

    info!(account = %account, addr = %hub.addr(), sid = ?options.sid, "pair run starting");
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let sender = async {
        let result = sender_daemon.run_scoped(&send).await;
        let _ = done_tx.send(());
        result
    };
    let receiver = async {
        tokio::select! {
            _ = hub.wait_online(&sender_jid) => Some(receiver_daemon.run_scoped(&recv).await),
            _ = done_rx => {
                warn!("sender finished before coming online, receiver not started");
                None
            }
        }
    };
    let (sender, receiver) = tokio::join!(sender, receiver);

    let outcome = PairOutcome { sender, receiver };
    info!(success = outcome.is_success(), exit_code = outcome.exit_code(), "pair run finished");
    Ok(outcome)
}

fn with_resource(
    jid: &ibbcheck_config::Jid,
    resource: &str,
) -> Result<ibbcheck_config::Jid, ConfigError> {
    jid.with_resource(resource)
        .map_err(|source| ConfigError::Jid {
            value: format!("{jid}/{resource}"),
            source,
        })
}
