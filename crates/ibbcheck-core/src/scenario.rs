//! The two test procedures: [`SendIbb`] and [`RecvIbb`].
//!
//! Each runs inside [`Daemon::run_scoped`](crate::Daemon::run_scoped) against
//! a live connection. They are independent processes in a real interop run
//! and only meet through the rendezvous signals and the stream itself.

use std::fmt;

use ibbcheck_config::Jid;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::BoxFuture;
use crate::deadline::{Deadline, Phase};
use crate::error::RunError;
use crate::ibb;
use crate::rendezvous::{
    PeerAddress, ReceiverMachine, ReceiverState, RendezvousError, RendezvousSignal,
    SenderMachine, SenderState, SenderTarget, SignalInbox,
};
use crate::stanza::Message;
use crate::transport::Connection;

/// What the sender writes unless told otherwise.
pub const SENDER_PAYLOAD: &str =
    "Warren snores through the night like a bear\u{2014}a bass to the treble of the loons.";

/// What the receiver writes unless told otherwise.
pub const RECEIVER_PAYLOAD: &str =
    "I feel a deep security in the single-mindedness of freight trains.";

const DEFAULT_BLOCK_SIZE: u16 = 4096;

/// A test procedure run against a live connection.
pub trait Scenario: Send + Sync {
    type Output: Send;

    /// Short name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    fn run<'a>(
        &'a self,
        conn: &'a dyn Connection,
        deadline: Deadline,
    ) -> BoxFuture<'a, Result<Self::Output, RunError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        })
    }
}

/// Outcome of one role.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub role: Role,
    pub local_jid: String,
    pub peer_jid: String,
    pub sid: String,
    pub sent: String,
    pub received: String,
    pub received_bytes: usize,
    /// The peer's `Done` body, when this role verified it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_echo: Option<String>,
    pub state: &'static str,
    #[serde(skip)]
    pub received_raw: Vec<u8>,
}

/// Compare what arrived with what the peer is known to write.
fn verify_data(expected: &[u8], actual: &[u8]) -> Result<(), RunError> {
    if expected == actual {
        return Ok(());
    }
    Err(RunError::DataMismatch {
        expected: String::from_utf8_lossy(expected).into_owned(),
        actual: String::from_utf8_lossy(actual).into_owned(),
    })
}

/// Wait for the peer's `Done` and check that it echoes what we wrote.
async fn await_echo(
    inbox: &mut SignalInbox,
    peer: &Jid,
    sent: &[u8],
    deadline: &Deadline,
) -> Result<String, RunError> {
    let done = deadline
        .run(
            Phase::AwaitEcho,
            inbox.next_signal(RendezvousSignal::Done, peer),
        )
        .await?
        .map_err(RunError::Messaging)?;
    let echo = done.body.unwrap_or_default();
    if echo.as_bytes() != sent {
        return Err(RunError::EchoMismatch {
            expected: String::from_utf8_lossy(sent).into_owned(),
            actual: echo,
        });
    }
    info!(from = ?done.from.as_ref().map(ToString::to_string), "peer echo verified");
    Ok(echo)
}

async fn send_signal(
    conn: &dyn Connection,
    to: &Jid,
    signal: RendezvousSignal,
    body: Option<String>,
    deadline: &Deadline,
) -> Result<(), RunError> {
    let mut message = Message::new(to.clone()).with_signal(signal);
    message.body = body;
    deadline
        .run(Phase::SendMessage, conn.send(message))
        .await?
        .map_err(RunError::Messaging)
}

fn inbox(conn: &dyn Connection) -> Result<SignalInbox, RendezvousError> {
    conn.take_messages()
        .map(SignalInbox::new)
        .ok_or(RendezvousError::ChannelTaken("message"))
}

/// The sender role: open a stream, write the payload, close, echo what came
/// back.
pub struct SendIbb {
    peer: Jid,
    announced: bool,
    payload: Vec<u8>,
    sid: Option<String>,
    block_size: u16,
    expect: Option<Vec<u8>>,
    state: watch::Sender<SenderState>,
}

impl SendIbb {
    /// Send to `peer`. With [`announced`](Self::announced), `peer` is a
    /// pattern and the stream goes to whoever sends `Start` first.
    pub fn new(peer: Jid) -> Self {
        Self {
            peer,
            announced: false,
            payload: SENDER_PAYLOAD.as_bytes().to_vec(),
            sid: None,
            block_size: DEFAULT_BLOCK_SIZE,
            expect: None,
            state: watch::channel(SenderState::Connecting).0,
        }
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Use this session id instead of a random one.
    pub fn session_id(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    /// Wait for `Start` before opening the stream.
    pub fn announced(mut self) -> Self {
        self.announced = true;
        self
    }

    pub fn block_size(mut self, block_size: u16) -> Self {
        self.block_size = block_size;
        self
    }

    /// After the transfer, check that the receiver wrote `peer_payload` and
    /// that its `Done` echoes our payload.
    pub fn verify_against(mut self, peer_payload: impl Into<Vec<u8>>) -> Self {
        self.expect = Some(peer_payload.into());
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SenderState> {
        self.state.subscribe()
    }

    fn publish(&self, machine: &SenderMachine) {
        self.state.send_replace(machine.state());
    }
}

impl Scenario for SendIbb {
    type Output = TransferReport;

    fn name(&self) -> &'static str {
        "sender"
    }

    fn run<'a>(
        &'a self,
        conn: &'a dyn Connection,
        deadline: Deadline,
    ) -> BoxFuture<'a, Result<TransferReport, RunError>> {
        Box::pin(async move {
            let mut inbox = inbox(conn)?;
            let mut machine = SenderMachine::new(if self.announced {
                SenderTarget::Announced(self.peer.clone())
            } else {
                SenderTarget::Known(self.peer.clone())
            });
            self.publish(&machine);

            if machine.needs_start() {
                info!(peer = %self.peer, "waiting for start signal");
                let start = deadline
                    .run(
                        Phase::AwaitStart,
                        inbox.next_signal(RendezvousSignal::Start, &self.peer),
                    )
                    .await?
                    .map_err(RunError::Messaging)?;
                if let Some(from) = &start.from {
                    machine.start_observed(from)?;
                }
            }
            let target = machine.target()?.clone();

            let sid = self.sid.clone().unwrap_or_else(ibb::generate_sid);
            let mut stream = deadline
                .run(
                    Phase::OpenStream,
                    conn.open_stream(&target, &sid, self.block_size),
                )
                .await?
                .map_err(RunError::Stream)?;
            machine.stream_opened()?;
            self.publish(&machine);
            info!(peer = %target, sid = %sid, block_size = self.block_size, "stream open");

            deadline
                .run(Phase::Transfer, stream.write(&self.payload))
                .await?
                .map_err(RunError::Stream)?;
            deadline
                .run(Phase::AwaitClose, stream.close())
                .await?
                .map_err(RunError::Stream)?;

            let result =
                ibb::collect(stream.as_mut(), &deadline, Phase::AwaitClose, |_| Ok(())).await?;
            if let Some(err) = result.close_error.clone() {
                error!(peer = %target, sid = %sid, error = %err, "error closing stream");
                return Err(RunError::Stream(err));
            }
            machine.stream_closed()?;
            self.publish(&machine);

            let echo = ibb::echo_text(&result.received);
            send_signal(
                conn,
                &target,
                RendezvousSignal::Done,
                Some(echo.clone()),
                &deadline,
            )
            .await?;

            let peer_echo = match &self.expect {
                Some(expected) => {
                    verify_data(expected, &result.received)?;
                    Some(await_echo(&mut inbox, &target, &self.payload, &deadline).await?)
                }
                None => None,
            };

            machine.finish()?;
            self.publish(&machine);
            info!(peer = %target, sid = %sid, received = result.received.len(), "sender done");

            Ok(TransferReport {
                role: Role::Sender,
                local_jid: conn.local_jid().to_string(),
                peer_jid: target.to_string(),
                sid,
                sent: String::from_utf8_lossy(&self.payload).into_owned(),
                received: echo,
                received_bytes: result.received.len(),
                peer_echo,
                state: machine.state().as_str(),
                received_raw: result.received,
            })
        })
    }
}

/// The receiver role: announce with `Start`, accept the matching stream,
/// write the payload, collect until the end, echo what arrived.
pub struct RecvIbb {
    peer: Jid,
    payload: Vec<u8>,
    sid: Option<String>,
    expect: Option<Vec<u8>>,
    state: watch::Sender<ReceiverState>,
}

impl RecvIbb {
    /// Receive from `peer`, which gets the `Start` signal and is the only
    /// accepted initiator.
    pub fn new(peer: Jid) -> Self {
        Self {
            peer,
            payload: RECEIVER_PAYLOAD.as_bytes().to_vec(),
            sid: None,
            expect: None,
            state: watch::channel(ReceiverState::AwaitingStreamOffer).0,
        }
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Only accept a stream with this session id.
    pub fn session_id(mut self, sid: Option<String>) -> Self {
        self.sid = sid;
        self
    }

    /// After the transfer, check that the sender wrote `peer_payload` and that
    /// its `Done` echoes our payload.
    pub fn verify_against(mut self, peer_payload: impl Into<Vec<u8>>) -> Self {
        self.expect = Some(peer_payload.into());
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ReceiverState> {
        self.state.subscribe()
    }

    fn publish(&self, machine: &ReceiverMachine) {
        self.state.send_replace(machine.state());
    }
}

impl Scenario for RecvIbb {
    type Output = TransferReport;

    fn name(&self) -> &'static str {
        "receiver"
    }

    fn run<'a>(
        &'a self,
        conn: &'a dyn Connection,
        deadline: Deadline,
    ) -> BoxFuture<'a, Result<TransferReport, RunError>> {
        Box::pin(async move {
            let mut inbox = inbox(conn)?;
            let mut offers = conn
                .take_offers()
                .ok_or(RendezvousError::ChannelTaken("offer"))?;
            let mut machine =
                ReceiverMachine::new(PeerAddress::new(self.peer.clone(), self.sid.clone()));
            self.publish(&machine);

            send_signal(conn, &self.peer, RendezvousSignal::Start, None, &deadline).await?;
            info!(peer = %self.peer, sid = ?self.sid, "start signal sent, awaiting stream offer");

            let mut stream = ibb::expect_session(&mut offers, &mut machine, &deadline).await?;
            self.publish(&machine);
            let sid = stream.sid().to_string();

            deadline
                .run(Phase::Transfer, stream.write(&self.payload))
                .await?
                .map_err(RunError::Stream)?;

            let result = ibb::collect(stream.as_mut(), &deadline, Phase::Transfer, |_| {
                machine.data()?;
                self.publish(&machine);
                Ok(())
            })
            .await?;
            if let Some(err) = result.close_error.clone() {
                error!(peer = %self.peer, sid = %sid, error = %err, "stream ended with an error");
                return Err(RunError::Stream(err));
            }
            machine.stream_end()?;
            self.publish(&machine);
            ibb::reject_pending(&mut offers, &mut machine);

            let echo = ibb::echo_text(&result.received);
            send_signal(
                conn,
                &self.peer,
                RendezvousSignal::Done,
                Some(echo.clone()),
                &deadline,
            )
            .await?;

            let peer_echo = match &self.expect {
                Some(expected) => {
                    verify_data(expected, &result.received)?;
                    Some(await_echo(&mut inbox, &self.peer, &self.payload, &deadline).await?)
                }
                None => None,
            };
            info!(peer = %self.peer, sid = %sid, received = result.received.len(), "receiver done");

            Ok(TransferReport {
                role: Role::Receiver,
                local_jid: conn.local_jid().to_string(),
                peer_jid: stream.peer().to_string(),
                sid,
                sent: String::from_utf8_lossy(&self.payload).into_owned(),
                received: echo,
                received_bytes: result.received.len(),
                peer_echo,
                state: machine.state().as_str(),
                received_raw: result.received,
            })
        })
    }
}
