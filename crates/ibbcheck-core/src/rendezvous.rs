//! Cross-process rendezvous between the sender and receiver roles.
//!
//! Two signals travel as marker elements on ordinary messages:
//!
//! - `Start` (`<startibb/>`): the receiver is listening for a stream offer.
//! - `Done` (`<doneibb/>`): a role has finished its transfer; the message
//!   body echoes the bytes that role received.
//!
//! Each role is tracked by a small state machine. Transitions that the
//! protocol does not allow are errors, which is how ordering guarantees
//! (such as "no stream before `Start`") are enforced.

use std::collections::VecDeque;
use std::fmt;

use ibbcheck_config::Jid;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::stanza::Message;
use crate::transport::TransportError;

/// Namespace of the marker elements.
pub const SIGNAL_NS: &str = "jabber:client";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RendezvousSignal {
    Start,
    Done,
}

impl RendezvousSignal {
    pub fn element_name(self) -> &'static str {
        match self {
            RendezvousSignal::Start => "startibb",
            RendezvousSignal::Done => "doneibb",
        }
    }

    pub fn from_element_name(name: &[u8]) -> Option<Self> {
        match name {
            b"startibb" => Some(RendezvousSignal::Start),
            b"doneibb" => Some(RendezvousSignal::Done),
            _ => None,
        }
    }
}

impl fmt::Display for RendezvousSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverState {
    AwaitingStreamOffer,
    AwaitingData,
    AwaitingStreamEnd,
    Done,
}

impl ReceiverState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiverState::AwaitingStreamOffer => "awaiting_stream_offer",
            ReceiverState::AwaitingData => "awaiting_data",
            ReceiverState::AwaitingStreamEnd => "awaiting_stream_end",
            ReceiverState::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderState {
    Connecting,
    StreamOpen,
    AwaitingEcho,
    Done,
}

impl SenderState {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderState::Connecting => "connecting",
            SenderState::StreamOpen => "stream_open",
            SenderState::AwaitingEcho => "awaiting_echo",
            SenderState::Done => "done",
        }
    }
}

/// Why an offer was turned down. Never fatal: the receiver keeps waiting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolMismatch {
    #[error("offer from unexpected peer {actual} (expected {expected})")]
    UnexpectedPeer { expected: Jid, actual: Jid },

    #[error("session id {actual:?} does not match expected {expected:?}")]
    SessionId { expected: String, actual: String },

    #[error("stream {accepted:?} already accepted")]
    AlreadyAccepted { accepted: String },
}

/// Errors that abort a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RendezvousError {
    #[error("receiver cannot handle {event} in state {}", state.as_str())]
    Receiver {
        state: ReceiverState,
        event: &'static str,
    },

    #[error("sender cannot handle {event} in state {}", state.as_str())]
    Sender {
        state: SenderState,
        event: &'static str,
    },

    #[error("no stream target: {0} has not been observed")]
    NotAnnounced(RendezvousSignal),

    #[error("{0} from unexpected peer {1}")]
    UnexpectedSender(RendezvousSignal, Jid),

    #[error("the {0} channel was already taken from this connection")]
    ChannelTaken(&'static str),
}

/// The counterpart a receiver accepts offers from, and the session id it
/// expects if one was pinned.
#[derive(Debug, Clone)]
pub struct PeerAddress {
    peer: Jid,
    sid: Option<String>,
}

impl PeerAddress {
    /// `peer` may be bare (any resource of that account) or full.
    pub fn new(peer: Jid, sid: Option<String>) -> Self {
        Self { peer, sid }
    }

    pub fn peer(&self) -> &Jid {
        &self.peer
    }

    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    /// Session ids must match exactly.
    pub fn check(&self, initiator: &Jid, sid: &str) -> Result<(), ProtocolMismatch> {
        if !self.peer.matches(initiator) {
            return Err(ProtocolMismatch::UnexpectedPeer {
                expected: self.peer.clone(),
                actual: initiator.clone(),
            });
        }
        match &self.sid {
            Some(expected) if expected != sid => Err(ProtocolMismatch::SessionId {
                expected: expected.clone(),
                actual: sid.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Receiver side: `AwaitingStreamOffer → AwaitingData → AwaitingStreamEnd → Done`.
#[derive(Debug)]
pub struct ReceiverMachine {
    state: ReceiverState,
    filter: PeerAddress,
    accepted: Option<String>,
}

impl ReceiverMachine {
    pub fn new(filter: PeerAddress) -> Self {
        Self {
            state: ReceiverState::AwaitingStreamOffer,
            filter,
            accepted: None,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn filter(&self) -> &PeerAddress {
        &self.filter
    }

    /// Session id of the accepted stream.
    pub fn accepted_sid(&self) -> Option<&str> {
        self.accepted.as_deref()
    }

    /// Decide on an offer. On `Ok` the caller must accept it.
    pub fn offer(&mut self, initiator: &Jid, sid: &str) -> Result<(), ProtocolMismatch> {
        if let Some(accepted) = &self.accepted {
            return Err(ProtocolMismatch::AlreadyAccepted {
                accepted: accepted.clone(),
            });
        }
        self.filter.check(initiator, sid)?;
        self.accepted = Some(sid.to_string());
        self.state = ReceiverState::AwaitingData;
        Ok(())
    }

    pub fn data(&mut self) -> Result<(), RendezvousError> {
        match self.state {
            ReceiverState::AwaitingData | ReceiverState::AwaitingStreamEnd => {
                self.state = ReceiverState::AwaitingStreamEnd;
                Ok(())
            }
            state => Err(RendezvousError::Receiver {
                state,
                event: "data",
            }),
        }
    }

    /// An empty stream may end straight from `AwaitingData`.
    pub fn stream_end(&mut self) -> Result<(), RendezvousError> {
        match self.state {
            ReceiverState::AwaitingData | ReceiverState::AwaitingStreamEnd => {
                self.state = ReceiverState::Done;
                Ok(())
            }
            state => Err(RendezvousError::Receiver {
                state,
                event: "stream end",
            }),
        }
    }
}

/// Who the sender opens its stream to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderTarget {
    /// Open to this JID right away.
    Known(Jid),
    /// Wait for `Start` from a JID matching this pattern and open to its
    /// sender.
    Announced(Jid),
}

/// Sender side: `Connecting → StreamOpen → AwaitingEcho → Done`.
#[derive(Debug)]
pub struct SenderMachine {
    state: SenderState,
    pattern: SenderTarget,
    target: Option<Jid>,
}

impl SenderMachine {
    pub fn new(target: SenderTarget) -> Self {
        let resolved = match &target {
            SenderTarget::Known(jid) => Some(jid.clone()),
            SenderTarget::Announced(_) => None,
        };
        Self {
            state: SenderState::Connecting,
            pattern: target,
            target: resolved,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn needs_start(&self) -> bool {
        self.target.is_none()
    }

    /// Record a `Start` signal. In announced mode its sender becomes the
    /// stream target.
    pub fn start_observed(&mut self, from: &Jid) -> Result<(), RendezvousError> {
        if self.state != SenderState::Connecting {
            return Err(RendezvousError::Sender {
                state: self.state,
                event: "start signal",
            });
        }
        if let SenderTarget::Announced(pattern) = &self.pattern {
            if !pattern.matches(from) {
                return Err(RendezvousError::UnexpectedSender(
                    RendezvousSignal::Start,
                    from.clone(),
                ));
            }
            if self.target.is_none() {
                self.target = Some(from.clone());
            }
        }
        Ok(())
    }

    /// The stream target. Not available in announced mode before `Start`.
    pub fn target(&self) -> Result<&Jid, RendezvousError> {
        self.target
            .as_ref()
            .ok_or(RendezvousError::NotAnnounced(RendezvousSignal::Start))
    }

    pub fn stream_opened(&mut self) -> Result<(), RendezvousError> {
        self.target()?;
        self.advance(SenderState::Connecting, SenderState::StreamOpen, "stream open")
    }

    pub fn stream_closed(&mut self) -> Result<(), RendezvousError> {
        self.advance(SenderState::StreamOpen, SenderState::AwaitingEcho, "stream close")
    }

    pub fn finish(&mut self) -> Result<(), RendezvousError> {
        self.advance(SenderState::AwaitingEcho, SenderState::Done, "finish")
    }

    fn advance(
        &mut self,
        from: SenderState,
        to: SenderState,
        event: &'static str,
    ) -> Result<(), RendezvousError> {
        if self.state != from {
            return Err(RendezvousError::Sender {
                state: self.state,
                event,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// Inbound messages, filtered down to rendezvous signals.
///
/// Signals that arrive while a different one is awaited are kept and handed
/// out later, so a fast peer cannot make a slow one miss its `Done`.
#[derive(Debug)]
pub struct SignalInbox {
    rx: mpsc::UnboundedReceiver<Message>,
    stash: VecDeque<Message>,
}

impl SignalInbox {
    pub fn new(rx: mpsc::UnboundedReceiver<Message>) -> Self {
        Self {
            rx,
            stash: VecDeque::new(),
        }
    }

    /// Wait for `want` from a JID matched by `from`.
    ///
    /// Other signals from a matching JID are kept for a later call. Signals
    /// from anyone else are dropped.
    pub async fn next_signal(
        &mut self,
        want: RendezvousSignal,
        from: &Jid,
    ) -> Result<Message, TransportError> {
        let from_peer = |m: &Message| m.from.as_ref().is_some_and(|f| from.matches(f));
        let wanted = |m: &Message| m.signal == Some(want) && from_peer(m);

        if let Some(pos) = self.stash.iter().position(|m| wanted(m))
            && let Some(message) = self.stash.remove(pos)
        {
            return Ok(message);
        }

        loop {
            let message = self.rx.recv().await.ok_or(TransportError::Closed)?;
            if wanted(&message) {
                return Ok(message);
            }
            if message.signal.is_some() && !from_peer(&message) {
                debug!(
                    signal = ?message.signal,
                    from = ?message.from.as_ref().map(ToString::to_string),
                    expected = %from,
                    "dropping signal from unexpected sender"
                );
            } else if message.signal.is_some() {
                debug!(
                    signal = ?message.signal,
                    from = ?message.from.as_ref().map(ToString::to_string),
                    waiting_for = %want,
                    "stashing out-of-order signal"
                );
                self.stash.push_back(message);
            } else {
                debug!(id = %message.id, "ignoring message without a rendezvous signal");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn jid(s: &str) -> Jid {
        Jid::parse(s).unwrap()
    }

    #[test]
    fn test_signal_element_names() {
        assert_eq!(RendezvousSignal::Start.element_name(), "startibb");
        assert_eq!(
            RendezvousSignal::from_element_name(b"doneibb"),
            Some(RendezvousSignal::Done)
        );
        assert_eq!(RendezvousSignal::from_element_name(b"open"), None);
    }

    #[test]
    fn test_receiver_happy_path() {
        let mut m = ReceiverMachine::new(PeerAddress::new(jid("s@h/x"), None));
        assert_eq!(m.state(), ReceiverState::AwaitingStreamOffer);
        m.offer(&jid("s@h/x"), "abc").unwrap();
        assert_eq!(m.state(), ReceiverState::AwaitingData);
        m.data().unwrap();
        assert_eq!(m.state(), ReceiverState::AwaitingStreamEnd);
        m.data().unwrap();
        assert_eq!(m.state(), ReceiverState::AwaitingStreamEnd);
        m.stream_end().unwrap();
        assert_eq!(m.state(), ReceiverState::Done);
        assert_eq!(m.accepted_sid(), Some("abc"));
    }

    #[test]
    fn test_receiver_empty_stream_ends_from_awaiting_data() {
        let mut m = ReceiverMachine::new(PeerAddress::new(jid("s@h"), None));
        m.offer(&jid("s@h/any"), "abc").unwrap();
        m.stream_end().unwrap();
        assert_eq!(m.state(), ReceiverState::Done);
    }

    #[test]
    fn test_receiver_rejects_sid_mismatch_and_stays() {
        let mut m = ReceiverMachine::new(PeerAddress::new(jid("s@h/x"), Some("abc123".into())));
        let err = m.offer(&jid("s@h/x"), "zzz999").unwrap_err();
        assert_eq!(
            err,
            ProtocolMismatch::SessionId {
                expected: "abc123".into(),
                actual: "zzz999".into()
            }
        );
        assert_eq!(m.state(), ReceiverState::AwaitingStreamOffer);
        m.offer(&jid("s@h/x"), "abc123").unwrap();
        assert_eq!(m.state(), ReceiverState::AwaitingData);
    }

    #[test]
    fn test_receiver_rejects_unexpected_peer() {
        let mut m = ReceiverMachine::new(PeerAddress::new(jid("s@h/x"), None));
        let err = m.offer(&jid("s@h/y"), "abc").unwrap_err();
        assert!(matches!(err, ProtocolMismatch::UnexpectedPeer { .. }));
        assert_eq!(m.state(), ReceiverState::AwaitingStreamOffer);
    }

    #[test]
    fn test_receiver_rejects_second_offer() {
        let mut m = ReceiverMachine::new(PeerAddress::new(jid("s@h"), None));
        m.offer(&jid("s@h/x"), "one").unwrap();
        let err = m.offer(&jid("s@h/x"), "two").unwrap_err();
        assert_eq!(
            err,
            ProtocolMismatch::AlreadyAccepted {
                accepted: "one".into()
            }
        );
    }

    #[test]
    fn test_receiver_data_before_offer_is_error() {
        let mut m = ReceiverMachine::new(PeerAddress::new(jid("s@h"), None));
        assert!(m.data().is_err());
        assert!(m.stream_end().is_err());
    }

    #[test]
    fn test_sender_known_target() {
        let mut m = SenderMachine::new(SenderTarget::Known(jid("r@h/x")));
        assert!(!m.needs_start());
        m.stream_opened().unwrap();
        m.stream_closed().unwrap();
        m.finish().unwrap();
        assert_eq!(m.state(), SenderState::Done);
    }

    #[test]
    fn test_sender_never_opens_before_start() {
        let mut m = SenderMachine::new(SenderTarget::Announced(jid("r@h")));
        assert!(m.needs_start());
        assert_eq!(
            m.stream_opened(),
            Err(RendezvousError::NotAnnounced(RendezvousSignal::Start))
        );
        assert_eq!(m.state(), SenderState::Connecting);

        m.start_observed(&jid("r@h/listener")).unwrap();
        assert_eq!(m.target().unwrap(), &jid("r@h/listener"));
        m.stream_opened().unwrap();
        assert_eq!(m.state(), SenderState::StreamOpen);
    }

    #[test]
    fn test_sender_ignores_start_from_stranger() {
        let mut m = SenderMachine::new(SenderTarget::Announced(jid("r@h")));
        let err = m.start_observed(&jid("mallory@h/x")).unwrap_err();
        assert!(matches!(err, RendezvousError::UnexpectedSender(..)));
        assert!(m.needs_start());
    }

    #[test]
    fn test_sender_out_of_order_transition() {
        let mut m = SenderMachine::new(SenderTarget::Known(jid("r@h/x")));
        let err = m.stream_closed().unwrap_err();
        assert_eq!(
            err,
            RendezvousError::Sender {
                state: SenderState::Connecting,
                event: "stream close"
            }
        );
    }

    #[tokio::test]
    async fn test_inbox_stashes_out_of_order_signals() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inbox = SignalInbox::new(rx);
        let peer = jid("p@h/x");

        tx.send(
            Message::new(jid("me@h/y"))
                .with_from(peer.clone())
                .with_signal(RendezvousSignal::Done)
                .with_body("echo"),
        )
        .unwrap();
        tx.send(Message::new(jid("me@h/y")).with_from(peer.clone()))
            .unwrap();
        tx.send(
            Message::new(jid("me@h/y"))
                .with_from(peer.clone())
                .with_signal(RendezvousSignal::Start),
        )
        .unwrap();

        let start = inbox
            .next_signal(RendezvousSignal::Start, &peer)
            .await
            .unwrap();
        assert_eq!(start.signal, Some(RendezvousSignal::Start));

        let done = inbox
            .next_signal(RendezvousSignal::Done, &peer.bare())
            .await
            .unwrap();
        assert_eq!(done.body.as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn test_inbox_drops_signals_from_strangers() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inbox = SignalInbox::new(rx);
        let peer = jid("p@h/x");

        for i in 0..100 {
            tx.send(
                Message::new(jid("me@h/y"))
                    .with_from(jid(&format!("stranger{i}@h/z")))
                    .with_signal(RendezvousSignal::Done),
            )
            .unwrap();
        }
        tx.send(
            Message::new(jid("me@h/y"))
                .with_from(peer.clone())
                .with_signal(RendezvousSignal::Start),
        )
        .unwrap();

        inbox
            .next_signal(RendezvousSignal::Start, &peer)
            .await
            .unwrap();
        assert!(inbox.stash.is_empty(), "{} stashed", inbox.stash.len());
    }

    #[tokio::test]
    async fn test_inbox_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        drop(tx);
        let mut inbox = SignalInbox::new(rx);
        let err = inbox
            .next_signal(RendezvousSignal::Start, &jid("p@h"))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }
}
