//! The in-memory server.
//!
//! A [`Hub`] holds provisioned accounts and the sessions currently bound,
//! routes message stanzas between them and relays stream offers. Everything
//! it does is recorded as [`HubEvent`]s for tests to inspect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ibbcheck_config::{ConfigError, HarnessConfig, Jid};
use ibbcheck_core::rendezvous::RendezvousSignal;
use ibbcheck_core::{Connector, IncomingStream, Message, TlsPolicy, TransportError};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::negotiation::LoopbackConnector;
use crate::stream::{self, LoopbackOffer, LoopbackStream};

/// Something the hub did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Login(Jid),
    Logout(Jid),
    Message {
        from: Jid,
        to: Jid,
        signal: Option<RendezvousSignal>,
        body: Option<String>,
    },
    StreamOffered {
        from: Jid,
        to: Jid,
        sid: String,
    },
    StreamAccepted {
        sid: String,
    },
    StreamRejected {
        sid: String,
        reason: String,
    },
    /// A message to a JID with no bound session. Dropped, like a server
    /// without offline storage would.
    Undeliverable {
        to: Jid,
    },
}

/// Misbehaviour to inject, keyed by the JID it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Streams opened by `jid` fail with `cause` when closed.
    CloseError { jid: Jid, cause: String },
    /// Disconnecting `jid` reports an error (the session still ends).
    DisconnectError { jid: Jid },
}

struct Session {
    messages: mpsc::UnboundedSender<Message>,
    offers: mpsc::UnboundedSender<Box<dyn IncomingStream>>,
}

/// Receivers handed to a freshly bound session.
pub(crate) struct Inbound {
    pub messages: mpsc::UnboundedReceiver<Message>,
    pub offers: mpsc::UnboundedReceiver<Box<dyn IncomingStream>>,
}

struct HubState {
    addr: String,
    self_signed: bool,
    accounts: HashMap<Jid, String>,
    sessions: HashMap<Jid, Session>,
    next_resource: u64,
    events: Vec<HubEvent>,
    faults: Vec<Fault>,
}

/// Shared handle to one in-memory server.
#[derive(Clone)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Hub {
    /// A server reachable at `addr` with a self-signed certificate and no
    /// accounts.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                addr: addr.into(),
                self_signed: true,
                accounts: HashMap::new(),
                sessions: HashMap::new(),
                next_resource: 0,
                events: Vec::new(),
                faults: Vec::new(),
            })),
            changes: Arc::new(watch::channel(0).0),
        }
    }

    /// A server at the configured address with the configured account.
    pub fn for_config(config: &HarnessConfig) -> Result<Self, ConfigError> {
        let hub = Self::new(config.server_addr());
        hub.register(&config.client_jid()?, &config.client.password);
        Ok(hub)
    }

    /// Provision an account. Any resource on `jid` is ignored.
    pub fn register(&self, jid: &Jid, password: &str) {
        self.lock().accounts.insert(jid.bare(), password.to_string());
        debug!(jid = %jid.bare(), "account registered");
    }

    /// Present a certificate that verifies.
    pub fn trust_certificate(&self) {
        self.lock().self_signed = false;
    }

    pub fn inject(&self, fault: Fault) {
        info!(?fault, "fault injected");
        self.lock().faults.push(fault);
    }

    /// A connector that dials this hub.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(LoopbackConnector::new(self.clone()))
    }

    pub fn addr(&self) -> String {
        self.lock().addr.clone()
    }

    pub fn events(&self) -> Vec<HubEvent> {
        self.lock().events.clone()
    }

    /// Messages routed so far, in order.
    pub fn messages(&self) -> Vec<HubEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, HubEvent::Message { .. }))
            .cloned()
            .collect()
    }

    /// Bound sessions matched by `pattern`.
    pub fn online(&self, pattern: &Jid) -> Vec<Jid> {
        let mut online: Vec<Jid> = self
            .lock()
            .sessions
            .keys()
            .filter(|jid| pattern.matches(jid))
            .cloned()
            .collect();
        online.sort();
        online
    }

    pub fn is_online(&self, pattern: &Jid) -> bool {
        !self.online(pattern).is_empty()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn logout_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, HubEvent::Logout(_)))
            .count()
    }

    /// Wait until a session matched by `pattern` is bound.
    pub async fn wait_online(&self, pattern: &Jid) -> Jid {
        let mut changes = self.changes.subscribe();
        loop {
            if let Some(jid) = self.online(pattern).into_iter().next() {
                return jid;
            }
            // `self` keeps the sender alive, so this cannot fail.
            let _ = changes.changed().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    pub(crate) fn dial(&self, addr: &str) -> Result<(), TransportError> {
        if self.lock().addr != addr {
            return Err(TransportError::Refused {
                addr: addr.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn negotiate_tls(&self, policy: TlsPolicy) -> Result<(), TransportError> {
        if policy == TlsPolicy::Verify && self.lock().self_signed {
            return Err(TransportError::Tls(
                "certificate is self-signed".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn authenticate(&self, jid: &Jid, password: &str) -> Result<(), TransportError> {
        match self.lock().accounts.get(&jid.bare()) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(TransportError::Auth {
                jid: jid.bare().to_string(),
            }),
        }
    }

    /// Bind the requested resource, or a generated one.
    pub(crate) fn bind(&self, jid: &Jid) -> Result<(Jid, Inbound), TransportError> {
        let (full, inbound) = {
            let mut state = self.lock();
            let full = match jid.resourcepart() {
                Some(_) => jid.clone(),
                None => {
                    state.next_resource += 1;
                    let resource = format!("ibbcheck-{}", state.next_resource);
                    jid.with_resource(&resource)
                        .map_err(|e| TransportError::Bind(e.to_string()))?
                }
            };
            if state.sessions.contains_key(&full) {
                return Err(TransportError::Bind(format!("resource conflict for {full}")));
            }

            let (messages_tx, messages) = mpsc::unbounded_channel();
            let (offers_tx, offers) = mpsc::unbounded_channel();
            state.sessions.insert(
                full.clone(),
                Session {
                    messages: messages_tx,
                    offers: offers_tx,
                },
            );
            state.events.push(HubEvent::Login(full.clone()));
            (full, Inbound { messages, offers })
        };
        info!(jid = %full, "session bound");
        self.notify();
        Ok((full, inbound))
    }

    /// End a session. Pending offers addressed to it are dropped, which
    /// rejects them.
    pub(crate) fn unbind(&self, jid: &Jid) {
        let removed = {
            let mut state = self.lock();
            let removed = state.sessions.remove(jid).is_some();
            if removed {
                state.events.push(HubEvent::Logout(jid.clone()));
            }
            removed
        };
        if removed {
            info!(%jid, "session ended");
            self.notify();
        }
    }

    pub(crate) fn disconnect_fault(&self, jid: &Jid) -> bool {
        self.lock().faults.iter().any(|fault| {
            matches!(fault, Fault::DisconnectError { jid: pattern } if pattern.matches(jid))
        })
    }

    fn close_fault(state: &HubState, jid: &Jid) -> Option<String> {
        state.faults.iter().find_map(|fault| match fault {
            Fault::CloseError { jid: pattern, cause } if pattern.matches(jid) => {
                Some(cause.clone())
            }
            _ => None,
        })
    }

    /// Deliver a message from `from`. A bare `to` reaches every resource of
    /// the account.
    ///
    /// The stanza goes through its XML form on the way, as it would on a
    /// real server.
    pub(crate) fn route(&self, from: &Jid, message: Message) -> Result<(), TransportError> {
        let wire = message.with_from(from.clone()).to_xml();
        let message =
            Message::from_xml(&wire).map_err(|e| TransportError::Malformed(e.to_string()))?;

        let mut state = self.lock();
        state.events.push(HubEvent::Message {
            from: from.clone(),
            to: message.to.clone(),
            signal: message.signal,
            body: message.body.clone(),
        });

        let targets: Vec<Jid> = state
            .sessions
            .keys()
            .filter(|jid| message.to.matches(jid))
            .cloned()
            .collect();
        if targets.is_empty() {
            warn!(to = %message.to, "no session for recipient, message dropped");
            state.events.push(HubEvent::Undeliverable {
                to: message.to.clone(),
            });
            return Ok(());
        }

        for jid in targets {
            if let Some(session) = state.sessions.get(&jid) {
                // A session whose receiver is gone is about to unbind.
                let _ = session.messages.send(message.clone());
            }
        }
        debug!(%from, to = %message.to, signal = ?message.signal, "message routed");
        Ok(())
    }

    /// Offer a stream from `from` to `to` and wait for the answer.
    pub(crate) async fn open_stream(
        &self,
        from: &Jid,
        to: &Jid,
        sid: &str,
        block_size: u16,
    ) -> Result<LoopbackStream, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let initiator_side = {
            let mut state = self.lock();
            let Some(session) = state.sessions.get(to) else {
                return Err(TransportError::Unavailable(to.to_string()));
            };
            let close_fault = Self::close_fault(&state, from);
            let (initiator_side, target_side) =
                stream::pair(sid, from, to, usize::from(block_size.max(1)), close_fault);
            let offer = LoopbackOffer::new(from.clone(), target_side, reply_tx);
            if session.offers.send(Box::new(offer)).is_err() {
                return Err(TransportError::Unavailable(to.to_string()));
            }
            state.events.push(HubEvent::StreamOffered {
                from: from.clone(),
                to: to.clone(),
                sid: sid.to_string(),
            });
            initiator_side
        };
        debug!(%from, %to, sid, block_size, "stream offered");

        let answer = reply_rx
            .await
            .unwrap_or_else(|_| Err("offer dropped".to_string()));
        match answer {
            Ok(()) => {
                self.lock().events.push(HubEvent::StreamAccepted {
                    sid: sid.to_string(),
                });
                Ok(initiator_side)
            }
            Err(reason) => {
                self.lock().events.push(HubEvent::StreamRejected {
                    sid: sid.to_string(),
                    reason: reason.clone(),
                });
                Err(TransportError::Rejected {
                    peer: to.to_string(),
                    reason,
                })
            }
        }
    }
}
