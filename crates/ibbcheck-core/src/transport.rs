//! The seam between the harness and an XMPP client library.
//!
//! The harness never speaks XMPP on the wire itself. A client library is
//! plugged in by implementing [`Connector`] (session establishment),
//! [`Connection`] (messages and stream offers of one bound resource),
//! [`ByteStream`] (one open in-band bytestream) and [`IncomingStream`] (an
//! offer that can be accepted or rejected).
//!
//! Inbound traffic is delivered on single-consumer channels created when the
//! resource is bound, so nothing is lost between connecting and subscribing.

use ibbcheck_config::{ConfigError, HarnessConfig, Jid};
use ibbcheck_macros::{Redact, SecureZeroize};
use tokio::sync::mpsc;

use crate::BoxFuture;
use crate::stanza::Message;

/// Whether the server certificate is checked during TLS negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    Verify,
    /// Accept any certificate. Test servers run with self-signed certificates.
    SkipVerify,
}

/// Account credentials. The password is redacted from `Debug` output and
/// zeroized when dropped.
#[derive(Clone, Redact, SecureZeroize)]
pub struct Credentials {
    #[no_zeroize]
    pub jid: Jid,
    #[redact]
    pub password: String,
}

/// A client that has been configured but not yet connected.
#[derive(Debug, Clone)]
pub struct ClientDescriptor {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub tls: TlsPolicy,
}

impl ClientDescriptor {
    /// Build a descriptor from a validated configuration.
    ///
    /// Certificate verification is always disabled; interop servers in test
    /// environments use self-signed certificates.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            host: config.client.host.clone(),
            port: config.client.port,
            credentials: Credentials {
                jid: config.client_jid()?,
                password: config.client.password.clone(),
            },
            tls: TlsPolicy::SkipVerify,
        })
    }

    /// `host:port` to dial.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn jid(&self) -> &Jid {
        &self.credentials.jid
    }
}

/// Errors reported by the transport.
///
/// Clonable so a stream failure can be both logged and stored in a
/// [`TransferResult`](crate::ibb::TransferResult).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {addr} refused")]
    Refused { addr: String },

    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    #[error("authentication failed for {jid}")]
    Auth { jid: String },

    #[error("resource binding failed: {0}")]
    Bind(String),

    #[error("{0} is unavailable")]
    Unavailable(String),

    #[error("stream rejected by {peer}: {reason}")]
    Rejected { peer: String, reason: String },

    #[error("{0}")]
    Stream(String),

    #[error("malformed stanza: {0}")]
    Malformed(String),

    #[error("connection closed")]
    Closed,
}

/// Establishes authenticated sessions.
pub trait Connector: Send + Sync {
    /// Connect, negotiate TLS per the descriptor's policy, authenticate and
    /// bind a resource.
    fn connect<'a>(
        &'a self,
        descriptor: &'a ClientDescriptor,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>>;
}

/// A live, authenticated session with a bound resource.
pub trait Connection: Send + Sync {
    /// The full JID the server bound for this session.
    fn local_jid(&self) -> &Jid;

    /// Send a message stanza. The transport fills in `from`.
    fn send(&self, message: Message) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Take the inbound message channel. Returns `None` after the first call.
    fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<Message>>;

    /// Take the inbound stream-offer channel. Returns `None` after the first
    /// call. Offers nobody takes are rejected when the connection closes.
    fn take_offers(&self) -> Option<mpsc::UnboundedReceiver<Box<dyn IncomingStream>>>;

    /// Offer a bytestream to `peer` and wait for it to be accepted.
    fn open_stream<'a>(
        &'a self,
        peer: &'a Jid,
        sid: &'a str,
        block_size: u16,
    ) -> BoxFuture<'a, Result<Box<dyn ByteStream>, TransportError>>;

    /// End the session. Must be called at most once.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// What an open stream reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A chunk of bytes from the peer, in order.
    Data(Vec<u8>),
    /// The stream ended cleanly.
    Closed,
    /// The stream ended with an error.
    Failed(TransportError),
}

/// One open in-band bytestream. Both sides may write until the stream is
/// closed.
pub trait ByteStream: Send {
    fn sid(&self) -> &str;

    fn peer(&self) -> &Jid;

    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Close the write side. The close completes when
    /// [`next_event`](Self::next_event) yields `Closed` or `Failed`.
    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Wait for the next chunk or for the end of the stream.
    fn next_event(&mut self) -> BoxFuture<'_, StreamEvent>;
}

/// A bytestream offered by a peer.
pub trait IncomingStream: Send {
    fn initiator(&self) -> &Jid;

    fn sid(&self) -> &str;

    fn accept(self: Box<Self>) -> BoxFuture<'static, Result<Box<dyn ByteStream>, TransportError>>;

    fn reject(self: Box<Self>, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> HarnessConfig {
        HarnessConfig::parse(
            r#"
            [client]
            jid = "tester@localhost/bench"
            password = "hunter2"
            port = 5299
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_descriptor_from_config() {
        let descriptor = ClientDescriptor::from_config(&config()).unwrap();
        assert_eq!(descriptor.addr(), "127.0.0.1:5299");
        assert_eq!(descriptor.jid().to_string(), "tester@localhost/bench");
        assert_eq!(descriptor.tls, TlsPolicy::SkipVerify);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let descriptor = ClientDescriptor::from_config(&config()).unwrap();
        let debug = format!("{descriptor:?}");
        assert!(debug.contains("tester@localhost"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Rejected {
            peer: "a@b/c".into(),
            reason: "session id mismatch".into(),
        };
        assert_eq!(
            err.to_string(),
            "stream rejected by a@b/c: session id mismatch"
        );
    }
}
