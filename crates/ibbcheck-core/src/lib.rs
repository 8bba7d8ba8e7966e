#![deny(unsafe_code)]

//! ibbcheck core: the daemon lifecycle, rendezvous protocol and IBB exchange
//! scenarios.
//!
//! A run loads a [`HarnessConfig`](ibbcheck_config::HarnessConfig), builds a
//! [`Daemon`], connects through a [`Connector`] and hands the live
//! [`Connection`] to a [`Scenario`]. The two scenarios shipped here,
//! [`SendIbb`] and [`RecvIbb`], synchronise with each other through
//! [`RendezvousSignal`] markers on ordinary messages and move a fixed payload
//! over an in-band bytestream.
//!
//! The XMPP transport is not part of this crate. Anything that implements the
//! traits in [`transport`] can be plugged in.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, the return type for async trait
/// methods that require dynamic dispatch (`dyn Trait`).
///
/// Native `async fn` in traits produces opaque return types that are not
/// object-safe. Traits consumed via `Box<dyn Trait>` or `&dyn Trait` return a
/// concrete `Pin<Box<dyn Future>>` instead.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Connection setup, scoped execution and guaranteed teardown.
pub mod daemon;
/// Overall run deadline applied at every suspension point.
pub mod deadline;
/// Run error taxonomy and exit codes.
pub mod error;
/// Session ids, transfer accumulation and offer filtering for IBB.
pub mod ibb;
/// Start/Done signals and the sender/receiver state machines.
pub mod rendezvous;
/// The sender and receiver test procedures.
pub mod scenario;
/// XMPP message stanzas.
pub mod stanza;
/// The seam to the XMPP client library.
pub mod transport;

pub use daemon::Daemon;
pub use deadline::{Deadline, Phase};
pub use error::RunError;
pub use ibb::{TransferBuffer, TransferResult};
pub use rendezvous::{PeerAddress, ReceiverState, RendezvousSignal, SenderState};
pub use scenario::{RecvIbb, Role, Scenario, SendIbb, TransferReport};
pub use stanza::{Message, MessageType};
pub use transport::{
    ByteStream, ClientDescriptor, Connection, Connector, Credentials, IncomingStream,
    StreamEvent, TlsPolicy, TransportError,
};
