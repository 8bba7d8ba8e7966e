#![deny(unsafe_code)]

//! An in-memory XMPP server for exercising ibbcheck without a real one.
//!
//! A [`Hub`] provisions accounts, binds sessions, routes message stanzas and
//! relays in-band bytestream offers. [`Hub::connector`] hands out a
//! [`Connector`](ibbcheck_core::Connector) whose sessions negotiate through
//! the type-state lifecycle `Connected → Secured → Authenticated` before they
//! are bound.
//!
//! [`run_pair`] runs the sender and receiver daemons concurrently against one
//! hub, which is what `ibbcheck pair` does.

pub mod connection;
pub mod hub;
pub mod negotiation;
pub mod pair;
pub mod stream;

pub use connection::LoopbackConnection;
pub use hub::{Fault, Hub, HubEvent};
pub use negotiation::{LoopbackConnector, Negotiator};
pub use pair::{
    PairOptions, PairOutcome, RECEIVER_RESOURCE, SENDER_RESOURCE, run_pair, run_pair_on,
};
pub use stream::{LoopbackOffer, LoopbackStream};
