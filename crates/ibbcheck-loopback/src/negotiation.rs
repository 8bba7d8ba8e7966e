//! Type-state session negotiation: `Connected → Secured → Authenticated`.
//!
//! Each step is async and yields once, standing in for the network round
//! trip a real server would need. A bound connection can only be obtained
//! from an authenticated negotiator.

use ibbcheck_core::{BoxFuture, ClientDescriptor, Connection, Connector, TransportError};
use tracing::{debug, info};

use crate::connection::LoopbackConnection;
use crate::hub::Hub;

/// Negotiation states.
pub mod phase {
    /// TCP is up, nothing negotiated yet.
    pub struct Connected;

    /// TLS is established.
    pub struct Secured;

    /// SASL succeeded; a resource can be bound.
    pub struct Authenticated;
}

/// A session being negotiated with the hub.
///
/// Generic over its phase `S`, so binding before authenticating does not
/// compile.
pub struct Negotiator<S> {
    hub: Hub,
    descriptor: ClientDescriptor,
    _phase: S,
}

impl Negotiator<phase::Connected> {
    /// Reach the hub at the descriptor's address.
    pub async fn dial(hub: Hub, descriptor: &ClientDescriptor) -> Result<Self, TransportError> {
        tokio::task::yield_now().await;
        hub.dial(&descriptor.addr())?;
        debug!(addr = %descriptor.addr(), "connected");
        Ok(Self {
            hub,
            descriptor: descriptor.clone(),
            _phase: phase::Connected,
        })
    }

    pub async fn starttls(self) -> Result<Negotiator<phase::Secured>, TransportError> {
        tokio::task::yield_now().await;
        self.hub.negotiate_tls(self.descriptor.tls)?;
        debug!(policy = ?self.descriptor.tls, "tls established");
        Ok(Negotiator {
            hub: self.hub,
            descriptor: self.descriptor,
            _phase: phase::Secured,
        })
    }
}

impl Negotiator<phase::Secured> {
    pub async fn authenticate(self) -> Result<Negotiator<phase::Authenticated>, TransportError> {
        tokio::task::yield_now().await;
        let credentials = &self.descriptor.credentials;
        self.hub
            .authenticate(&credentials.jid, &credentials.password)?;
        debug!(jid = %credentials.jid.bare(), "authenticated");
        Ok(Negotiator {
            hub: self.hub,
            descriptor: self.descriptor,
            _phase: phase::Authenticated,
        })
    }
}

impl Negotiator<phase::Authenticated> {
    /// Bind a resource and go online.
    pub async fn bind(self) -> Result<LoopbackConnection, TransportError> {
        tokio::task::yield_now().await;
        let (jid, inbound) = self.hub.bind(self.descriptor.jid())?;
        info!(%jid, "online");
        Ok(LoopbackConnection::new(self.hub, jid, inbound))
    }
}

/// [`Connector`] for a [`Hub`].
pub struct LoopbackConnector {
    hub: Hub,
}

impl LoopbackConnector {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

impl Connector for LoopbackConnector {
    fn connect<'a>(
        &'a self,
        descriptor: &'a ClientDescriptor,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>> {
        Box::pin(async move {
            let conn = Negotiator::dial(self.hub.clone(), descriptor)
                .await?
                .starttls()
                .await?
                .authenticate()
                .await?
                .bind()
                .await?;
            let conn: Box<dyn Connection> = Box::new(conn);
            Ok(conn)
        })
    }
}
