//! A bound session on the hub.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use ibbcheck_config::Jid;
use ibbcheck_core::{
    BoxFuture, ByteStream, Connection, IncomingStream, Message, TransportError,
};
use tokio::sync::mpsc;
use tracing::warn;

use crate::hub::{Hub, Inbound};

/// A live session. Dropping it ends the session if `disconnect` was never
/// called.
pub struct LoopbackConnection {
    hub: Hub,
    jid: Jid,
    messages: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    offers: Mutex<Option<mpsc::UnboundedReceiver<Box<dyn IncomingStream>>>>,
    released: AtomicBool,
}

impl LoopbackConnection {
    pub(crate) fn new(hub: Hub, jid: Jid, inbound: Inbound) -> Self {
        Self {
            hub,
            jid,
            messages: Mutex::new(Some(inbound.messages)),
            offers: Mutex::new(Some(inbound.offers)),
            released: AtomicBool::new(false),
        }
    }

    fn ensure_live(&self) -> Result<(), TransportError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    /// Unbind from the hub. Only the first call has an effect.
    fn release(&self) -> bool {
        let first = !self.released.swap(true, Ordering::SeqCst);
        if first {
            self.hub.unbind(&self.jid);
        }
        first
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take()
}

impl Connection for LoopbackConnection {
    fn local_jid(&self) -> &Jid {
        &self.jid
    }

    fn send(&self, message: Message) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.ensure_live()?;
            self.hub.route(&self.jid, message)
        })
    }

    fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        take(&self.messages)
    }

    fn take_offers(&self) -> Option<mpsc::UnboundedReceiver<Box<dyn IncomingStream>>> {
        take(&self.offers)
    }

    fn open_stream<'a>(
        &'a self,
        peer: &'a Jid,
        sid: &'a str,
        block_size: u16,
    ) -> BoxFuture<'a, Result<Box<dyn ByteStream>, TransportError>> {
        Box::pin(async move {
            self.ensure_live()?;
            let stream = self
                .hub
                .open_stream(&self.jid, peer, sid, block_size)
                .await?;
            let stream: Box<dyn ByteStream> = Box::new(stream);
            Ok(stream)
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if !self.release() {
                return Err(TransportError::Closed);
            }
            if self.hub.disconnect_fault(&self.jid) {
                return Err(TransportError::Stream(format!(
                    "closing the session of {} failed",
                    self.jid
                )));
            }
            Ok(())
        })
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        if self.release() {
            warn!(jid = %self.jid, "session dropped without disconnect");
        }
    }
}
