//! Helpers around in-band bytestream sessions: session ids, draining a
//! stream into a buffer, and the receiver's filtered wait for an offer.

use std::borrow::Cow;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::deadline::{Deadline, Phase};
use crate::error::RunError;
use crate::rendezvous::{ProtocolMismatch, ReceiverMachine};
use crate::transport::{ByteStream, IncomingStream, StreamEvent, TransportError};

/// Inbound stream offers of one connection.
pub type OfferQueue = mpsc::UnboundedReceiver<Box<dyn IncomingStream>>;

/// A fresh random session id.
pub fn generate_sid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Bytes received on a stream, in arrival order.
///
/// Finishing the buffer consumes it, so nothing can be appended once the
/// stream has reported its end.
#[derive(Debug, Default)]
pub struct TransferBuffer {
    bytes: Vec<u8>,
    chunks: usize,
}

impl TransferBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        self.chunks += 1;
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn finish(self, close_error: Option<TransportError>) -> TransferResult {
        TransferResult {
            received: self.bytes,
            chunks: self.chunks,
            close_error,
        }
    }
}

/// Everything a stream delivered, and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub received: Vec<u8>,
    pub chunks: usize,
    pub close_error: Option<TransportError>,
}

impl TransferResult {
    pub fn received_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.received)
    }
}

/// Decode received bytes for the `Done` echo.
///
/// Invalid UTF-8 is replaced rather than rejected; the verification step
/// compares raw bytes and catches it there.
pub fn echo_text(received: &[u8]) -> String {
    match std::str::from_utf8(received) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!(
                valid_up_to = e.valid_up_to(),
                len = received.len(),
                "received bytes are not valid UTF-8, echo is lossy"
            );
            String::from_utf8_lossy(received).into_owned()
        }
    }
}

/// Read `stream` until it ends, calling `on_data` before each chunk is
/// buffered.
///
/// A failed stream is not an error here: it is reported through
/// [`TransferResult::close_error`] so callers see what arrived before it.
pub async fn collect<F>(
    stream: &mut dyn ByteStream,
    deadline: &Deadline,
    phase: Phase,
    mut on_data: F,
) -> Result<TransferResult, RunError>
where
    F: FnMut(&[u8]) -> Result<(), RunError>,
{
    let mut buffer = TransferBuffer::new();
    loop {
        match deadline.run(phase, stream.next_event()).await? {
            StreamEvent::Data(chunk) => {
                on_data(&chunk)?;
                buffer.append(&chunk);
                debug!(sid = %stream.sid(), chunk = chunk.len(), total = buffer.len(), "stream data");
            }
            StreamEvent::Closed => {
                debug!(sid = %stream.sid(), total = buffer.len(), "stream closed");
                return Ok(buffer.finish(None));
            }
            StreamEvent::Failed(err) => {
                warn!(sid = %stream.sid(), error = %err, "stream failed");
                return Ok(buffer.finish(Some(err)));
            }
        }
    }
}

/// Wait for an offer that passes the receiver's filter and accept it.
///
/// Offers that do not match are rejected back to their initiator and the
/// wait continues.
pub async fn expect_session(
    offers: &mut OfferQueue,
    machine: &mut ReceiverMachine,
    deadline: &Deadline,
) -> Result<Box<dyn ByteStream>, RunError> {
    loop {
        let offer = deadline
            .run(Phase::AwaitOffer, offers.recv())
            .await?
            .ok_or(RunError::Stream(TransportError::Closed))?;

        match machine.offer(offer.initiator(), offer.sid()) {
            Ok(()) => {
                info!(from = %offer.initiator(), sid = %offer.sid(), "accepting stream offer");
                return deadline
                    .run(Phase::AwaitOffer, offer.accept())
                    .await?
                    .map_err(RunError::Stream);
            }
            Err(mismatch) => reject(offer, &mismatch),
        }
    }
}

/// Reject every offer already queued. Used once a stream has been accepted.
pub fn reject_pending(offers: &mut OfferQueue, machine: &mut ReceiverMachine) -> usize {
    let mut rejected = 0;
    while let Ok(offer) = offers.try_recv() {
        if let Err(mismatch) = machine.offer(offer.initiator(), offer.sid()) {
            reject(offer, &mismatch);
            rejected += 1;
        }
    }
    rejected
}

fn reject(offer: Box<dyn IncomingStream>, mismatch: &ProtocolMismatch) {
    warn!(
        from = %offer.initiator(),
        sid = %offer.sid(),
        reason = %mismatch,
        "rejecting stream offer"
    );
    offer.reject(&mismatch.to_string());
}
