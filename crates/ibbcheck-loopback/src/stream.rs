//! In-memory bytestreams.
//!
//! A stream is two [`LoopbackStream`] ends joined by a pair of channels.
//! Writes are cut into `block_size` chunks the way an IBB session cuts them
//! into `<data/>` elements. Closing sends `Close`; the other end answers with
//! `CloseAck` when it reads it, and both ends then report `Closed`.

use ibbcheck_config::Jid;
use ibbcheck_core::{BoxFuture, ByteStream, IncomingStream, StreamEvent, TransportError};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Debug)]
enum Frame {
    Data(Vec<u8>),
    Close,
    CloseAck,
    Abort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closing,
    Closed,
}

/// One end of an in-memory stream.
pub struct LoopbackStream {
    sid: String,
    peer: Jid,
    block_size: usize,
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
    state: State,
    close_fault: Option<String>,
    pending: Option<StreamEvent>,
}

/// Build both ends of a stream from `initiator` to `target`. `close_fault`
/// makes the initiator's close fail with that cause.
pub(crate) fn pair(
    sid: &str,
    initiator: &Jid,
    target: &Jid,
    block_size: usize,
    close_fault: Option<String>,
) -> (LoopbackStream, LoopbackStream) {
    let (to_target, from_initiator) = mpsc::unbounded_channel();
    let (to_initiator, from_target) = mpsc::unbounded_channel();
    let end = |peer: &Jid, tx, rx, close_fault| LoopbackStream {
        sid: sid.to_string(),
        peer: peer.clone(),
        block_size,
        tx,
        rx,
        state: State::Open,
        close_fault,
        pending: None,
    };
    (
        end(target, to_target, from_target, close_fault),
        end(initiator, to_initiator, from_initiator, None),
    )
}

impl LoopbackStream {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }
}

impl ByteStream for LoopbackStream {
    fn sid(&self) -> &str {
        &self.sid
    }

    fn peer(&self) -> &Jid {
        &self.peer
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if self.state != State::Open {
                return Err(TransportError::Stream(format!(
                    "stream {} is closed for writing",
                    self.sid
                )));
            }
            for block in data.chunks(self.block_size) {
                self.send(Frame::Data(block.to_vec()))?;
            }
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.state != State::Open {
                return Ok(());
            }
            if let Some(cause) = self.close_fault.take() {
                debug!(sid = %self.sid, %cause, "close fails by injection");
                // The peer may already be gone; the failure is reported either way.
                let _ = self.send(Frame::Abort(cause.clone()));
                self.state = State::Closed;
                self.pending = Some(StreamEvent::Failed(TransportError::Stream(cause)));
                return Ok(());
            }
            self.send(Frame::Close)?;
            self.state = State::Closing;
            Ok(())
        })
    }

    fn next_event(&mut self) -> BoxFuture<'_, StreamEvent> {
        Box::pin(async move {
            if let Some(event) = self.pending.take() {
                return event;
            }
            if self.state == State::Closed {
                return StreamEvent::Closed;
            }
            match self.rx.recv().await {
                Some(Frame::Data(bytes)) => StreamEvent::Data(bytes),
                Some(Frame::Close) => {
                    // Acknowledge; the peer stops waiting once it sees this.
                    let _ = self.send(Frame::CloseAck);
                    self.state = State::Closed;
                    StreamEvent::Closed
                }
                Some(Frame::CloseAck) => {
                    self.state = State::Closed;
                    StreamEvent::Closed
                }
                Some(Frame::Abort(cause)) => {
                    self.state = State::Closed;
                    StreamEvent::Failed(TransportError::Stream(cause))
                }
                None => {
                    self.state = State::Closed;
                    StreamEvent::Failed(TransportError::Closed)
                }
            }
        })
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        if self.state != State::Closed {
            let _ = self.tx.send(Frame::Abort(format!("stream {} was dropped", self.sid)));
        }
    }
}

/// A stream offered to a bound session.
pub struct LoopbackOffer {
    initiator: Jid,
    sid: String,
    stream: Option<LoopbackStream>,
    reply: Option<oneshot::Sender<Result<(), String>>>,
}

impl LoopbackOffer {
    pub(crate) fn new(
        initiator: Jid,
        stream: LoopbackStream,
        reply: oneshot::Sender<Result<(), String>>,
    ) -> Self {
        Self {
            initiator,
            sid: stream.sid.clone(),
            stream: Some(stream),
            reply: Some(reply),
        }
    }
}

impl IncomingStream for LoopbackOffer {
    fn initiator(&self) -> &Jid {
        &self.initiator
    }

    fn sid(&self) -> &str {
        &self.sid
    }

    fn accept(
        mut self: Box<Self>,
    ) -> BoxFuture<'static, Result<Box<dyn ByteStream>, TransportError>> {
        let stream = self.stream.take();
        let reply = self.reply.take();
        let initiator = self.initiator.to_string();
        Box::pin(async move {
            let (Some(stream), Some(reply)) = (stream, reply) else {
                return Err(TransportError::Closed);
            };
            reply
                .send(Ok(()))
                .map_err(|_| TransportError::Unavailable(initiator))?;
            let stream: Box<dyn ByteStream> = Box::new(stream);
            Ok(stream)
        })
    }

    fn reject(mut self: Box<Self>, reason: &str) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(reason.to_string()));
        }
    }
}

impl Drop for LoopbackOffer {
    fn drop(&mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err("offer was not answered".to_string()));
        }
        // The unused target end must not abort a stream nobody accepted.
        if let Some(mut stream) = self.stream.take() {
            stream.state = State::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ends(block_size: usize, fault: Option<&str>) -> (LoopbackStream, LoopbackStream) {
        pair(
            "s1",
            &Jid::parse("a@h/init").unwrap(),
            &Jid::parse("b@h/target").unwrap(),
            block_size,
            fault.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn test_writes_are_chunked_by_block_size() {
        let (mut init, mut target) = ends(4, None);
        assert_eq!(init.peer().to_string(), "b@h/target");
        assert_eq!(target.peer().to_string(), "a@h/init");

        init.write(b"0123456789").await.unwrap();
        let mut chunks = Vec::new();
        for _ in 0..3 {
            match target.next_event().await {
                StreamEvent::Data(bytes) => chunks.push(bytes),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(chunks, vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]);
    }

    #[tokio::test]
    async fn test_close_handshake() {
        let (mut init, mut target) = ends(4096, None);
        init.write(b"hello").await.unwrap();
        init.close().await.unwrap();
        assert!(init.write(b"more").await.is_err());

        target.write(b"back").await.unwrap();
        assert_eq!(target.next_event().await, StreamEvent::Data(b"hello".to_vec()));
        assert_eq!(target.next_event().await, StreamEvent::Closed);

        assert_eq!(init.next_event().await, StreamEvent::Data(b"back".to_vec()));
        assert_eq!(init.next_event().await, StreamEvent::Closed);
    }

    #[tokio::test]
    async fn test_injected_close_error_reaches_both_ends() {
        let (mut init, mut target) = ends(4096, Some("item-not-found"));
        init.write(b"x").await.unwrap();
        init.close().await.unwrap();
        assert_eq!(
            init.next_event().await,
            StreamEvent::Failed(TransportError::Stream("item-not-found".into()))
        );

        assert_eq!(target.next_event().await, StreamEvent::Data(b"x".to_vec()));
        assert_eq!(
            target.next_event().await,
            StreamEvent::Failed(TransportError::Stream("item-not-found".into()))
        );
    }

    #[tokio::test]
    async fn test_dropped_end_aborts_peer() {
        let (init, mut target) = ends(4096, None);
        drop(init);
        assert!(matches!(
            target.next_event().await,
            StreamEvent::Failed(TransportError::Stream(_))
        ));
    }

    #[tokio::test]
    async fn test_offer_accept_and_reject() {
        let (init, target) = ends(4096, None);
        let (tx, rx) = oneshot::channel();
        let offer: Box<dyn IncomingStream> =
            Box::new(LoopbackOffer::new(init.peer().clone(), target, tx));
        assert_eq!(offer.sid(), "s1");
        let accepted = offer.accept().await.unwrap();
        assert_eq!(accepted.sid(), "s1");
        assert_eq!(rx.await.unwrap(), Ok(()));

        let (init, target) = ends(4096, None);
        let (tx, rx) = oneshot::channel();
        let offer: Box<dyn IncomingStream> =
            Box::new(LoopbackOffer::new(init.peer().clone(), target, tx));
        offer.reject("session id mismatch");
        assert_eq!(rx.await.unwrap(), Err("session id mismatch".to_string()));
    }
}
