//! In-process transport pair, mainly for tests and embedding.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use super::{FrameStream, Transport, TransportType};
use crate::cancellation::CancellationHandle;
use crate::error::{TransportError, TransportResult};

/// One end of a connected pair. Frames sent on one end arrive on the other.
pub struct InMemoryTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    connected: AtomicBool,
    closed: CancellationHandle,
}

impl InMemoryTransport {
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(outbound: mpsc::UnboundedSender<Bytes>, inbound: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound: Mutex::new(Some(inbound)),
            connected: AtomicBool::new(false),
            closed: CancellationHandle::new(),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::InMemory
    }

    async fn connect(&self) -> TransportResult<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.cancel();
        // Dropping the sender ends the peer's inbound stream
        self.outbound.lock().take();
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        trace!(bytes = frame.len(), "in-memory send");
        let sender = self.outbound.lock().clone().ok_or(TransportError::NotConnected)?;
        sender.send(frame).map_err(|_| TransportError::Closed)
    }

    fn receive(&self) -> TransportResult<FrameStream> {
        let receiver = self.inbound.lock().take().ok_or(TransportError::AlreadyReceiving)?;
        Ok(UnboundedReceiverStream::new(receiver)
            .map(Ok)
            .take_until(self.closed.cancelled_owned())
            .boxed())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
