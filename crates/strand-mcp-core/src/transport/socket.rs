//! Persistent TCP transport with heartbeats and automatic reconnection.
//!
//! Frames are newline-delimited JSON. Heartbeats are 12 raw bytes: the magic
//! `F0 9F 92 93` followed by a little-endian `u64` millisecond timestamp, with
//! no trailing newline. A JSON frame can never start with `0xF0`, so the
//! decoder recognises heartbeats at any frame boundary.
//!
//! A supervisor task owns the socket. It interleaves outbound writes with
//! heartbeats, forwards inbound frames, and on failure walks the reconnect
//! policy. Sends issued while the socket is not `Ready` fail immediately.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, info, trace, warn};

use super::{FrameStream, Transport, TransportType, validate_json_frame};
use crate::cancellation::CancellationHandle;
use crate::config::SocketConfig;
use crate::error::{TransportError, TransportResult};

pub const HEARTBEAT_MAGIC: [u8; 4] = [0xF0, 0x9F, 0x92, 0x93];
pub const HEARTBEAT_LEN: usize = 12;

/// Liveness frame carrying the sender's wall clock in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub timestamp_millis: u64,
}

impl Heartbeat {
    pub fn now() -> Self {
        Self {
            timestamp_millis: chrono::Utc::now().timestamp_millis().max(0) as u64,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEARTBEAT_LEN] {
        let mut out = [0u8; HEARTBEAT_LEN];
        out[..4].copy_from_slice(&HEARTBEAT_MAGIC);
        out[4..].copy_from_slice(&self.timestamp_millis.to_le_bytes());
        out
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEARTBEAT_LEN || bytes[..4] != HEARTBEAT_MAGIC {
            return None;
        }
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[4..HEARTBEAT_LEN]);
        Some(Self {
            timestamp_millis: u64::from_le_bytes(timestamp),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    Message(Bytes),
    Heartbeat(Heartbeat),
    /// A line that had to be dropped (too long)
    Invalid(String),
}

/// Codec splitting a byte stream into JSON lines and heartbeat frames
#[derive(Debug)]
pub struct SocketCodec {
    max_frame_bytes: usize,
    /// Offset already scanned for a newline in the pending line
    next_index: usize,
    /// Skipping the rest of an oversized line
    discarding: bool,
}

impl SocketCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for SocketCodec {
    type Item = SocketFrame;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<SocketFrame>, Self::Error> {
        loop {
            if self.discarding {
                match buf.iter().position(|b| *b == b'\n') {
                    Some(pos) => {
                        buf.advance(pos + 1);
                        self.discarding = false;
                        return Ok(Some(SocketFrame::Invalid(format!(
                            "frame exceeds {} bytes",
                            self.max_frame_bytes
                        ))));
                    }
                    None => {
                        buf.clear();
                        return Ok(None);
                    }
                }
            }

            if self.next_index == 0 {
                // Blank separators between frames
                let blanks = buf.iter().take_while(|b| matches!(b, b'\n' | b'\r')).count();
                buf.advance(blanks);
                if buf.is_empty() {
                    return Ok(None);
                }

                let probe = buf.len().min(HEARTBEAT_MAGIC.len());
                if buf[..probe] == HEARTBEAT_MAGIC[..probe] {
                    if buf.len() < HEARTBEAT_LEN {
                        return Ok(None);
                    }
                    let frame = buf.split_to(HEARTBEAT_LEN);
                    if let Some(heartbeat) = Heartbeat::parse(&frame) {
                        return Ok(Some(SocketFrame::Heartbeat(heartbeat)));
                    }
                }
            }

            match buf[self.next_index..].iter().position(|b| *b == b'\n') {
                Some(offset) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let mut line = buf.split_to(end + 1);
                    line.truncate(end);
                    if line.last() == Some(&b'\r') {
                        line.truncate(end - 1);
                    }
                    if line.len() > self.max_frame_bytes {
                        return Ok(Some(SocketFrame::Invalid(format!(
                            "frame exceeds {} bytes",
                            self.max_frame_bytes
                        ))));
                    }
                    return Ok(Some(SocketFrame::Message(line.freeze())));
                }
                None if buf.len() > self.max_frame_bytes => {
                    self.next_index = 0;
                    self.discarding = true;
                }
                None => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<SocketFrame>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        // Trailing line without newline
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        self.next_index = 0;
        let line = buf.split_to(buf.len()).freeze();
        Ok(Some(SocketFrame::Message(line)))
    }
}

impl Encoder<SocketFrame> for SocketCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: SocketFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            SocketFrame::Message(bytes) => {
                dst.reserve(bytes.len() + 1);
                dst.put_slice(&bytes);
                dst.put_u8(b'\n');
            }
            SocketFrame::Heartbeat(heartbeat) => dst.put_slice(&heartbeat.to_bytes()),
            SocketFrame::Invalid(_) => {}
        }
        Ok(())
    }
}

/// Connection state published by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Setup,
    Preparing,
    Ready,
    Failed,
    Cancelled,
}

enum Endpoint {
    Connect(String),
    /// Already-accepted stream; usable once, never reconnected
    Accepted(Mutex<Option<TcpStream>>),
}

impl Endpoint {
    async fn open(&self) -> TransportResult<TcpStream> {
        match self {
            Endpoint::Connect(address) => {
                let stream = TcpStream::connect(address.as_str())
                    .await
                    .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", address, e)))?;
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Endpoint::Accepted(stream) => stream.lock().take().ok_or_else(|| {
                TransportError::ConnectionFailed("accepted socket cannot be reopened".to_string())
            }),
        }
    }

    fn can_reconnect(&self) -> bool {
        matches!(self, Endpoint::Connect(_))
    }
}

struct WriteRequest {
    frame: Bytes,
    reply: oneshot::Sender<TransportResult<()>>,
}

struct Session {
    writes: mpsc::Sender<WriteRequest>,
    shutdown: CancellationHandle,
    task: JoinHandle<()>,
}

struct SocketInner {
    endpoint: Endpoint,
    config: SocketConfig,
    state: watch::Sender<SocketState>,
    session: Mutex<Option<Session>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<TransportResult<Bytes>>>>,
}

impl SocketInner {
    fn set_state(&self, state: SocketState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = ?*current, to = ?state, "socket state change");
            *current = state;
            true
        });
    }
}

pub struct SocketTransport {
    inner: Arc<SocketInner>,
}

impl SocketTransport {
    /// Client transport that dials `address` (`host:port`)
    pub fn connect_to(address: impl Into<String>, config: SocketConfig) -> Self {
        Self::with_endpoint(Endpoint::Connect(address.into()), config)
    }

    /// Server-side transport over an accepted stream
    pub fn from_stream(stream: TcpStream, config: SocketConfig) -> Self {
        Self::with_endpoint(Endpoint::Accepted(Mutex::new(Some(stream))), config)
    }

    fn with_endpoint(endpoint: Endpoint, config: SocketConfig) -> Self {
        let (state, _) = watch::channel(SocketState::Setup);
        Self {
            inner: Arc::new(SocketInner {
                endpoint,
                config,
                state,
                session: Mutex::new(None),
                inbound: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SocketState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SocketState> {
        self.inner.state.subscribe()
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Socket
    }

    async fn connect(&self) -> TransportResult<()> {
        if self.state() == SocketState::Ready {
            return Ok(());
        }
        let shutdown = CancellationHandle::new();
        self.inner.set_state(SocketState::Preparing);

        let stream = match self.inner.endpoint.open().await {
            Ok(stream) => stream,
            Err(first_error) => {
                warn!(error = %first_error, "socket connect failed");
                if !self.inner.endpoint.can_reconnect() || !self.inner.config.reconnect.enabled {
                    self.inner.set_state(SocketState::Failed);
                    return Err(first_error);
                }
                match reconnect(&self.inner, &shutdown).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        self.inner.set_state(SocketState::Failed);
                        return Err(e);
                    }
                }
            }
        };

        let (writes_tx, writes_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        *self.inner.inbound.lock() = Some(inbound_rx);

        let framed = Framed::new(stream, SocketCodec::new(self.inner.config.max_frame_bytes));
        let task = tokio::spawn(supervise(
            self.inner.clone(),
            framed,
            writes_rx,
            inbound_tx,
            shutdown.clone(),
        ));
        *self.inner.session.lock() = Some(Session {
            writes: writes_tx,
            shutdown,
            task,
        });
        self.inner.set_state(SocketState::Ready);
        info!("socket transport ready");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.shutdown.cancel();
            drop(session.writes);
            if let Err(e) = session.task.await {
                warn!(error = %e, "socket supervisor ended abnormally");
            }
        }
        self.inner.set_state(SocketState::Cancelled);
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        if self.state() != SocketState::Ready {
            return Err(TransportError::NotConnected);
        }
        let writes = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.writes.clone())
            .ok_or(TransportError::NotConnected)?;

        let (reply, result) = oneshot::channel();
        writes
            .send(WriteRequest { frame, reply })
            .await
            .map_err(|_| TransportError::NotConnected)?;
        result
            .await
            .map_err(|_| TransportError::ConnectionLost("socket writer stopped".to_string()))?
    }

    fn receive(&self) -> TransportResult<FrameStream> {
        let receiver = self
            .inner
            .inbound
            .lock()
            .take()
            .ok_or(TransportError::AlreadyReceiving)?;
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    fn is_connected(&self) -> bool {
        self.state() == SocketState::Ready
    }
}

type SocketFramed = Framed<TcpStream, SocketCodec>;

enum DriveOutcome {
    Shutdown,
    Failed(TransportError),
}

async fn supervise(
    inner: Arc<SocketInner>,
    mut framed: SocketFramed,
    mut writes: mpsc::Receiver<WriteRequest>,
    inbound: mpsc::UnboundedSender<TransportResult<Bytes>>,
    shutdown: CancellationHandle,
) {
    loop {
        match drive(&inner, &mut framed, &mut writes, &inbound, &shutdown).await {
            DriveOutcome::Shutdown => {
                debug!("socket supervisor shutting down");
                break;
            }
            DriveOutcome::Failed(error) => {
                warn!(error = %error, "socket connection failed");
                inner.set_state(SocketState::Failed);
                fail_queued_writes(&mut writes);

                if !inner.endpoint.can_reconnect() || !inner.config.reconnect.enabled {
                    let _ = inbound.send(Err(TransportError::ConnectionLost(error.to_string())));
                    break;
                }
                match reconnect(&inner, &shutdown).await {
                    Ok(stream) => {
                        framed = Framed::new(stream, SocketCodec::new(inner.config.max_frame_bytes));
                        inner.set_state(SocketState::Ready);
                        info!("socket reconnected");
                    }
                    Err(TransportError::Closed) => break,
                    Err(e) => {
                        let _ = inbound.send(Err(e));
                        break;
                    }
                }
            }
        }
    }
    if shutdown.is_cancelled() {
        inner.set_state(SocketState::Cancelled);
    }
}

async fn drive(
    inner: &SocketInner,
    framed: &mut SocketFramed,
    writes: &mut mpsc::Receiver<WriteRequest>,
    inbound: &mpsc::UnboundedSender<TransportResult<Bytes>>,
    shutdown: &CancellationHandle,
) -> DriveOutcome {
    let heartbeat = &inner.config.heartbeat;
    let mut ticker = heartbeat
        .enabled
        .then(|| tokio::time::interval_at(Instant::now() + heartbeat.initial_delay, heartbeat.interval));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return DriveOutcome::Shutdown,

            frame = framed.next() => match frame {
                Some(Ok(SocketFrame::Message(bytes))) => {
                    let item = validate_json_frame(&bytes).map(|_| bytes);
                    if inbound.send(item).is_err() {
                        return DriveOutcome::Shutdown;
                    }
                }
                Some(Ok(SocketFrame::Heartbeat(beat))) => {
                    trace!(timestamp = beat.timestamp_millis, "heartbeat received");
                }
                Some(Ok(SocketFrame::Invalid(reason))) => {
                    let _ = inbound.send(Err(TransportError::InvalidFrame(reason)));
                }
                Some(Err(e)) => return DriveOutcome::Failed(e.into()),
                None => {
                    return DriveOutcome::Failed(TransportError::ConnectionLost(
                        "connection closed by peer".to_string(),
                    ));
                }
            },

            Some(request) = writes.recv() => {
                match framed.send(SocketFrame::Message(request.frame)).await {
                    Ok(()) => {
                        let _ = request.reply.send(Ok(()));
                    }
                    Err(e) => {
                        let error = TransportError::from(e);
                        let _ = request.reply.send(Err(error.clone()));
                        return DriveOutcome::Failed(error);
                    }
                }
            }

            _ = tick(&mut ticker) => {
                if let Err(e) = framed.send(SocketFrame::Heartbeat(Heartbeat::now())).await {
                    return DriveOutcome::Failed(e.into());
                }
                trace!("heartbeat sent");
            }
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn fail_queued_writes(writes: &mut mpsc::Receiver<WriteRequest>) {
    while let Ok(request) = writes.try_recv() {
        let _ = request.reply.send(Err(TransportError::NotConnected));
    }
}

/// Walk the backoff schedule until a connection opens, the attempts run out,
/// or `shutdown` fires (reported as `Closed`).
async fn reconnect(inner: &SocketInner, shutdown: &CancellationHandle) -> TransportResult<TcpStream> {
    let policy = &inner.config.reconnect;
    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay_for_attempt(attempt);
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling socket reconnect");

        tokio::select! {
            _ = shutdown.cancelled() => return Err(TransportError::Closed),
            _ = tokio::time::sleep(delay) => {}
        }

        inner.set_state(SocketState::Preparing);
        match inner.endpoint.open().await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                warn!(attempt, error = %e, "socket reconnect attempt failed");
                inner.set_state(SocketState::Failed);
            }
        }
    }
    Err(TransportError::ReconnectExhausted {
        attempts: policy.max_attempts,
    })
}
