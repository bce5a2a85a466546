//! Newline-delimited JSON over a pair of byte streams.
//!
//! Each frame is one line. Lines that are not JSON (including invalid UTF-8)
//! or exceed the size limit are reported as [`TransportError::InvalidFrame`]
//! and the stream keeps going, so the engine can answer with a parse error
//! instead of tearing the session down.

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

use super::{FrameStream, Transport, TransportType, validate_json_frame};
use crate::cancellation::CancellationHandle;
use crate::config::MAX_FRAME_BYTES;
use crate::error::{TransportError, TransportResult};

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

pub struct StdioTransport {
    reader: Mutex<Option<BoxedReader>>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    connected: AtomicBool,
    closed: CancellationHandle,
    max_frame_bytes: usize,
}

impl StdioTransport {
    /// Transport over arbitrary byte streams (child process pipes,
    /// `tokio::io::duplex` halves, ...)
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        Self {
            reader: Mutex::new(Some(Box::pin(reader))),
            writer: tokio::sync::Mutex::new(Some(Box::pin(writer))),
            connected: AtomicBool::new(false),
            closed: CancellationHandle::new(),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }

    /// Transport over the process's own stdin and stdout
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    async fn connect(&self) -> TransportResult<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.connected.store(true, Ordering::SeqCst);
        debug!("stdio transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.cancel();
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await?;
        }
        debug!("stdio transport disconnected");
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(&frame).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    fn receive(&self) -> TransportResult<FrameStream> {
        let reader = self.reader.lock().take().ok_or(TransportError::AlreadyReceiving)?;
        let lines = FramedRead::new(reader, LineCodec::new(self.max_frame_bytes));

        let frames = lines
            .map(|line| match line {
                Ok(Line::Frame(frame)) => validate_json_frame(&frame).map(|_| frame),
                Ok(Line::Oversized) => {
                    warn!("dropping oversized stdio frame");
                    Err(TransportError::InvalidFrame(
                        "frame exceeds maximum length".to_string(),
                    ))
                }
                Err(e) => Err(TransportError::from(e)),
            })
            .take_until(self.closed.cancelled_owned());

        Ok(frames.boxed())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// One newline-terminated line, or the marker left by a line that was too
/// long to keep
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Frame(Bytes),
    Oversized,
}

/// Splits a byte stream on `\n` without interpreting the bytes. Unlike
/// `LinesCodec` it never fails on content, so one bad line cannot end the
/// stream.
#[derive(Debug)]
struct LineCodec {
    max_frame_bytes: usize,
    /// Offset already scanned for a newline in the pending line
    next_index: usize,
    /// Dropping the rest of an oversized line
    discarding: bool,
}

impl LineCodec {
    fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, Self::Error> {
        loop {
            if self.discarding {
                return match buf.iter().position(|b| *b == b'\n') {
                    Some(pos) => {
                        buf.advance(pos + 1);
                        self.discarding = false;
                        Ok(Some(Line::Oversized))
                    }
                    None => {
                        buf.clear();
                        Ok(None)
                    }
                };
            }

            let Some(offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') else {
                if buf.len() > self.max_frame_bytes {
                    self.next_index = 0;
                    self.discarding = true;
                    continue;
                }
                self.next_index = buf.len();
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;
            let mut line = buf.split_to(end + 1);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > self.max_frame_bytes {
                return Ok(Some(Line::Oversized));
            }
            return Ok(Some(Line::Frame(line.freeze())));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        // Trailing line without newline
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            buf.clear();
            return Ok(Some(Line::Oversized));
        }
        let line = buf.split().freeze();
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(Line::Frame(line)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader, duplex};
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_send_appends_newline() {
        let (ours, theirs) = duplex(1024);
        let (their_read, _their_write) = tokio::io::split(theirs);
        let (our_read, our_write) = tokio::io::split(ours);

        let transport = StdioTransport::new(our_read, our_write);
        transport.connect().await.unwrap();
        transport.send(Bytes::from_static(br#"{"jsonrpc":"2.0","method":"a"}"#)).await.unwrap();

        let mut lines = BufReader::new(their_read).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"jsonrpc":"2.0","method":"a"}"#
        );
    }

    #[tokio::test]
    async fn test_receive_skips_blank_lines_and_flags_bad_json() {
        let (ours, theirs) = duplex(1024);
        let (their_read, mut their_write) = tokio::io::split(theirs);
        let (our_read, our_write) = tokio::io::split(ours);

        let transport = StdioTransport::new(our_read, our_write);
        transport.connect().await.unwrap();
        let mut inbound = transport.receive().unwrap();

        their_write.write_all(b"\n{not json}\r\n{\"ok\":true}\n").await.unwrap();

        assert!(matches!(
            inbound.next().await.unwrap(),
            Err(TransportError::InvalidFrame(_))
        ));
        assert_eq!(
            inbound.next().await.unwrap().unwrap(),
            Bytes::from_static(b"{\"ok\":true}")
        );

        drop(their_write);
        drop(their_read);
        assert!(inbound.next().await.is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_oversized_line_is_reported_and_skipped() {
        let (ours, theirs) = duplex(1024);
        let (_their_read, mut their_write) = tokio::io::split(theirs);
        let (our_read, our_write) = tokio::io::split(ours);

        let transport = StdioTransport::new(our_read, our_write).with_max_frame_bytes(16);
        transport.connect().await.unwrap();
        let mut inbound = transport.receive().unwrap();

        their_write
            .write_all(b"{\"padding\":\"xxxxxxxxxxxxxxxx\"}\n{\"ok\":1}\n")
            .await
            .unwrap();

        assert!(matches!(
            inbound.next().await.unwrap(),
            Err(TransportError::InvalidFrame(_))
        ));
        assert_eq!(
            inbound.next().await.unwrap().unwrap(),
            Bytes::from_static(b"{\"ok\":1}")
        );
        assert!(logs_contain("dropping oversized stdio frame"));
    }

    #[test]
    fn test_codec_waits_for_newline_across_reads() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"{\"a\":"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"1}\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Line::Frame(Bytes::from_static(b"{\"a\":1}")))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_discards_oversized_line_split_across_reads() {
        let mut codec = LineCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"abcdef\n[1]\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Line::Oversized));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Line::Frame(Bytes::from_static(b"[1]")))
        );
    }

    #[test]
    fn test_codec_passes_non_utf8_bytes_through() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"\xff\xfe\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Line::Frame(Bytes::from_static(b"\xff\xfe")))
        );
    }

    #[test]
    fn test_codec_yields_trailing_line_at_eof() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"  \n{}"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Line::Frame(Bytes::from_static(b"{}")))
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_stream() {
        let (ours, theirs) = duplex(1024);
        let (_their_read, mut their_write) = tokio::io::split(theirs);
        let (our_read, our_write) = tokio::io::split(ours);

        let transport = StdioTransport::new(our_read, our_write);
        transport.connect().await.unwrap();
        let mut inbound = transport.receive().unwrap();

        their_write.write_all(b"\xff\xfe\n[]\n").await.unwrap();

        assert!(matches!(
            inbound.next().await.unwrap(),
            Err(TransportError::InvalidFrame(_))
        ));
        assert_eq!(inbound.next().await.unwrap().unwrap(), Bytes::from_static(b"[]"));
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (ours, _theirs) = duplex(64);
        let (r, w) = tokio::io::split(ours);
        let transport = StdioTransport::new(r, w);
        assert!(matches!(
            transport.send(Bytes::from_static(b"{}")).await,
            Err(TransportError::NotConnected)
        ));
    }
}
