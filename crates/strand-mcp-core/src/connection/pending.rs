use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use strand_json_rpc::RequestId;
use tokio::sync::{mpsc, oneshot};

use super::{CancelReason, Command};
use crate::error::{McpError, McpResult};

pub(crate) type Waiter = oneshot::Sender<McpResult<Value>>;

/// Pending response to an outbound request.
///
/// Resolves to the peer's result, its error, or a local failure (transport
/// error, cancellation, connection closed). Dropping an unresolved future
/// removes it from the pending table and tells the peer to stop.
#[must_use = "a dropped ResponseFuture cancels its request"]
pub struct ResponseFuture {
    id: RequestId,
    receiver: oneshot::Receiver<McpResult<Value>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    finished: bool,
}

impl ResponseFuture {
    pub(crate) fn new(
        id: RequestId,
        receiver: oneshot::Receiver<McpResult<Value>>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            receiver,
            commands: Some(commands),
            finished: false,
        }
    }

    /// Already-resolved future, for calls rejected before they hit the wire
    pub(crate) fn ready(id: RequestId, result: McpResult<Value>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self {
            id,
            receiver,
            commands: None,
            finished: false,
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Cancel the request. The future resolves with [`McpError::Cancelled`]
    /// and a late response from the peer is discarded.
    pub fn cancel(&mut self) {
        self.cancel_with_reason(None);
    }

    pub fn cancel_with_reason(&mut self, reason: Option<String>) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Cancel {
                id: self.id.clone(),
                reason: CancelReason::Explicit(reason),
            });
        }
    }
}

impl Future for ResponseFuture {
    type Output = McpResult<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(result) => {
                this.finished = true;
                Poll::Ready(result.unwrap_or(Err(McpError::ConnectionClosed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Cancel {
                id: self.id.clone(),
                reason: CancelReason::Dropped,
            });
        }
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}
