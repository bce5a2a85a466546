//! Explicit batching of outbound calls.
//!
//! Calls and notifications queued on a [`Batch`] leave as one JSON array
//! frame when the batch is flushed or dropped. An empty batch writes nothing.

use serde_json::Value;
use strand_json_rpc::{JsonRpcNotification, JsonRpcRequest};

use super::pending::ResponseFuture;
use super::{Command, Connection, Outbound};
use crate::error::{McpError, McpResult};

pub struct Batch {
    connection: Connection,
    entries: Vec<Outbound>,
}

impl Batch {
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            connection,
            entries: Vec::new(),
        }
    }

    /// Queue a request; the returned future resolves once the batch has been
    /// sent and the peer answered this entry.
    pub fn call(&mut self, method: impl Into<String>, params: Option<Value>) -> ResponseFuture {
        let method = method.into();
        let id = self.connection.next_request_id();
        if let Err(error) = self.connection.check_capability(&method) {
            return ResponseFuture::ready(id, Err(error));
        }
        let (waiter, future) = self.connection.response_slot(id.clone());
        self.entries.push(Outbound {
            envelope: JsonRpcRequest::new(id, method, params).into(),
            waiter: Some(waiter),
            related: None,
        });
        future
    }

    pub fn notify(&mut self, method: impl Into<String>, params: Option<Value>) {
        self.entries.push(Outbound {
            envelope: JsonRpcNotification::new(method, params).into(),
            waiter: None,
            related: None,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Send everything queued so far as one frame
    pub fn flush(mut self) -> McpResult<()> {
        self.send_entries()
    }

    fn send_entries(&mut self) -> McpResult<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let entries = std::mem::take(&mut self.entries);
        self.connection
            .send_command(Command::Batch(entries))
            .map_err(|_| McpError::ConnectionClosed)
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        let _ = self.send_entries();
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch").field("entries", &self.entries.len()).finish()
    }
}
