//! Event persistence for SSE resumability.
//!
//! Every message written to an SSE stream can be recorded under the stream it
//! was sent on. A client that lost the stream reconnects with `Last-Event-ID`
//! and receives everything recorded after that event on the same stream.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

pub type EventId = String;
pub type StreamId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub message: Value,
}

/// Events recorded after a given id, and the stream they belong to
#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    pub stream_id: StreamId,
    pub events: Vec<StoredEvent>,
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("Unknown event id: {0}")]
    UnknownEvent(String),

    #[error("Event store error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Record a message sent on `stream_id` and return its event id
    async fn store_event(&self, stream_id: &str, message: &Value) -> Result<EventId, EventStoreError>;

    /// Events recorded on the same stream after `last_event_id`, oldest first
    async fn replay_events_after(&self, last_event_id: &str) -> Result<Replay, EventStoreError>;
}

/// Event store kept in process memory.
///
/// Event ids are `"<streamId>_<counter>"` with one counter shared by all
/// streams, so the stream can be recovered from any id.
#[derive(Debug)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<StreamId, VecDeque<StoredEvent>>>,
    counter: AtomicU64,
    max_events_per_stream: usize,
}

impl InMemoryEventStore {
    pub const DEFAULT_MAX_EVENTS_PER_STREAM: usize = 1000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_MAX_EVENTS_PER_STREAM)
    }

    /// Keep at most `max_events_per_stream` events per stream, evicting the
    /// oldest first
    pub fn with_capacity(max_events_per_stream: usize) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(1),
            max_events_per_stream: max_events_per_stream.max(1),
        }
    }

    pub fn stream_of(event_id: &str) -> Option<&str> {
        event_id
            .rsplit_once('_')
            .filter(|(_, counter)| counter.parse::<u64>().is_ok())
            .map(|(stream, _)| stream)
    }

    pub fn event_count(&self) -> usize {
        self.streams.lock().values().map(VecDeque::len).sum()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(&self, stream_id: &str, message: &Value) -> Result<EventId, EventStoreError> {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let event_id = format!("{}_{}", stream_id, counter);

        let mut streams = self.streams.lock();
        let events = streams.entry(stream_id.to_string()).or_default();
        events.push_back(StoredEvent {
            event_id: event_id.clone(),
            message: message.clone(),
        });
        while events.len() > self.max_events_per_stream {
            events.pop_front();
        }
        Ok(event_id)
    }

    async fn replay_events_after(&self, last_event_id: &str) -> Result<Replay, EventStoreError> {
        let unknown = || EventStoreError::UnknownEvent(last_event_id.to_string());
        let stream_id = Self::stream_of(last_event_id).ok_or_else(unknown)?;

        let streams = self.streams.lock();
        let events = streams.get(stream_id).ok_or_else(unknown)?;
        let position = events
            .iter()
            .position(|e| e.event_id == last_event_id)
            .ok_or_else(unknown)?;

        let events: Vec<StoredEvent> = events.iter().skip(position + 1).cloned().collect();
        debug!(
            stream_id = %stream_id,
            after = %last_event_id,
            count = events.len(),
            "replaying events"
        );
        Ok(Replay {
            stream_id: stream_id.to_string(),
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replay_returns_later_events_in_order() {
        let store = InMemoryEventStore::new();
        let first = store.store_event("s1", &json!({"n": 1})).await.unwrap();
        store.store_event("s2", &json!({"n": 99})).await.unwrap();
        store.store_event("s1", &json!({"n": 2})).await.unwrap();
        store.store_event("s1", &json!({"n": 3})).await.unwrap();

        let replay = store.replay_events_after(&first).await.unwrap();
        assert_eq!(replay.stream_id, "s1");
        let numbers: Vec<_> = replay.events.iter().map(|e| e.message["n"].clone()).collect();
        assert_eq!(numbers, vec![json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_replay_after_last_event_is_empty() {
        let store = InMemoryEventStore::new();
        let last = store.store_event("s1", &json!({})).await.unwrap();
        let replay = store.replay_events_after(&last).await.unwrap();
        assert!(replay.events.is_empty());
    }

    #[tokio::test]
    async fn test_event_ids_carry_stream_with_underscores() {
        let store = InMemoryEventStore::new();
        let id = store.store_event("_GET_stream", &json!({})).await.unwrap();
        assert!(id.starts_with("_GET_stream_"));
        assert_eq!(InMemoryEventStore::stream_of(&id), Some("_GET_stream"));
    }

    #[tokio::test]
    async fn test_unknown_event_id() {
        let store = InMemoryEventStore::new();
        store.store_event("s1", &json!({})).await.unwrap();
        assert!(matches!(
            store.replay_events_after("s1_999").await,
            Err(EventStoreError::UnknownEvent(_))
        ));
        assert!(matches!(
            store.replay_events_after("garbage").await,
            Err(EventStoreError::UnknownEvent(_))
        ));
    }

    #[tokio::test]
    async fn test_oldest_events_are_evicted() {
        let store = InMemoryEventStore::with_capacity(2);
        let first = store.store_event("s", &json!(1)).await.unwrap();
        let second = store.store_event("s", &json!(2)).await.unwrap();
        store.store_event("s", &json!(3)).await.unwrap();

        assert_eq!(store.event_count(), 2);
        assert!(store.replay_events_after(&first).await.is_err());
        let replay = store.replay_events_after(&second).await.unwrap();
        assert_eq!(replay.events.len(), 1);
    }
}
