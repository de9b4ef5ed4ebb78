use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use docledger_core::{EntityId, ExpectedVersion};
use std::sync::Arc;

/// An event ready to be appended to a stream, not yet assigned a sequence
/// number. The store assigns sequence numbers during append.
///
/// Build one from a typed domain event with [`UncommittedEvent::from_typed`],
/// which serializes the payload to JSON and captures the event metadata
/// needed to deserialize it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub entity_id: EntityId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A persisted event with its assigned sequence number.
///
/// Sequence numbers are stream-scoped, start at 1, increase by one per event,
/// and never change once assigned. They drive replay ordering and the
/// optimistic concurrency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub entity_id: EntityId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an event envelope for publication.
    pub fn to_envelope(&self) -> docledger_events::EventEnvelope<JsonValue> {
        docledger_events::EventEnvelope::new(
            self.event_id,
            self.entity_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Event store operation error. These are infrastructure errors (storage,
/// concurrency), distinct from domain errors.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

/// One stream's contribution to a multi-stream append.
#[derive(Debug, Clone)]
pub struct StreamAppend {
    pub events: Vec<UncommittedEvent>,
    pub expected_version: ExpectedVersion,
}

/// Append-only event store.
///
/// Events are organized into streams, one per aggregate instance, keyed by
/// entity id. Within a stream, sequence numbers increase monotonically.
///
/// `append` must enforce optimistic concurrency against the current stream
/// version and persist its batch atomically. `append_multi` extends the same
/// guarantee across streams: conversions and settlement bookkeeping touch
/// several aggregates at once, and either every stream's batch commits or
/// none does.
pub trait EventStore: Send + Sync {
    /// Append events to a single aggregate stream.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Append to several streams as one atomic unit.
    ///
    /// Every batch's version check must pass before anything is written; a
    /// failure in any batch leaves every stream untouched.
    fn append_multi(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for an aggregate.
    fn load_stream(&self, entity_id: EntityId) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn append_multi(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_multi(batches)
    }

    fn load_stream(&self, entity_id: EntityId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(entity_id)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    pub fn from_typed<E>(
        entity_id: EntityId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: docledger_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            entity_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
