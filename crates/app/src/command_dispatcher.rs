//! Command execution pipeline.
//!
//! Implements the command dispatch pattern for event-sourced aggregates:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply history)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (projections, hooks)
//! ```
//!
//! The dispatcher contains no IO itself; it composes the `EventStore` and
//! `EventBus` traits, so tests run it against in-memory implementations.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use docledger_core::{Aggregate, DomainError, EntityId, ExpectedVersion};
use docledger_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Deterministic domain rejection; the ledger is unchanged.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Failed to deserialize historical event payloads.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once; a retry
    /// may duplicate delivery).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Sits between callers and the store/bus pair, giving every command the same
/// lifecycle: load, rehydrate, decide, persist, publish. Events are persisted
/// before publication, so a failed append publishes nothing; a failed publish
/// after a successful append surfaces as [`DispatchError::Publish`] with the
/// events already durable (at-least-once delivery).
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// `make_aggregate` builds a fresh instance for rehydration (for example
    /// `|id| Invoice::empty(InvoiceId::new(id))`), which keeps the dispatcher
    /// generic over aggregate types and lets the caller inject configuration
    /// such as ledger policies.
    ///
    /// Concurrency is optimistic: the version observed at load time is
    /// expected at append time, so two racing commands against the same
    /// stream cannot both pass a balance or stock check against stale state.
    /// The loser fails with [`DispatchError::Concurrency`] and can be retried
    /// against fresh state.
    pub fn dispatch<A>(
        &self,
        entity_id: EntityId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(EntityId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: docledger_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(entity_id)?;
        validate_loaded_stream(entity_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate
        let mut aggregate = make_aggregate(entity_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(entity_id, aggregate_type.clone(), Uuid::now_v7(), ev)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Publish a batch of already-committed events.
    ///
    /// Used by multi-stream operations that append through
    /// [`EventStore::append_multi`] and publish afterwards.
    pub fn publish_committed(&self, committed: &[StoredEvent]) -> Result<(), DispatchError> {
        for stored in committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }
        Ok(())
    }
}

pub(crate) fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

pub(crate) fn validate_loaded_stream(
    entity_id: EntityId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // The stream must belong to the requested aggregate and be monotonically
    // increasing by sequence number, even if a buggy backend says otherwise.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.entity_id != entity_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!("loaded stream contains wrong entity_id at index {idx}"),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

pub(crate) fn apply_history<A>(
    aggregate: &mut A,
    history: &[StoredEvent],
) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
