use std::collections::HashMap;
use std::sync::RwLock;

use docledger_core::{EntityId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<EntityId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn validate_batch(batch: &StreamAppend) -> Result<(EntityId, String), EventStoreError> {
        let entity_id = batch.events[0].entity_id;
        let aggregate_type = batch.events[0].aggregate_type.clone();

        for (idx, e) in batch.events.iter().enumerate() {
            if e.entity_id != entity_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple entity_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        Ok((entity_id, aggregate_type))
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.append_multi(vec![StreamAppend {
            events,
            expected_version,
        }])
    }

    fn append_multi(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batches: Vec<StreamAppend> =
            batches.into_iter().filter(|b| !b.events.is_empty()).collect();
        if batches.is_empty() {
            return Ok(vec![]);
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        // Validate every batch before writing anything, so a failure in a
        // later batch cannot leave earlier streams partially updated.
        let mut validated = Vec::with_capacity(batches.len());
        for batch in &batches {
            let (entity_id, aggregate_type) = Self::validate_batch(batch)?;

            if validated.iter().any(|(id, _, _)| *id == entity_id) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "duplicate stream {entity_id} in multi-stream append"
                )));
            }

            let stream = streams.get(&entity_id).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);

            if !batch.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {entity_id}: expected {:?}, found {current}",
                    batch.expected_version
                )));
            }

            if let Some(existing) = stream.first() {
                if existing.aggregate_type != aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, aggregate_type
                    )));
                }
            }

            validated.push((entity_id, current, batch.events.clone()));
        }

        // All checks passed; commit every batch.
        let mut committed = Vec::new();
        for (entity_id, current, events) in validated {
            let stream = streams.entry(entity_id).or_default();
            let mut next = current + 1;
            for e in events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    entity_id: e.entity_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, entity_id: EntityId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&entity_id).cloned().unwrap_or_default())
    }
}
