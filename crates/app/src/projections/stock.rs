use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use docledger_core::EntityId;
use docledger_events::EventEnvelope;
use docledger_inventory::KardexEvent;
use docledger_products::ProductId;

use crate::read_model::ReadModelStore;

/// Queryable stock read model: current quantity per product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockReadModel {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Error)]
pub enum StockProjectionError {
    #[error("failed to deserialize kardex event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Stock projection.
///
/// Consumes published envelopes from kardex streams and maintains a
/// per-product quantity read model. Events from other aggregate types are
/// ignored, so the projection can be wired to a bus that carries everything.
#[derive(Debug)]
pub struct StockProjection<S>
where
    S: ReadModelStore<ProductId, StockReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<EntityId, u64>>,
}

impl<S> StockProjection<S>
where
    S: ReadModelStore<ProductId, StockReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, product_id: &ProductId) -> Option<StockReadModel> {
        self.store.get(product_id)
    }

    pub fn list(&self) -> Vec<StockReadModel> {
        self.store.list()
    }

    /// Drop all state and re-apply the given envelopes in order.
    ///
    /// Projections are derived data; this is the recovery path after a lost
    /// or corrupted read model.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: Vec<EventEnvelope<JsonValue>>,
    ) -> Result<(), StockProjectionError> {
        self.store.clear();
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        for envelope in &envelopes {
            self.apply_envelope(envelope)?;
        }
        Ok(())
    }

    /// Apply a published envelope into the projection.
    ///
    /// Idempotent for at-least-once delivery: replays at or below the
    /// per-stream cursor are ignored.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockProjectionError> {
        if envelope.aggregate_type() != "inventory.kardex" {
            return Ok(());
        }

        let entity_id = envelope.entity_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let last = *cursors.get(&entity_id).unwrap_or(&0);

        if seq == 0 {
            return Err(StockProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(StockProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: KardexEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockProjectionError::Deserialize(e.to_string()))?;

        let KardexEvent::MovementPosted(posted) = event;
        self.store.upsert(
            posted.product_id,
            StockReadModel {
                product_id: posted.product_id,
                quantity: posted.new_stock,
            },
        );

        cursors.insert(entity_id, seq);
        Ok(())
    }
}
