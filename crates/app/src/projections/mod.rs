//! Projection implementations (read model builders).
//!
//! Projections consume published events and build query-optimized read
//! models. All projections are rebuildable from the event stream and
//! idempotent, so at-least-once delivery is safe.

pub mod stock;

pub use stock::{StockProjection, StockProjectionError, StockReadModel};
