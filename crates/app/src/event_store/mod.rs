//! Append-only event store boundary.
//!
//! Defines the storage abstraction for aggregate event streams without making
//! storage assumptions. The ledger-specific addition is `append_multi`:
//! conversions and settlement bookkeeping commit to several streams as one
//! atomic unit.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
