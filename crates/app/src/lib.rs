//! Application layer: event store, command dispatch, projections, and the
//! ledger service that ties the domain crates together.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod service;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, StoredEvent, StreamAppend, UncommittedEvent,
};
pub use read_model::{InMemoryReadModelStore, ReadModelStore};
pub use service::{LeadConversion, LedgerService};

#[cfg(test)]
mod integration_tests;
