//! Parties domain module (customers and vendors, event-sourced).
//!
//! This crate contains business rules for parties, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod party;

pub use party::{
    ContactInfo, Party, PartyCommand, PartyEvent, PartyId, PartyKind, PartyRegistered,
    PartyUpdated, RegisterParty, UpdateDetails,
};
