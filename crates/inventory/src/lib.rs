//! Inventory kardex: per-product append-only movement logs.

pub mod kardex;

pub use kardex::{
    KardexCommand, KardexEntry, KardexEvent, MovementKind, MovementPosted, PostMovement,
    ProductKardex,
};
