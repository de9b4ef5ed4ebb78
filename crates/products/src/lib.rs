//! Products domain module (catalog items, event-sourced).
//!
//! This crate contains business rules for catalog products, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage).

pub mod product;

pub use product::{
    ArchiveProduct, CreateProduct, PriceUpdated, Product, ProductArchived, ProductCommand,
    ProductCreated, ProductEvent, ProductId, ProductKind, ProductStatus, UpdatePrice,
};
