//! `docledger-documents` — building blocks shared by all commercial documents.
//!
//! Quotations, invoices, and purchase orders share the same line-item shape
//! and the same totals arithmetic; the aggregates in their own crates own the
//! lifecycle, this crate owns the money math.

pub mod line_item;
pub mod policy;
pub mod totals;

pub use line_item::{LineAmounts, LineItem};
pub use policy::DocumentPolicy;
pub use totals::DocumentTotals;
