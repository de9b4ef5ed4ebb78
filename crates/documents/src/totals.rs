//! Document-level totals: a pure fold over line items.
//!
//! Totals are recomputed in full on every line mutation; they are never
//! patched incrementally and never hand-edited, so they are always a function
//! of the current line list.

use serde::{Deserialize, Serialize};

use docledger_core::{DomainResult, Money};

use crate::line_item::LineItem;

/// Aggregated monetary totals of a commercial document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DocumentTotals {
    pub subtotal: Money,
    pub discount_amount: Money,
    pub tax_amount: Money,
    pub total_amount: Money,
}

impl DocumentTotals {
    /// Fold a line list into document totals.
    ///
    /// `total_amount = subtotal - discount_amount + tax_amount`, with each
    /// component summed from the same per-line breakdown that produces the
    /// line totals, so the document total always equals the sum of line
    /// totals.
    pub fn aggregate(items: &[LineItem]) -> DomainResult<DocumentTotals> {
        let mut totals = DocumentTotals::default();

        for item in items {
            let amounts = item.amounts()?;
            totals.subtotal = totals.subtotal.checked_add(amounts.base)?;
            totals.discount_amount = totals.discount_amount.checked_add(amounts.discount_amount)?;
            totals.tax_amount = totals.tax_amount.checked_add(amounts.tax_amount)?;
            totals.total_amount = totals.total_amount.checked_add(amounts.total)?;
        }

        Ok(totals)
    }
}
