//! One row of a commercial document.
//!
//! A line item references a product by id but carries a **snapshot** of the
//! product name and unit price captured when the line was added. Later catalog
//! edits never alter historical documents.

use serde::{Deserialize, Serialize};

use docledger_core::{DomainError, DomainResult, Money, Percent};
use docledger_products::ProductId;

use crate::policy::DocumentPolicy;

/// Per-line monetary breakdown, all derived from the same inputs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    /// quantity × unit price, before discount and tax.
    pub base: Money,
    pub discount_amount: Money,
    pub tax_amount: Money,
    pub total: Money,
}

/// One row of a quotation, invoice, or purchase order.
///
/// Owned exclusively by its parent document; conversions deep-copy lines
/// rather than share them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    /// Snapshot of the product name at the time the line was added.
    pub product_name: String,
    /// Snapshot of the catalog unit price at the time the line was added.
    pub unit_price: Money,
    pub quantity: u32,
    pub discount: Percent,
    pub tax: Percent,
}

impl LineItem {
    /// Validate and build a line item.
    ///
    /// Rejects bad input with a validation error naming the offending field;
    /// nothing is coerced or clamped.
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
        discount: Percent,
        tax: Percent,
    ) -> DomainResult<Self> {
        if quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }
        if unit_price.is_negative() {
            return Err(DomainError::validation("unit_price must not be negative"));
        }
        let product_name = product_name.into();
        if product_name.trim().is_empty() {
            return Err(DomainError::validation("product_name cannot be empty"));
        }

        Ok(Self {
            product_id,
            product_name,
            unit_price,
            quantity,
            discount,
            tax,
        })
    }

    /// Check this line against a document type's policy.
    pub fn admissible_under(&self, policy: DocumentPolicy) -> DomainResult<()> {
        if !policy.discount_enabled && !self.discount.is_zero() {
            return Err(DomainError::validation(
                "discount is not supported on this document type",
            ));
        }
        Ok(())
    }

    /// Full per-line breakdown: discount on the base, tax on the discounted
    /// amount.
    pub fn amounts(&self) -> DomainResult<LineAmounts> {
        let base = self.unit_price.times(self.quantity)?;
        let discount_amount = base.apply(self.discount);
        let after_discount = base.checked_sub(discount_amount)?;
        let tax_amount = after_discount.apply(self.tax);
        let total = after_discount.checked_add(tax_amount)?;

        Ok(LineAmounts {
            base,
            discount_amount,
            tax_amount,
            total,
        })
    }

    /// The computed line total (never stored, always derived).
    pub fn line_total(&self) -> DomainResult<Money> {
        Ok(self.amounts()?.total)
    }
}
