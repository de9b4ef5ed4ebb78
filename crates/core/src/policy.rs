//! Ledger-wide enforcement flags.

use serde::{Deserialize, Serialize};

/// Correctness guards that some businesses intentionally relax.
///
/// Defaults enforce both guards: payments may not exceed the remaining
/// balance, and issues/returns may not drive stock negative. Deployments that
/// accept refund-style overpayment or backordered stock flip the flags.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LedgerPolicy {
    /// Accept payments that exceed the remaining balance.
    pub allow_overpayment: bool,
    /// Accept issues/purchase-returns that drive stock below zero.
    pub allow_negative_stock: bool,
}

impl LedgerPolicy {
    pub const fn strict() -> Self {
        Self {
            allow_overpayment: false,
            allow_negative_stock: false,
        }
    }
}
