//! Per-document-type configuration.

use serde::{Deserialize, Serialize};

/// What a document type supports on its lines.
///
/// Purchase orders historically carried no discount column; that is a policy
/// here, not an accident: a nonzero discount on a procurement line is rejected
/// outright instead of ignored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPolicy {
    pub discount_enabled: bool,
}

impl DocumentPolicy {
    /// Quotations and invoices: discount applies.
    pub const SALES: DocumentPolicy = DocumentPolicy {
        discount_enabled: true,
    };

    /// Purchase orders: no discount column.
    pub const PROCUREMENT: DocumentPolicy = DocumentPolicy {
        discount_enabled: false,
    };
}
