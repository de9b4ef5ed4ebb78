//! Sales documents: quotations.
//!
//! A quotation collects line items while Draft or Sent, carries canonical
//! document totals, and once Approved becomes the sole legal input to the
//! quotation-to-invoice conversion.

pub mod quotation;

pub use quotation::{
    AddQuotationLine, ChangeQuotationStatus, CreateQuotation, MarkInvoiced, Quotation,
    QuotationCommand, QuotationCreated, QuotationEvent, QuotationId, QuotationInvoiced,
    QuotationLineAdded, QuotationLineRemoved, QuotationStatus, QuotationStatusChanged,
    RemoveQuotationLine,
};
