//! Invoices and their settlement bookkeeping.
//!
//! An invoice keeps a running `amount_paid` fed exclusively by settlements
//! from the payment ledger. Paid is earned, never requested; Overdue is
//! computed on read.

pub mod invoice;

pub use invoice::{
    AddInvoiceLine, ChangeInvoiceStatus, CreateInvoice, Invoice, InvoiceCommand, InvoiceCreated,
    InvoiceEvent, InvoiceId, InvoiceLineAdded, InvoiceLineRemoved, InvoiceSettled, InvoiceStatus,
    InvoiceStatusChanged, RegisterSettlement, RemoveInvoiceLine,
};
