//! Append-only payment ledger entries.

pub mod payment;

pub use payment::{
    DocumentRefKind, Payment, PaymentCommand, PaymentEvent, PaymentId, PaymentKind, PaymentMethod,
    PaymentRecorded, RecordPayment,
};
