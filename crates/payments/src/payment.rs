use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docledger_core::{Aggregate, AggregateRoot, DomainError, EntityId, Money, impl_entity_id};
use docledger_events::Event;
use docledger_parties::PartyId;

/// Payment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub EntityId);

impl_entity_id!(PaymentId);

/// Direction of money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    /// Money in, settling an invoice.
    Receipt,
    /// Money out, settling a purchase order.
    Disbursement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
    Cheque,
    Other,
}

/// Which kind of document a payment settles. Documents are referenced by
/// plain entity id so this crate stays independent of the document crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentRefKind {
    Invoice,
    PurchaseOrder,
}

/// Aggregate root: Payment. A payment is written once and never edited or
/// deleted; mistakes are corrected with a new offsetting payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    id: PaymentId,
    kind: PaymentKind,
    amount: Money,
    date: DateTime<Utc>,
    method: PaymentMethod,
    party_id: PartyId,
    reference_id: EntityId,
    reference_kind: DocumentRefKind,
    version: u64,
    created: bool,
}

impl Payment {
    pub fn empty(id: PaymentId) -> Self {
        Self {
            id,
            kind: PaymentKind::Receipt,
            amount: Money::ZERO,
            date: DateTime::<Utc>::MIN_UTC,
            method: PaymentMethod::Other,
            party_id: PartyId::new(EntityId::nil()),
            reference_id: EntityId::nil(),
            reference_kind: DocumentRefKind::Invoice,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PaymentId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn kind(&self) -> PaymentKind {
        self.kind
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    pub fn reference_id(&self) -> EntityId {
        self.reference_id
    }

    pub fn reference_kind(&self) -> DocumentRefKind {
        self.reference_kind
    }
}

impl AggregateRoot for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordPayment. The only command a payment ever accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub payment_id: PaymentId,
    pub kind: PaymentKind,
    pub amount: Money,
    pub date: DateTime<Utc>,
    pub method: PaymentMethod,
    pub party_id: PartyId,
    pub reference_id: EntityId,
    pub reference_kind: DocumentRefKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentCommand {
    RecordPayment(RecordPayment),
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub payment_id: PaymentId,
    pub kind: PaymentKind,
    pub amount: Money,
    pub date: DateTime<Utc>,
    pub method: PaymentMethod,
    pub party_id: PartyId,
    pub reference_id: EntityId,
    pub reference_kind: DocumentRefKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEvent {
    PaymentRecorded(PaymentRecorded),
}

impl Event for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentRecorded(_) => "payments.payment.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::PaymentRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Payment {
    type Command = PaymentCommand;
    type Event = PaymentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PaymentEvent::PaymentRecorded(e) => {
                self.id = e.payment_id;
                self.kind = e.kind;
                self.amount = e.amount;
                self.date = e.date;
                self.method = e.method;
                self.party_id = e.party_id;
                self.reference_id = e.reference_id;
                self.reference_kind = e.reference_kind;
                self.created = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PaymentCommand::RecordPayment(cmd) => self.handle_record(cmd),
        }
    }
}

impl Payment {
    fn handle_record(&self, cmd: &RecordPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("payment already recorded"));
        }
        if cmd.amount.minor() <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }

        let consistent = matches!(
            (cmd.kind, cmd.reference_kind),
            (PaymentKind::Receipt, DocumentRefKind::Invoice)
                | (PaymentKind::Disbursement, DocumentRefKind::PurchaseOrder)
        );
        if !consistent {
            return Err(DomainError::validation(
                "receipts settle invoices, disbursements settle purchase orders",
            ));
        }

        Ok(vec![PaymentEvent::PaymentRecorded(PaymentRecorded {
            payment_id: cmd.payment_id,
            kind: cmd.kind,
            amount: cmd.amount,
            date: cmd.date,
            method: cmd.method,
            party_id: cmd.party_id,
            reference_id: cmd.reference_id,
            reference_kind: cmd.reference_kind,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_cmd(kind: PaymentKind, reference_kind: DocumentRefKind, amount: i64) -> RecordPayment {
        RecordPayment {
            payment_id: PaymentId::generate(),
            kind,
            amount: Money::from_minor(amount),
            date: Utc::now(),
            method: PaymentMethod::BankTransfer,
            party_id: PartyId::generate(),
            reference_id: EntityId::new(),
            reference_kind,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn recording_a_receipt_against_an_invoice_succeeds() {
        let cmd = record_cmd(PaymentKind::Receipt, DocumentRefKind::Invoice, 19_620);
        let mut payment = Payment::empty(cmd.payment_id);
        let events = payment
            .handle(&PaymentCommand::RecordPayment(cmd.clone()))
            .unwrap();
        payment.apply(&events[0]);

        assert!(payment.exists());
        assert_eq!(payment.amount(), Money::from_minor(19_620));
        assert_eq!(payment.reference_kind(), DocumentRefKind::Invoice);
    }

    #[test]
    fn zero_or_negative_amounts_are_rejected() {
        for amount in [0, -500] {
            let cmd = record_cmd(PaymentKind::Receipt, DocumentRefKind::Invoice, amount);
            let payment = Payment::empty(cmd.payment_id);
            let err = payment
                .handle(&PaymentCommand::RecordPayment(cmd))
                .unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains("positive"));
        }
    }

    #[test]
    fn kind_and_reference_must_agree() {
        let cmd = record_cmd(PaymentKind::Receipt, DocumentRefKind::PurchaseOrder, 100);
        let payment = Payment::empty(cmd.payment_id);
        let err = payment
            .handle(&PaymentCommand::RecordPayment(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn a_payment_is_recorded_at_most_once() {
        let cmd = record_cmd(PaymentKind::Disbursement, DocumentRefKind::PurchaseOrder, 100);
        let mut payment = Payment::empty(cmd.payment_id);
        let events = payment
            .handle(&PaymentCommand::RecordPayment(cmd.clone()))
            .unwrap();
        payment.apply(&events[0]);

        let err = payment
            .handle(&PaymentCommand::RecordPayment(cmd))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("already recorded"));
    }
}
