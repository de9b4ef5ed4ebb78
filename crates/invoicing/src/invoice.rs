use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docledger_core::{
    Aggregate, AggregateRoot, DomainError, EntityId, LedgerPolicy, Money, impl_entity_id,
};
use docledger_documents::{DocumentPolicy, DocumentTotals, LineItem};
use docledger_events::Event;
use docledger_parties::PartyId;
use docledger_sales::QuotationId;

/// Invoice identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub EntityId);

impl_entity_id!(InvoiceId);

/// Stored invoice lifecycle. Draft → Sent → Paid, where Paid is reached only
/// by settlement. "Overdue" is never stored; it is computed on read from the
/// due date, see [`Invoice::is_overdue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    quotation_id: Option<QuotationId>,
    customer_id: PartyId,
    issue_date: DateTime<Utc>,
    due_date: DateTime<Utc>,
    status: InvoiceStatus,
    lines: Vec<LineItem>,
    totals: DocumentTotals,
    amount_paid: Money,
    policy: LedgerPolicy,
    version: u64,
    created: bool,
}

impl Invoice {
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            quotation_id: None,
            customer_id: PartyId::new(EntityId::nil()),
            issue_date: DateTime::<Utc>::MIN_UTC,
            due_date: DateTime::<Utc>::MIN_UTC,
            status: InvoiceStatus::Draft,
            lines: Vec::new(),
            totals: DocumentTotals::default(),
            amount_paid: Money::ZERO,
            policy: LedgerPolicy::strict(),
            version: 0,
            created: false,
        }
    }

    /// Replace the default strict policy. Applied by the dispatcher at
    /// rehydration time; the policy is configuration, not event state.
    pub fn with_policy(mut self, policy: LedgerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn quotation_id(&self) -> Option<QuotationId> {
        self.quotation_id
    }

    pub fn customer_id(&self) -> PartyId {
        self.customer_id
    }

    pub fn issue_date(&self) -> DateTime<Utc> {
        self.issue_date
    }

    pub fn due_date(&self) -> DateTime<Utc> {
        self.due_date
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn totals(&self) -> DocumentTotals {
        self.totals
    }

    pub fn amount_paid(&self) -> Money {
        self.amount_paid
    }

    /// Outstanding amount: total minus everything settled so far.
    pub fn remaining_balance(&self) -> Money {
        Money::from_minor(self.totals.total_amount.minor() - self.amount_paid.minor())
    }

    /// Computed on read, never stored: past due and not yet paid.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due_date < now && self.status != InvoiceStatus::Paid
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, InvoiceStatus::Draft | InvoiceStatus::Sent)
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice. Carries its opening line list and totals so the
/// quotation conversion can seed both verbatim; direct creation passes an
/// empty list and default totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub invoice_id: InvoiceId,
    pub quotation_id: Option<QuotationId>,
    pub customer_id: PartyId,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub lines: Vec<LineItem>,
    pub totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddInvoiceLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddInvoiceLine {
    pub invoice_id: InvoiceId,
    pub line: LineItem,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveInvoiceLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveInvoiceLine {
    pub invoice_id: InvoiceId,
    /// 1-based position in the current line list.
    pub line_no: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeInvoiceStatus. Only Draft → Sent is requestable; Paid is
/// reached exclusively through settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInvoiceStatus {
    pub invoice_id: InvoiceId,
    pub requested: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterSettlement (issued by the payment ledger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSettlement {
    pub invoice_id: InvoiceId,
    pub payment_id: EntityId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateInvoice(CreateInvoice),
    AddInvoiceLine(AddInvoiceLine),
    RemoveInvoiceLine(RemoveInvoiceLine),
    ChangeInvoiceStatus(ChangeInvoiceStatus),
    RegisterSettlement(RegisterSettlement),
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub invoice_id: InvoiceId,
    pub quotation_id: Option<QuotationId>,
    pub customer_id: PartyId,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub lines: Vec<LineItem>,
    pub totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineAdded {
    pub invoice_id: InvoiceId,
    pub line_no: usize,
    pub line: LineItem,
    pub new_totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceLineRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineRemoved {
    pub invoice_id: InvoiceId,
    pub line_no: usize,
    pub new_totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceStatusChanged {
    pub invoice_id: InvoiceId,
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceSettled. Carries the new running amount paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSettled {
    pub invoice_id: InvoiceId,
    pub payment_id: EntityId,
    pub amount: Money,
    pub new_amount_paid: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    InvoiceLineAdded(InvoiceLineAdded),
    InvoiceLineRemoved(InvoiceLineRemoved),
    InvoiceStatusChanged(InvoiceStatusChanged),
    InvoiceSettled(InvoiceSettled),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "invoicing.invoice.created",
            InvoiceEvent::InvoiceLineAdded(_) => "invoicing.invoice.line_added",
            InvoiceEvent::InvoiceLineRemoved(_) => "invoicing.invoice.line_removed",
            InvoiceEvent::InvoiceStatusChanged(_) => "invoicing.invoice.status_changed",
            InvoiceEvent::InvoiceSettled(_) => "invoicing.invoice.settled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::InvoiceLineAdded(e) => e.occurred_at,
            InvoiceEvent::InvoiceLineRemoved(e) => e.occurred_at,
            InvoiceEvent::InvoiceStatusChanged(e) => e.occurred_at,
            InvoiceEvent::InvoiceSettled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.quotation_id = e.quotation_id;
                self.customer_id = e.customer_id;
                self.issue_date = e.issue_date;
                self.due_date = e.due_date;
                self.status = InvoiceStatus::Draft;
                self.lines = e.lines.clone();
                self.totals = e.totals;
                self.created = true;
            }
            InvoiceEvent::InvoiceLineAdded(e) => {
                self.lines.push(e.line.clone());
                self.totals = e.new_totals;
            }
            InvoiceEvent::InvoiceLineRemoved(e) => {
                if e.line_no >= 1 && e.line_no <= self.lines.len() {
                    self.lines.remove(e.line_no - 1);
                }
                self.totals = e.new_totals;
            }
            InvoiceEvent::InvoiceStatusChanged(e) => {
                self.status = e.to;
            }
            InvoiceEvent::InvoiceSettled(e) => {
                self.amount_paid = e.new_amount_paid;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            InvoiceCommand::AddInvoiceLine(cmd) => self.handle_add_line(cmd),
            InvoiceCommand::RemoveInvoiceLine(cmd) => self.handle_remove_line(cmd),
            InvoiceCommand::ChangeInvoiceStatus(cmd) => self.handle_change_status(cmd),
            InvoiceCommand::RegisterSettlement(cmd) => self.handle_settlement(cmd),
        }
    }
}

impl Invoice {
    fn ensure_exists(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != invoice_id {
            return Err(DomainError::conflict("invoice_id mismatch"));
        }
        Ok(())
    }

    fn ensure_modifiable(&self) -> Result<(), DomainError> {
        if !self.is_modifiable() {
            return Err(DomainError::invalid_transition(
                format!("{:?}", self.status),
                "line mutation".to_string(),
            ));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        if cmd.due_date < cmd.issue_date {
            return Err(DomainError::validation(
                "due_date cannot precede issue_date",
            ));
        }
        for line in &cmd.lines {
            line.admissible_under(DocumentPolicy::SALES)?;
        }

        Ok(vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            invoice_id: cmd.invoice_id,
            quotation_id: cmd.quotation_id,
            customer_id: cmd.customer_id,
            issue_date: cmd.issue_date,
            due_date: cmd.due_date,
            lines: cmd.lines.clone(),
            totals: cmd.totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddInvoiceLine) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.invoice_id)?;
        self.ensure_modifiable()?;
        cmd.line.admissible_under(DocumentPolicy::SALES)?;

        let mut next = self.lines.clone();
        next.push(cmd.line.clone());
        let new_totals = DocumentTotals::aggregate(&next)?;

        Ok(vec![InvoiceEvent::InvoiceLineAdded(InvoiceLineAdded {
            invoice_id: cmd.invoice_id,
            line_no: next.len(),
            line: cmd.line.clone(),
            new_totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(
        &self,
        cmd: &RemoveInvoiceLine,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.invoice_id)?;
        self.ensure_modifiable()?;

        if cmd.line_no < 1 || cmd.line_no > self.lines.len() {
            return Err(DomainError::validation(format!(
                "line_no {} out of range (document has {} lines)",
                cmd.line_no,
                self.lines.len()
            )));
        }

        let mut next = self.lines.clone();
        next.remove(cmd.line_no - 1);
        let new_totals = DocumentTotals::aggregate(&next)?;

        Ok(vec![InvoiceEvent::InvoiceLineRemoved(InvoiceLineRemoved {
            invoice_id: cmd.invoice_id,
            line_no: cmd.line_no,
            new_totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(
        &self,
        cmd: &ChangeInvoiceStatus,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.invoice_id)?;

        // Paid cannot be requested directly, only earned by settlement.
        let legal = matches!(
            (self.status, cmd.requested),
            (InvoiceStatus::Draft, InvoiceStatus::Sent)
        );
        if !legal {
            return Err(DomainError::invalid_transition(
                format!("{:?}", self.status),
                format!("{:?}", cmd.requested),
            ));
        }

        Ok(vec![InvoiceEvent::InvoiceStatusChanged(
            InvoiceStatusChanged {
                invoice_id: cmd.invoice_id,
                from: self.status,
                to: cmd.requested,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_settlement(
        &self,
        cmd: &RegisterSettlement,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.invoice_id)?;

        if cmd.amount.minor() <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }

        let remaining = self.remaining_balance();
        if !self.policy.allow_overpayment && cmd.amount.minor() > remaining.minor() {
            return Err(DomainError::InsufficientBalance {
                remaining: remaining.minor(),
                attempted: cmd.amount.minor(),
            });
        }

        let new_amount_paid = self.amount_paid.checked_add(cmd.amount)?;

        let mut events = vec![InvoiceEvent::InvoiceSettled(InvoiceSettled {
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            amount: cmd.amount,
            new_amount_paid,
            occurred_at: cmd.occurred_at,
        })];

        if new_amount_paid.minor() >= self.totals.total_amount.minor()
            && self.status != InvoiceStatus::Paid
        {
            events.push(InvoiceEvent::InvoiceStatusChanged(InvoiceStatusChanged {
                invoice_id: cmd.invoice_id,
                from: self.status,
                to: InvoiceStatus::Paid,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docledger_core::{Money, Percent};
    use docledger_products::ProductId;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn sample_line() -> LineItem {
        LineItem::new(
            ProductId::generate(),
            "Widget",
            Money::from_minor(10_000),
            2,
            Percent::from_whole(10).unwrap(),
            Percent::from_whole(9).unwrap(),
        )
        .unwrap()
    }

    fn created_invoice(id: InvoiceId) -> Invoice {
        let mut invoice = Invoice::empty(id);
        let now = test_time();
        let lines = vec![sample_line()];
        let totals = DocumentTotals::aggregate(&lines).unwrap();
        let events = invoice
            .handle(&InvoiceCommand::CreateInvoice(CreateInvoice {
                invoice_id: id,
                quotation_id: None,
                customer_id: PartyId::generate(),
                issue_date: now,
                due_date: now + chrono::Duration::days(30),
                lines,
                totals,
                occurred_at: now,
            }))
            .unwrap();
        invoice.apply(&events[0]);
        invoice
    }

    fn settle(invoice: &mut Invoice, amount: i64) -> Result<(), DomainError> {
        let events = invoice.handle(&InvoiceCommand::RegisterSettlement(RegisterSettlement {
            invoice_id: invoice.id_typed(),
            payment_id: EntityId::new(),
            amount: Money::from_minor(amount),
            occurred_at: test_time(),
        }))?;
        for event in &events {
            invoice.apply(event);
        }
        Ok(())
    }

    #[test]
    fn partial_settlement_reduces_remaining_balance() {
        let mut invoice = created_invoice(InvoiceId::generate());
        assert_eq!(invoice.remaining_balance(), Money::from_minor(19_620));

        settle(&mut invoice, 10_000).unwrap();
        assert_eq!(invoice.remaining_balance(), Money::from_minor(9_620));
        assert_eq!(invoice.status(), InvoiceStatus::Draft);
    }

    #[test]
    fn full_settlement_flips_status_to_paid() {
        let mut invoice = created_invoice(InvoiceId::generate());
        settle(&mut invoice, 19_620).unwrap();

        assert_eq!(invoice.remaining_balance(), Money::ZERO);
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
    }

    #[test]
    fn overpayment_is_rejected_under_strict_policy() {
        let mut invoice = created_invoice(InvoiceId::generate());

        let err = settle(&mut invoice, 30_000).unwrap_err();
        match err {
            DomainError::InsufficientBalance {
                remaining,
                attempted,
            } => {
                assert_eq!(remaining, 19_620);
                assert_eq!(attempted, 30_000);
            }
            other => panic!("Expected InsufficientBalance, got {other:?}"),
        }
        assert_eq!(invoice.remaining_balance(), Money::from_minor(19_620));
    }

    #[test]
    fn overpayment_allowed_when_policy_permits() {
        let id = InvoiceId::generate();
        let mut invoice = created_invoice(id).with_policy(LedgerPolicy {
            allow_overpayment: true,
            ..LedgerPolicy::strict()
        });

        settle(&mut invoice, 30_000).unwrap();
        assert_eq!(invoice.remaining_balance(), Money::from_minor(-10_380));
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
    }

    #[test]
    fn paid_invoice_rejects_line_mutation() {
        let mut invoice = created_invoice(InvoiceId::generate());
        settle(&mut invoice, 19_620).unwrap();

        let err = invoice
            .handle(&InvoiceCommand::AddInvoiceLine(AddInvoiceLine {
                invoice_id: invoice.id_typed(),
                line: sample_line(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(invoice.lines().len(), 1);
    }

    #[test]
    fn paid_cannot_be_requested_directly() {
        let invoice = created_invoice(InvoiceId::generate());
        let err = invoice
            .handle(&InvoiceCommand::ChangeInvoiceStatus(ChangeInvoiceStatus {
                invoice_id: invoice.id_typed(),
                requested: InvoiceStatus::Paid,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn overdue_is_computed_from_due_date_and_status() {
        let mut invoice = created_invoice(InvoiceId::generate());
        let past_due = invoice.due_date() + chrono::Duration::days(1);

        assert!(invoice.is_overdue(past_due));
        assert!(!invoice.is_overdue(invoice.issue_date()));

        settle(&mut invoice, 19_620).unwrap();
        assert!(!invoice.is_overdue(past_due));
    }

    #[test]
    fn apply_is_deterministic() {
        let id = InvoiceId::generate();
        let now = test_time();
        let lines = vec![sample_line()];
        let totals = DocumentTotals::aggregate(&lines).unwrap();
        let events = Invoice::empty(id)
            .handle(&InvoiceCommand::CreateInvoice(CreateInvoice {
                invoice_id: id,
                quotation_id: None,
                customer_id: PartyId::generate(),
                issue_date: now,
                due_date: now + chrono::Duration::days(30),
                lines,
                totals,
                occurred_at: now,
            }))
            .unwrap();

        let mut first = Invoice::empty(id);
        let mut second = Invoice::empty(id);
        for event in &events {
            first.apply(event);
            second.apply(event);
        }
        assert_eq!(first, second);
        assert_eq!(first.version(), 1);
    }

    proptest! {
        /// After any sequence of admissible settlements the remaining balance
        /// equals total minus the sum paid, and Paid is reached exactly when
        /// that balance hits zero.
        #[test]
        fn balance_tracks_settlement_sum(
            requests in prop::collection::vec(1i64..25_000, 1..12)
        ) {
            let mut invoice = created_invoice(InvoiceId::generate());
            let total = invoice.totals().total_amount.minor();

            let mut paid = 0i64;
            for requested in requests {
                let remaining = invoice.remaining_balance().minor();
                if remaining == 0 {
                    break;
                }
                let amount = requested.min(remaining);
                settle(&mut invoice, amount).unwrap();
                paid += amount;
            }

            prop_assert_eq!(invoice.remaining_balance().minor(), total - paid);
            prop_assert_eq!(invoice.status() == InvoiceStatus::Paid, paid == total);
        }
    }
}
