use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docledger_core::{Aggregate, AggregateRoot, DomainError, EntityId, impl_entity_id};
use docledger_documents::{DocumentPolicy, DocumentTotals, LineItem};
use docledger_events::Event;
use docledger_parties::PartyId;

/// Quotation identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotationId(pub EntityId);

impl_entity_id!(QuotationId);

/// Quotation lifecycle. Draft → Sent → {Approved, Rejected}. Approved and
/// Rejected close the document for editing; only an Approved quotation can
/// back an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotationStatus {
    Draft,
    Sent,
    Approved,
    Rejected,
}

/// Aggregate root: Quotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quotation {
    id: QuotationId,
    customer_id: PartyId,
    issue_date: DateTime<Utc>,
    expiry_date: DateTime<Utc>,
    status: QuotationStatus,
    lines: Vec<LineItem>,
    totals: DocumentTotals,
    invoiced: bool,
    version: u64,
    created: bool,
}

impl Quotation {
    pub fn empty(id: QuotationId) -> Self {
        Self {
            id,
            customer_id: PartyId::new(EntityId::nil()),
            issue_date: DateTime::<Utc>::MIN_UTC,
            expiry_date: DateTime::<Utc>::MIN_UTC,
            status: QuotationStatus::Draft,
            lines: Vec::new(),
            totals: DocumentTotals::default(),
            invoiced: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> QuotationId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn customer_id(&self) -> PartyId {
        self.customer_id
    }

    pub fn issue_date(&self) -> DateTime<Utc> {
        self.issue_date
    }

    pub fn expiry_date(&self) -> DateTime<Utc> {
        self.expiry_date
    }

    pub fn status(&self) -> QuotationStatus {
        self.status
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn totals(&self) -> DocumentTotals {
        self.totals
    }

    /// Whether this quotation has already backed an invoice.
    pub fn is_invoiced(&self) -> bool {
        self.invoiced
    }

    /// Lines may be changed only while the document is open.
    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, QuotationStatus::Draft | QuotationStatus::Sent)
    }
}

impl AggregateRoot for Quotation {
    type Id = QuotationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateQuotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateQuotation {
    pub quotation_id: QuotationId,
    pub customer_id: PartyId,
    pub issue_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddQuotationLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddQuotationLine {
    pub quotation_id: QuotationId,
    pub line: LineItem,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveQuotationLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveQuotationLine {
    pub quotation_id: QuotationId,
    /// 1-based position in the current line list.
    pub line_no: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeQuotationStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeQuotationStatus {
    pub quotation_id: QuotationId,
    pub requested: QuotationStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkInvoiced (issued by the conversion pipeline only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkInvoiced {
    pub quotation_id: QuotationId,
    pub invoice_id: EntityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotationCommand {
    CreateQuotation(CreateQuotation),
    AddQuotationLine(AddQuotationLine),
    RemoveQuotationLine(RemoveQuotationLine),
    ChangeQuotationStatus(ChangeQuotationStatus),
    MarkInvoiced(MarkInvoiced),
}

/// Event: QuotationCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationCreated {
    pub quotation_id: QuotationId,
    pub customer_id: PartyId,
    pub issue_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuotationLineAdded. Carries the recomputed document totals so
/// rehydration never re-runs the fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationLineAdded {
    pub quotation_id: QuotationId,
    pub line_no: usize,
    pub line: LineItem,
    pub new_totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuotationLineRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationLineRemoved {
    pub quotation_id: QuotationId,
    pub line_no: usize,
    pub new_totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuotationStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationStatusChanged {
    pub quotation_id: QuotationId,
    pub from: QuotationStatus,
    pub to: QuotationStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuotationInvoiced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationInvoiced {
    pub quotation_id: QuotationId,
    pub invoice_id: EntityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotationEvent {
    QuotationCreated(QuotationCreated),
    QuotationLineAdded(QuotationLineAdded),
    QuotationLineRemoved(QuotationLineRemoved),
    QuotationStatusChanged(QuotationStatusChanged),
    QuotationInvoiced(QuotationInvoiced),
}

impl Event for QuotationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            QuotationEvent::QuotationCreated(_) => "sales.quotation.created",
            QuotationEvent::QuotationLineAdded(_) => "sales.quotation.line_added",
            QuotationEvent::QuotationLineRemoved(_) => "sales.quotation.line_removed",
            QuotationEvent::QuotationStatusChanged(_) => "sales.quotation.status_changed",
            QuotationEvent::QuotationInvoiced(_) => "sales.quotation.invoiced",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            QuotationEvent::QuotationCreated(e) => e.occurred_at,
            QuotationEvent::QuotationLineAdded(e) => e.occurred_at,
            QuotationEvent::QuotationLineRemoved(e) => e.occurred_at,
            QuotationEvent::QuotationStatusChanged(e) => e.occurred_at,
            QuotationEvent::QuotationInvoiced(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Quotation {
    type Command = QuotationCommand;
    type Event = QuotationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            QuotationEvent::QuotationCreated(e) => {
                self.id = e.quotation_id;
                self.customer_id = e.customer_id;
                self.issue_date = e.issue_date;
                self.expiry_date = e.expiry_date;
                self.status = QuotationStatus::Draft;
                self.created = true;
            }
            QuotationEvent::QuotationLineAdded(e) => {
                self.lines.push(e.line.clone());
                self.totals = e.new_totals;
            }
            QuotationEvent::QuotationLineRemoved(e) => {
                if e.line_no >= 1 && e.line_no <= self.lines.len() {
                    self.lines.remove(e.line_no - 1);
                }
                self.totals = e.new_totals;
            }
            QuotationEvent::QuotationStatusChanged(e) => {
                self.status = e.to;
            }
            QuotationEvent::QuotationInvoiced(_) => {
                self.invoiced = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            QuotationCommand::CreateQuotation(cmd) => self.handle_create(cmd),
            QuotationCommand::AddQuotationLine(cmd) => self.handle_add_line(cmd),
            QuotationCommand::RemoveQuotationLine(cmd) => self.handle_remove_line(cmd),
            QuotationCommand::ChangeQuotationStatus(cmd) => self.handle_change_status(cmd),
            QuotationCommand::MarkInvoiced(cmd) => self.handle_mark_invoiced(cmd),
        }
    }
}

impl Quotation {
    fn ensure_exists(&self, quotation_id: QuotationId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != quotation_id {
            return Err(DomainError::conflict("quotation_id mismatch"));
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

    fn handle_create(&self, cmd: &CreateQuotation) -> Result<Vec<QuotationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("quotation already exists"));
        }
        if cmd.expiry_date < cmd.issue_date {
            return Err(DomainError::validation(
                "expiry_date cannot precede issue_date",
            ));
        }

        Ok(vec![QuotationEvent::QuotationCreated(QuotationCreated {
            quotation_id: cmd.quotation_id,
            customer_id: cmd.customer_id,
            issue_date: cmd.issue_date,
            expiry_date: cmd.expiry_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddQuotationLine) -> Result<Vec<QuotationEvent>, DomainError> {
        self.ensure_exists(cmd.quotation_id)?;
        self.ensure_modifiable()?;
        cmd.line.admissible_under(DocumentPolicy::SALES)?;

        let mut next = self.lines.clone();
        next.push(cmd.line.clone());
        let new_totals = DocumentTotals::aggregate(&next)?;

        Ok(vec![QuotationEvent::QuotationLineAdded(QuotationLineAdded {
            quotation_id: cmd.quotation_id,
            line_no: next.len(),
            line: cmd.line.clone(),
            new_totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(
        &self,
        cmd: &RemoveQuotationLine,
    ) -> Result<Vec<QuotationEvent>, DomainError> {
        self.ensure_exists(cmd.quotation_id)?;
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

        Ok(vec![QuotationEvent::QuotationLineRemoved(
            QuotationLineRemoved {
                quotation_id: cmd.quotation_id,
                line_no: cmd.line_no,
                new_totals,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_change_status(
        &self,
        cmd: &ChangeQuotationStatus,
    ) -> Result<Vec<QuotationEvent>, DomainError> {
        self.ensure_exists(cmd.quotation_id)?;

        let legal = matches!(
            (self.status, cmd.requested),
            (QuotationStatus::Draft, QuotationStatus::Sent)
                | (QuotationStatus::Sent, QuotationStatus::Approved)
                | (QuotationStatus::Sent, QuotationStatus::Rejected)
        );
        if !legal {
            return Err(DomainError::invalid_transition(
                format!("{:?}", self.status),
                format!("{:?}", cmd.requested),
            ));
        }

        Ok(vec![QuotationEvent::QuotationStatusChanged(
            QuotationStatusChanged {
                quotation_id: cmd.quotation_id,
                from: self.status,
                to: cmd.requested,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_mark_invoiced(
        &self,
        cmd: &MarkInvoiced,
    ) -> Result<Vec<QuotationEvent>, DomainError> {
        self.ensure_exists(cmd.quotation_id)?;

        if self.status != QuotationStatus::Approved {
            return Err(DomainError::invalid_transition(
                format!("{:?}", self.status),
                "Invoiced".to_string(),
            ));
        }
        if self.invoiced {
            return Err(DomainError::conflict("quotation already invoiced"));
        }

        Ok(vec![QuotationEvent::QuotationInvoiced(QuotationInvoiced {
            quotation_id: cmd.quotation_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docledger_core::{Money, Percent};
    use docledger_products::ProductId;

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

    fn created_quotation(id: QuotationId) -> Quotation {
        let mut q = Quotation::empty(id);
        let now = test_time();
        let events = q
            .handle(&QuotationCommand::CreateQuotation(CreateQuotation {
                quotation_id: id,
                customer_id: PartyId::generate(),
                issue_date: now,
                expiry_date: now + chrono::Duration::days(14),
                occurred_at: now,
            }))
            .unwrap();
        q.apply(&events[0]);
        q
    }

    fn add_line(q: &mut Quotation, line: LineItem) -> Result<(), DomainError> {
        let events = q.handle(&QuotationCommand::AddQuotationLine(AddQuotationLine {
            quotation_id: q.id_typed(),
            line,
            occurred_at: test_time(),
        }))?;
        q.apply(&events[0]);
        Ok(())
    }

    fn change_status(q: &mut Quotation, to: QuotationStatus) -> Result<(), DomainError> {
        let events = q.handle(&QuotationCommand::ChangeQuotationStatus(
            ChangeQuotationStatus {
                quotation_id: q.id_typed(),
                requested: to,
                occurred_at: test_time(),
            },
        ))?;
        q.apply(&events[0]);
        Ok(())
    }

    #[test]
    fn adding_a_line_recomputes_totals() {
        let mut q = created_quotation(QuotationId::generate());
        add_line(&mut q, sample_line()).unwrap();

        assert_eq!(q.lines().len(), 1);
        assert_eq!(q.totals().subtotal, Money::from_minor(20_000));
        assert_eq!(q.totals().total_amount, Money::from_minor(19_620));
    }

    #[test]
    fn removing_a_line_recomputes_totals() {
        let mut q = created_quotation(QuotationId::generate());
        add_line(&mut q, sample_line()).unwrap();
        add_line(&mut q, sample_line()).unwrap();

        let events = q
            .handle(&QuotationCommand::RemoveQuotationLine(RemoveQuotationLine {
                quotation_id: q.id_typed(),
                line_no: 1,
                occurred_at: test_time(),
            }))
            .unwrap();
        q.apply(&events[0]);

        assert_eq!(q.lines().len(), 1);
        assert_eq!(q.totals().total_amount, Money::from_minor(19_620));
    }

    #[test]
    fn lines_may_change_while_sent_but_not_after_approval() {
        let mut q = created_quotation(QuotationId::generate());
        add_line(&mut q, sample_line()).unwrap();

        change_status(&mut q, QuotationStatus::Sent).unwrap();
        add_line(&mut q, sample_line()).unwrap();

        change_status(&mut q, QuotationStatus::Approved).unwrap();
        let err = add_line(&mut q, sample_line()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(q.lines().len(), 2);
    }

    #[test]
    fn approval_requires_sent_first() {
        let mut q = created_quotation(QuotationId::generate());
        let err = change_status(&mut q, QuotationStatus::Approved).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn mark_invoiced_requires_approval_and_is_at_most_once() {
        let id = QuotationId::generate();
        let mut q = created_quotation(id);
        add_line(&mut q, sample_line()).unwrap();

        let invoice_id = EntityId::new();
        let cmd = QuotationCommand::MarkInvoiced(MarkInvoiced {
            quotation_id: id,
            invoice_id,
            occurred_at: test_time(),
        });

        // Not approved yet.
        assert!(matches!(
            q.handle(&cmd).unwrap_err(),
            DomainError::InvalidTransition { .. }
        ));

        change_status(&mut q, QuotationStatus::Sent).unwrap();
        change_status(&mut q, QuotationStatus::Approved).unwrap();

        let events = q.handle(&cmd).unwrap();
        q.apply(&events[0]);
        assert!(q.is_invoiced());

        let err = q.handle(&cmd).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("already invoiced"));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let q = created_quotation(QuotationId::generate());
        let before = q.clone();
        let _ = q.handle(&QuotationCommand::AddQuotationLine(AddQuotationLine {
            quotation_id: q.id_typed(),
            line: sample_line(),
            occurred_at: test_time(),
        }));
        assert_eq!(q, before);
    }
}
