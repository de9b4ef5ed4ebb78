use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docledger_core::{
    Aggregate, AggregateRoot, DomainError, EntityId, LedgerPolicy, Money, impl_entity_id,
};
use docledger_documents::{DocumentPolicy, DocumentTotals, LineItem};
use docledger_events::Event;
use docledger_parties::PartyId;

/// Purchase order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub EntityId);

impl_entity_id!(PurchaseOrderId);

/// Purchase order lifecycle. Draft → Ordered → Received; Draft and Ordered
/// may be Cancelled. Received is also earned by full settlement and is the
/// trigger for posting inventory receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderStatus {
    Draft,
    Ordered,
    Received,
    Cancelled,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    vendor_id: PartyId,
    issue_date: DateTime<Utc>,
    due_date: DateTime<Utc>,
    status: PurchaseOrderStatus,
    lines: Vec<LineItem>,
    totals: DocumentTotals,
    amount_paid: Money,
    policy: LedgerPolicy,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            vendor_id: PartyId::new(EntityId::nil()),
            issue_date: DateTime::<Utc>::MIN_UTC,
            due_date: DateTime::<Utc>::MIN_UTC,
            status: PurchaseOrderStatus::Draft,
            lines: Vec::new(),
            totals: DocumentTotals::default(),
            amount_paid: Money::ZERO,
            policy: LedgerPolicy::strict(),
            version: 0,
            created: false,
        }
    }

    /// See [`docledger_core::LedgerPolicy`]; configuration, not event state.
    pub fn with_policy(mut self, policy: LedgerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn vendor_id(&self) -> PartyId {
        self.vendor_id
    }

    pub fn issue_date(&self) -> DateTime<Utc> {
        self.issue_date
    }

    pub fn due_date(&self) -> DateTime<Utc> {
        self.due_date
    }

    pub fn status(&self) -> PurchaseOrderStatus {
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

    pub fn remaining_balance(&self) -> Money {
        Money::from_minor(self.totals.total_amount.minor() - self.amount_paid.minor())
    }

    /// Procurement documents are editable only while Draft.
    pub fn is_modifiable(&self) -> bool {
        self.status == PurchaseOrderStatus::Draft
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub purchase_order_id: PurchaseOrderId,
    pub vendor_id: PartyId,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddPurchaseOrderLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPurchaseOrderLine {
    pub purchase_order_id: PurchaseOrderId,
    pub line: LineItem,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemovePurchaseOrderLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePurchaseOrderLine {
    pub purchase_order_id: PurchaseOrderId,
    /// 1-based position in the current line list.
    pub line_no: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangePurchaseOrderStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePurchaseOrderStatus {
    pub purchase_order_id: PurchaseOrderId,
    pub requested: PurchaseOrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterDisbursement (issued by the payment ledger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDisbursement {
    pub purchase_order_id: PurchaseOrderId,
    pub payment_id: EntityId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    AddPurchaseOrderLine(AddPurchaseOrderLine),
    RemovePurchaseOrderLine(RemovePurchaseOrderLine),
    ChangePurchaseOrderStatus(ChangePurchaseOrderStatus),
    RegisterDisbursement(RegisterDisbursement),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub purchase_order_id: PurchaseOrderId,
    pub vendor_id: PartyId,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLineAdded {
    pub purchase_order_id: PurchaseOrderId,
    pub line_no: usize,
    pub line: LineItem,
    pub new_totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderLineRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLineRemoved {
    pub purchase_order_id: PurchaseOrderId,
    pub line_no: usize,
    pub new_totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderStatusChanged {
    pub purchase_order_id: PurchaseOrderId,
    pub from: PurchaseOrderStatus,
    pub to: PurchaseOrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderSettled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderSettled {
    pub purchase_order_id: PurchaseOrderId,
    pub payment_id: EntityId,
    pub amount: Money,
    pub new_amount_paid: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderLineAdded(PurchaseOrderLineAdded),
    PurchaseOrderLineRemoved(PurchaseOrderLineRemoved),
    PurchaseOrderStatusChanged(PurchaseOrderStatusChanged),
    PurchaseOrderSettled(PurchaseOrderSettled),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.purchase_order.created",
            PurchaseOrderEvent::PurchaseOrderLineAdded(_) => "purchasing.purchase_order.line_added",
            PurchaseOrderEvent::PurchaseOrderLineRemoved(_) => {
                "purchasing.purchase_order.line_removed"
            }
            PurchaseOrderEvent::PurchaseOrderStatusChanged(_) => {
                "purchasing.purchase_order.status_changed"
            }
            PurchaseOrderEvent::PurchaseOrderSettled(_) => "purchasing.purchase_order.settled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderLineRemoved(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderStatusChanged(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderSettled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.purchase_order_id;
                self.vendor_id = e.vendor_id;
                self.issue_date = e.issue_date;
                self.due_date = e.due_date;
                self.status = PurchaseOrderStatus::Draft;
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                self.lines.push(e.line.clone());
                self.totals = e.new_totals;
            }
            PurchaseOrderEvent::PurchaseOrderLineRemoved(e) => {
                if e.line_no >= 1 && e.line_no <= self.lines.len() {
                    self.lines.remove(e.line_no - 1);
                }
                self.totals = e.new_totals;
            }
            PurchaseOrderEvent::PurchaseOrderStatusChanged(e) => {
                self.status = e.to;
            }
            PurchaseOrderEvent::PurchaseOrderSettled(e) => {
                self.amount_paid = e.new_amount_paid;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddPurchaseOrderLine(cmd) => self.handle_add_line(cmd),
            PurchaseOrderCommand::RemovePurchaseOrderLine(cmd) => self.handle_remove_line(cmd),
            PurchaseOrderCommand::ChangePurchaseOrderStatus(cmd) => self.handle_change_status(cmd),
            PurchaseOrderCommand::RegisterDisbursement(cmd) => self.handle_disbursement(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_exists(&self, purchase_order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != purchase_order_id {
            return Err(DomainError::conflict("purchase_order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        if cmd.due_date < cmd.issue_date {
            return Err(DomainError::validation(
                "due_date cannot precede issue_date",
            ));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                purchase_order_id: cmd.purchase_order_id,
                vendor_id: cmd.vendor_id,
                issue_date: cmd.issue_date,
                due_date: cmd.due_date,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_add_line(
        &self,
        cmd: &AddPurchaseOrderLine,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.purchase_order_id)?;
        if !self.is_modifiable() {
            return Err(DomainError::invalid_transition(
                format!("{:?}", self.status),
                "line mutation".to_string(),
            ));
        }
        cmd.line.admissible_under(DocumentPolicy::PROCUREMENT)?;

        let mut next = self.lines.clone();
        next.push(cmd.line.clone());
        let new_totals = DocumentTotals::aggregate(&next)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderLineAdded(
            PurchaseOrderLineAdded {
                purchase_order_id: cmd.purchase_order_id,
                line_no: next.len(),
                line: cmd.line.clone(),
                new_totals,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_remove_line(
        &self,
        cmd: &RemovePurchaseOrderLine,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.purchase_order_id)?;
        if !self.is_modifiable() {
            return Err(DomainError::invalid_transition(
                format!("{:?}", self.status),
                "line mutation".to_string(),
            ));
        }

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

        Ok(vec![PurchaseOrderEvent::PurchaseOrderLineRemoved(
            PurchaseOrderLineRemoved {
                purchase_order_id: cmd.purchase_order_id,
                line_no: cmd.line_no,
                new_totals,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_change_status(
        &self,
        cmd: &ChangePurchaseOrderStatus,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.purchase_order_id)?;

        let legal = matches!(
            (self.status, cmd.requested),
            (PurchaseOrderStatus::Draft, PurchaseOrderStatus::Ordered)
                | (PurchaseOrderStatus::Ordered, PurchaseOrderStatus::Received)
                | (PurchaseOrderStatus::Draft, PurchaseOrderStatus::Cancelled)
                | (PurchaseOrderStatus::Ordered, PurchaseOrderStatus::Cancelled)
        );
        if !legal {
            return Err(DomainError::invalid_transition(
                format!("{:?}", self.status),
                format!("{:?}", cmd.requested),
            ));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderStatusChanged(
            PurchaseOrderStatusChanged {
                purchase_order_id: cmd.purchase_order_id,
                from: self.status,
                to: cmd.requested,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_disbursement(
        &self,
        cmd: &RegisterDisbursement,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.purchase_order_id)?;

        if self.status == PurchaseOrderStatus::Cancelled {
            return Err(DomainError::invalid_transition(
                "Cancelled".to_string(),
                "settlement".to_string(),
            ));
        }
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

        let mut events = vec![PurchaseOrderEvent::PurchaseOrderSettled(
            PurchaseOrderSettled {
                purchase_order_id: cmd.purchase_order_id,
                payment_id: cmd.payment_id,
                amount: cmd.amount,
                new_amount_paid,
                occurred_at: cmd.occurred_at,
            },
        )];

        if new_amount_paid.minor() >= self.totals.total_amount.minor()
            && self.status != PurchaseOrderStatus::Received
        {
            events.push(PurchaseOrderEvent::PurchaseOrderStatusChanged(
                PurchaseOrderStatusChanged {
                    purchase_order_id: cmd.purchase_order_id,
                    from: self.status,
                    to: PurchaseOrderStatus::Received,
                    occurred_at: cmd.occurred_at,
                },
            ));
        }

        Ok(events)
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

    fn plain_line(quantity: u32, unit_price: i64) -> LineItem {
        LineItem::new(
            ProductId::generate(),
            "Raw material",
            Money::from_minor(unit_price),
            quantity,
            Percent::ZERO,
            Percent::from_whole(9).unwrap(),
        )
        .unwrap()
    }

    fn created_po(id: PurchaseOrderId) -> PurchaseOrder {
        let mut po = PurchaseOrder::empty(id);
        let now = test_time();
        let events = po
            .handle(&PurchaseOrderCommand::CreatePurchaseOrder(
                CreatePurchaseOrder {
                    purchase_order_id: id,
                    vendor_id: PartyId::generate(),
                    issue_date: now,
                    due_date: now + chrono::Duration::days(30),
                    occurred_at: now,
                },
            ))
            .unwrap();
        po.apply(&events[0]);
        po
    }

    fn add_line(po: &mut PurchaseOrder, line: LineItem) -> Result<(), DomainError> {
        let events = po.handle(&PurchaseOrderCommand::AddPurchaseOrderLine(
            AddPurchaseOrderLine {
                purchase_order_id: po.id_typed(),
                line,
                occurred_at: test_time(),
            },
        ))?;
        po.apply(&events[0]);
        Ok(())
    }

    fn change_status(po: &mut PurchaseOrder, to: PurchaseOrderStatus) -> Result<(), DomainError> {
        let events = po.handle(&PurchaseOrderCommand::ChangePurchaseOrderStatus(
            ChangePurchaseOrderStatus {
                purchase_order_id: po.id_typed(),
                requested: to,
                occurred_at: test_time(),
            },
        ))?;
        po.apply(&events[0]);
        Ok(())
    }

    #[test]
    fn discounted_lines_are_rejected_on_procurement_documents() {
        let mut po = created_po(PurchaseOrderId::generate());
        let discounted = LineItem::new(
            ProductId::generate(),
            "Raw material",
            Money::from_minor(500),
            10,
            Percent::from_whole(5).unwrap(),
            Percent::ZERO,
        )
        .unwrap();

        let err = add_line(&mut po, discounted).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("discount"));
    }

    #[test]
    fn lines_are_frozen_once_ordered() {
        let mut po = created_po(PurchaseOrderId::generate());
        add_line(&mut po, plain_line(10, 500)).unwrap();
        change_status(&mut po, PurchaseOrderStatus::Ordered).unwrap();

        let err = add_line(&mut po, plain_line(1, 500)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(po.lines().len(), 1);
    }

    #[test]
    fn received_requires_ordered_first() {
        let mut po = created_po(PurchaseOrderId::generate());
        let err = change_status(&mut po, PurchaseOrderStatus::Received).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn cancellation_is_terminal() {
        let mut po = created_po(PurchaseOrderId::generate());
        change_status(&mut po, PurchaseOrderStatus::Cancelled).unwrap();

        let err = change_status(&mut po, PurchaseOrderStatus::Ordered).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn full_disbursement_flips_status_to_received() {
        let mut po = created_po(PurchaseOrderId::generate());
        add_line(&mut po, plain_line(10, 500)).unwrap();
        change_status(&mut po, PurchaseOrderStatus::Ordered).unwrap();

        // 10 × 5.00 with 9% tax = 54.50
        let total = po.totals().total_amount;
        assert_eq!(total, Money::from_minor(5_450));

        let events = po
            .handle(&PurchaseOrderCommand::RegisterDisbursement(
                RegisterDisbursement {
                    purchase_order_id: po.id_typed(),
                    payment_id: EntityId::new(),
                    amount: total,
                    occurred_at: test_time(),
                },
            ))
            .unwrap();
        for event in &events {
            po.apply(event);
        }

        assert_eq!(po.remaining_balance(), Money::ZERO);
        assert_eq!(po.status(), PurchaseOrderStatus::Received);
    }

    #[test]
    fn cancelled_order_rejects_disbursement() {
        let mut po = created_po(PurchaseOrderId::generate());
        add_line(&mut po, plain_line(10, 500)).unwrap();
        change_status(&mut po, PurchaseOrderStatus::Cancelled).unwrap();

        let err = po
            .handle(&PurchaseOrderCommand::RegisterDisbursement(
                RegisterDisbursement {
                    purchase_order_id: po.id_typed(),
                    payment_id: EntityId::new(),
                    amount: Money::from_minor(100),
                    occurred_at: test_time(),
                },
            ))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }
}
