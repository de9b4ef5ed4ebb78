use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docledger_core::{Aggregate, AggregateRoot, DomainError, EntityId, Money, impl_entity_id};
use docledger_events::Event;
use docledger_parties::PartyId;

/// Opportunity identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpportunityId(pub EntityId);

impl_entity_id!(OpportunityId);

/// Opportunity stages. Stages advance strictly forward; `Won` and `Lost` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStage {
    Identification,
    Qualification,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

impl OpportunityStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, OpportunityStage::Won | OpportunityStage::Lost)
    }
}

/// Aggregate root: Opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opportunity {
    id: OpportunityId,
    name: String,
    customer_id: PartyId,
    amount: Money,
    stage: OpportunityStage,
    close_date: DateTime<Utc>,
    version: u64,
    created: bool,
}

impl Opportunity {
    pub fn empty(id: OpportunityId) -> Self {
        Self {
            id,
            name: String::new(),
            customer_id: PartyId::new(EntityId::nil()),
            amount: Money::ZERO,
            stage: OpportunityStage::Identification,
            close_date: DateTime::<Utc>::MIN_UTC,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OpportunityId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn customer_id(&self) -> PartyId {
        self.customer_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn stage(&self) -> OpportunityStage {
        self.stage
    }

    /// Expected close date, set at open time.
    pub fn close_date(&self) -> DateTime<Utc> {
        self.close_date
    }
}

impl AggregateRoot for Opportunity {
    type Id = OpportunityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenOpportunity. Lead conversion opens directly at the
/// Qualification stage; direct creation usually starts at Identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOpportunity {
    pub opportunity_id: OpportunityId,
    pub name: String,
    pub customer_id: PartyId,
    pub amount: Money,
    pub stage: OpportunityStage,
    pub close_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceStage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceStage {
    pub opportunity_id: OpportunityId,
    pub requested: OpportunityStage,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpportunityCommand {
    OpenOpportunity(OpenOpportunity),
    AdvanceStage(AdvanceStage),
}

/// Event: OpportunityOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityOpened {
    pub opportunity_id: OpportunityId,
    pub name: String,
    pub customer_id: PartyId,
    pub amount: Money,
    pub stage: OpportunityStage,
    pub close_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StageAdvanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAdvanced {
    pub opportunity_id: OpportunityId,
    pub from: OpportunityStage,
    pub to: OpportunityStage,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpportunityEvent {
    OpportunityOpened(OpportunityOpened),
    StageAdvanced(StageAdvanced),
}

impl Event for OpportunityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OpportunityEvent::OpportunityOpened(_) => "crm.opportunity.opened",
            OpportunityEvent::StageAdvanced(_) => "crm.opportunity.stage_advanced",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OpportunityEvent::OpportunityOpened(e) => e.occurred_at,
            OpportunityEvent::StageAdvanced(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Opportunity {
    type Command = OpportunityCommand;
    type Event = OpportunityEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OpportunityEvent::OpportunityOpened(e) => {
                self.id = e.opportunity_id;
                self.name = e.name.clone();
                self.customer_id = e.customer_id;
                self.amount = e.amount;
                self.stage = e.stage;
                self.close_date = e.close_date;
                self.created = true;
            }
            OpportunityEvent::StageAdvanced(e) => {
                self.stage = e.to;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OpportunityCommand::OpenOpportunity(cmd) => self.handle_open(cmd),
            OpportunityCommand::AdvanceStage(cmd) => self.handle_advance(cmd),
        }
    }
}

impl Opportunity {
    fn handle_open(&self, cmd: &OpenOpportunity) -> Result<Vec<OpportunityEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("opportunity already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.amount.is_negative() {
            return Err(DomainError::validation("amount cannot be negative"));
        }
        if cmd.stage.is_terminal() {
            return Err(DomainError::validation(
                "an opportunity cannot open in a terminal stage",
            ));
        }

        Ok(vec![OpportunityEvent::OpportunityOpened(OpportunityOpened {
            opportunity_id: cmd.opportunity_id,
            name: cmd.name.clone(),
            customer_id: cmd.customer_id,
            amount: cmd.amount,
            stage: cmd.stage,
            close_date: cmd.close_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_advance(&self, cmd: &AdvanceStage) -> Result<Vec<OpportunityEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != cmd.opportunity_id {
            return Err(DomainError::conflict("opportunity_id mismatch"));
        }
        if self.stage.is_terminal() {
            return Err(DomainError::invalid_transition(
                format!("{:?}", self.stage),
                format!("{:?}", cmd.requested),
            ));
        }

        // Forward-only: Lost may be entered from any open stage, any other
        // target must be strictly later in the pipeline.
        let forward =
            cmd.requested == OpportunityStage::Lost || cmd.requested > self.stage;
        if !forward {
            return Err(DomainError::invalid_transition(
                format!("{:?}", self.stage),
                format!("{:?}", cmd.requested),
            ));
        }

        Ok(vec![OpportunityEvent::StageAdvanced(StageAdvanced {
            opportunity_id: cmd.opportunity_id,
            from: self.stage,
            to: cmd.requested,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened_opportunity(id: OpportunityId) -> Opportunity {
        let mut opp = Opportunity::empty(id);
        let now = Utc::now();
        let events = opp
            .handle(&OpportunityCommand::OpenOpportunity(OpenOpportunity {
                opportunity_id: id,
                name: "Annual supply contract".to_string(),
                customer_id: PartyId::generate(),
                amount: Money::from_minor(500_000),
                stage: OpportunityStage::Identification,
                close_date: now + chrono::Duration::days(30),
                occurred_at: now,
            }))
            .unwrap();
        opp.apply(&events[0]);
        opp
    }

    fn advance(opp: &mut Opportunity, to: OpportunityStage) -> Result<(), DomainError> {
        let events = opp.handle(&OpportunityCommand::AdvanceStage(AdvanceStage {
            opportunity_id: opp.id_typed(),
            requested: to,
            occurred_at: Utc::now(),
        }))?;
        opp.apply(&events[0]);
        Ok(())
    }

    #[test]
    fn stages_advance_forward_to_won() {
        let mut opp = opened_opportunity(OpportunityId::generate());

        advance(&mut opp, OpportunityStage::Qualification).unwrap();
        advance(&mut opp, OpportunityStage::Proposal).unwrap();
        advance(&mut opp, OpportunityStage::Negotiation).unwrap();
        advance(&mut opp, OpportunityStage::Won).unwrap();

        assert_eq!(opp.stage(), OpportunityStage::Won);
    }

    #[test]
    fn cannot_move_backward() {
        let mut opp = opened_opportunity(OpportunityId::generate());
        advance(&mut opp, OpportunityStage::Proposal).unwrap();

        let err = advance(&mut opp, OpportunityStage::Qualification).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_stage_rejects_further_changes() {
        let mut opp = opened_opportunity(OpportunityId::generate());
        advance(&mut opp, OpportunityStage::Lost).unwrap();

        let err = advance(&mut opp, OpportunityStage::Won).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn negative_amount_is_rejected() {
        let id = OpportunityId::generate();
        let opp = Opportunity::empty(id);
        let now = Utc::now();

        let err = opp
            .handle(&OpportunityCommand::OpenOpportunity(OpenOpportunity {
                opportunity_id: id,
                name: "Bad deal".to_string(),
                customer_id: PartyId::generate(),
                amount: Money::from_minor(-1),
                stage: OpportunityStage::Identification,
                close_date: now,
                occurred_at: now,
            }))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("negative"));
    }

    #[test]
    fn opening_in_a_terminal_stage_is_rejected() {
        let id = OpportunityId::generate();
        let opp = Opportunity::empty(id);
        let now = Utc::now();

        let err = opp
            .handle(&OpportunityCommand::OpenOpportunity(OpenOpportunity {
                opportunity_id: id,
                name: "Already done".to_string(),
                customer_id: PartyId::generate(),
                amount: Money::from_minor(100),
                stage: OpportunityStage::Won,
                close_date: now,
                occurred_at: now,
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
