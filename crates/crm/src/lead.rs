use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docledger_core::{Aggregate, AggregateRoot, DomainError, EntityId, impl_entity_id};
use docledger_events::Event;
use docledger_parties::PartyId;

use crate::opportunity::OpportunityId;

/// Lead identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub EntityId);

impl_entity_id!(LeadId);

/// Lead status pipeline. `Converted` is a one-way terminal state reached only
/// through the conversion pipeline, never by a plain status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

/// Aggregate root: Lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lead {
    id: LeadId,
    contact_name: String,
    company: String,
    email: Option<String>,
    phone: Option<String>,
    status: LeadStatus,
    converted: bool,
    version: u64,
    created: bool,
}

impl Lead {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: LeadId) -> Self {
        Self {
            id,
            contact_name: String::new(),
            company: String::new(),
            email: None,
            phone: None,
            status: LeadStatus::New,
            converted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LeadId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn contact_name(&self) -> &str {
        &self.contact_name
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn status(&self) -> LeadStatus {
        self.status
    }

    /// Conversion is at-most-once.
    pub fn is_converted(&self) -> bool {
        self.converted
    }
}

impl AggregateRoot for Lead {
    type Id = LeadId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterLead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterLead {
    pub lead_id: LeadId,
    pub contact_name: String,
    pub company: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeLeadStatus (within the pre-conversion pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLeadStatus {
    pub lead_id: LeadId,
    pub requested: LeadStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkConverted (issued by the conversion pipeline only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkConverted {
    pub lead_id: LeadId,
    pub customer_id: PartyId,
    pub opportunity_id: OpportunityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadCommand {
    RegisterLead(RegisterLead),
    ChangeLeadStatus(ChangeLeadStatus),
    MarkConverted(MarkConverted),
}

/// Event: LeadRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRegistered {
    pub lead_id: LeadId,
    pub contact_name: String,
    pub company: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LeadStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadStatusChanged {
    pub lead_id: LeadId,
    pub from: LeadStatus,
    pub to: LeadStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LeadConverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadConverted {
    pub lead_id: LeadId,
    pub customer_id: PartyId,
    pub opportunity_id: OpportunityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadEvent {
    LeadRegistered(LeadRegistered),
    LeadStatusChanged(LeadStatusChanged),
    LeadConverted(LeadConverted),
}

impl Event for LeadEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LeadEvent::LeadRegistered(_) => "crm.lead.registered",
            LeadEvent::LeadStatusChanged(_) => "crm.lead.status_changed",
            LeadEvent::LeadConverted(_) => "crm.lead.converted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LeadEvent::LeadRegistered(e) => e.occurred_at,
            LeadEvent::LeadStatusChanged(e) => e.occurred_at,
            LeadEvent::LeadConverted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Lead {
    type Command = LeadCommand;
    type Event = LeadEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LeadEvent::LeadRegistered(e) => {
                self.id = e.lead_id;
                self.contact_name = e.contact_name.clone();
                self.company = e.company.clone();
                self.email = e.email.clone();
                self.phone = e.phone.clone();
                self.status = LeadStatus::New;
                self.created = true;
            }
            LeadEvent::LeadStatusChanged(e) => {
                self.status = e.to;
            }
            LeadEvent::LeadConverted(_) => {
                self.status = LeadStatus::Converted;
                self.converted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LeadCommand::RegisterLead(cmd) => self.handle_register(cmd),
            LeadCommand::ChangeLeadStatus(cmd) => self.handle_change_status(cmd),
            LeadCommand::MarkConverted(cmd) => self.handle_mark_converted(cmd),
        }
    }
}

impl Lead {
    fn ensure_lead_id(&self, lead_id: LeadId) -> Result<(), DomainError> {
        if self.id != lead_id {
            return Err(DomainError::conflict("lead_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterLead) -> Result<Vec<LeadEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("lead already exists"));
        }
        if cmd.contact_name.trim().is_empty() {
            return Err(DomainError::validation("contact_name cannot be empty"));
        }

        Ok(vec![LeadEvent::LeadRegistered(LeadRegistered {
            lead_id: cmd.lead_id,
            contact_name: cmd.contact_name.clone(),
            company: cmd.company.clone(),
            email: cmd.email.clone(),
            phone: cmd.phone.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(
        &self,
        cmd: &ChangeLeadStatus,
    ) -> Result<Vec<LeadEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lead_id(cmd.lead_id)?;

        let legal = matches!(
            (self.status, cmd.requested),
            (LeadStatus::New, LeadStatus::Contacted)
                | (LeadStatus::Contacted, LeadStatus::Qualified)
                | (LeadStatus::New, LeadStatus::Lost)
                | (LeadStatus::Contacted, LeadStatus::Lost)
                | (LeadStatus::Qualified, LeadStatus::Lost)
        );
        if !legal {
            return Err(DomainError::invalid_transition(
                format!("{:?}", self.status),
                format!("{:?}", cmd.requested),
            ));
        }

        Ok(vec![LeadEvent::LeadStatusChanged(LeadStatusChanged {
            lead_id: cmd.lead_id,
            from: self.status,
            to: cmd.requested,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_converted(&self, cmd: &MarkConverted) -> Result<Vec<LeadEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lead_id(cmd.lead_id)?;

        if self.converted {
            return Err(DomainError::AlreadyConverted);
        }

        Ok(vec![LeadEvent::LeadConverted(LeadConverted {
            lead_id: cmd.lead_id,
            customer_id: cmd.customer_id,
            opportunity_id: cmd.opportunity_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
