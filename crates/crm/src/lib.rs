//! CRM pipeline: leads and sales opportunities.
//!
//! A lead walks New → Contacted → Qualified (Lost from any open state) and is
//! converted at most once into a customer plus an opportunity. The conversion
//! itself is orchestrated at the application layer so all three streams move
//! together.

pub mod lead;
pub mod opportunity;

pub use lead::{
    ChangeLeadStatus, Lead, LeadCommand, LeadConverted, LeadEvent, LeadId, LeadRegistered,
    LeadStatus, LeadStatusChanged, MarkConverted, RegisterLead,
};
pub use opportunity::{
    AdvanceStage, OpenOpportunity, Opportunity, OpportunityCommand, OpportunityEvent,
    OpportunityId, OpportunityOpened, OpportunityStage, StageAdvanced,
};
