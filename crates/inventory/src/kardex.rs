use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use docledger_core::{Aggregate, AggregateRoot, DomainError, EntityId, LedgerPolicy};
use docledger_events::Event;
use docledger_products::ProductId;

/// Namespace for deriving kardex stream keys from product ids.
const KARDEX_STREAM_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x61, 0x72, 0x64, 0x65, 0x78, 0x2e, 0x73, 0x74, 0x72, 0x65, 0x61, 0x6d, 0x2e, 0x76,
    0x31,
]);

/// Kinds of stock movement. Receipts and sales returns add stock, issues and
/// purchase returns remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Receipt,
    Issue,
    SalesReturn,
    PurchaseReturn,
}

impl MovementKind {
    /// The signed stock delta this movement contributes for a quantity.
    pub fn signed(self, quantity: u32) -> i64 {
        let q = i64::from(quantity);
        match self {
            MovementKind::Receipt | MovementKind::SalesReturn => q,
            MovementKind::Issue | MovementKind::PurchaseReturn => -q,
        }
    }
}

/// One row of a product's kardex. Entries are immutable once posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KardexEntry {
    pub entry_id: EntityId,
    pub movement: MovementKind,
    pub quantity: u32,
    pub date: DateTime<Utc>,
    /// The document (invoice or purchase order) that caused this movement,
    /// when there is one.
    pub reference_id: Option<EntityId>,
    pub description: Option<String>,
}

/// Aggregate root: the append-only movement log of one product.
///
/// Stock is never stored as an editable counter; it is the running fold of
/// the log, so replaying the log from empty always reproduces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductKardex {
    product_id: ProductId,
    entries: Vec<KardexEntry>,
    stock: i64,
    policy: LedgerPolicy,
    version: u64,
}

impl ProductKardex {
    /// Every product implicitly has an empty kardex; no opening command is
    /// needed.
    pub fn empty(product_id: ProductId) -> Self {
        Self {
            product_id,
            entries: Vec::new(),
            stock: 0,
            policy: LedgerPolicy::strict(),
            version: 0,
        }
    }

    /// See [`docledger_core::LedgerPolicy`]; configuration, not event state.
    pub fn with_policy(mut self, policy: LedgerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The event-stream key of a product's kardex.
    ///
    /// The product's own id keys the catalog stream, so the kardex derives a
    /// distinct, deterministic key from it (UUIDv5 under a fixed namespace).
    /// No lookup table is needed; the same product always maps to the same
    /// stream.
    pub fn stream_id(product_id: ProductId) -> EntityId {
        let product_uuid: Uuid = EntityId::from(product_id).into();
        EntityId::from_uuid(Uuid::new_v5(
            &KARDEX_STREAM_NAMESPACE,
            product_uuid.as_bytes(),
        ))
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    /// Entries in posting order, oldest first.
    pub fn entries(&self) -> &[KardexEntry] {
        &self.entries
    }

    /// Current stock: Σ(+Receipt, +SalesReturn, −Issue, −PurchaseReturn).
    pub fn stock(&self) -> i64 {
        self.stock
    }
}

impl AggregateRoot for ProductKardex {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PostMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMovement {
    pub product_id: ProductId,
    pub entry_id: EntityId,
    pub movement: MovementKind,
    pub quantity: u32,
    pub date: DateTime<Utc>,
    pub reference_id: Option<EntityId>,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KardexCommand {
    PostMovement(PostMovement),
}

/// Event: MovementPosted. Carries the running stock after the movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPosted {
    pub product_id: ProductId,
    pub entry: KardexEntry,
    pub new_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KardexEvent {
    MovementPosted(MovementPosted),
}

impl Event for KardexEvent {
    fn event_type(&self) -> &'static str {
        match self {
            KardexEvent::MovementPosted(_) => "inventory.kardex.movement_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            KardexEvent::MovementPosted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProductKardex {
    type Command = KardexCommand;
    type Event = KardexEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            KardexEvent::MovementPosted(e) => {
                self.entries.push(e.entry.clone());
                self.stock = e.new_stock;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            KardexCommand::PostMovement(cmd) => self.handle_post(cmd),
        }
    }
}

impl ProductKardex {
    fn handle_post(&self, cmd: &PostMovement) -> Result<Vec<KardexEvent>, DomainError> {
        if self.product_id != cmd.product_id {
            return Err(DomainError::conflict("product_id mismatch"));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }

        let new_stock = self.stock + cmd.movement.signed(cmd.quantity);
        if new_stock < 0 && !self.policy.allow_negative_stock {
            return Err(DomainError::InsufficientStock {
                available: self.stock,
                requested: i64::from(cmd.quantity),
            });
        }

        let entry = KardexEntry {
            entry_id: cmd.entry_id,
            movement: cmd.movement,
            quantity: cmd.quantity,
            date: cmd.date,
            reference_id: cmd.reference_id,
            description: cmd.description.clone(),
        };

        Ok(vec![KardexEvent::MovementPosted(MovementPosted {
            product_id: cmd.product_id,
            entry,
            new_stock,
            occurred_at: cmd.occurred_at,
        })])
    }
}
