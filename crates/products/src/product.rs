use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docledger_core::{Aggregate, AggregateRoot, DomainError, EntityId, Money, impl_entity_id};
use docledger_events::Event;

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub EntityId);

impl_entity_id!(ProductId);

/// Whether a product's stock is tracked in the kardex.
///
/// Services never receive inventory movements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Physical,
    Service,
}

impl ProductKind {
    pub fn is_tracked(&self) -> bool {
        matches!(self, ProductKind::Physical)
    }
}

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Archived,
}

/// Aggregate root: Product.
///
/// The catalog price here is only the source for **new** line-item snapshots;
/// posted documents keep the price they captured (price edits are never
/// retroactive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    code: String,
    name: String,
    unit_price: Money,
    kind: ProductKind,
    status: ProductStatus,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            code: String::new(),
            name: String::new(),
            unit_price: Money::ZERO,
            kind: ProductKind::Physical,
            status: ProductStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn kind(&self) -> ProductKind {
        self.kind
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    /// Archived products can no longer be referenced by new line items.
    pub fn is_sellable(&self) -> bool {
        self.created && self.status == ProductStatus::Active
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub code: String,
    pub name: String,
    pub unit_price: Money,
    pub kind: ProductKind,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePrice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePrice {
    pub product_id: ProductId,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    UpdatePrice(UpdatePrice),
    ArchiveProduct(ArchiveProduct),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product_id: ProductId,
    pub code: String,
    pub name: String,
    pub unit_price: Money,
    pub kind: ProductKind,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PriceUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdated {
    pub product_id: ProductId,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    PriceUpdated(PriceUpdated),
    ProductArchived(ProductArchived),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::PriceUpdated(_) => "products.product.price_updated",
            ProductEvent::ProductArchived(_) => "products.product.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::PriceUpdated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.code = e.code.clone();
                self.name = e.name.clone();
                self.unit_price = e.unit_price;
                self.kind = e.kind;
                self.status = ProductStatus::Active;
                self.created = true;
            }
            ProductEvent::PriceUpdated(e) => {
                self.unit_price = e.unit_price;
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::UpdatePrice(cmd) => self.handle_update_price(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Product {
    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::conflict("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.code.trim().is_empty() {
            return Err(DomainError::validation("code cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit_price.is_negative() {
            return Err(DomainError::validation("unit_price must not be negative"));
        }

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            product_id: cmd.product_id,
            code: cmd.code.clone(),
            name: cmd.name.clone(),
            unit_price: cmd.unit_price,
            kind: cmd.kind,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_price(&self, cmd: &UpdatePrice) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_product_id(cmd.product_id)?;

        if cmd.unit_price.is_negative() {
            return Err(DomainError::validation("unit_price must not be negative"));
        }
        if self.status == ProductStatus::Archived {
            return Err(DomainError::validation(
                "cannot change price of archived product",
            ));
        }

        Ok(vec![ProductEvent::PriceUpdated(PriceUpdated {
            product_id: cmd.product_id,
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product is already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
