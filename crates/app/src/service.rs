//! Application service: the external surface of the ledger core.
//!
//! `LedgerService` wires the event store, event bus, and domain aggregates
//! together. Single-aggregate operations go through the command dispatcher;
//! conversions and payment/receiving hooks touch several streams and commit
//! them through `append_multi`, so either every constituent write lands or
//! none does.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use uuid::Uuid;

use docledger_core::{
    Aggregate, DomainError, EntityId, ExpectedVersion, LedgerPolicy, Money, Percent,
};
use docledger_crm::{
    AdvanceStage, ChangeLeadStatus, Lead, LeadCommand, LeadId, LeadStatus, MarkConverted,
    OpenOpportunity, Opportunity, OpportunityCommand, OpportunityId, OpportunityStage,
    RegisterLead,
};
use docledger_documents::LineItem;
use docledger_events::{EventBus, EventEnvelope};
use docledger_inventory::{
    KardexCommand, KardexEntry, MovementKind, PostMovement, ProductKardex,
};
use docledger_invoicing::{
    AddInvoiceLine, ChangeInvoiceStatus, CreateInvoice, Invoice, InvoiceCommand, InvoiceId,
    InvoiceStatus, RegisterSettlement, RemoveInvoiceLine,
};
use docledger_parties::{
    ContactInfo, Party, PartyCommand, PartyId, PartyKind, RegisterParty, UpdateDetails,
};
use docledger_payments::{
    DocumentRefKind, Payment, PaymentCommand, PaymentId, PaymentKind, PaymentMethod, RecordPayment,
};
use docledger_products::{
    ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId, ProductKind, UpdatePrice,
};
use docledger_purchasing::{
    AddPurchaseOrderLine, ChangePurchaseOrderStatus, CreatePurchaseOrder, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderId, PurchaseOrderStatus, RegisterDisbursement,
    RemovePurchaseOrderLine,
};
use docledger_sales::{
    AddQuotationLine, ChangeQuotationStatus, CreateQuotation, MarkInvoiced, Quotation,
    QuotationCommand, QuotationId, QuotationStatus, RemoveQuotationLine,
};

use crate::command_dispatcher::{
    CommandDispatcher, DispatchError, apply_history, stream_version, validate_loaded_stream,
};
use crate::event_store::{EventStore, StreamAppend, UncommittedEvent};

const PRODUCT_TYPE: &str = "products.product";
const PARTY_TYPE: &str = "parties.party";
const LEAD_TYPE: &str = "crm.lead";
const OPPORTUNITY_TYPE: &str = "crm.opportunity";
const QUOTATION_TYPE: &str = "sales.quotation";
const INVOICE_TYPE: &str = "invoicing.invoice";
const PURCHASE_ORDER_TYPE: &str = "purchasing.purchase_order";
const PAYMENT_TYPE: &str = "payments.payment";
const KARDEX_TYPE: &str = "inventory.kardex";

/// Default payment/delivery term for generated documents.
const DEFAULT_TERM_DAYS: i64 = 30;

/// Outcome of a lead conversion: the customer and opportunity it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadConversion {
    pub customer_id: PartyId,
    pub opportunity_id: OpportunityId,
}

/// The ledger core's application service.
pub struct LedgerService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    policy: LedgerPolicy,
}

impl<S, B> LedgerService<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            policy: LedgerPolicy::strict(),
        }
    }

    pub fn with_policy(mut self, policy: LedgerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> LedgerPolicy {
        self.policy
    }
}

impl<S, B> LedgerService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    // ----- catalog -----

    pub fn register_product(
        &self,
        code: impl Into<String>,
        name: impl Into<String>,
        unit_price: Money,
        kind: ProductKind,
    ) -> Result<ProductId, DispatchError> {
        let product_id = ProductId::generate();
        self.dispatcher.dispatch(
            product_id.into(),
            PRODUCT_TYPE,
            ProductCommand::CreateProduct(CreateProduct {
                product_id,
                code: code.into(),
                name: name.into(),
                unit_price,
                kind,
                occurred_at: Utc::now(),
            }),
            |id| Product::empty(ProductId::new(id)),
        )?;
        Ok(product_id)
    }

    pub fn update_product_price(
        &self,
        product_id: ProductId,
        unit_price: Money,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(
            product_id.into(),
            PRODUCT_TYPE,
            ProductCommand::UpdatePrice(UpdatePrice {
                product_id,
                unit_price,
                occurred_at: Utc::now(),
            }),
            |id| Product::empty(ProductId::new(id)),
        )?;
        Ok(())
    }

    pub fn archive_product(&self, product_id: ProductId) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(
            product_id.into(),
            PRODUCT_TYPE,
            ProductCommand::ArchiveProduct(ArchiveProduct {
                product_id,
                occurred_at: Utc::now(),
            }),
            |id| Product::empty(ProductId::new(id)),
        )?;
        Ok(())
    }

    pub fn product(&self, product_id: ProductId) -> Result<Product, DispatchError> {
        let (product, _) = self.load(product_id.into(), Product::empty(product_id))?;
        if !product.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(product)
    }

    pub fn register_party(
        &self,
        kind: PartyKind,
        name: impl Into<String>,
        contact: ContactInfo,
    ) -> Result<PartyId, DispatchError> {
        let party_id = PartyId::generate();
        self.dispatcher.dispatch(
            party_id.into(),
            PARTY_TYPE,
            PartyCommand::RegisterParty(RegisterParty {
                party_id,
                kind,
                name: name.into(),
                contact,
                occurred_at: Utc::now(),
            }),
            |id| Party::empty(PartyId::new(id)),
        )?;
        Ok(party_id)
    }

    pub fn update_party_details(
        &self,
        party_id: PartyId,
        name: impl Into<String>,
        contact: ContactInfo,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(
            party_id.into(),
            PARTY_TYPE,
            PartyCommand::UpdateDetails(UpdateDetails {
                party_id,
                name: name.into(),
                contact,
                occurred_at: Utc::now(),
            }),
            |id| Party::empty(PartyId::new(id)),
        )?;
        Ok(())
    }

    pub fn party(&self, party_id: PartyId) -> Result<Party, DispatchError> {
        let (party, _) = self.load(party_id.into(), Party::empty(party_id))?;
        if !party.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(party)
    }

    // ----- crm -----

    pub fn register_lead(
        &self,
        contact_name: impl Into<String>,
        company: impl Into<String>,
        email: Option<String>,
        phone: Option<String>,
    ) -> Result<LeadId, DispatchError> {
        let lead_id = LeadId::generate();
        self.dispatcher.dispatch(
            lead_id.into(),
            LEAD_TYPE,
            LeadCommand::RegisterLead(RegisterLead {
                lead_id,
                contact_name: contact_name.into(),
                company: company.into(),
                email,
                phone,
                occurred_at: Utc::now(),
            }),
            |id| Lead::empty(LeadId::new(id)),
        )?;
        Ok(lead_id)
    }

    pub fn change_lead_status(
        &self,
        lead_id: LeadId,
        requested: LeadStatus,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(
            lead_id.into(),
            LEAD_TYPE,
            LeadCommand::ChangeLeadStatus(ChangeLeadStatus {
                lead_id,
                requested,
                occurred_at: Utc::now(),
            }),
            |id| Lead::empty(LeadId::new(id)),
        )?;
        Ok(())
    }

    pub fn lead(&self, lead_id: LeadId) -> Result<Lead, DispatchError> {
        let (lead, _) = self.load(lead_id.into(), Lead::empty(lead_id))?;
        if !lead.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(lead)
    }

    pub fn advance_opportunity(
        &self,
        opportunity_id: OpportunityId,
        requested: OpportunityStage,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(
            opportunity_id.into(),
            OPPORTUNITY_TYPE,
            OpportunityCommand::AdvanceStage(AdvanceStage {
                opportunity_id,
                requested,
                occurred_at: Utc::now(),
            }),
            |id| Opportunity::empty(OpportunityId::new(id)),
        )?;
        Ok(())
    }

    pub fn opportunity(&self, opportunity_id: OpportunityId) -> Result<Opportunity, DispatchError> {
        let (opp, _) = self.load(opportunity_id.into(), Opportunity::empty(opportunity_id))?;
        if !opp.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(opp)
    }

    /// Convert a lead into a customer and an opportunity, atomically.
    ///
    /// Three streams move together: the lead is marked converted, a customer
    /// party is registered from the lead's contact fields, and an opportunity
    /// opens at the Qualification stage with a close date thirty days out.
    /// A lead converts at most once; the second attempt fails without
    /// touching any stream.
    pub fn convert_lead(
        &self,
        lead_id: LeadId,
        opportunity_name: impl Into<String>,
        opportunity_amount: Money,
    ) -> Result<LeadConversion, DispatchError> {
        let now = Utc::now();
        let (lead, lead_version) = self.load(lead_id.into(), Lead::empty(lead_id))?;

        let customer_id = PartyId::generate();
        let opportunity_id = OpportunityId::generate();

        let lead_events = lead.handle(&LeadCommand::MarkConverted(MarkConverted {
            lead_id,
            customer_id,
            opportunity_id,
            occurred_at: now,
        }))?;

        let contact = ContactInfo {
            email: lead.email().map(str::to_string),
            phone: lead.phone().map(str::to_string),
            address: None,
        };
        let customer_name = if lead.company().trim().is_empty() {
            lead.contact_name().to_string()
        } else {
            lead.company().to_string()
        };

        let party_events = Party::empty(customer_id).handle(&PartyCommand::RegisterParty(
            RegisterParty {
                party_id: customer_id,
                kind: PartyKind::Customer,
                name: customer_name,
                contact,
                occurred_at: now,
            },
        ))?;

        let opportunity_events = Opportunity::empty(opportunity_id).handle(
            &OpportunityCommand::OpenOpportunity(OpenOpportunity {
                opportunity_id,
                name: opportunity_name.into(),
                customer_id,
                amount: opportunity_amount,
                stage: OpportunityStage::Qualification,
                close_date: now + Duration::days(DEFAULT_TERM_DAYS),
                occurred_at: now,
            }),
        )?;

        let committed = self.dispatcher.store().append_multi(vec![
            self.batch(lead_id.into(), LEAD_TYPE, &lead_events, lead_version)?,
            self.batch(customer_id.into(), PARTY_TYPE, &party_events, 0)?,
            self.batch(
                opportunity_id.into(),
                OPPORTUNITY_TYPE,
                &opportunity_events,
                0,
            )?,
        ])?;
        self.dispatcher.publish_committed(&committed)?;

        info!(%lead_id, %customer_id, %opportunity_id, "lead converted");
        Ok(LeadConversion {
            customer_id,
            opportunity_id,
        })
    }

    // ----- quotations -----

    pub fn create_quotation(
        &self,
        customer_id: PartyId,
        issue_date: DateTime<Utc>,
        expiry_date: DateTime<Utc>,
    ) -> Result<QuotationId, DispatchError> {
        self.party(customer_id)?;
        let quotation_id = QuotationId::generate();
        self.dispatcher.dispatch(
            quotation_id.into(),
            QUOTATION_TYPE,
            QuotationCommand::CreateQuotation(CreateQuotation {
                quotation_id,
                customer_id,
                issue_date,
                expiry_date,
                occurred_at: Utc::now(),
            }),
            |id| Quotation::empty(QuotationId::new(id)),
        )?;
        Ok(quotation_id)
    }

    /// Add a line to a quotation, snapshotting the product name and current
    /// unit price. Later catalog edits never touch this line.
    pub fn add_quotation_line(
        &self,
        quotation_id: QuotationId,
        product_id: ProductId,
        quantity: u32,
        discount: Percent,
        tax: Percent,
    ) -> Result<(), DispatchError> {
        let line = self.snapshot_line(product_id, quantity, discount, tax)?;
        self.dispatcher.dispatch(
            quotation_id.into(),
            QUOTATION_TYPE,
            QuotationCommand::AddQuotationLine(AddQuotationLine {
                quotation_id,
                line,
                occurred_at: Utc::now(),
            }),
            |id| Quotation::empty(QuotationId::new(id)),
        )?;
        Ok(())
    }

    pub fn remove_quotation_line(
        &self,
        quotation_id: QuotationId,
        line_no: usize,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(
            quotation_id.into(),
            QUOTATION_TYPE,
            QuotationCommand::RemoveQuotationLine(RemoveQuotationLine {
                quotation_id,
                line_no,
                occurred_at: Utc::now(),
            }),
            |id| Quotation::empty(QuotationId::new(id)),
        )?;
        Ok(())
    }

    pub fn transition_quotation(
        &self,
        quotation_id: QuotationId,
        requested: QuotationStatus,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(
            quotation_id.into(),
            QUOTATION_TYPE,
            QuotationCommand::ChangeQuotationStatus(ChangeQuotationStatus {
                quotation_id,
                requested,
                occurred_at: Utc::now(),
            }),
            |id| Quotation::empty(QuotationId::new(id)),
        )?;
        Ok(())
    }

    pub fn quotation(&self, quotation_id: QuotationId) -> Result<Quotation, DispatchError> {
        let (q, _) = self.load(quotation_id.into(), Quotation::empty(quotation_id))?;
        if !q.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(q)
    }

    /// Convert an approved quotation into a draft invoice, atomically.
    ///
    /// The invoice deep-copies the quotation's lines and takes its totals
    /// verbatim; they are canonical as of approval, and the line math is
    /// deterministic, so recomputing would produce the same numbers. The due
    /// date defaults to issue date plus thirty days. The quotation is marked
    /// so a second conversion fails instead of minting a duplicate invoice.
    pub fn convert_quotation_to_invoice(
        &self,
        quotation_id: QuotationId,
    ) -> Result<InvoiceId, DispatchError> {
        let now = Utc::now();
        let (quotation, quotation_version) =
            self.load(quotation_id.into(), Quotation::empty(quotation_id))?;
        if !quotation.exists() {
            return Err(DomainError::not_found().into());
        }

        let invoice_id = InvoiceId::generate();
        let quotation_events = quotation.handle(&QuotationCommand::MarkInvoiced(MarkInvoiced {
            quotation_id,
            invoice_id: invoice_id.into(),
            occurred_at: now,
        }))?;

        let invoice_events = Invoice::empty(invoice_id).handle(&InvoiceCommand::CreateInvoice(
            CreateInvoice {
                invoice_id,
                quotation_id: Some(quotation_id),
                customer_id: quotation.customer_id(),
                issue_date: now,
                due_date: now + Duration::days(DEFAULT_TERM_DAYS),
                lines: quotation.lines().to_vec(),
                totals: quotation.totals(),
                occurred_at: now,
            },
        ))?;

        let committed = self.dispatcher.store().append_multi(vec![
            self.batch(
                quotation_id.into(),
                QUOTATION_TYPE,
                &quotation_events,
                quotation_version,
            )?,
            self.batch(invoice_id.into(), INVOICE_TYPE, &invoice_events, 0)?,
        ])?;
        self.dispatcher.publish_committed(&committed)?;

        info!(%quotation_id, %invoice_id, "quotation converted to invoice");
        Ok(invoice_id)
    }

    // ----- invoices -----

    pub fn create_invoice(
        &self,
        customer_id: PartyId,
        issue_date: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> Result<InvoiceId, DispatchError> {
        self.party(customer_id)?;
        let invoice_id = InvoiceId::generate();
        self.dispatcher.dispatch(
            invoice_id.into(),
            INVOICE_TYPE,
            InvoiceCommand::CreateInvoice(CreateInvoice {
                invoice_id,
                quotation_id: None,
                customer_id,
                issue_date,
                due_date,
                lines: Vec::new(),
                totals: Default::default(),
                occurred_at: Utc::now(),
            }),
            |id| Invoice::empty(InvoiceId::new(id)),
        )?;
        Ok(invoice_id)
    }

    pub fn add_invoice_line(
        &self,
        invoice_id: InvoiceId,
        product_id: ProductId,
        quantity: u32,
        discount: Percent,
        tax: Percent,
    ) -> Result<(), DispatchError> {
        let line = self.snapshot_line(product_id, quantity, discount, tax)?;
        let policy = self.policy;
        self.dispatcher.dispatch(
            invoice_id.into(),
            INVOICE_TYPE,
            InvoiceCommand::AddInvoiceLine(AddInvoiceLine {
                invoice_id,
                line,
                occurred_at: Utc::now(),
            }),
            |id| Invoice::empty(InvoiceId::new(id)).with_policy(policy),
        )?;
        Ok(())
    }

    pub fn remove_invoice_line(
        &self,
        invoice_id: InvoiceId,
        line_no: usize,
    ) -> Result<(), DispatchError> {
        let policy = self.policy;
        self.dispatcher.dispatch(
            invoice_id.into(),
            INVOICE_TYPE,
            InvoiceCommand::RemoveInvoiceLine(RemoveInvoiceLine {
                invoice_id,
                line_no,
                occurred_at: Utc::now(),
            }),
            |id| Invoice::empty(InvoiceId::new(id)).with_policy(policy),
        )?;
        Ok(())
    }

    pub fn transition_invoice(
        &self,
        invoice_id: InvoiceId,
        requested: InvoiceStatus,
    ) -> Result<(), DispatchError> {
        let policy = self.policy;
        self.dispatcher.dispatch(
            invoice_id.into(),
            INVOICE_TYPE,
            InvoiceCommand::ChangeInvoiceStatus(ChangeInvoiceStatus {
                invoice_id,
                requested,
                occurred_at: Utc::now(),
            }),
            |id| Invoice::empty(InvoiceId::new(id)).with_policy(policy),
        )?;
        Ok(())
    }

    pub fn invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, DispatchError> {
        let (invoice, _) = self.load(
            invoice_id.into(),
            Invoice::empty(invoice_id).with_policy(self.policy),
        )?;
        if !invoice.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(invoice)
    }

    // ----- purchase orders -----

    pub fn create_purchase_order(
        &self,
        vendor_id: PartyId,
        issue_date: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> Result<PurchaseOrderId, DispatchError> {
        self.party(vendor_id)?;
        let purchase_order_id = PurchaseOrderId::generate();
        self.dispatcher.dispatch(
            purchase_order_id.into(),
            PURCHASE_ORDER_TYPE,
            PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                purchase_order_id,
                vendor_id,
                issue_date,
                due_date,
                occurred_at: Utc::now(),
            }),
            |id| PurchaseOrder::empty(PurchaseOrderId::new(id)),
        )?;
        Ok(purchase_order_id)
    }

    /// Purchase order lines carry no discount; that is a per-document-type
    /// rule, not an omission.
    pub fn add_purchase_order_line(
        &self,
        purchase_order_id: PurchaseOrderId,
        product_id: ProductId,
        quantity: u32,
        tax: Percent,
    ) -> Result<(), DispatchError> {
        let line = self.snapshot_line(product_id, quantity, Percent::ZERO, tax)?;
        let policy = self.policy;
        self.dispatcher.dispatch(
            purchase_order_id.into(),
            PURCHASE_ORDER_TYPE,
            PurchaseOrderCommand::AddPurchaseOrderLine(AddPurchaseOrderLine {
                purchase_order_id,
                line,
                occurred_at: Utc::now(),
            }),
            |id| PurchaseOrder::empty(PurchaseOrderId::new(id)).with_policy(policy),
        )?;
        Ok(())
    }

    pub fn remove_purchase_order_line(
        &self,
        purchase_order_id: PurchaseOrderId,
        line_no: usize,
    ) -> Result<(), DispatchError> {
        let policy = self.policy;
        self.dispatcher.dispatch(
            purchase_order_id.into(),
            PURCHASE_ORDER_TYPE,
            PurchaseOrderCommand::RemovePurchaseOrderLine(RemovePurchaseOrderLine {
                purchase_order_id,
                line_no,
                occurred_at: Utc::now(),
            }),
            |id| PurchaseOrder::empty(PurchaseOrderId::new(id)).with_policy(policy),
        )?;
        Ok(())
    }

    /// Request a purchase order status change.
    ///
    /// Reaching Received posts a receipt into the kardex of every tracked
    /// product on the order, in the same atomic commit as the status flip.
    pub fn transition_purchase_order(
        &self,
        purchase_order_id: PurchaseOrderId,
        requested: PurchaseOrderStatus,
    ) -> Result<(), DispatchError> {
        let now = Utc::now();
        let (po, po_version) = self.load(
            purchase_order_id.into(),
            PurchaseOrder::empty(purchase_order_id).with_policy(self.policy),
        )?;

        let po_events = po.handle(&PurchaseOrderCommand::ChangePurchaseOrderStatus(
            ChangePurchaseOrderStatus {
                purchase_order_id,
                requested,
                occurred_at: now,
            },
        ))?;

        let mut batches = vec![self.batch(
            purchase_order_id.into(),
            PURCHASE_ORDER_TYPE,
            &po_events,
            po_version,
        )?];

        if requested == PurchaseOrderStatus::Received {
            batches.extend(self.kardex_batches(
                po.lines(),
                MovementKind::Receipt,
                purchase_order_id.into(),
                "purchase order received",
                now,
            )?);
        }

        let committed = self.dispatcher.store().append_multi(batches)?;
        self.dispatcher.publish_committed(&committed)?;
        Ok(())
    }

    pub fn purchase_order(
        &self,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<PurchaseOrder, DispatchError> {
        let (po, _) = self.load(
            purchase_order_id.into(),
            PurchaseOrder::empty(purchase_order_id).with_policy(self.policy),
        )?;
        if !po.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(po)
    }

    // ----- payments -----

    /// Record a payment and settle it against its referenced document,
    /// atomically.
    ///
    /// The payment entry, the document's settlement (and status flip, when
    /// the balance reaches zero), and any inventory bookkeeping triggered by
    /// that flip commit as one unit. An invoice reaching Paid issues stock
    /// for its tracked lines; a purchase order reaching Received books
    /// receipts. A payment exceeding the remaining balance is rejected
    /// before anything is written.
    pub fn apply_payment(
        &self,
        kind: PaymentKind,
        method: PaymentMethod,
        party_id: PartyId,
        reference_kind: DocumentRefKind,
        reference_id: EntityId,
        amount: Money,
        date: DateTime<Utc>,
    ) -> Result<PaymentId, DispatchError> {
        let now = Utc::now();
        let payment_id = PaymentId::generate();

        let payment_events =
            Payment::empty(payment_id).handle(&PaymentCommand::RecordPayment(RecordPayment {
                payment_id,
                kind,
                amount,
                date,
                method,
                party_id,
                reference_id,
                reference_kind,
                occurred_at: now,
            }))?;

        let mut batches =
            vec![self.batch(payment_id.into(), PAYMENT_TYPE, &payment_events, 0)?];

        match reference_kind {
            DocumentRefKind::Invoice => {
                let invoice_id = InvoiceId::new(reference_id);
                let (invoice, invoice_version) = self.load(
                    reference_id,
                    Invoice::empty(invoice_id).with_policy(self.policy),
                )?;
                if !invoice.exists() {
                    return Err(DomainError::not_found().into());
                }

                let events = invoice.handle(&InvoiceCommand::RegisterSettlement(
                    RegisterSettlement {
                        invoice_id,
                        payment_id: payment_id.into(),
                        amount,
                        occurred_at: now,
                    },
                ))?;

                let became_paid = events.iter().any(|e| {
                    matches!(
                        e,
                        docledger_invoicing::InvoiceEvent::InvoiceStatusChanged(sc)
                            if sc.to == InvoiceStatus::Paid
                    )
                });

                batches.push(self.batch(reference_id, INVOICE_TYPE, &events, invoice_version)?);

                if became_paid {
                    batches.extend(self.kardex_batches(
                        invoice.lines(),
                        MovementKind::Issue,
                        reference_id,
                        "invoice paid",
                        now,
                    )?);
                }
            }
            DocumentRefKind::PurchaseOrder => {
                let purchase_order_id = PurchaseOrderId::new(reference_id);
                let (po, po_version) = self.load(
                    reference_id,
                    PurchaseOrder::empty(purchase_order_id).with_policy(self.policy),
                )?;
                if !po.exists() {
                    return Err(DomainError::not_found().into());
                }

                let events = po.handle(&PurchaseOrderCommand::RegisterDisbursement(
                    RegisterDisbursement {
                        purchase_order_id,
                        payment_id: payment_id.into(),
                        amount,
                        occurred_at: now,
                    },
                ))?;

                let became_received = events.iter().any(|e| {
                    matches!(
                        e,
                        docledger_purchasing::PurchaseOrderEvent::PurchaseOrderStatusChanged(sc)
                            if sc.to == PurchaseOrderStatus::Received
                    )
                });

                batches.push(self.batch(
                    reference_id,
                    PURCHASE_ORDER_TYPE,
                    &events,
                    po_version,
                )?);

                if became_received {
                    batches.extend(self.kardex_batches(
                        po.lines(),
                        MovementKind::Receipt,
                        reference_id,
                        "purchase order received",
                        now,
                    )?);
                }
            }
        }

        let committed = self.dispatcher.store().append_multi(batches)?;
        self.dispatcher.publish_committed(&committed)?;

        debug!(%payment_id, amount = amount.minor(), "payment applied");
        Ok(payment_id)
    }

    /// Outstanding balance of an invoice or purchase order.
    pub fn remaining_balance(
        &self,
        reference_kind: DocumentRefKind,
        reference_id: EntityId,
    ) -> Result<Money, DispatchError> {
        match reference_kind {
            DocumentRefKind::Invoice => {
                Ok(self.invoice(InvoiceId::new(reference_id))?.remaining_balance())
            }
            DocumentRefKind::PurchaseOrder => Ok(self
                .purchase_order(PurchaseOrderId::new(reference_id))?
                .remaining_balance()),
        }
    }

    // ----- inventory -----

    /// Post a standalone inventory movement (manual receipt, return, or
    /// correction). Only physical products may receive movements.
    pub fn post_inventory_transaction(
        &self,
        product_id: ProductId,
        movement: MovementKind,
        quantity: u32,
        date: DateTime<Utc>,
        reference_id: Option<EntityId>,
        description: Option<String>,
    ) -> Result<i64, DispatchError> {
        self.ensure_tracked(product_id)?;

        let policy = self.policy;
        let committed = self.dispatcher.dispatch(
            ProductKardex::stream_id(product_id),
            KARDEX_TYPE,
            KardexCommand::PostMovement(PostMovement {
                product_id,
                entry_id: EntityId::new(),
                movement,
                quantity,
                date,
                reference_id,
                description,
                occurred_at: Utc::now(),
            }),
            move |_| ProductKardex::empty(product_id).with_policy(policy),
        )?;

        // The event carries the running stock after the movement.
        let last = committed
            .last()
            .ok_or_else(|| DispatchError::Domain(DomainError::not_found()))?;
        let event: docledger_inventory::KardexEvent =
            serde_json::from_value(last.payload.clone())
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        let docledger_inventory::KardexEvent::MovementPosted(posted) = event;
        Ok(posted.new_stock)
    }

    /// Current stock, derived by folding the product's movement log.
    pub fn current_stock(&self, product_id: ProductId) -> Result<i64, DispatchError> {
        let (kardex, _) = self.load(
            ProductKardex::stream_id(product_id),
            ProductKardex::empty(product_id).with_policy(self.policy),
        )?;
        Ok(kardex.stock())
    }

    /// The product's movement history, most recent first.
    pub fn kardex(&self, product_id: ProductId) -> Result<Vec<KardexEntry>, DispatchError> {
        let (kardex, _) = self.load(
            ProductKardex::stream_id(product_id),
            ProductKardex::empty(product_id).with_policy(self.policy),
        )?;
        let mut entries = kardex.entries().to_vec();
        entries.reverse();
        Ok(entries)
    }

    // ----- internals -----

    fn load<A>(&self, entity_id: EntityId, empty: A) -> Result<(A, u64), DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let history = self.dispatcher.store().load_stream(entity_id)?;
        validate_loaded_stream(entity_id, &history)?;
        let version = stream_version(&history);
        let mut aggregate = empty;
        apply_history::<A>(&mut aggregate, &history)?;
        Ok((aggregate, version))
    }

    fn batch<E>(
        &self,
        entity_id: EntityId,
        aggregate_type: &str,
        events: &[E],
        current_version: u64,
    ) -> Result<StreamAppend, DispatchError>
    where
        E: docledger_events::Event + Serialize,
    {
        let events = events
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(entity_id, aggregate_type, Uuid::now_v7(), ev)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StreamAppend {
            events,
            expected_version: ExpectedVersion::Exact(current_version),
        })
    }

    /// Build a snapshot line from the current catalog state.
    fn snapshot_line(
        &self,
        product_id: ProductId,
        quantity: u32,
        discount: Percent,
        tax: Percent,
    ) -> Result<LineItem, DispatchError> {
        let product = self.product(product_id)?;
        if !product.is_sellable() {
            return Err(DomainError::validation("product is archived").into());
        }
        Ok(LineItem::new(
            product_id,
            product.name(),
            product.unit_price(),
            quantity,
            discount,
            tax,
        )?)
    }

    fn ensure_tracked(&self, product_id: ProductId) -> Result<(), DispatchError> {
        let product = self.product(product_id)?;
        if !product.kind().is_tracked() {
            return Err(DomainError::validation(
                "inventory transactions require a physical product",
            )
            .into());
        }
        Ok(())
    }

    /// Build kardex movement batches for a document's tracked lines.
    ///
    /// Lines referencing the same product are merged into one movement so a
    /// multi-stream append never carries duplicate streams. Service products
    /// are skipped; they have no stock.
    fn kardex_batches(
        &self,
        lines: &[LineItem],
        movement: MovementKind,
        reference_id: EntityId,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<StreamAppend>, DispatchError> {
        let mut merged: Vec<(ProductId, u32)> = Vec::new();
        for line in lines {
            match merged.iter_mut().find(|(p, _)| *p == line.product_id) {
                Some((_, q)) => *q += line.quantity,
                None => merged.push((line.product_id, line.quantity)),
            }
        }

        let mut batches = Vec::new();
        for (product_id, quantity) in merged {
            let product = self.product(product_id)?;
            if !product.kind().is_tracked() {
                continue;
            }

            let stream_id = ProductKardex::stream_id(product_id);
            let (kardex, kardex_version) = self.load(
                stream_id,
                ProductKardex::empty(product_id).with_policy(self.policy),
            )?;
            let events = kardex.handle(&KardexCommand::PostMovement(PostMovement {
                product_id,
                entry_id: EntityId::new(),
                movement,
                quantity,
                date: now,
                reference_id: Some(reference_id),
                description: Some(description.to_string()),
                occurred_at: now,
            }))?;
            batches.push(self.batch(stream_id, KARDEX_TYPE, &events, kardex_version)?);
        }
        Ok(batches)
    }
}
