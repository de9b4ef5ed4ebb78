//! End-to-end walkthrough of the ledger core against the in-memory backend:
//! catalog setup, a quotation, its conversion to an invoice, settlement, and
//! the resulting inventory movements.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;

use docledger_app::LedgerService;
use docledger_app::event_store::InMemoryEventStore;
use docledger_core::{Money, Percent};
use docledger_events::{EventEnvelope, InMemoryEventBus};
use docledger_inventory::MovementKind;
use docledger_invoicing::InvoiceStatus;
use docledger_parties::{ContactInfo, PartyKind};
use docledger_payments::{DocumentRefKind, PaymentKind, PaymentMethod};
use docledger_products::ProductKind;
use docledger_sales::QuotationStatus;

fn main() -> Result<()> {
    docledger_observability::init();

    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    let service = LedgerService::new(InMemoryEventStore::new(), bus);

    let customer_id = service.register_party(
        PartyKind::Customer,
        "Acme GmbH",
        ContactInfo {
            email: Some("billing@acme.example".to_string()),
            phone: None,
            address: None,
        },
    )?;
    let product_id = service.register_product(
        "WID-1",
        "Widget",
        Money::from_minor(10_000),
        ProductKind::Physical,
    )?;
    service.post_inventory_transaction(
        product_id,
        MovementKind::Receipt,
        50,
        Utc::now(),
        None,
        Some("opening stock".to_string()),
    )?;

    let quotation_id =
        service.create_quotation(customer_id, Utc::now(), Utc::now() + Duration::days(14))?;
    service.add_quotation_line(
        quotation_id,
        product_id,
        2,
        Percent::from_whole(10)?,
        Percent::from_whole(9)?,
    )?;
    service.transition_quotation(quotation_id, QuotationStatus::Sent)?;
    service.transition_quotation(quotation_id, QuotationStatus::Approved)?;

    let invoice_id = service.convert_quotation_to_invoice(quotation_id)?;
    service.transition_invoice(invoice_id, InvoiceStatus::Sent)?;

    let total = service.invoice(invoice_id)?.totals().total_amount;
    service.apply_payment(
        PaymentKind::Receipt,
        PaymentMethod::BankTransfer,
        customer_id,
        DocumentRefKind::Invoice,
        invoice_id.into(),
        total,
        Utc::now(),
    )?;

    let invoice = service.invoice(invoice_id)?;
    println!(
        "invoice {invoice_id}: status {:?}, total {} minor units, balance {}",
        invoice.status(),
        invoice.totals().total_amount.minor(),
        invoice.remaining_balance().minor(),
    );
    println!(
        "widget stock after fulfilment: {}",
        service.current_stock(product_id)?
    );
    for entry in service.kardex(product_id)? {
        println!(
            "  {:?} x{} ({})",
            entry.movement,
            entry.quantity,
            entry.description.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}
