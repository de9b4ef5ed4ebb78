//! Integration tests for the full ledger pipeline.
//!
//! Command → EventStore → EventBus → Projection → ReadModel, driven through
//! `LedgerService` the way an embedding application would drive it.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;

use docledger_core::{DomainError, LedgerPolicy, Money, Percent};
use docledger_crm::{LeadStatus, OpportunityStage};
use docledger_events::{EventBus, EventEnvelope, InMemoryEventBus};
use docledger_inventory::MovementKind;
use docledger_invoicing::InvoiceStatus;
use docledger_parties::{ContactInfo, PartyId, PartyKind};
use docledger_payments::{DocumentRefKind, PaymentKind, PaymentMethod};
use docledger_products::{ProductId, ProductKind};
use docledger_purchasing::PurchaseOrderStatus;
use docledger_sales::QuotationStatus;

use crate::command_dispatcher::DispatchError;
use crate::event_store::InMemoryEventStore;
use crate::projections::stock::{StockProjection, StockReadModel};
use crate::read_model::InMemoryReadModelStore;
use crate::service::LedgerService;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Service = LedgerService<InMemoryEventStore, Bus>;
type Projection = Arc<StockProjection<InMemoryReadModelStore<ProductId, StockReadModel>>>;

fn setup() -> (Service, Projection) {
    setup_with_policy(LedgerPolicy::strict())
}

fn setup_with_policy(policy: LedgerPolicy) -> (Service, Projection) {
    docledger_observability::tracing::init_for_tests();

    let store = InMemoryEventStore::new();
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let projection = Arc::new(StockProjection::new(InMemoryReadModelStore::new()));

    // Subscribe before any events are published.
    let projection_clone = projection.clone();
    let bus_clone = bus.clone();
    let (ready_tx, ready_rx) = mpsc::channel::<()>();
    thread::spawn(move || {
        let sub = bus_clone.subscribe();
        let _ = ready_tx.send(());
        while let Ok(env) = sub.recv() {
            if let Err(e) = projection_clone.apply_envelope(&env) {
                eprintln!("failed to apply envelope: {e:?}");
            }
        }
    });
    // Ensure the subscriber is listening before returning, so early events
    // are not missed.
    let _ = ready_rx.recv_timeout(Duration::from_secs(1));

    let service = LedgerService::new(store, bus).with_policy(policy);
    (service, projection)
}

/// The subscriber thread processes events with a small delay.
fn wait_for_processing() {
    thread::sleep(Duration::from_millis(50));
}

fn customer(service: &Service) -> PartyId {
    service
        .register_party(PartyKind::Customer, "Acme GmbH", ContactInfo::default())
        .unwrap()
}

fn vendor(service: &Service) -> PartyId {
    service
        .register_party(PartyKind::Vendor, "Supplies AG", ContactInfo::default())
        .unwrap()
}

fn widget(service: &Service) -> ProductId {
    service
        .register_product(
            "WID-1",
            "Widget",
            Money::from_minor(10_000),
            ProductKind::Physical,
        )
        .unwrap()
}

#[test]
fn quotation_line_math_produces_canonical_totals() {
    let (service, _) = setup();
    let customer_id = customer(&service);
    let product_id = widget(&service);

    let quotation_id = service
        .create_quotation(customer_id, Utc::now(), Utc::now() + chrono::Duration::days(14))
        .unwrap();
    // 2 x 100.00, 10% discount, 9% tax on the discounted base.
    service
        .add_quotation_line(
            quotation_id,
            product_id,
            2,
            Percent::from_whole(10).unwrap(),
            Percent::from_whole(9).unwrap(),
        )
        .unwrap();

    let quotation = service.quotation(quotation_id).unwrap();
    let totals = quotation.totals();
    assert_eq!(totals.subtotal, Money::from_minor(20_000));
    assert_eq!(totals.discount_amount, Money::from_minor(2_000));
    assert_eq!(totals.tax_amount, Money::from_minor(1_620));
    assert_eq!(totals.total_amount, Money::from_minor(19_620));
}

#[test]
fn approved_quotation_converts_to_invoice_with_copied_lines() {
    let (service, _) = setup();
    let customer_id = customer(&service);
    let product_id = widget(&service);

    let quotation_id = service
        .create_quotation(customer_id, Utc::now(), Utc::now() + chrono::Duration::days(14))
        .unwrap();
    service
        .add_quotation_line(
            quotation_id,
            product_id,
            2,
            Percent::from_whole(10).unwrap(),
            Percent::from_whole(9).unwrap(),
        )
        .unwrap();
    service
        .transition_quotation(quotation_id, QuotationStatus::Sent)
        .unwrap();
    service
        .transition_quotation(quotation_id, QuotationStatus::Approved)
        .unwrap();

    let invoice_id = service.convert_quotation_to_invoice(quotation_id).unwrap();

    let quotation = service.quotation(quotation_id).unwrap();
    let invoice = service.invoice(invoice_id).unwrap();
    assert!(quotation.is_invoiced());
    assert_eq!(invoice.quotation_id(), Some(quotation_id));
    assert_eq!(invoice.customer_id(), customer_id);
    assert_eq!(invoice.status(), InvoiceStatus::Draft);
    assert_eq!(invoice.lines(), quotation.lines());
    assert_eq!(invoice.totals(), quotation.totals());

    // The invoice holds snapshots; a later catalog price change must not
    // leak into it.
    let events = service.invoice(invoice_id).unwrap();
    assert_eq!(events.lines()[0].unit_price, Money::from_minor(10_000));
}

#[test]
fn quotation_converts_at_most_once() {
    let (service, _) = setup();
    let customer_id = customer(&service);
    let product_id = widget(&service);

    let quotation_id = service
        .create_quotation(customer_id, Utc::now(), Utc::now() + chrono::Duration::days(14))
        .unwrap();
    service
        .add_quotation_line(quotation_id, product_id, 1, Percent::ZERO, Percent::ZERO)
        .unwrap();
    service
        .transition_quotation(quotation_id, QuotationStatus::Sent)
        .unwrap();
    service
        .transition_quotation(quotation_id, QuotationStatus::Approved)
        .unwrap();

    let first = service.convert_quotation_to_invoice(quotation_id).unwrap();
    let err = service
        .convert_quotation_to_invoice(quotation_id)
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Domain(DomainError::Conflict(_))
    ));
    // The winning invoice is untouched by the failed attempt.
    assert!(service.invoice(first).is_ok());
}

#[test]
fn draft_quotation_cannot_convert() {
    let (service, _) = setup();
    let customer_id = customer(&service);
    let quotation_id = service
        .create_quotation(customer_id, Utc::now(), Utc::now() + chrono::Duration::days(14))
        .unwrap();

    let err = service
        .convert_quotation_to_invoice(quotation_id)
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Domain(DomainError::InvalidTransition { .. })
    ));
}

#[test]
fn kardex_tracks_running_stock_and_orders_newest_first() {
    let (service, projection) = setup();
    let product_id = widget(&service);

    let after_receipt = service
        .post_inventory_transaction(
            product_id,
            MovementKind::Receipt,
            50,
            Utc::now(),
            None,
            Some("opening stock".to_string()),
        )
        .unwrap();
    assert_eq!(after_receipt, 50);

    let after_issue = service
        .post_inventory_transaction(product_id, MovementKind::Issue, 20, Utc::now(), None, None)
        .unwrap();
    assert_eq!(after_issue, 30);
    assert_eq!(service.current_stock(product_id).unwrap(), 30);

    let entries = service.kardex(product_id).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].movement, MovementKind::Issue);
    assert_eq!(entries[1].movement, MovementKind::Receipt);

    wait_for_processing();
    assert_eq!(projection.get(&product_id).unwrap().quantity, 30);
}

#[test]
fn issue_below_zero_is_rejected_under_strict_policy() {
    let (service, _) = setup();
    let product_id = widget(&service);

    service
        .post_inventory_transaction(product_id, MovementKind::Receipt, 10, Utc::now(), None, None)
        .unwrap();
    let err = service
        .post_inventory_transaction(product_id, MovementKind::Issue, 11, Utc::now(), None, None)
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Domain(DomainError::InsufficientStock {
            available: 10,
            requested: 11,
        })
    ));
    assert_eq!(service.current_stock(product_id).unwrap(), 10);
}

#[test]
fn service_products_take_no_inventory_transactions() {
    let (service, _) = setup();
    let product_id = service
        .register_product(
            "SVC-1",
            "Consulting hour",
            Money::from_minor(15_000),
            ProductKind::Service,
        )
        .unwrap();

    let err = service
        .post_inventory_transaction(product_id, MovementKind::Receipt, 1, Utc::now(), None, None)
        .unwrap_err();
    assert!(matches!(err, DispatchError::Domain(DomainError::Validation(_))));
}

#[test]
fn full_payment_flips_invoice_to_paid_and_issues_stock() {
    let (service, projection) = setup();
    let customer_id = customer(&service);
    let product_id = widget(&service);

    service
        .post_inventory_transaction(product_id, MovementKind::Receipt, 50, Utc::now(), None, None)
        .unwrap();

    let invoice_id = service
        .create_invoice(customer_id, Utc::now(), Utc::now() + chrono::Duration::days(30))
        .unwrap();
    service
        .add_invoice_line(
            invoice_id,
            product_id,
            2,
            Percent::from_whole(10).unwrap(),
            Percent::from_whole(9).unwrap(),
        )
        .unwrap();
    service
        .transition_invoice(invoice_id, InvoiceStatus::Sent)
        .unwrap();

    // Partial settlement leaves the invoice Sent.
    service
        .apply_payment(
            PaymentKind::Receipt,
            PaymentMethod::BankTransfer,
            customer_id,
            DocumentRefKind::Invoice,
            invoice_id.into(),
            Money::from_minor(10_000),
            Utc::now(),
        )
        .unwrap();
    let invoice = service.invoice(invoice_id).unwrap();
    assert_eq!(invoice.status(), InvoiceStatus::Sent);
    assert_eq!(invoice.remaining_balance(), Money::from_minor(9_620));
    assert_eq!(service.current_stock(product_id).unwrap(), 50);

    // Settling the remainder earns Paid and issues the tracked lines.
    service
        .apply_payment(
            PaymentKind::Receipt,
            PaymentMethod::BankTransfer,
            customer_id,
            DocumentRefKind::Invoice,
            invoice_id.into(),
            Money::from_minor(9_620),
            Utc::now(),
        )
        .unwrap();
    let invoice = service.invoice(invoice_id).unwrap();
    assert_eq!(invoice.status(), InvoiceStatus::Paid);
    assert_eq!(invoice.remaining_balance(), Money::ZERO);
    assert_eq!(service.current_stock(product_id).unwrap(), 48);

    wait_for_processing();
    assert_eq!(projection.get(&product_id).unwrap().quantity, 48);
}

#[test]
fn overpayment_is_rejected_and_the_ledger_is_unchanged() {
    let (service, _) = setup();
    let customer_id = customer(&service);
    let product_id = widget(&service);

    let invoice_id = service
        .create_invoice(customer_id, Utc::now(), Utc::now() + chrono::Duration::days(30))
        .unwrap();
    service
        .add_invoice_line(
            invoice_id,
            product_id,
            2,
            Percent::from_whole(10).unwrap(),
            Percent::from_whole(9).unwrap(),
        )
        .unwrap();
    service
        .transition_invoice(invoice_id, InvoiceStatus::Sent)
        .unwrap();

    let err = service
        .apply_payment(
            PaymentKind::Receipt,
            PaymentMethod::Cash,
            customer_id,
            DocumentRefKind::Invoice,
            invoice_id.into(),
            Money::from_minor(20_000),
            Utc::now(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Domain(DomainError::InsufficientBalance {
            remaining: 19_620,
            attempted: 20_000,
        })
    ));

    let invoice = service.invoice(invoice_id).unwrap();
    assert_eq!(invoice.status(), InvoiceStatus::Sent);
    assert_eq!(invoice.amount_paid(), Money::ZERO);
}

#[test]
fn paying_in_full_without_stock_is_rejected_atomically() {
    let (service, _) = setup();
    let customer_id = customer(&service);
    let product_id = widget(&service);

    // One unit on hand, but the invoice needs two issued on Paid.
    service
        .post_inventory_transaction(product_id, MovementKind::Receipt, 1, Utc::now(), None, None)
        .unwrap();

    let invoice_id = service
        .create_invoice(customer_id, Utc::now(), Utc::now() + chrono::Duration::days(30))
        .unwrap();
    service
        .add_invoice_line(
            invoice_id,
            product_id,
            2,
            Percent::from_whole(10).unwrap(),
            Percent::from_whole(9).unwrap(),
        )
        .unwrap();
    service
        .transition_invoice(invoice_id, InvoiceStatus::Sent)
        .unwrap();

    let err = service
        .apply_payment(
            PaymentKind::Receipt,
            PaymentMethod::BankTransfer,
            customer_id,
            DocumentRefKind::Invoice,
            invoice_id.into(),
            Money::from_minor(19_620),
            Utc::now(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Domain(DomainError::InsufficientStock {
            available: 1,
            requested: 2,
        })
    ));

    // Nothing committed: the settlement, the status flip, and the issue all
    // stand or fall together.
    let invoice = service.invoice(invoice_id).unwrap();
    assert_eq!(invoice.status(), InvoiceStatus::Sent);
    assert_eq!(invoice.amount_paid(), Money::ZERO);
    assert_eq!(invoice.remaining_balance(), Money::from_minor(19_620));
    assert_eq!(service.current_stock(product_id).unwrap(), 1);
}

#[test]
fn kardex_keeps_its_own_stream_beside_the_catalog() {
    let (service, _) = setup();
    let product_id = widget(&service);

    // Catalog history on the product's own stream must not leak into the
    // movement log, and vice versa.
    service
        .update_product_price(product_id, Money::from_minor(12_000))
        .unwrap();
    service
        .post_inventory_transaction(product_id, MovementKind::Receipt, 5, Utc::now(), None, None)
        .unwrap();
    service
        .update_product_price(product_id, Money::from_minor(13_000))
        .unwrap();
    service
        .post_inventory_transaction(product_id, MovementKind::Issue, 2, Utc::now(), None, None)
        .unwrap();

    assert_eq!(service.current_stock(product_id).unwrap(), 3);
    assert_eq!(service.kardex(product_id).unwrap().len(), 2);
    assert_eq!(
        service.product(product_id).unwrap().unit_price(),
        Money::from_minor(13_000)
    );
}

#[test]
fn paid_invoice_rejects_further_line_changes() {
    let (service, _) = setup();
    let customer_id = customer(&service);
    let product_id = widget(&service);

    service
        .post_inventory_transaction(product_id, MovementKind::Receipt, 5, Utc::now(), None, None)
        .unwrap();
    let invoice_id = service
        .create_invoice(customer_id, Utc::now(), Utc::now() + chrono::Duration::days(30))
        .unwrap();
    service
        .add_invoice_line(invoice_id, product_id, 1, Percent::ZERO, Percent::ZERO)
        .unwrap();
    service
        .transition_invoice(invoice_id, InvoiceStatus::Sent)
        .unwrap();
    service
        .apply_payment(
            PaymentKind::Receipt,
            PaymentMethod::Card,
            customer_id,
            DocumentRefKind::Invoice,
            invoice_id.into(),
            Money::from_minor(10_000),
            Utc::now(),
        )
        .unwrap();
    assert_eq!(
        service.invoice(invoice_id).unwrap().status(),
        InvoiceStatus::Paid
    );

    let err = service
        .add_invoice_line(invoice_id, product_id, 1, Percent::ZERO, Percent::ZERO)
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Domain(DomainError::InvalidTransition { .. })
    ));
}

#[test]
fn receipt_payment_kind_must_match_the_document() {
    let (service, _) = setup();
    let customer_id = customer(&service);
    let product_id = widget(&service);

    let invoice_id = service
        .create_invoice(customer_id, Utc::now(), Utc::now() + chrono::Duration::days(30))
        .unwrap();
    service
        .add_invoice_line(invoice_id, product_id, 1, Percent::ZERO, Percent::ZERO)
        .unwrap();

    let err = service
        .apply_payment(
            PaymentKind::Disbursement,
            PaymentMethod::Cash,
            customer_id,
            DocumentRefKind::Invoice,
            invoice_id.into(),
            Money::from_minor(1_000),
            Utc::now(),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::Domain(DomainError::Validation(_))));
}

#[test]
fn receiving_a_purchase_order_books_receipts_into_the_kardex() {
    let (service, projection) = setup();
    let vendor_id = vendor(&service);
    let product_id = widget(&service);

    let po_id = service
        .create_purchase_order(vendor_id, Utc::now(), Utc::now() + chrono::Duration::days(30))
        .unwrap();
    service
        .add_purchase_order_line(po_id, product_id, 40, Percent::ZERO)
        .unwrap();
    service
        .transition_purchase_order(po_id, PurchaseOrderStatus::Ordered)
        .unwrap();
    service
        .transition_purchase_order(po_id, PurchaseOrderStatus::Received)
        .unwrap();

    assert_eq!(
        service.purchase_order(po_id).unwrap().status(),
        PurchaseOrderStatus::Received
    );
    assert_eq!(service.current_stock(product_id).unwrap(), 40);

    let entries = service.kardex(product_id).unwrap();
    assert_eq!(entries[0].movement, MovementKind::Receipt);
    assert_eq!(entries[0].reference_id, Some(po_id.into()));

    wait_for_processing();
    assert_eq!(projection.get(&product_id).unwrap().quantity, 40);
}

#[test]
fn full_disbursement_flips_purchase_order_to_received() {
    let (service, _) = setup();
    let vendor_id = vendor(&service);
    let product_id = widget(&service);

    let po_id = service
        .create_purchase_order(vendor_id, Utc::now(), Utc::now() + chrono::Duration::days(30))
        .unwrap();
    service
        .add_purchase_order_line(po_id, product_id, 3, Percent::ZERO)
        .unwrap();
    service
        .transition_purchase_order(po_id, PurchaseOrderStatus::Ordered)
        .unwrap();

    service
        .apply_payment(
            PaymentKind::Disbursement,
            PaymentMethod::BankTransfer,
            vendor_id,
            DocumentRefKind::PurchaseOrder,
            po_id.into(),
            Money::from_minor(30_000),
            Utc::now(),
        )
        .unwrap();

    let po = service.purchase_order(po_id).unwrap();
    assert_eq!(po.status(), PurchaseOrderStatus::Received);
    assert_eq!(po.remaining_balance(), Money::ZERO);
    assert_eq!(service.current_stock(product_id).unwrap(), 3);
}

#[test]
fn lead_conversion_creates_customer_and_opportunity_atomically() {
    let (service, _) = setup();
    let lead_id = service
        .register_lead(
            "Dana Weber",
            "Weber Logistik",
            Some("dana@weber-logistik.example".to_string()),
            None,
        )
        .unwrap();
    service
        .change_lead_status(lead_id, LeadStatus::Contacted)
        .unwrap();
    service
        .change_lead_status(lead_id, LeadStatus::Qualified)
        .unwrap();

    let conversion = service
        .convert_lead(lead_id, "Fleet refit", Money::from_minor(1_500_000))
        .unwrap();

    let lead = service.lead(lead_id).unwrap();
    assert_eq!(lead.status(), LeadStatus::Converted);

    let party = service.party(conversion.customer_id).unwrap();
    assert_eq!(party.kind(), PartyKind::Customer);
    assert_eq!(party.name(), "Weber Logistik");

    let opportunity = service.opportunity(conversion.opportunity_id).unwrap();
    assert_eq!(opportunity.customer_id(), conversion.customer_id);
    assert_eq!(opportunity.stage(), OpportunityStage::Qualification);
    assert_eq!(opportunity.amount(), Money::from_minor(1_500_000));
}

#[test]
fn lead_converts_at_most_once() {
    let (service, _) = setup();
    let lead_id = service
        .register_lead("Sam Okafor", "Okafor & Sons", None, None)
        .unwrap();

    service
        .convert_lead(lead_id, "First deal", Money::from_minor(50_000))
        .unwrap();
    let err = service
        .convert_lead(lead_id, "Second deal", Money::from_minor(50_000))
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Domain(DomainError::AlreadyConverted)
    ));
}

#[test]
fn permissive_policy_allows_negative_stock() {
    let policy = LedgerPolicy {
        allow_overpayment: false,
        allow_negative_stock: true,
    };
    let (service, _) = setup_with_policy(policy);
    let product_id = widget(&service);

    let new_stock = service
        .post_inventory_transaction(product_id, MovementKind::Issue, 7, Utc::now(), None, None)
        .unwrap();
    assert_eq!(new_stock, -7);
    assert_eq!(service.current_stock(product_id).unwrap(), -7);
}

#[test]
fn archived_products_cannot_be_quoted() {
    let (service, _) = setup();
    let customer_id = customer(&service);
    let product_id = widget(&service);
    // Archive through the catalog.
    service.archive_product(product_id).unwrap();

    let quotation_id = service
        .create_quotation(customer_id, Utc::now(), Utc::now() + chrono::Duration::days(14))
        .unwrap();
    let err = service
        .add_quotation_line(quotation_id, product_id, 1, Percent::ZERO, Percent::ZERO)
        .unwrap_err();
    assert!(matches!(err, DispatchError::Domain(DomainError::Validation(_))));
}
