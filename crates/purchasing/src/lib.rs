//! Procurement documents: purchase orders.

pub mod purchase_order;

pub use purchase_order::{
    AddPurchaseOrderLine, ChangePurchaseOrderStatus, CreatePurchaseOrder, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderCreated, PurchaseOrderEvent, PurchaseOrderId,
    PurchaseOrderLineAdded, PurchaseOrderLineRemoved, PurchaseOrderSettled, PurchaseOrderStatus,
    PurchaseOrderStatusChanged, RegisterDisbursement, RemovePurchaseOrderLine,
};
