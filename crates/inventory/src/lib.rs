//! Stock domain.
//!
//! Products, the movement ledger entries that change their quantity, manual
//! adjustments, alerts and the rules that raise them, plus the tenant
//! ownership graph. Deterministic domain logic only (no IO, no storage).

pub mod adjustment;
pub mod alert;
pub mod movement;
pub mod ownership;
pub mod product;
pub mod rules;
pub mod trade;

pub use adjustment::{
    AdjustmentReason, AdjustmentRequest, AdjustmentStatus, Decision, StockAdjustment,
};
pub use alert::{AlertDraft, AlertType, Severity, StockAlert};
pub use movement::{
    Direction, MovementReference, MovementRequest, MovementType, StockChange, StockMovement,
};
pub use ownership::{
    OwnerRef, OwnershipRegistry, OwnershipRule, Registration, Relation, TenantOwned,
};
pub use product::Product;
pub use rules::{AlertThresholds, SalesWindow};
pub use trade::{
    Customer, CustomerPayment, ProductVariant, PurchaseLine, PurchaseOrder, Sale, SaleLine,
    Supplier, SupplierPayment,
};
