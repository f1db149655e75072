//! `stockguard-core` — shared domain building blocks.
//!
//! Identifiers, the error taxonomy and the per-unit-of-work tenant context.
//! No infrastructure concerns live here.

pub mod context;
pub mod entity;
pub mod error;
pub mod id;

pub use context::TenantContext;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AdjustmentId, AlertId, BranchId, CustomerId, MovementId, PaymentId, ProductId,
    PurchaseLineId, PurchaseOrderId, SaleId, SaleLineId, SupplierId, TenantId, TransferId,
    UserId, VariantId,
};
