//! Storage boundary for the stock engine.
//!
//! Every method takes the tenant explicitly and never returns another
//! tenant's rows; a row owned by someone else is reported as `NotFound`.
//! Methods that change stock run as a single transaction: either every write
//! lands or none does.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use stockguard_core::{
    AdjustmentId, AlertId, DomainResult, ProductId, PurchaseLineId, SaleLineId, TenantId, UserId,
};
use stockguard_inventory::{
    AlertType, MovementRequest, OwnerRef, Product, PurchaseLine, SaleLine, StockAdjustment,
    StockAlert, StockMovement,
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;

pub trait InventoryStore: Send + Sync {
    /// Tenants owning at least one product or movement.
    fn tenants_with_stock(&self) -> DomainResult<Vec<TenantId>>;

    // -- products --------------------------------------------------------

    fn insert_product(&self, product: Product) -> DomainResult<Product>;

    /// Apply catalog changes; the stored quantity is kept.
    fn update_catalog(&self, tenant_id: TenantId, product: Product) -> DomainResult<Product>;

    fn product(&self, tenant_id: TenantId, id: ProductId) -> DomainResult<Option<Product>>;

    fn products(&self, tenant_id: TenantId) -> DomainResult<Vec<Product>>;

    // -- ledger ----------------------------------------------------------

    /// Plan `request` against the locked product row, persist the movement and
    /// the new quantity together.
    fn record_movement(
        &self,
        tenant_id: TenantId,
        request: &MovementRequest,
    ) -> DomainResult<(StockMovement, Product)>;

    /// A product's movements in sequence order.
    fn movements(&self, tenant_id: TenantId, product_id: ProductId)
    -> DomainResult<Vec<StockMovement>>;

    /// Sale-type movements (sales and reversals) at or after `since`.
    fn sale_movements_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<StockMovement>>;

    // -- adjustments -----------------------------------------------------

    fn insert_adjustment(&self, adjustment: StockAdjustment) -> DomainResult<StockAdjustment>;

    fn adjustment(
        &self,
        tenant_id: TenantId,
        id: AdjustmentId,
    ) -> DomainResult<Option<StockAdjustment>>;

    fn adjustments(&self, tenant_id: TenantId) -> DomainResult<Vec<StockAdjustment>>;

    /// Persist a decided adjustment and, for approvals, its ledger entry.
    ///
    /// The stored row must still be pending (`InvalidState` otherwise).
    fn commit_decision(
        &self,
        decided: &StockAdjustment,
        movement: Option<&MovementRequest>,
    ) -> DomainResult<Option<StockMovement>>;

    // -- alerts ----------------------------------------------------------

    fn open_alert(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        alert_type: AlertType,
    ) -> DomainResult<Option<StockAlert>>;

    /// Fails with `StorageConflict` when an open alert already exists for the
    /// same (tenant, product, type).
    fn insert_alert(&self, alert: StockAlert) -> DomainResult<StockAlert>;

    fn alert(&self, tenant_id: TenantId, id: AlertId) -> DomainResult<Option<StockAlert>>;

    fn alerts(&self, tenant_id: TenantId) -> DomainResult<Vec<StockAlert>>;

    /// Resolve an alert. Resolving an already resolved alert returns it as is.
    fn resolve_alert(
        &self,
        tenant_id: TenantId,
        id: AlertId,
        resolved_by: Option<UserId>,
        resolved_at: DateTime<Utc>,
    ) -> DomainResult<StockAlert>;

    // -- trade lines -----------------------------------------------------

    fn insert_sale_line(&self, line: SaleLine) -> DomainResult<SaleLine>;

    fn delete_sale_line(&self, tenant_id: TenantId, id: SaleLineId) -> DomainResult<SaleLine>;

    fn purchase_line(
        &self,
        tenant_id: TenantId,
        id: PurchaseLineId,
    ) -> DomainResult<Option<PurchaseLine>>;

    /// Set the received quantity; returns the previous value and the new row.
    fn set_received_quantity(
        &self,
        tenant_id: TenantId,
        id: PurchaseLineId,
        received: i64,
    ) -> DomainResult<(i64, PurchaseLine)>;
}

/// Raw row access for one entity type, used by the scoped repository.
///
/// `rows_owned_by` is a pre-filter hint; the repository re-checks ownership of
/// every row it returns.
pub trait RowSource<E>: Send + Sync {
    fn rows(&self) -> DomainResult<Vec<E>>;

    fn rows_owned_by(&self, _tenant_id: TenantId) -> DomainResult<Vec<E>> {
        self.rows()
    }
}

/// Resolves the tenant of a parent row.
pub trait TenantDirectory: Send + Sync {
    /// `None` when the parent does not exist.
    fn owner_tenant(&self, owner: OwnerRef) -> DomainResult<Option<TenantId>>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn tenants_with_stock(&self) -> DomainResult<Vec<TenantId>> {
        (**self).tenants_with_stock()
    }

    fn insert_product(&self, product: Product) -> DomainResult<Product> {
        (**self).insert_product(product)
    }

    fn update_catalog(&self, tenant_id: TenantId, product: Product) -> DomainResult<Product> {
        (**self).update_catalog(tenant_id, product)
    }

    fn product(&self, tenant_id: TenantId, id: ProductId) -> DomainResult<Option<Product>> {
        (**self).product(tenant_id, id)
    }

    fn products(&self, tenant_id: TenantId) -> DomainResult<Vec<Product>> {
        (**self).products(tenant_id)
    }

    fn record_movement(
        &self,
        tenant_id: TenantId,
        request: &MovementRequest,
    ) -> DomainResult<(StockMovement, Product)> {
        (**self).record_movement(tenant_id, request)
    }

    fn movements(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> DomainResult<Vec<StockMovement>> {
        (**self).movements(tenant_id, product_id)
    }

    fn sale_movements_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<StockMovement>> {
        (**self).sale_movements_since(tenant_id, since)
    }

    fn insert_adjustment(&self, adjustment: StockAdjustment) -> DomainResult<StockAdjustment> {
        (**self).insert_adjustment(adjustment)
    }

    fn adjustment(
        &self,
        tenant_id: TenantId,
        id: AdjustmentId,
    ) -> DomainResult<Option<StockAdjustment>> {
        (**self).adjustment(tenant_id, id)
    }

    fn adjustments(&self, tenant_id: TenantId) -> DomainResult<Vec<StockAdjustment>> {
        (**self).adjustments(tenant_id)
    }

    fn commit_decision(
        &self,
        decided: &StockAdjustment,
        movement: Option<&MovementRequest>,
    ) -> DomainResult<Option<StockMovement>> {
        (**self).commit_decision(decided, movement)
    }

    fn open_alert(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        alert_type: AlertType,
    ) -> DomainResult<Option<StockAlert>> {
        (**self).open_alert(tenant_id, product_id, alert_type)
    }

    fn insert_alert(&self, alert: StockAlert) -> DomainResult<StockAlert> {
        (**self).insert_alert(alert)
    }

    fn alert(&self, tenant_id: TenantId, id: AlertId) -> DomainResult<Option<StockAlert>> {
        (**self).alert(tenant_id, id)
    }

    fn alerts(&self, tenant_id: TenantId) -> DomainResult<Vec<StockAlert>> {
        (**self).alerts(tenant_id)
    }

    fn resolve_alert(
        &self,
        tenant_id: TenantId,
        id: AlertId,
        resolved_by: Option<UserId>,
        resolved_at: DateTime<Utc>,
    ) -> DomainResult<StockAlert> {
        (**self).resolve_alert(tenant_id, id, resolved_by, resolved_at)
    }

    fn insert_sale_line(&self, line: SaleLine) -> DomainResult<SaleLine> {
        (**self).insert_sale_line(line)
    }

    fn delete_sale_line(&self, tenant_id: TenantId, id: SaleLineId) -> DomainResult<SaleLine> {
        (**self).delete_sale_line(tenant_id, id)
    }

    fn purchase_line(
        &self,
        tenant_id: TenantId,
        id: PurchaseLineId,
    ) -> DomainResult<Option<PurchaseLine>> {
        (**self).purchase_line(tenant_id, id)
    }

    fn set_received_quantity(
        &self,
        tenant_id: TenantId,
        id: PurchaseLineId,
        received: i64,
    ) -> DomainResult<(i64, PurchaseLine)> {
        (**self).set_received_quantity(tenant_id, id, received)
    }
}

impl<E, S> RowSource<E> for Arc<S>
where
    S: RowSource<E> + ?Sized,
{
    fn rows(&self) -> DomainResult<Vec<E>> {
        (**self).rows()
    }

    fn rows_owned_by(&self, tenant_id: TenantId) -> DomainResult<Vec<E>> {
        (**self).rows_owned_by(tenant_id)
    }
}

impl<S> TenantDirectory for Arc<S>
where
    S: TenantDirectory + ?Sized,
{
    fn owner_tenant(&self, owner: OwnerRef) -> DomainResult<Option<TenantId>> {
        (**self).owner_tenant(owner)
    }
}
