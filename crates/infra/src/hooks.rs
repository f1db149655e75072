//! Stock side effects of sale and purchase line changes.
//!
//! The line write is the caller's unit of work and its errors propagate. The
//! ledger entry that follows runs after the line is stored; if it fails the
//! failure is logged and reported as [`SideEffect::Failed`] and the line
//! write stands. Callers that need the two to agree must check the outcome.

use std::sync::Arc;

use tracing::{debug, error};

use stockguard_core::{DomainError, DomainResult, PurchaseLineId, SaleLineId, TenantContext, UserId};
use stockguard_inventory::{
    MovementReference, MovementRequest, Product, PurchaseLine, SaleLine, StockChange, StockMovement,
};

use crate::alerts::StockWatcher;
use crate::config::NegativeStockPolicy;
use crate::ledger::StockLedger;
use crate::store::InventoryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Applied(StockMovement),
    /// Nothing to post (e.g. received quantity went down or stayed put).
    Skipped,
    Failed(DomainError),
}

impl SideEffect {
    pub fn movement(&self) -> Option<&StockMovement> {
        match self {
            SideEffect::Applied(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SideEffect::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutcome<T> {
    /// The stored line.
    pub entity: T,
    pub stock: SideEffect,
    /// A low-stock check ran for the product.
    pub checked_low_stock: bool,
}

pub struct ConsistencyHooks<S> {
    store: S,
    ledger: StockLedger<S>,
    watcher: Option<Arc<dyn StockWatcher>>,
}

impl<S> ConsistencyHooks<S>
where
    S: InventoryStore + Clone,
{
    pub fn new(store: S) -> Self {
        Self {
            ledger: StockLedger::new(store.clone()),
            store,
            watcher: None,
        }
    }

    pub fn with_negative_policy(mut self, policy: NegativeStockPolicy) -> Self {
        self.ledger = self.ledger.with_negative_policy(policy);
        self
    }

    pub fn with_watcher(mut self, watcher: Arc<dyn StockWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Store a sale line and take its quantity out of stock.
    pub fn create_sale_line(
        &self,
        ctx: &TenantContext,
        line: SaleLine,
        actor: Option<UserId>,
    ) -> DomainResult<HookOutcome<SaleLine>> {
        let tenant_id = ctx.require()?;
        if line.tenant_id != tenant_id {
            return Err(DomainError::tenant_isolation(
                "sale line is not owned by the active tenant",
            ));
        }
        let line = self.store.insert_sale_line(line)?;

        let request = MovementRequest::new(line.product_id, StockChange::Sale, line.quantity)
            .with_reference(MovementReference::Sale(line.sale_id))
            .with_actor(actor);
        let (stock, checked_low_stock) = self.post(ctx, request, "sale line created", true);

        Ok(HookOutcome {
            entity: line,
            stock,
            checked_low_stock,
        })
    }

    /// Remove a sale line and post the compensating increase. Earlier
    /// movements are left as they are.
    pub fn delete_sale_line(
        &self,
        ctx: &TenantContext,
        id: SaleLineId,
        actor: Option<UserId>,
    ) -> DomainResult<HookOutcome<SaleLine>> {
        let tenant_id = ctx.require()?;
        let line = self.store.delete_sale_line(tenant_id, id)?;

        let request = MovementRequest::new(line.product_id, StockChange::SaleReversal, line.quantity)
            .with_reference(MovementReference::Sale(line.sale_id))
            .with_actor(actor);
        let (stock, checked_low_stock) = self.post(ctx, request, "sale line deleted", false);

        Ok(HookOutcome {
            entity: line,
            stock,
            checked_low_stock,
        })
    }

    /// Set a purchase line's received quantity. Only an increase moves stock,
    /// by exactly the difference from the previous value.
    pub fn receive_purchase_line(
        &self,
        ctx: &TenantContext,
        id: PurchaseLineId,
        received: i64,
        actor: Option<UserId>,
    ) -> DomainResult<HookOutcome<PurchaseLine>> {
        let tenant_id = ctx.require()?;
        let (previous, line) = self.store.set_received_quantity(tenant_id, id, received)?;

        let delta = line.received_quantity - previous;
        if delta <= 0 {
            debug!(tenant = %tenant_id, purchase_line = %line.id, delta, "no stock to receive");
            return Ok(HookOutcome {
                entity: line,
                stock: SideEffect::Skipped,
                checked_low_stock: false,
            });
        }

        let request = MovementRequest::new(line.product_id, StockChange::Purchase, delta)
            .with_reference(MovementReference::Purchase(line.purchase_order_id))
            .with_actor(actor);
        let (stock, checked_low_stock) = self.post(ctx, request, "purchase line received", false);

        Ok(HookOutcome {
            entity: line,
            stock,
            checked_low_stock,
        })
    }

    /// Post the movement; when `watch` is set, a committed result at or below
    /// the reorder level is handed to the watcher. Only sales watch.
    fn post(
        &self,
        ctx: &TenantContext,
        request: MovementRequest,
        trigger: &'static str,
        watch: bool,
    ) -> (SideEffect, bool) {
        let product_id = request.product_id;
        match self.ledger.post(ctx, request) {
            Ok((movement, product)) => {
                let checked = watch && self.watch(ctx, &product);
                (SideEffect::Applied(movement), checked)
            }
            Err(e) => {
                error!(
                    product = %product_id,
                    trigger,
                    error = %e,
                    "stock side effect failed; line write kept"
                );
                (SideEffect::Failed(e), false)
            }
        }
    }

    fn watch(&self, ctx: &TenantContext, product: &Product) -> bool {
        match &self.watcher {
            Some(watcher) if product.is_low_stock() => {
                watcher.quantity_changed(ctx, product);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use stockguard_core::{SaleId, SupplierId, TenantId};
    use stockguard_events::in_memory_bus::InMemoryEventBus;
    use stockguard_events::notification::StockNotification;
    use stockguard_inventory::{AlertType, Direction, PurchaseOrder};

    use crate::alerts::AlertEngine;
    use crate::store::InMemoryInventoryStore;

    struct Fixture {
        hooks: ConsistencyHooks<Arc<InMemoryInventoryStore>>,
        store: Arc<InMemoryInventoryStore>,
        engine: Arc<AlertEngine<Arc<InMemoryInventoryStore>, Arc<InMemoryEventBus<StockNotification>>>>,
        ctx: TenantContext,
        product: Product,
    }

    fn fixture(quantity: i64, reorder: i64) -> Fixture {
        let store = Arc::new(InMemoryInventoryStore::new());
        let tenant = TenantId::new();
        let product = store
            .insert_product(Product::new(tenant, "Beans", "BNS", quantity, reorder))
            .unwrap();
        let engine = Arc::new(AlertEngine::new(store.clone(), Arc::new(InMemoryEventBus::new())));
        let hooks = ConsistencyHooks::new(store.clone()).with_watcher(engine.clone());
        Fixture {
            hooks,
            store,
            engine,
            ctx: TenantContext::for_tenant(tenant),
            product,
        }
    }

    fn sale_line(f: &Fixture, quantity: i64) -> SaleLine {
        SaleLine::new(f.ctx.require().unwrap(), SaleId::new(), f.product.id, quantity, 150)
    }

    #[test]
    fn sale_line_round_trip_restores_quantity() {
        let f = fixture(10, 2);
        let created = f.hooks.create_sale_line(&f.ctx, sale_line(&f, 4), None).unwrap();
        assert_eq!(created.stock.movement().map(|m| m.new_quantity), Some(6));
        assert!(!created.checked_low_stock);

        let deleted = f.hooks.delete_sale_line(&f.ctx, created.entity.id, None).unwrap();
        let reversal = deleted.stock.movement().unwrap();
        assert_eq!(reversal.direction, Direction::Increase);
        assert_eq!(reversal.new_quantity, 10);

        let tenant = f.ctx.require().unwrap();
        assert_eq!(f.store.movements(tenant, f.product.id).unwrap().len(), 2);
    }

    #[test]
    fn failed_ledger_entry_keeps_the_line() {
        let f = fixture(3, 0);
        let outcome = f.hooks.create_sale_line(&f.ctx, sale_line(&f, 5), None).unwrap();
        assert_eq!(outcome.stock, SideEffect::Failed(DomainError::insufficient_stock(5, 3)));

        let tenant = f.ctx.require().unwrap();
        assert_eq!(f.store.product(tenant, f.product.id).unwrap().unwrap().quantity(), 3);
        // The line was stored; deleting it succeeds.
        assert!(f.hooks.delete_sale_line(&f.ctx, outcome.entity.id, None).is_ok());
    }

    #[test]
    fn breaching_reorder_level_raises_low_stock() {
        let f = fixture(12, 10);
        let outcome = f.hooks.create_sale_line(&f.ctx, sale_line(&f, 3), None).unwrap();
        assert!(outcome.checked_low_stock);

        let open = f.engine.open_alerts(&f.ctx).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].alert_type, AlertType::LowStock);
        assert_eq!(open[0].current_stock, 9);
    }

    #[test]
    fn only_sales_trigger_the_low_stock_check() {
        let f = fixture(20, 10);
        let tenant = f.ctx.require().unwrap();
        let sold = f.hooks.create_sale_line(&f.ctx, sale_line(&f, 15), None).unwrap();
        assert!(sold.checked_low_stock);
        let alert = f.engine.open_alerts(&f.ctx).unwrap().remove(0);
        f.engine.resolve(&f.ctx, alert.id, None).unwrap();

        let po = f
            .store
            .insert_purchase_order(PurchaseOrder::new(tenant, SupplierId::new()))
            .unwrap();
        let line = f
            .store
            .insert_purchase_line(PurchaseLine::new(po.id, f.product.id, 10, 500))
            .unwrap();
        let received = f.hooks.receive_purchase_line(&f.ctx, line.id, 2, None).unwrap();
        assert_eq!(received.stock.movement().map(|m| m.new_quantity), Some(7));
        assert!(!received.checked_low_stock);
        assert!(f.engine.open_alerts(&f.ctx).unwrap().is_empty());
    }

    #[test]
    fn foreign_sale_line_is_refused() {
        let f = fixture(10, 0);
        let line = SaleLine::new(TenantId::new(), SaleId::new(), f.product.id, 1, 10);
        assert!(matches!(
            f.hooks.create_sale_line(&f.ctx, line, None),
            Err(DomainError::TenantIsolation(_))
        ));
    }

    #[test]
    fn receipts_post_only_the_increase() {
        let f = fixture(0, 0);
        let tenant = f.ctx.require().unwrap();
        let po = f
            .store
            .insert_purchase_order(PurchaseOrder::new(tenant, SupplierId::new()))
            .unwrap();
        let line = f
            .store
            .insert_purchase_line(PurchaseLine::new(po.id, f.product.id, 60, 500))
            .unwrap();

        let first = f.hooks.receive_purchase_line(&f.ctx, line.id, 30, None).unwrap();
        assert_eq!(first.stock.movement().map(|m| m.quantity), Some(30));
        let second = f.hooks.receive_purchase_line(&f.ctx, line.id, 50, None).unwrap();
        assert_eq!(second.stock.movement().map(|m| m.quantity), Some(20));
        let lower = f.hooks.receive_purchase_line(&f.ctx, line.id, 40, None).unwrap();
        assert_eq!(lower.stock, SideEffect::Skipped);

        assert!(matches!(
            f.hooks.receive_purchase_line(&f.ctx, line.id, 61, None),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(f.store.product(tenant, f.product.id).unwrap().unwrap().quantity(), 50);
    }
}
