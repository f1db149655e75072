//! Stock ledger: the only path that changes a product's quantity.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use stockguard_core::{DomainError, DomainResult, ProductId, TenantContext, UserId};
use stockguard_inventory::{MovementReference, MovementRequest, Product, StockChange, StockMovement};

use crate::config::NegativeStockPolicy;
use crate::store::InventoryStore;

/// Outcome of replaying a product's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub product_id: ProductId,
    pub stored_quantity: i64,
    pub replayed_quantity: i64,
    pub movement_count: usize,
    /// Every movement chains from its predecessor's `new_quantity`.
    pub chain_intact: bool,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.chain_intact && self.stored_quantity == self.replayed_quantity
    }
}

#[derive(Debug)]
pub struct StockLedger<S> {
    store: S,
    negative: NegativeStockPolicy,
}

impl<S> StockLedger<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            negative: NegativeStockPolicy::default(),
        }
    }

    pub fn with_negative_policy(mut self, policy: NegativeStockPolicy) -> Self {
        self.negative = policy;
        self
    }

    pub fn negative_policy(&self) -> NegativeStockPolicy {
        self.negative
    }

    /// Post one movement. Type and direction follow from `change`.
    pub fn record(
        &self,
        ctx: &TenantContext,
        product_id: ProductId,
        change: StockChange,
        quantity: i64,
        reference: Option<MovementReference>,
        actor: Option<UserId>,
    ) -> DomainResult<StockMovement> {
        let mut request = MovementRequest::new(product_id, change, quantity).with_actor(actor);
        if let Some(reference) = reference {
            request = request.with_reference(reference);
        }
        self.post(ctx, request).map(|(movement, _)| movement)
    }

    /// Post a fully specified request; returns the movement and the product as
    /// committed.
    pub fn post(
        &self,
        ctx: &TenantContext,
        request: MovementRequest,
    ) -> DomainResult<(StockMovement, Product)> {
        let tenant_id = ctx.require()?;
        let request = request.allowing_negative(self.negative.permits_negative());

        match self.store.record_movement(tenant_id, &request) {
            Ok((movement, product)) => {
                info!(
                    tenant = %tenant_id,
                    product = %product.id,
                    movement_type = movement.movement_type.as_str(),
                    direction = movement.direction.as_str(),
                    quantity = movement.quantity,
                    new_quantity = movement.new_quantity,
                    "stock movement recorded"
                );
                Ok((movement, product))
            }
            Err(e) => {
                warn!(
                    tenant = %tenant_id,
                    product = %request.product_id,
                    error = %e,
                    "stock movement rejected"
                );
                Err(e)
            }
        }
    }

    /// The product's movements in creation order.
    pub fn history(&self, ctx: &TenantContext, product_id: ProductId) -> DomainResult<Vec<StockMovement>> {
        let tenant_id = ctx.require()?;
        self.require_product(ctx, product_id)?;
        self.store.movements(tenant_id, product_id)
    }

    pub fn movements_since(
        &self,
        ctx: &TenantContext,
        product_id: ProductId,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<StockMovement>> {
        Ok(self
            .history(ctx, product_id)?
            .into_iter()
            .filter(|m| m.created_at >= since)
            .collect())
    }

    /// Replay the history from the initial quantity and compare with the
    /// stored quantity.
    pub fn reconcile(&self, ctx: &TenantContext, product_id: ProductId) -> DomainResult<Reconciliation> {
        let tenant_id = ctx.require()?;
        let product = self.require_product(ctx, product_id)?;
        let history = self.store.movements(tenant_id, product_id)?;

        let mut expected_previous = product.initial_quantity;
        let mut chain_intact = true;
        for (idx, m) in history.iter().enumerate() {
            if !m.is_consistent()
                || m.previous_quantity != expected_previous
                || m.sequence != idx as u64 + 1
            {
                chain_intact = false;
            }
            expected_previous = m.new_quantity;
        }

        let report = Reconciliation {
            product_id,
            stored_quantity: product.quantity(),
            replayed_quantity: Product::replay(product.initial_quantity, &history),
            movement_count: history.len(),
            chain_intact,
        };
        if !report.is_consistent() {
            warn!(
                tenant = %tenant_id,
                product = %product_id,
                stored = report.stored_quantity,
                replayed = report.replayed_quantity,
                "stock ledger out of balance"
            );
        }
        Ok(report)
    }

    fn require_product(&self, ctx: &TenantContext, product_id: ProductId) -> DomainResult<Product> {
        let tenant_id = ctx.require()?;
        self.store
            .product(tenant_id, product_id)?
            .ok_or(DomainError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stockguard_core::{SaleId, TenantId};
    use stockguard_inventory::{Direction, MovementType};

    use crate::store::InMemoryInventoryStore;

    fn setup(quantity: i64) -> (StockLedger<Arc<InMemoryInventoryStore>>, TenantContext, Product) {
        let store = Arc::new(InMemoryInventoryStore::new());
        let tenant = TenantId::new();
        let product = store
            .insert_product(Product::new(tenant, "Flour", "FLR-1", quantity, 4))
            .unwrap();
        (StockLedger::new(store), TenantContext::for_tenant(tenant), product)
    }

    #[test]
    fn record_requires_a_tenant() {
        let (ledger, _, p) = setup(10);
        let err = ledger
            .record(&TenantContext::empty(), p.id, StockChange::Sale, 1, None, None)
            .unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }

    #[test]
    fn change_determines_type_and_direction() {
        let (ledger, ctx, p) = setup(10);
        let sale = SaleId::new();
        let m = ledger
            .record(&ctx, p.id, StockChange::Sale, 3, Some(MovementReference::Sale(sale)), None)
            .unwrap();
        assert_eq!((m.movement_type, m.direction), (MovementType::Sale, Direction::Decrease));
        assert_eq!((m.previous_quantity, m.new_quantity), (10, 7));

        let m = ledger
            .record(&ctx, p.id, StockChange::SaleReversal, 3, Some(MovementReference::Sale(sale)), None)
            .unwrap();
        assert_eq!((m.movement_type, m.direction), (MovementType::Sale, Direction::Increase));
        assert_eq!(m.new_quantity, 10);
    }

    #[test]
    fn negative_policy_is_configurable() {
        let (ledger, ctx, p) = setup(2);
        let err = ledger
            .record(&ctx, p.id, StockChange::TransferOut, 5, None, None)
            .unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(5, 2));

        let ledger = ledger.with_negative_policy(NegativeStockPolicy::Allow);
        let m = ledger
            .record(&ctx, p.id, StockChange::TransferOut, 5, None, None)
            .unwrap();
        assert_eq!(m.new_quantity, -3);
    }

    #[test]
    fn other_tenant_sees_nothing() {
        let (ledger, ctx, p) = setup(10);
        ledger.record(&ctx, p.id, StockChange::Purchase, 5, None, None).unwrap();

        let intruder = TenantContext::for_tenant(TenantId::new());
        assert_eq!(ledger.history(&intruder, p.id).unwrap_err(), DomainError::NotFound);
        assert_eq!(
            ledger
                .record(&intruder, p.id, StockChange::Sale, 1, None, None)
                .unwrap_err(),
            DomainError::NotFound
        );
    }

    #[test]
    fn reconcile_matches_after_mixed_history() {
        let (ledger, ctx, p) = setup(10);
        for (change, qty) in [
            (StockChange::Sale, 4),
            (StockChange::Purchase, 20),
            (StockChange::Adjustment(Direction::Decrease), 3),
            (StockChange::TransferIn, 2),
        ] {
            ledger.record(&ctx, p.id, change, qty, None, None).unwrap();
        }

        let report = ledger.reconcile(&ctx, p.id).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.stored_quantity, 25);
        assert_eq!(report.movement_count, 4);
        assert_eq!(ledger.history(&ctx, p.id).unwrap().len(), 4);
    }

    #[test]
    fn movements_since_filters_by_time() {
        let (ledger, ctx, p) = setup(10);
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        ledger
            .post(
                &ctx,
                MovementRequest::new(p.id, StockChange::Sale, 1).at(cutoff - chrono::Duration::hours(1)),
            )
            .unwrap();
        ledger
            .post(&ctx, MovementRequest::new(p.id, StockChange::Sale, 1).at(cutoff))
            .unwrap();
        let recent = ledger.movements_since(&ctx, p.id, cutoff).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].sequence, 2);
    }
}
