//! Manual stock corrections: request, then approve or reject once.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use stockguard_core::{AdjustmentId, DomainError, DomainResult, TenantContext, UserId};
use stockguard_inventory::{AdjustmentRequest, Decision, StockAdjustment, StockMovement};

use crate::alerts::StockWatcher;
use crate::config::NegativeStockPolicy;
use crate::store::InventoryStore;

/// A committed decision and, for approvals, the movement it posted.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    pub adjustment: StockAdjustment,
    pub movement: Option<StockMovement>,
}

pub struct AdjustmentWorkflow<S> {
    store: S,
    negative: NegativeStockPolicy,
    watcher: Option<Arc<dyn StockWatcher>>,
}

impl<S> AdjustmentWorkflow<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            negative: NegativeStockPolicy::default(),
            watcher: None,
        }
    }

    pub fn with_negative_policy(mut self, policy: NegativeStockPolicy) -> Self {
        self.negative = policy;
        self
    }

    /// Receives a low-stock nudge after an approval leaves the product at or
    /// below its reorder level.
    pub fn with_watcher(mut self, watcher: Arc<dyn StockWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn request(&self, ctx: &TenantContext, request: AdjustmentRequest) -> DomainResult<StockAdjustment> {
        let tenant_id = ctx.require()?;
        let product = self
            .store
            .product(tenant_id, request.product_id)?
            .ok_or(DomainError::NotFound)?;

        let adjustment = StockAdjustment::request(tenant_id, &product, request, Utc::now())?;
        let adjustment = self.store.insert_adjustment(adjustment)?;
        info!(
            tenant = %tenant_id,
            adjustment = %adjustment.id,
            product = %adjustment.product_id,
            direction = adjustment.direction.as_str(),
            quantity = adjustment.quantity,
            reason = adjustment.reason.as_str(),
            "stock adjustment requested"
        );
        Ok(adjustment)
    }

    /// Approval records the decision, posts the ledger entry and updates the
    /// quantity in one transaction. Rejection records the decision only.
    pub fn decide(
        &self,
        ctx: &TenantContext,
        id: AdjustmentId,
        decision: Decision,
        approver: UserId,
        notes: Option<String>,
    ) -> DomainResult<DecisionOutcome> {
        let tenant_id = ctx.require()?;
        let current = self.get(ctx, id)?;
        let decided = current.decide(tenant_id, decision, approver, notes, Utc::now())?;

        let request = match decision {
            Decision::Approve => Some(
                decided
                    .movement_request()?
                    .allowing_negative(self.negative.permits_negative()),
            ),
            Decision::Reject => None,
        };

        let movement = match self.store.commit_decision(&decided, request.as_ref()) {
            Ok(movement) => movement,
            Err(e) => {
                warn!(tenant = %tenant_id, adjustment = %id, error = %e, "stock adjustment decision rejected");
                return Err(e);
            }
        };
        info!(
            tenant = %tenant_id,
            adjustment = %id,
            status = decided.status.as_str(),
            "stock adjustment decided"
        );

        if let (Some(movement), Some(watcher)) = (&movement, &self.watcher) {
            match self.store.product(tenant_id, movement.product_id) {
                Ok(Some(product)) if product.is_low_stock() => watcher.quantity_changed(ctx, &product),
                Ok(_) => {}
                Err(e) => warn!(tenant = %tenant_id, product = %movement.product_id, error = %e, "failed to reload product after adjustment"),
            }
        }

        Ok(DecisionOutcome {
            adjustment: decided,
            movement,
        })
    }

    pub fn get(&self, ctx: &TenantContext, id: AdjustmentId) -> DomainResult<StockAdjustment> {
        let tenant_id = ctx.require()?;
        self.store
            .adjustment(tenant_id, id)?
            .ok_or(DomainError::NotFound)
    }

    /// Pending adjustments, oldest request first.
    pub fn pending(&self, ctx: &TenantContext) -> DomainResult<Vec<StockAdjustment>> {
        let tenant_id = ctx.require()?;
        let mut pending: Vec<_> = self
            .store
            .adjustments(tenant_id)?
            .into_iter()
            .filter(StockAdjustment::is_pending)
            .collect();
        pending.sort_by_key(|a| a.requested_at);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use proptest::prelude::*;
    use stockguard_core::{ProductId, TenantId};
    use stockguard_inventory::{AdjustmentReason, AdjustmentStatus, Direction, MovementReference, Product};

    use crate::store::InMemoryInventoryStore;

    #[derive(Default)]
    struct RecordingWatcher {
        seen: Mutex<Vec<ProductId>>,
    }

    impl StockWatcher for RecordingWatcher {
        fn quantity_changed(&self, _ctx: &TenantContext, product: &Product) {
            self.seen.lock().unwrap().push(product.id);
        }
    }

    fn setup(quantity: i64, reorder: i64) -> (AdjustmentWorkflow<Arc<InMemoryInventoryStore>>, Arc<InMemoryInventoryStore>, TenantContext, Product) {
        let store = Arc::new(InMemoryInventoryStore::new());
        let tenant = TenantId::new();
        let product = store
            .insert_product(Product::new(tenant, "Oil", "OIL", quantity, reorder))
            .unwrap();
        (
            AdjustmentWorkflow::new(store.clone()),
            store,
            TenantContext::for_tenant(tenant),
            product,
        )
    }

    fn stock_out(product: &Product, quantity: i64) -> AdjustmentRequest {
        AdjustmentRequest {
            product_id: product.id,
            direction: Direction::Decrease,
            quantity,
            reason: AdjustmentReason::Damaged,
            description: Some("crushed pallet".into()),
            requested_by: UserId::new(),
        }
    }

    #[test]
    fn approval_posts_one_movement() {
        let (wf, store, ctx, p) = setup(10, 0);
        let adj = wf.request(&ctx, stock_out(&p, 4)).unwrap();
        assert_eq!(wf.pending(&ctx).unwrap().len(), 1);

        let outcome = wf
            .decide(&ctx, adj.id, Decision::Approve, UserId::new(), Some("ok".into()))
            .unwrap();
        assert_eq!(outcome.adjustment.status, AdjustmentStatus::Approved);
        let movement = outcome.movement.unwrap();
        assert_eq!(movement.reference, Some(MovementReference::Adjustment(adj.id)));
        assert_eq!(movement.new_quantity, 6);

        let tenant = ctx.require().unwrap();
        assert_eq!(store.product(tenant, p.id).unwrap().unwrap().quantity(), 6);
        assert_eq!(store.movements(tenant, p.id).unwrap().len(), 1);
        assert!(wf.pending(&ctx).unwrap().is_empty());
    }

    #[test]
    fn rejection_moves_nothing_and_is_final() {
        let (wf, store, ctx, p) = setup(10, 0);
        let adj = wf.request(&ctx, stock_out(&p, 4)).unwrap();
        let outcome = wf
            .decide(&ctx, adj.id, Decision::Reject, UserId::new(), None)
            .unwrap();
        assert_eq!(outcome.adjustment.status, AdjustmentStatus::Rejected);
        assert!(outcome.movement.is_none());

        let tenant = ctx.require().unwrap();
        assert_eq!(store.product(tenant, p.id).unwrap().unwrap().quantity(), 10);
        assert!(store.movements(tenant, p.id).unwrap().is_empty());

        let err = wf
            .decide(&ctx, adj.id, Decision::Approve, UserId::new(), None)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn request_checks_stock_and_tenant() {
        let (wf, _store, ctx, p) = setup(3, 0);
        assert_eq!(
            wf.request(&ctx, stock_out(&p, 5)).unwrap_err(),
            DomainError::insufficient_stock(5, 3)
        );
        let other = TenantContext::for_tenant(TenantId::new());
        assert_eq!(wf.request(&other, stock_out(&p, 1)).unwrap_err(), DomainError::NotFound);
        assert!(matches!(
            wf.request(&TenantContext::empty(), stock_out(&p, 1)),
            Err(DomainError::Configuration(_))
        ));
    }

    #[test]
    fn approval_below_reorder_level_notifies_watcher() {
        let (wf, _store, ctx, p) = setup(10, 8);
        let watcher = Arc::new(RecordingWatcher::default());
        let wf = wf.with_watcher(watcher.clone());

        let small = wf.request(&ctx, stock_out(&p, 1)).unwrap();
        wf.decide(&ctx, small.id, Decision::Approve, UserId::new(), None).unwrap();
        assert!(watcher.seen.lock().unwrap().is_empty());

        let big = wf.request(&ctx, stock_out(&p, 3)).unwrap();
        wf.decide(&ctx, big.id, Decision::Approve, UserId::new(), None).unwrap();
        assert_eq!(*watcher.seen.lock().unwrap(), vec![p.id]);
    }

    proptest! {
        #[test]
        fn approve_changes_quantity_reject_does_not(
            start in 0i64..200,
            qty in 1i64..200,
            increase in any::<bool>(),
            approve in any::<bool>(),
        ) {
            let (wf, store, ctx, p) = setup(start, 0);
            let direction = if increase { Direction::Increase } else { Direction::Decrease };
            let request = AdjustmentRequest { direction, ..stock_out(&p, qty) };
            let requested = wf.request(&ctx, request);
            if !increase && qty > start {
                prop_assert_eq!(requested.unwrap_err(), DomainError::insufficient_stock(qty, start));
                return Ok(());
            }
            let adj = requested.unwrap();
            let decision = if approve { Decision::Approve } else { Decision::Reject };
            wf.decide(&ctx, adj.id, decision, UserId::new(), None).unwrap();

            let tenant = ctx.require().unwrap();
            let expected = match (approve, direction) {
                (false, _) => start,
                (true, Direction::Increase) => start + qty,
                (true, Direction::Decrease) => start - qty,
            };
            prop_assert_eq!(store.product(tenant, p.id).unwrap().unwrap().quantity(), expected);
            prop_assert_eq!(store.movements(tenant, p.id).unwrap().len(), usize::from(approve));
        }
    }
}
