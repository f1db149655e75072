use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockguard_core::{
    AdjustmentId, DomainError, DomainResult, Entity, ProductId, TenantId, UserId,
};

use crate::movement::{Direction, MovementReference, MovementRequest, StockChange};
use crate::product::Product;

/// Adjustment lifecycle. `Pending` is initial; the other two are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentStatus {
    Pending,
    Approved,
    Rejected,
}

impl AdjustmentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AdjustmentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentStatus::Pending => "pending",
            AdjustmentStatus::Approved => "approved",
            AdjustmentStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "pending" => Ok(AdjustmentStatus::Pending),
            "approved" => Ok(AdjustmentStatus::Approved),
            "rejected" => Ok(AdjustmentStatus::Rejected),
            other => Err(DomainError::validation(format!("unknown adjustment status '{other}'"))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentReason {
    Expired,
    Damaged,
    Lost,
    Found,
    Correction,
    Other,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::Expired => "expired",
            AdjustmentReason::Damaged => "damaged",
            AdjustmentReason::Lost => "lost",
            AdjustmentReason::Found => "found",
            AdjustmentReason::Correction => "correction",
            AdjustmentReason::Other => "other",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "expired" => Ok(AdjustmentReason::Expired),
            "damaged" => Ok(AdjustmentReason::Damaged),
            "lost" => Ok(AdjustmentReason::Lost),
            "found" => Ok(AdjustmentReason::Found),
            "correction" => Ok(AdjustmentReason::Correction),
            "other" => Ok(AdjustmentReason::Other),
            other => Err(DomainError::validation(format!("unknown adjustment reason '{other}'"))),
        }
    }
}

/// Approver's verdict.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

/// A manual stock correction awaiting (or past) approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub id: AdjustmentId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub direction: Direction,
    pub quantity: i64,
    pub reason: AdjustmentReason,
    pub description: Option<String>,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
    pub status: AdjustmentStatus,
    pub decided_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_notes: Option<String>,
}

/// Input for [`StockAdjustment::request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentRequest {
    pub product_id: ProductId,
    pub direction: Direction,
    pub quantity: i64,
    pub reason: AdjustmentReason,
    pub description: Option<String>,
    pub requested_by: UserId,
}

impl StockAdjustment {
    /// Open a pending adjustment against the product's current quantity.
    pub fn request(
        tenant_id: TenantId,
        product: &Product,
        req: AdjustmentRequest,
        requested_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if product.tenant_id != tenant_id {
            return Err(DomainError::tenant_isolation(
                "product is not owned by the active tenant",
            ));
        }
        if product.id != req.product_id {
            return Err(DomainError::validation("request targets a different product"));
        }
        if req.quantity <= 0 {
            return Err(DomainError::validation("adjustment quantity must be positive"));
        }
        if req.direction == Direction::Decrease && req.quantity > product.quantity() {
            return Err(DomainError::insufficient_stock(req.quantity, product.quantity()));
        }

        Ok(Self {
            id: AdjustmentId::new(),
            tenant_id,
            product_id: req.product_id,
            direction: req.direction,
            quantity: req.quantity,
            reason: req.reason,
            description: req.description.filter(|d| !d.trim().is_empty()),
            requested_by: req.requested_by,
            requested_at,
            status: AdjustmentStatus::Pending,
            decided_by: None,
            decided_at: None,
            decision_notes: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == AdjustmentStatus::Pending
    }

    /// The decided copy of this adjustment. The original is left untouched so
    /// the caller can commit (or drop) the transition as one unit.
    pub fn decide(
        &self,
        tenant_id: TenantId,
        decision: Decision,
        approver: UserId,
        notes: Option<String>,
        decided_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if self.tenant_id != tenant_id {
            return Err(DomainError::tenant_isolation(
                "adjustment is not owned by the active tenant",
            ));
        }
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "adjustment {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }

        let mut decided = self.clone();
        decided.status = match decision {
            Decision::Approve => AdjustmentStatus::Approved,
            Decision::Reject => AdjustmentStatus::Rejected,
        };
        decided.decided_by = Some(approver);
        decided.decided_at = Some(decided_at);
        decided.decision_notes = notes.filter(|n| !n.trim().is_empty());
        Ok(decided)
    }

    /// The ledger entry an approval posts. Only meaningful once approved.
    pub fn movement_request(&self) -> DomainResult<MovementRequest> {
        if self.status != AdjustmentStatus::Approved {
            return Err(DomainError::invalid_state(
                "only approved adjustments move stock",
            ));
        }
        Ok(MovementRequest::new(
            self.product_id,
            StockChange::Adjustment(self.direction),
            self.quantity,
        )
        .with_reference(MovementReference::Adjustment(self.id))
        .with_actor(self.decided_by))
    }
}

impl Entity for StockAdjustment {
    type Id = AdjustmentId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(quantity: i64) -> Product {
        Product::new(TenantId::new(), "Milk 1L", "MILK-1", quantity, 5)
    }

    fn stock_out(product: &Product, quantity: i64) -> AdjustmentRequest {
        AdjustmentRequest {
            product_id: product.id,
            direction: Direction::Decrease,
            quantity,
            reason: AdjustmentReason::Damaged,
            description: Some("crushed pallet".to_string()),
            requested_by: UserId::new(),
        }
    }

    #[test]
    fn request_starts_pending() {
        let p = product(10);
        let adj = StockAdjustment::request(p.tenant_id, &p, stock_out(&p, 3), Utc::now()).unwrap();
        assert!(adj.is_pending());
        assert_eq!(adj.decided_by, None);
    }

    #[test]
    fn stock_out_beyond_on_hand_is_rejected() {
        let p = product(2);
        let err = StockAdjustment::request(p.tenant_id, &p, stock_out(&p, 3), Utc::now())
            .unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(3, 2));
    }

    #[test]
    fn stock_in_is_not_limited_by_on_hand() {
        let p = product(0);
        let mut req = stock_out(&p, 50);
        req.direction = Direction::Increase;
        req.reason = AdjustmentReason::Found;
        assert!(StockAdjustment::request(p.tenant_id, &p, req, Utc::now()).is_ok());
    }

    #[test]
    fn zero_quantity_is_a_validation_error() {
        let p = product(10);
        let err = StockAdjustment::request(p.tenant_id, &p, stock_out(&p, 0), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn approve_records_metadata_and_yields_movement() {
        let p = product(10);
        let adj = StockAdjustment::request(p.tenant_id, &p, stock_out(&p, 3), Utc::now()).unwrap();
        let approver = UserId::new();

        let decided = adj
            .decide(p.tenant_id, Decision::Approve, approver, Some("ok".into()), Utc::now())
            .unwrap();
        assert_eq!(decided.status, AdjustmentStatus::Approved);
        assert_eq!(decided.decided_by, Some(approver));
        assert!(adj.is_pending(), "original must be untouched");

        let req = decided.movement_request().unwrap();
        assert_eq!(req.change, StockChange::Adjustment(Direction::Decrease));
        assert_eq!(req.quantity, 3);
        assert_eq!(req.reference, Some(MovementReference::Adjustment(adj.id)));
        assert_eq!(req.actor, Some(approver));
    }

    #[test]
    fn terminal_adjustments_cannot_be_decided_again() {
        let p = product(10);
        let adj = StockAdjustment::request(p.tenant_id, &p, stock_out(&p, 3), Utc::now()).unwrap();
        let rejected = adj
            .decide(p.tenant_id, Decision::Reject, UserId::new(), None, Utc::now())
            .unwrap();

        for decision in [Decision::Approve, Decision::Reject] {
            let err = rejected
                .decide(p.tenant_id, decision, UserId::new(), None, Utc::now())
                .unwrap_err();
            assert!(matches!(err, DomainError::InvalidState(_)));
        }
        assert!(rejected.movement_request().is_err());
    }

    #[test]
    fn deciding_from_another_tenant_is_refused() {
        let p = product(10);
        let adj = StockAdjustment::request(p.tenant_id, &p, stock_out(&p, 3), Utc::now()).unwrap();
        let err = adj
            .decide(TenantId::new(), Decision::Approve, UserId::new(), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::TenantIsolation(_)));
    }
}
