use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockguard_core::{
    AdjustmentId, DomainError, DomainResult, Entity, MovementId, ProductId, PurchaseOrderId,
    SaleId, TenantId, TransferId, UserId,
};

use crate::product::Product;

/// Movement category, as reported to analytics and reporting.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Sale,
    Purchase,
    Adjustment,
    Transfer,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Sale => "sale",
            MovementType::Purchase => "purchase",
            MovementType::Adjustment => "adjustment",
            MovementType::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "sale" => Ok(MovementType::Sale),
            "purchase" => Ok(MovementType::Purchase),
            "adjustment" => Ok(MovementType::Adjustment),
            "transfer" => Ok(MovementType::Transfer),
            other => Err(DomainError::validation(format!("unknown movement type '{other}'"))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    pub fn sign(&self) -> i64 {
        match self {
            Direction::Increase => 1,
            Direction::Decrease => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increase => "increase",
            Direction::Decrease => "decrease",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "increase" => Ok(Direction::Increase),
            "decrease" => Ok(Direction::Decrease),
            other => Err(DomainError::validation(format!("unknown direction '{other}'"))),
        }
    }
}

/// What happened to the stock. Type and direction both follow from it; only
/// manual adjustments carry an explicit direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "direction", rename_all = "snake_case")]
pub enum StockChange {
    Sale,
    /// Compensating entry for a removed sale line.
    SaleReversal,
    Purchase,
    Adjustment(Direction),
    TransferOut,
    TransferIn,
}

impl StockChange {
    pub fn movement_type(&self) -> MovementType {
        match self {
            StockChange::Sale | StockChange::SaleReversal => MovementType::Sale,
            StockChange::Purchase => MovementType::Purchase,
            StockChange::Adjustment(_) => MovementType::Adjustment,
            StockChange::TransferOut | StockChange::TransferIn => MovementType::Transfer,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            StockChange::Sale | StockChange::TransferOut => Direction::Decrease,
            StockChange::SaleReversal | StockChange::Purchase | StockChange::TransferIn => {
                Direction::Increase
            }
            StockChange::Adjustment(d) => *d,
        }
    }
}

/// What caused a movement, with a typed identifier per kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MovementReference {
    Sale(SaleId),
    Purchase(PurchaseOrderId),
    Adjustment(AdjustmentId),
    Transfer(TransferId),
}

impl MovementReference {
    pub fn movement_type(&self) -> MovementType {
        match self {
            MovementReference::Sale(_) => MovementType::Sale,
            MovementReference::Purchase(_) => MovementType::Purchase,
            MovementReference::Adjustment(_) => MovementType::Adjustment,
            MovementReference::Transfer(_) => MovementType::Transfer,
        }
    }

    /// Flatten into `(kind, id)` for storage columns.
    pub fn to_parts(&self) -> (&'static str, Uuid) {
        match self {
            MovementReference::Sale(id) => ("sale", *id.as_uuid()),
            MovementReference::Purchase(id) => ("purchase", *id.as_uuid()),
            MovementReference::Adjustment(id) => ("adjustment", *id.as_uuid()),
            MovementReference::Transfer(id) => ("transfer", *id.as_uuid()),
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> DomainResult<Self> {
        match kind {
            "sale" => Ok(MovementReference::Sale(SaleId::from_uuid(id))),
            "purchase" => Ok(MovementReference::Purchase(PurchaseOrderId::from_uuid(id))),
            "adjustment" => Ok(MovementReference::Adjustment(AdjustmentId::from_uuid(id))),
            "transfer" => Ok(MovementReference::Transfer(TransferId::from_uuid(id))),
            other => Err(DomainError::validation(format!("unknown reference kind '{other}'"))),
        }
    }
}

/// One immutable quantity-affecting event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub direction: Direction,
    /// Magnitude, always positive.
    pub quantity: i64,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub reference: Option<MovementReference>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    /// Position in the product's history (1-based, gap-free).
    pub sequence: u64,
}

impl StockMovement {
    pub fn signed_delta(&self) -> i64 {
        self.direction.sign() * self.quantity
    }

    /// `new_quantity == previous_quantity ± quantity` for this direction.
    pub fn is_consistent(&self) -> bool {
        self.quantity > 0 && self.previous_quantity + self.signed_delta() == self.new_quantity
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// A request to move stock, before it has been planned against a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub change: StockChange,
    pub quantity: i64,
    pub reference: Option<MovementReference>,
    pub actor: Option<UserId>,
    /// Explicit event time. `None` stamps the movement when it is planned,
    /// never earlier than the product's latest movement.
    pub occurred_at: Option<DateTime<Utc>>,
    /// Compare-and-swap guard on the product's current quantity.
    pub expected_previous: Option<i64>,
    pub allow_negative: bool,
}

impl MovementRequest {
    pub fn new(product_id: ProductId, change: StockChange, quantity: i64) -> Self {
        Self {
            product_id,
            change,
            quantity,
            reference: None,
            actor: None,
            occurred_at: None,
            expected_previous: None,
            allow_negative: false,
        }
    }

    pub fn with_reference(mut self, reference: MovementReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_actor(mut self, actor: Option<UserId>) -> Self {
        self.actor = actor;
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn expecting(mut self, previous_quantity: i64) -> Self {
        self.expected_previous = Some(previous_quantity);
        self
    }

    pub fn allowing_negative(mut self, allow: bool) -> Self {
        self.allow_negative = allow;
        self
    }

    /// Stateless checks: positive magnitude, reference kind matching the change.
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("movement quantity must be positive"));
        }
        if let Some(reference) = &self.reference {
            if reference.movement_type() != self.change.movement_type() {
                return Err(DomainError::validation(format!(
                    "a {} movement cannot reference a {}",
                    self.change.movement_type().as_str(),
                    reference.movement_type().as_str()
                )));
            }
        }
        Ok(())
    }

    /// Plan the movement against the product's current state.
    ///
    /// `last_movement` is the product's most recent movement, if any; the new
    /// movement gets the next sequence number and may not predate it.
    pub fn plan(
        &self,
        tenant_id: TenantId,
        product: &Product,
        last_movement: Option<&StockMovement>,
    ) -> DomainResult<StockMovement> {
        self.validate()?;

        if product.tenant_id != tenant_id {
            return Err(DomainError::tenant_isolation(
                "product is not owned by the active tenant",
            ));
        }
        if product.id != self.product_id {
            return Err(DomainError::validation("request targets a different product"));
        }

        let previous_quantity = product.quantity();
        if let Some(expected) = self.expected_previous {
            if expected != previous_quantity {
                return Err(DomainError::transient(format!(
                    "quantity changed concurrently (expected {expected}, found {previous_quantity})"
                )));
            }
        }

        let direction = self.change.direction();
        let new_quantity = previous_quantity + direction.sign() * self.quantity;
        if new_quantity < 0 && !self.allow_negative {
            return Err(DomainError::insufficient_stock(self.quantity, previous_quantity));
        }

        let created_at = match (self.occurred_at, last_movement) {
            (Some(at), Some(last)) if at < last.created_at => {
                return Err(DomainError::validation(
                    "movement predates the product's latest recorded movement",
                ));
            }
            (Some(at), _) => at,
            (None, Some(last)) => Utc::now().max(last.created_at),
            (None, None) => Utc::now(),
        };
        let sequence = last_movement.map_or(1, |last| last.sequence + 1);

        Ok(StockMovement {
            id: MovementId::new(),
            tenant_id,
            product_id: product.id,
            movement_type: self.change.movement_type(),
            direction,
            quantity: self.quantity,
            previous_quantity,
            new_quantity,
            reference: self.reference,
            created_by: self.actor,
            created_at,
            sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn product(quantity: i64) -> Product {
        Product::new(TenantId::new(), "Rice 5kg", "RICE-5", quantity, 3)
    }

    #[test]
    fn direction_follows_change() {
        assert_eq!(StockChange::Sale.direction(), Direction::Decrease);
        assert_eq!(StockChange::SaleReversal.direction(), Direction::Increase);
        assert_eq!(StockChange::SaleReversal.movement_type(), MovementType::Sale);
        assert_eq!(StockChange::Purchase.direction(), Direction::Increase);
        assert_eq!(StockChange::TransferOut.direction(), Direction::Decrease);
        assert_eq!(StockChange::TransferIn.direction(), Direction::Increase);
        assert_eq!(
            StockChange::Adjustment(Direction::Decrease).direction(),
            Direction::Decrease
        );
    }

    #[test]
    fn plan_computes_previous_and_new() {
        let p = product(10);
        let m = MovementRequest::new(p.id, StockChange::Sale, 4)
            .plan(p.tenant_id, &p, None)
            .unwrap();
        assert_eq!(m.previous_quantity, 10);
        assert_eq!(m.new_quantity, 6);
        assert_eq!(m.sequence, 1);
        assert!(m.is_consistent());
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let p = product(10);
        for qty in [0, -3] {
            let err = MovementRequest::new(p.id, StockChange::Purchase, qty)
                .plan(p.tenant_id, &p, None)
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn decrease_below_zero_needs_permission() {
        let p = product(4);
        let err = MovementRequest::new(p.id, StockChange::Sale, 6)
            .plan(p.tenant_id, &p, None)
            .unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(6, 4));

        let m = MovementRequest::new(p.id, StockChange::Sale, 6)
            .allowing_negative(true)
            .plan(p.tenant_id, &p, None)
            .unwrap();
        assert_eq!(m.new_quantity, -2);
    }

    #[test]
    fn cross_tenant_plan_is_an_isolation_error() {
        let p = product(4);
        let err = MovementRequest::new(p.id, StockChange::Purchase, 1)
            .plan(TenantId::new(), &p, None)
            .unwrap_err();
        assert!(matches!(err, DomainError::TenantIsolation(_)));
    }

    #[test]
    fn stale_expectation_is_transient() {
        let p = product(4);
        let err = MovementRequest::new(p.id, StockChange::Purchase, 1)
            .expecting(5)
            .plan(p.tenant_id, &p, None)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn mismatched_reference_is_rejected() {
        let p = product(4);
        let err = MovementRequest::new(p.id, StockChange::Purchase, 1)
            .with_reference(MovementReference::Sale(SaleId::new()))
            .plan(p.tenant_id, &p, None)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn sequence_continues_and_time_may_not_go_backwards() {
        let mut p = product(10);
        let t0 = Utc::now();
        let first = MovementRequest::new(p.id, StockChange::Sale, 1)
            .at(t0)
            .plan(p.tenant_id, &p, None)
            .unwrap();
        p.apply(&first).unwrap();

        let second = MovementRequest::new(p.id, StockChange::Sale, 1)
            .at(t0)
            .plan(p.tenant_id, &p, Some(&first))
            .unwrap();
        assert_eq!(second.sequence, 2);

        let err = MovementRequest::new(p.id, StockChange::Sale, 1)
            .at(t0 - Duration::seconds(1))
            .plan(p.tenant_id, &p, Some(&first))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn unstamped_request_never_precedes_history() {
        let mut p = product(10);
        let later = Utc::now() + Duration::hours(1);
        let first = MovementRequest::new(p.id, StockChange::Sale, 1)
            .at(later)
            .plan(p.tenant_id, &p, None)
            .unwrap();
        p.apply(&first).unwrap();

        let next = MovementRequest::new(p.id, StockChange::Sale, 1)
            .plan(p.tenant_id, &p, Some(&first))
            .unwrap();
        assert_eq!(next.created_at, later);
    }

    #[test]
    fn reference_parts_roundtrip_kind() {
        let r = MovementReference::Adjustment(AdjustmentId::new());
        let (kind, id) = r.to_parts();
        assert_eq!(kind, "adjustment");
        assert_eq!(MovementReference::from_parts(kind, id).unwrap(), r);
        assert!(MovementReference::from_parts("invoice", id).is_err());
    }

    fn change_strategy() -> impl Strategy<Value = StockChange> {
        prop_oneof![
            Just(StockChange::Sale),
            Just(StockChange::SaleReversal),
            Just(StockChange::Purchase),
            Just(StockChange::TransferIn),
            Just(StockChange::TransferOut),
            Just(StockChange::Adjustment(Direction::Increase)),
            Just(StockChange::Adjustment(Direction::Decrease)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of changes is accepted, the product's
        /// quantity equals the replay of its movements from the initial quantity,
        /// and it never goes negative.
        #[test]
        fn quantity_equals_replayed_history(
            initial in 0i64..500,
            steps in prop::collection::vec((change_strategy(), 1i64..60), 1..40)
        ) {
            let mut p = product(initial);
            let mut history: Vec<StockMovement> = Vec::new();

            for (change, qty) in steps {
                let planned = MovementRequest::new(p.id, change, qty)
                    .plan(p.tenant_id, &p, history.last());
                match planned {
                    Ok(m) => {
                        prop_assert!(m.is_consistent());
                        p.apply(&m).unwrap();
                        history.push(m);
                    }
                    Err(DomainError::InsufficientStock { .. }) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                }
            }

            prop_assert!(p.quantity() >= 0);
            prop_assert_eq!(Product::replay(initial, &history), p.quantity());
        }
    }
}
