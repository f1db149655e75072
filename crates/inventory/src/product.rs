use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockguard_core::{BranchId, DomainError, DomainResult, Entity, ProductId, TenantId};

use crate::movement::StockMovement;

/// A stocked product.
///
/// Catalog fields are public and owned by catalog management. The on-hand
/// quantity is private: it starts at `initial_quantity` and only changes by
/// applying a [`StockMovement`], which keeps
/// `quantity == initial_quantity + Σ signed deltas` true by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub branch_id: Option<BranchId>,
    pub name: String,
    pub sku: String,
    pub unit_symbol: Option<String>,
    pub initial_quantity: i64,
    quantity: i64,
    pub reorder_level: i64,
    pub expiry_date: Option<NaiveDate>,
    /// Minor currency units.
    pub cost_price: i64,
    /// Minor currency units.
    pub selling_price: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        sku: impl Into<String>,
        initial_quantity: i64,
        reorder_level: i64,
    ) -> Self {
        Self {
            id: ProductId::new(),
            tenant_id,
            branch_id: None,
            name: name.into(),
            sku: sku.into(),
            unit_symbol: None,
            initial_quantity,
            quantity: initial_quantity,
            reorder_level,
            expiry_date: None,
            cost_price: 0,
            selling_price: 0,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: ProductId) -> Self {
        self.id = id;
        self
    }

    pub fn with_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    pub fn with_unit(mut self, symbol: impl Into<String>) -> Self {
        self.unit_symbol = Some(symbol.into());
        self
    }

    pub fn with_expiry(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    pub fn with_prices(mut self, cost_price: i64, selling_price: i64) -> Self {
        self.cost_price = cost_price;
        self.selling_price = selling_price;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Rehydrate the stored on-hand quantity (storage backends only).
    pub fn with_stored_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if self.initial_quantity < 0 {
            return Err(DomainError::validation("initial quantity cannot be negative"));
        }
        if self.reorder_level < 0 {
            return Err(DomainError::validation("reorder level cannot be negative"));
        }
        Ok(())
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.reorder_level
    }

    /// At or below half the reorder level (`quantity <= reorder_level / 2`,
    /// compared without integer division).
    pub fn is_critically_low(&self) -> bool {
        self.quantity.saturating_mul(2) <= self.reorder_level
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|d| d < today)
    }

    /// Days from `today` to the expiry date; negative once expired.
    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry_date.map(|d| (d - today).num_days())
    }

    /// Take the catalog-owned fields from `incoming`, keeping identity,
    /// ownership and stock figures.
    pub fn merge_catalog(&mut self, incoming: Product) {
        self.branch_id = incoming.branch_id;
        self.name = incoming.name;
        self.sku = incoming.sku;
        self.unit_symbol = incoming.unit_symbol;
        self.reorder_level = incoming.reorder_level;
        self.expiry_date = incoming.expiry_date;
        self.cost_price = incoming.cost_price;
        self.selling_price = incoming.selling_price;
        self.is_active = incoming.is_active;
    }

    /// Apply a committed movement to the on-hand quantity.
    ///
    /// The movement must have been planned against the current quantity.
    pub fn apply(&mut self, movement: &StockMovement) -> DomainResult<()> {
        if movement.product_id != self.id {
            return Err(DomainError::validation("movement targets a different product"));
        }
        if movement.tenant_id != self.tenant_id {
            return Err(DomainError::tenant_isolation(
                "movement tenant does not own the product",
            ));
        }
        if movement.previous_quantity != self.quantity {
            return Err(DomainError::transient(format!(
                "stale movement: planned against {}, product holds {}",
                movement.previous_quantity, self.quantity
            )));
        }
        self.quantity = movement.new_quantity;
        Ok(())
    }

    /// Quantity implied by replaying `movements` (in sequence order) on top of
    /// the initial quantity.
    pub fn replay(initial_quantity: i64, movements: &[StockMovement]) -> i64 {
        let mut ordered: Vec<&StockMovement> = movements.iter().collect();
        ordered.sort_by_key(|m| m.sequence);
        ordered
            .into_iter()
            .fold(initial_quantity, |qty, m| qty + m.signed_delta())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soap(quantity: i64, reorder_level: i64) -> Product {
        Product::new(TenantId::new(), "Soap", "SOAP-1", quantity, reorder_level)
    }

    #[test]
    fn low_stock_is_inclusive_of_reorder_level() {
        assert!(soap(20, 20).is_low_stock());
        assert!(!soap(21, 20).is_low_stock());
    }

    #[test]
    fn critically_low_uses_exact_half() {
        assert!(soap(5, 20).is_critically_low());
        assert!(soap(10, 20).is_critically_low());
        assert!(!soap(15, 20).is_critically_low());
        // 5 <= 11/2 = 5.5 holds; integer division would say 5 <= 5 too, but 6 must not.
        assert!(soap(5, 11).is_critically_low());
        assert!(!soap(6, 11).is_critically_low());
    }

    #[test]
    fn expiry_helpers() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let p = soap(1, 0).with_expiry(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        assert!(p.is_expired(today));
        assert_eq!(p.days_until_expiry(today), Some(-1));

        let fresh = soap(1, 0).with_expiry(today);
        assert!(!fresh.is_expired(today));
        assert_eq!(fresh.days_until_expiry(today), Some(0));
    }

    #[test]
    fn merge_catalog_keeps_quantity_and_identity() {
        let mut stored = soap(40, 10);
        let id = stored.id;
        let tenant = stored.tenant_id;

        let mut incoming = Product::new(TenantId::new(), "Soap XL", "SOAP-2", 999, 15)
            .with_stored_quantity(999);
        incoming.is_active = false;
        stored.merge_catalog(incoming);

        assert_eq!(stored.id, id);
        assert_eq!(stored.tenant_id, tenant);
        assert_eq!(stored.quantity(), 40);
        assert_eq!(stored.initial_quantity, 40);
        assert_eq!(stored.name, "Soap XL");
        assert_eq!(stored.reorder_level, 15);
        assert!(!stored.is_active);
    }

    #[test]
    fn validate_rejects_blank_name_and_negative_levels() {
        let mut p = soap(1, 1);
        p.name = "  ".to_string();
        assert!(matches!(p.validate(), Err(DomainError::Validation(_))));

        let p = soap(1, -1);
        assert!(matches!(p.validate(), Err(DomainError::Validation(_))));
    }
}
