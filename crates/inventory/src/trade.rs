//! Trade records that touch stock or hang off the tenant graph.
//!
//! Only the fields the consistency hooks and tenant scoping need are modelled;
//! pricing, tax and settlement belong to the sales and purchasing modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockguard_core::{
    CustomerId, DomainError, DomainResult, Entity, PaymentId, ProductId, PurchaseLineId,
    PurchaseOrderId, SaleId, SaleLineId, SupplierId, TenantId, VariantId,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub tenant_id: TenantId,
    pub customer_id: Option<CustomerId>,
    pub created_at: DateTime<Utc>,
}

impl Sale {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            id: SaleId::new(),
            tenant_id,
            customer_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub id: SaleLineId,
    pub tenant_id: TenantId,
    pub sale_id: SaleId,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Minor currency units.
    pub unit_price: i64,
}

impl SaleLine {
    pub fn new(
        tenant_id: TenantId,
        sale_id: SaleId,
        product_id: ProductId,
        quantity: i64,
        unit_price: i64,
    ) -> Self {
        Self {
            id: SaleLineId::new(),
            tenant_id,
            sale_id,
            product_id,
            quantity,
            unit_price,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("sale line quantity must be positive"));
        }
        if self.unit_price < 0 {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub tenant_id: TenantId,
    pub supplier_id: SupplierId,
    pub created_at: DateTime<Utc>,
}

impl PurchaseOrder {
    pub fn new(tenant_id: TenantId, supplier_id: SupplierId) -> Self {
        Self {
            id: PurchaseOrderId::new(),
            tenant_id,
            supplier_id,
            created_at: Utc::now(),
        }
    }
}

/// A purchase-order line. Carries no tenant column; it belongs to whoever owns
/// its purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub id: PurchaseLineId,
    pub purchase_order_id: PurchaseOrderId,
    pub product_id: ProductId,
    pub ordered_quantity: i64,
    pub received_quantity: i64,
    /// Minor currency units.
    pub unit_cost: i64,
}

impl PurchaseLine {
    pub fn new(
        purchase_order_id: PurchaseOrderId,
        product_id: ProductId,
        ordered_quantity: i64,
        unit_cost: i64,
    ) -> Self {
        Self {
            id: PurchaseLineId::new(),
            purchase_order_id,
            product_id,
            ordered_quantity,
            received_quantity: 0,
            unit_cost,
        }
    }

    pub fn outstanding(&self) -> i64 {
        self.ordered_quantity - self.received_quantity
    }

    /// `received` must lie in `0..=ordered_quantity`.
    pub fn check_received(&self, received: i64) -> DomainResult<()> {
        if received < 0 {
            return Err(DomainError::validation("received quantity cannot be negative"));
        }
        if received > self.ordered_quantity {
            return Err(DomainError::validation(format!(
                "received quantity {received} exceeds ordered quantity {}",
                self.ordered_quantity
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub tenant_id: TenantId,
    pub name: String,
}

impl Supplier {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id: SupplierId::new(),
            tenant_id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub tenant_id: TenantId,
    pub name: String,
}

impl Customer {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id: CustomerId::new(),
            tenant_id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierPayment {
    pub id: PaymentId,
    pub supplier_id: SupplierId,
    pub amount: i64,
    pub paid_at: DateTime<Utc>,
}

impl SupplierPayment {
    pub fn new(supplier_id: SupplierId, amount: i64) -> Self {
        Self {
            id: PaymentId::new(),
            supplier_id,
            amount,
            paid_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerPayment {
    pub id: PaymentId,
    pub customer_id: CustomerId,
    pub amount: i64,
    pub paid_at: DateTime<Utc>,
}

impl CustomerPayment {
    pub fn new(customer_id: CustomerId, amount: i64) -> Self {
        Self {
            id: PaymentId::new(),
            customer_id,
            amount,
            paid_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub name: String,
    pub sku: String,
}

impl ProductVariant {
    pub fn new(product_id: ProductId, name: impl Into<String>, sku: impl Into<String>) -> Self {
        Self {
            id: VariantId::new(),
            product_id,
            name: name.into(),
            sku: sku.into(),
        }
    }
}

macro_rules! impl_entity {
    ($($ty:ty => $id:ty),+ $(,)?) => {
        $(
            impl Entity for $ty {
                type Id = $id;

                fn id(&self) -> Self::Id {
                    self.id
                }
            }
        )+
    };
}

impl_entity! {
    Sale => SaleId,
    SaleLine => SaleLineId,
    PurchaseOrder => PurchaseOrderId,
    PurchaseLine => PurchaseLineId,
    Supplier => SupplierId,
    Customer => CustomerId,
    SupplierPayment => PaymentId,
    CustomerPayment => PaymentId,
    ProductVariant => VariantId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn received_quantity_bounds() {
        let line = PurchaseLine::new(PurchaseOrderId::new(), ProductId::new(), 60, 100);
        assert!(line.check_received(0).is_ok());
        assert!(line.check_received(60).is_ok());
        assert!(line.check_received(61).is_err());
        assert!(line.check_received(-1).is_err());
        assert_eq!(line.outstanding(), 60);
    }

    #[test]
    fn sale_line_requires_positive_quantity() {
        let line = SaleLine::new(TenantId::new(), SaleId::new(), ProductId::new(), 0, 10);
        assert!(matches!(line.validate(), Err(DomainError::Validation(_))));
    }
}
