//! Tenant ownership declarations.
//!
//! Every scoped entity either carries its tenant directly or reaches it through
//! one parent relation. The rule is derived once per type from what the type
//! declares and registered in an [`OwnershipRegistry`] at startup.

use std::any::TypeId;
use std::collections::HashMap;

use stockguard_core::{CustomerId, Entity, ProductId, PurchaseOrderId, SupplierId, TenantId};

use crate::adjustment::StockAdjustment;
use crate::alert::StockAlert;
use crate::movement::StockMovement;
use crate::product::Product;
use crate::trade::{
    Customer, CustomerPayment, ProductVariant, PurchaseLine, PurchaseOrder, Sale, SaleLine,
    Supplier, SupplierPayment,
};

/// One-hop parent relations that can carry ownership.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Relation {
    PurchaseOrder,
    Product,
    Supplier,
    Customer,
}

impl Relation {
    /// Resolution order when a type declares more than one relation.
    pub const PRIORITY: [Relation; 4] = [
        Relation::PurchaseOrder,
        Relation::Product,
        Relation::Supplier,
        Relation::Customer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::PurchaseOrder => "purchase_order",
            Relation::Product => "product",
            Relation::Supplier => "supplier",
            Relation::Customer => "customer",
        }
    }
}

/// A resolved parent reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OwnerRef {
    PurchaseOrder(PurchaseOrderId),
    Product(ProductId),
    Supplier(SupplierId),
    Customer(CustomerId),
}

impl OwnerRef {
    pub fn relation(&self) -> Relation {
        match self {
            OwnerRef::PurchaseOrder(_) => Relation::PurchaseOrder,
            OwnerRef::Product(_) => Relation::Product,
            OwnerRef::Supplier(_) => Relation::Supplier,
            OwnerRef::Customer(_) => Relation::Customer,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OwnershipRule {
    Direct,
    Via(Relation),
    /// No path to a tenant; scoping yields nothing.
    Unowned,
}

impl OwnershipRule {
    pub fn infer(has_direct_tenant: bool, relations: &[Relation]) -> Self {
        if has_direct_tenant {
            return OwnershipRule::Direct;
        }
        Relation::PRIORITY
            .iter()
            .find(|r| relations.contains(r))
            .map(|r| OwnershipRule::Via(*r))
            .unwrap_or(OwnershipRule::Unowned)
    }
}

/// An entity that participates in tenant scoping.
pub trait TenantOwned: Entity + Clone + Send + Sync + 'static {
    const KIND: &'static str;
    const HAS_DIRECT_TENANT: bool = false;
    const RELATIONS: &'static [Relation] = &[];

    fn direct_tenant(&self) -> Option<TenantId> {
        None
    }

    fn parent(&self, _relation: Relation) -> Option<OwnerRef> {
        None
    }

    fn ownership_rule() -> OwnershipRule {
        OwnershipRule::infer(Self::HAS_DIRECT_TENANT, Self::RELATIONS)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Registration {
    pub kind: &'static str,
    pub rule: OwnershipRule,
}

#[derive(Debug, Clone, Default)]
pub struct OwnershipRegistry {
    entries: HashMap<TypeId, Registration>,
}

impl OwnershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every entity type of the stock engine.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry
            .register::<Product>()
            .register::<ProductVariant>()
            .register::<StockMovement>()
            .register::<StockAlert>()
            .register::<StockAdjustment>()
            .register::<Sale>()
            .register::<SaleLine>()
            .register::<PurchaseOrder>()
            .register::<PurchaseLine>()
            .register::<Supplier>()
            .register::<SupplierPayment>()
            .register::<Customer>()
            .register::<CustomerPayment>();
        registry
    }

    pub fn register<E: TenantOwned>(&mut self) -> &mut Self {
        self.entries.insert(
            TypeId::of::<E>(),
            Registration {
                kind: E::KIND,
                rule: E::ownership_rule(),
            },
        );
        self
    }

    pub fn lookup<E: TenantOwned>(&self) -> Option<Registration> {
        self.entries.get(&TypeId::of::<E>()).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

macro_rules! direct_owned {
    ($($ty:ty => $kind:literal),+ $(,)?) => {
        $(
            impl TenantOwned for $ty {
                const KIND: &'static str = $kind;
                const HAS_DIRECT_TENANT: bool = true;

                fn direct_tenant(&self) -> Option<TenantId> {
                    Some(self.tenant_id)
                }
            }
        )+
    };
}

direct_owned! {
    Product => "product",
    StockMovement => "stock_movement",
    StockAlert => "stock_alert",
    StockAdjustment => "stock_adjustment",
    Sale => "sale",
    SaleLine => "sale_line",
    PurchaseOrder => "purchase_order",
    Supplier => "supplier",
    Customer => "customer",
}

impl TenantOwned for PurchaseLine {
    const KIND: &'static str = "purchase_line";
    const RELATIONS: &'static [Relation] = &[Relation::Product, Relation::PurchaseOrder];

    fn parent(&self, relation: Relation) -> Option<OwnerRef> {
        match relation {
            Relation::PurchaseOrder => Some(OwnerRef::PurchaseOrder(self.purchase_order_id)),
            Relation::Product => Some(OwnerRef::Product(self.product_id)),
            _ => None,
        }
    }
}

impl TenantOwned for ProductVariant {
    const KIND: &'static str = "product_variant";
    const RELATIONS: &'static [Relation] = &[Relation::Product];

    fn parent(&self, relation: Relation) -> Option<OwnerRef> {
        match relation {
            Relation::Product => Some(OwnerRef::Product(self.product_id)),
            _ => None,
        }
    }
}

impl TenantOwned for SupplierPayment {
    const KIND: &'static str = "supplier_payment";
    const RELATIONS: &'static [Relation] = &[Relation::Supplier];

    fn parent(&self, relation: Relation) -> Option<OwnerRef> {
        match relation {
            Relation::Supplier => Some(OwnerRef::Supplier(self.supplier_id)),
            _ => None,
        }
    }
}

impl TenantOwned for CustomerPayment {
    const KIND: &'static str = "customer_payment";
    const RELATIONS: &'static [Relation] = &[Relation::Customer];

    fn parent(&self, relation: Relation) -> Option<OwnerRef> {
        match relation {
            Relation::Customer => Some(OwnerRef::Customer(self.customer_id)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_picks_purchase_order_before_product() {
        assert_eq!(
            PurchaseLine::ownership_rule(),
            OwnershipRule::Via(Relation::PurchaseOrder)
        );
        assert_eq!(
            OwnershipRule::infer(false, &[Relation::Customer, Relation::Supplier]),
            OwnershipRule::Via(Relation::Supplier)
        );
    }

    #[test]
    fn direct_wins_over_relations() {
        assert_eq!(
            OwnershipRule::infer(true, &[Relation::Product]),
            OwnershipRule::Direct
        );
        assert_eq!(SaleLine::ownership_rule(), OwnershipRule::Direct);
    }

    #[test]
    fn nothing_declared_is_unowned() {
        assert_eq!(OwnershipRule::infer(false, &[]), OwnershipRule::Unowned);
    }

    #[test]
    fn standard_registry_covers_the_graph() {
        let registry = OwnershipRegistry::standard();
        assert_eq!(registry.len(), 13);
        assert_eq!(
            registry.lookup::<CustomerPayment>().map(|r| r.rule),
            Some(OwnershipRule::Via(Relation::Customer))
        );
        assert_eq!(
            registry.lookup::<ProductVariant>().map(|r| r.kind),
            Some("product_variant")
        );
    }
}
