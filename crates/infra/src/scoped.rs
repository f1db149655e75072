//! Tenant-scoped reads over any registered entity type.
//!
//! `scope` restricts a query to the unit of work's tenant; `scope_for` takes
//! the tenant explicitly (administrative tooling). Ownership is checked for
//! every returned row according to the type's registered rule, whatever the
//! store pre-filtered.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use stockguard_core::{DomainResult, TenantContext, TenantId};
use stockguard_inventory::{OwnerRef, OwnershipRegistry, OwnershipRule, TenantOwned};

use crate::config::UnscopedPolicy;
use crate::store::{RowSource, TenantDirectory};

/// The rows one scoped query resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedQuery<E> {
    rows: Vec<E>,
}

impl<E: TenantOwned> ScopedQuery<E> {
    fn new(rows: Vec<E>) -> Self {
        Self { rows }
    }

    fn empty() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: FnMut(&E) -> bool,
    {
        let mut predicate = predicate;
        Self {
            rows: self.rows.into_iter().filter(|row| predicate(row)).collect(),
        }
    }

    pub fn find(&self, id: E::Id) -> Option<E> {
        self.rows.iter().find(|row| row.id() == id).cloned()
    }

    pub fn first(&self) -> Option<E> {
        self.rows.first().cloned()
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.rows.iter()
    }

    pub fn all(self) -> Vec<E> {
        self.rows
    }
}

#[derive(Debug)]
pub struct ScopedRepository<S> {
    store: S,
    registry: Arc<OwnershipRegistry>,
    unscoped: UnscopedPolicy,
}

impl<S> ScopedRepository<S>
where
    S: TenantDirectory,
{
    pub fn new(store: S, registry: Arc<OwnershipRegistry>) -> Self {
        Self {
            store,
            registry,
            unscoped: UnscopedPolicy::default(),
        }
    }

    pub fn with_unscoped_policy(mut self, policy: UnscopedPolicy) -> Self {
        self.unscoped = policy;
        self
    }

    pub fn unscoped_policy(&self) -> UnscopedPolicy {
        self.unscoped
    }

    /// Rows of `E` visible to the context's tenant.
    pub fn scope<E>(&self, ctx: &TenantContext) -> DomainResult<ScopedQuery<E>>
    where
        E: TenantOwned,
        S: RowSource<E>,
    {
        if let Some(tenant_id) = ctx.current() {
            return self.scope_for::<E>(tenant_id);
        }

        match self.unscoped {
            UnscopedPolicy::FailClosed => {
                debug!(entity = E::KIND, "scoped read without tenant context; returning nothing");
                Ok(ScopedQuery::empty())
            }
            UnscopedPolicy::FailOpen => {
                warn!(
                    entity = E::KIND,
                    "scoped read without tenant context; returning unfiltered rows"
                );
                Ok(ScopedQuery::new(self.store.rows()?))
            }
        }
    }

    /// Rows of `E` owned by `tenant_id`, independent of any context.
    pub fn scope_for<E>(&self, tenant_id: TenantId) -> DomainResult<ScopedQuery<E>>
    where
        E: TenantOwned,
        S: RowSource<E>,
    {
        let Some(registration) = self.registry.lookup::<E>() else {
            warn!(entity = E::KIND, "entity type is not registered for tenant scoping");
            return Ok(ScopedQuery::empty());
        };

        let rows = match registration.rule {
            OwnershipRule::Direct => self
                .store
                .rows_owned_by(tenant_id)?
                .into_iter()
                .filter(|row| row.direct_tenant() == Some(tenant_id))
                .collect(),
            OwnershipRule::Via(relation) => {
                let mut owners: HashMap<OwnerRef, Option<TenantId>> = HashMap::new();
                let mut kept = Vec::new();
                for row in self.store.rows_owned_by(tenant_id)? {
                    let Some(parent) = row.parent(relation) else {
                        continue;
                    };
                    let owner = match owners.get(&parent) {
                        Some(owner) => *owner,
                        None => {
                            let owner = self.store.owner_tenant(parent)?;
                            owners.insert(parent, owner);
                            owner
                        }
                    };
                    if owner == Some(tenant_id) {
                        kept.push(row);
                    }
                }
                kept
            }
            OwnershipRule::Unowned => {
                warn!(entity = E::KIND, "entity type has no ownership path; returning nothing");
                Vec::new()
            }
        };

        Ok(ScopedQuery::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockguard_core::{DomainError, Entity};
    use stockguard_inventory::{
        Customer, CustomerPayment, Product, ProductVariant, PurchaseLine, PurchaseOrder,
    };

    use crate::store::{InMemoryInventoryStore, InventoryStore};
    use stockguard_core::{CustomerId, SupplierId};

    /// Declares nothing about its owner.
    #[derive(Debug, Clone, PartialEq)]
    struct Orphan {
        id: u32,
    }

    impl Entity for Orphan {
        type Id = u32;

        fn id(&self) -> Self::Id {
            self.id
        }
    }

    impl TenantOwned for Orphan {
        const KIND: &'static str = "orphan";
    }

    struct OrphanStore;

    impl RowSource<Orphan> for OrphanStore {
        fn rows(&self) -> DomainResult<Vec<Orphan>> {
            Ok(vec![Orphan { id: 1 }])
        }
    }

    impl TenantDirectory for OrphanStore {
        fn owner_tenant(&self, _owner: OwnerRef) -> DomainResult<Option<TenantId>> {
            Err(DomainError::storage("not used"))
        }
    }

    fn repo(store: Arc<InMemoryInventoryStore>) -> ScopedRepository<Arc<InMemoryInventoryStore>> {
        ScopedRepository::new(store, Arc::new(OwnershipRegistry::standard()))
    }

    #[test]
    fn via_relation_uses_parent_tenant() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let (a, b) = (TenantId::new(), TenantId::new());
        let pa = store.insert_product(Product::new(a, "A", "A", 1, 0)).unwrap();
        let pb = store.insert_product(Product::new(b, "B", "B", 1, 0)).unwrap();
        store.insert_variant(ProductVariant::new(pa.id, "A-red", "A-R")).unwrap();
        store.insert_variant(ProductVariant::new(pb.id, "B-red", "B-R")).unwrap();
        // Dangling parent: excluded for everyone.
        store
            .insert_variant(ProductVariant::new(stockguard_core::ProductId::new(), "ghost", "G"))
            .unwrap();

        let repo = repo(store);
        let visible = repo.scope::<ProductVariant>(&TenantContext::for_tenant(a)).unwrap();
        assert_eq!(visible.count(), 1);
        assert_eq!(visible.first().unwrap().product_id, pa.id);
    }

    #[test]
    fn purchase_lines_follow_the_order_not_the_product() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let a = TenantId::new();
        let p = store.insert_product(Product::new(a, "A", "A", 1, 0)).unwrap();
        let po = store
            .insert_purchase_order(PurchaseOrder::new(a, SupplierId::new()))
            .unwrap();
        let line = store
            .insert_purchase_line(PurchaseLine::new(po.id, p.id, 5, 10))
            .unwrap();

        let repo = repo(store);
        let mine = repo.scope_for::<PurchaseLine>(a).unwrap();
        assert_eq!(mine.find(line.id).map(|l| l.id), Some(line.id));
        assert!(repo.scope_for::<PurchaseLine>(TenantId::new()).unwrap().is_empty());
    }

    #[test]
    fn no_context_fails_closed_by_default_and_open_on_request() {
        let store = Arc::new(InMemoryInventoryStore::new());
        store.insert_product(Product::new(TenantId::new(), "A", "A", 1, 0)).unwrap();
        store.insert_product(Product::new(TenantId::new(), "B", "B", 1, 0)).unwrap();

        let closed = repo(store.clone());
        assert!(closed.scope::<Product>(&TenantContext::empty()).unwrap().is_empty());

        let open = repo(store).with_unscoped_policy(UnscopedPolicy::FailOpen);
        assert_eq!(open.scope::<Product>(&TenantContext::empty()).unwrap().count(), 2);
    }

    #[test]
    fn unowned_and_unregistered_types_are_empty() {
        let mut registry = OwnershipRegistry::new();
        let unregistered = ScopedRepository::new(OrphanStore, Arc::new(registry.clone()));
        assert!(unregistered.scope_for::<Orphan>(TenantId::new()).unwrap().is_empty());

        registry.register::<Orphan>();
        let registered = ScopedRepository::new(OrphanStore, Arc::new(registry));
        assert!(registered.scope_for::<Orphan>(TenantId::new()).unwrap().is_empty());
    }

    #[test]
    fn filter_narrows_within_the_tenant() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let a = TenantId::new();
        let c1 = store.insert_customer(Customer::new(a, "Ann")).unwrap();
        let c2 = store.insert_customer(Customer::new(a, "Bo")).unwrap();
        store.insert_customer_payment(CustomerPayment::new(c1.id, 100)).unwrap();
        store.insert_customer_payment(CustomerPayment::new(c2.id, 250)).unwrap();
        store.insert_customer_payment(CustomerPayment::new(CustomerId::new(), 999)).unwrap();

        let repo = repo(store);
        let big = repo
            .scope_for::<CustomerPayment>(a)
            .unwrap()
            .filter(|p| p.amount > 150)
            .all();
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].customer_id, c2.id);
    }
}
