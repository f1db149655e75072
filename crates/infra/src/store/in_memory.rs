//! In-memory store for tests/dev and single-process deployments.
//!
//! All tables sit behind one `RwLock`. A transaction takes the write lock,
//! does every fallible step against the current state, and only then mutates,
//! so a failed call leaves nothing behind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use stockguard_core::{
    AdjustmentId, AlertId, CustomerId, DomainError, DomainResult, PaymentId, ProductId,
    PurchaseLineId, PurchaseOrderId, SaleId, SaleLineId, SupplierId, TenantId, UserId, VariantId,
};
use stockguard_inventory::{
    AlertType, Customer, CustomerPayment, MovementRequest, MovementType, OwnerRef, Product,
    ProductVariant, PurchaseLine, PurchaseOrder, Sale, SaleLine, StockAdjustment, StockAlert,
    StockMovement, Supplier, SupplierPayment,
};

use super::{InventoryStore, RowSource, TenantDirectory};

#[derive(Debug, Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    /// Per product, in sequence order.
    movements: BTreeMap<ProductId, Vec<StockMovement>>,
    adjustments: BTreeMap<AdjustmentId, StockAdjustment>,
    alerts: BTreeMap<AlertId, StockAlert>,
    sales: BTreeMap<SaleId, Sale>,
    sale_lines: BTreeMap<SaleLineId, SaleLine>,
    purchase_orders: BTreeMap<PurchaseOrderId, PurchaseOrder>,
    purchase_lines: BTreeMap<PurchaseLineId, PurchaseLine>,
    suppliers: BTreeMap<SupplierId, Supplier>,
    customers: BTreeMap<CustomerId, Customer>,
    supplier_payments: BTreeMap<PaymentId, SupplierPayment>,
    customer_payments: BTreeMap<PaymentId, CustomerPayment>,
    variants: BTreeMap<VariantId, ProductVariant>,
}

impl Tables {
    fn owned_product(&self, tenant_id: TenantId, id: ProductId) -> DomainResult<&Product> {
        self.products
            .get(&id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or(DomainError::NotFound)
    }

    fn purchase_line_tenant(&self, line: &PurchaseLine) -> Option<TenantId> {
        self.purchase_orders
            .get(&line.purchase_order_id)
            .map(|po| po.tenant_id)
    }

    /// Plan against the current state without mutating it.
    fn plan_movement(
        &self,
        tenant_id: TenantId,
        request: &MovementRequest,
    ) -> DomainResult<(StockMovement, Product)> {
        let product = self.owned_product(tenant_id, request.product_id)?;
        let last = self
            .movements
            .get(&request.product_id)
            .and_then(|history| history.last());

        let movement = request.plan(tenant_id, product, last)?;
        let mut updated = product.clone();
        updated.apply(&movement)?;
        Ok((movement, updated))
    }

    fn commit_movement(&mut self, movement: StockMovement, product: Product) {
        self.movements
            .entry(product.id)
            .or_default()
            .push(movement);
        self.products.insert(product.id, product);
    }
}

#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| DomainError::storage("in-memory store lock poisoned"))
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| DomainError::storage("in-memory store lock poisoned"))
    }

    // Rows owned by neighbouring modules (sales, purchasing, parties, catalog).
    // They are seeded here so hooks and scoping have something to resolve.

    pub fn insert_sale(&self, sale: Sale) -> DomainResult<Sale> {
        self.write()?.sales.insert(sale.id, sale.clone());
        Ok(sale)
    }

    pub fn insert_purchase_order(&self, order: PurchaseOrder) -> DomainResult<PurchaseOrder> {
        self.write()?
            .purchase_orders
            .insert(order.id, order.clone());
        Ok(order)
    }

    /// The purchase order must exist; the line inherits its tenant.
    pub fn insert_purchase_line(&self, line: PurchaseLine) -> DomainResult<PurchaseLine> {
        let mut t = self.write()?;
        let tenant_id = t.purchase_line_tenant(&line).ok_or(DomainError::NotFound)?;
        t.owned_product(tenant_id, line.product_id)?;
        if line.ordered_quantity <= 0 {
            return Err(DomainError::validation("ordered quantity must be positive"));
        }
        line.check_received(line.received_quantity)?;
        t.purchase_lines.insert(line.id, line.clone());
        Ok(line)
    }

    pub fn insert_supplier(&self, supplier: Supplier) -> DomainResult<Supplier> {
        self.write()?.suppliers.insert(supplier.id, supplier.clone());
        Ok(supplier)
    }

    pub fn insert_customer(&self, customer: Customer) -> DomainResult<Customer> {
        self.write()?.customers.insert(customer.id, customer.clone());
        Ok(customer)
    }

    pub fn insert_supplier_payment(&self, payment: SupplierPayment) -> DomainResult<SupplierPayment> {
        self.write()?
            .supplier_payments
            .insert(payment.id, payment.clone());
        Ok(payment)
    }

    pub fn insert_customer_payment(&self, payment: CustomerPayment) -> DomainResult<CustomerPayment> {
        self.write()?
            .customer_payments
            .insert(payment.id, payment.clone());
        Ok(payment)
    }

    pub fn insert_variant(&self, variant: ProductVariant) -> DomainResult<ProductVariant> {
        self.write()?.variants.insert(variant.id, variant.clone());
        Ok(variant)
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn tenants_with_stock(&self) -> DomainResult<Vec<TenantId>> {
        let t = self.read()?;
        let mut tenants: BTreeSet<TenantId> = t.products.values().map(|p| p.tenant_id).collect();
        tenants.extend(t.movements.values().flatten().map(|m| m.tenant_id));
        Ok(tenants.into_iter().collect())
    }

    fn insert_product(&self, product: Product) -> DomainResult<Product> {
        product.validate()?;
        let mut t = self.write()?;
        if t.products.contains_key(&product.id) {
            return Err(DomainError::conflict(format!("product {} already exists", product.id)));
        }
        t.products.insert(product.id, product.clone());
        Ok(product)
    }

    fn update_catalog(&self, tenant_id: TenantId, product: Product) -> DomainResult<Product> {
        product.validate()?;
        let mut t = self.write()?;
        let stored = t
            .products
            .get_mut(&product.id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or(DomainError::NotFound)?;
        stored.merge_catalog(product);
        Ok(stored.clone())
    }

    fn product(&self, tenant_id: TenantId, id: ProductId) -> DomainResult<Option<Product>> {
        let t = self.read()?;
        Ok(t.products
            .get(&id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    fn products(&self, tenant_id: TenantId) -> DomainResult<Vec<Product>> {
        let t = self.read()?;
        Ok(t.products
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn record_movement(
        &self,
        tenant_id: TenantId,
        request: &MovementRequest,
    ) -> DomainResult<(StockMovement, Product)> {
        let mut t = self.write()?;
        let (movement, product) = t.plan_movement(tenant_id, request)?;
        t.commit_movement(movement.clone(), product.clone());
        Ok((movement, product))
    }

    fn movements(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> DomainResult<Vec<StockMovement>> {
        let t = self.read()?;
        Ok(t.movements
            .get(&product_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|m| m.tenant_id == tenant_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn sale_movements_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<StockMovement>> {
        let t = self.read()?;
        Ok(t.movements
            .values()
            .flatten()
            .filter(|m| {
                m.tenant_id == tenant_id
                    && m.movement_type == MovementType::Sale
                    && m.created_at >= since
            })
            .cloned()
            .collect())
    }

    fn insert_adjustment(&self, adjustment: StockAdjustment) -> DomainResult<StockAdjustment> {
        let mut t = self.write()?;
        t.owned_product(adjustment.tenant_id, adjustment.product_id)?;
        if t.adjustments.contains_key(&adjustment.id) {
            return Err(DomainError::conflict(format!(
                "adjustment {} already exists",
                adjustment.id
            )));
        }
        t.adjustments.insert(adjustment.id, adjustment.clone());
        Ok(adjustment)
    }

    fn adjustment(
        &self,
        tenant_id: TenantId,
        id: AdjustmentId,
    ) -> DomainResult<Option<StockAdjustment>> {
        let t = self.read()?;
        Ok(t.adjustments
            .get(&id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    fn adjustments(&self, tenant_id: TenantId) -> DomainResult<Vec<StockAdjustment>> {
        let t = self.read()?;
        Ok(t.adjustments
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn commit_decision(
        &self,
        decided: &StockAdjustment,
        movement: Option<&MovementRequest>,
    ) -> DomainResult<Option<StockMovement>> {
        let mut t = self.write()?;
        let stored = t
            .adjustments
            .get(&decided.id)
            .filter(|a| a.tenant_id == decided.tenant_id)
            .ok_or(DomainError::NotFound)?;
        if !stored.is_pending() {
            return Err(DomainError::invalid_state(format!(
                "adjustment {} is already {}",
                stored.id,
                stored.status.as_str()
            )));
        }

        let planned = match movement {
            Some(request) => Some(t.plan_movement(decided.tenant_id, request)?),
            None => None,
        };

        t.adjustments.insert(decided.id, decided.clone());
        Ok(planned.map(|(movement, product)| {
            t.commit_movement(movement.clone(), product);
            movement
        }))
    }

    fn open_alert(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        alert_type: AlertType,
    ) -> DomainResult<Option<StockAlert>> {
        let t = self.read()?;
        Ok(t.alerts
            .values()
            .find(|a| a.is_open() && a.dedup_key() == (tenant_id, product_id, alert_type))
            .cloned())
    }

    fn insert_alert(&self, alert: StockAlert) -> DomainResult<StockAlert> {
        let mut t = self.write()?;
        if alert.is_open() {
            let key = alert.dedup_key();
            if t.alerts.values().any(|a| a.is_open() && a.dedup_key() == key) {
                return Err(DomainError::conflict(format!(
                    "open {} alert already exists for product {}",
                    alert.alert_type.as_str(),
                    alert.product_id
                )));
            }
        }
        t.alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    fn alert(&self, tenant_id: TenantId, id: AlertId) -> DomainResult<Option<StockAlert>> {
        let t = self.read()?;
        Ok(t.alerts
            .get(&id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    fn alerts(&self, tenant_id: TenantId) -> DomainResult<Vec<StockAlert>> {
        let t = self.read()?;
        Ok(t.alerts
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn resolve_alert(
        &self,
        tenant_id: TenantId,
        id: AlertId,
        resolved_by: Option<UserId>,
        resolved_at: DateTime<Utc>,
    ) -> DomainResult<StockAlert> {
        let mut t = self.write()?;
        let alert = t
            .alerts
            .get_mut(&id)
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or(DomainError::NotFound)?;
        alert.resolve(resolved_by, resolved_at);
        Ok(alert.clone())
    }

    fn insert_sale_line(&self, line: SaleLine) -> DomainResult<SaleLine> {
        line.validate()?;
        let mut t = self.write()?;
        t.owned_product(line.tenant_id, line.product_id)?;
        if let Some(sale) = t.sales.get(&line.sale_id) {
            if sale.tenant_id != line.tenant_id {
                return Err(DomainError::tenant_isolation(
                    "sale line and sale belong to different tenants",
                ));
            }
        }
        t.sale_lines.insert(line.id, line.clone());
        Ok(line)
    }

    fn delete_sale_line(&self, tenant_id: TenantId, id: SaleLineId) -> DomainResult<SaleLine> {
        let mut t = self.write()?;
        match t.sale_lines.get(&id) {
            Some(line) if line.tenant_id == tenant_id => {}
            _ => return Err(DomainError::NotFound),
        }
        t.sale_lines.remove(&id).ok_or(DomainError::NotFound)
    }

    fn purchase_line(
        &self,
        tenant_id: TenantId,
        id: PurchaseLineId,
    ) -> DomainResult<Option<PurchaseLine>> {
        let t = self.read()?;
        Ok(t.purchase_lines
            .get(&id)
            .filter(|line| t.purchase_line_tenant(line) == Some(tenant_id))
            .cloned())
    }

    fn set_received_quantity(
        &self,
        tenant_id: TenantId,
        id: PurchaseLineId,
        received: i64,
    ) -> DomainResult<(i64, PurchaseLine)> {
        let mut t = self.write()?;
        let owner = t
            .purchase_lines
            .get(&id)
            .and_then(|line| t.purchase_line_tenant(line));
        if owner != Some(tenant_id) {
            return Err(DomainError::NotFound);
        }
        let line = t.purchase_lines.get_mut(&id).ok_or(DomainError::NotFound)?;
        line.check_received(received)?;
        let previous = line.received_quantity;
        line.received_quantity = received;
        Ok((previous, line.clone()))
    }
}

impl TenantDirectory for InMemoryInventoryStore {
    fn owner_tenant(&self, owner: OwnerRef) -> DomainResult<Option<TenantId>> {
        let t = self.read()?;
        Ok(match owner {
            OwnerRef::PurchaseOrder(id) => t.purchase_orders.get(&id).map(|po| po.tenant_id),
            OwnerRef::Product(id) => t.products.get(&id).map(|p| p.tenant_id),
            OwnerRef::Supplier(id) => t.suppliers.get(&id).map(|s| s.tenant_id),
            OwnerRef::Customer(id) => t.customers.get(&id).map(|c| c.tenant_id),
        })
    }
}

macro_rules! row_source {
    ($($ty:ty => $table:ident),+ $(,)?) => {
        $(
            impl RowSource<$ty> for InMemoryInventoryStore {
                fn rows(&self) -> DomainResult<Vec<$ty>> {
                    Ok(self.read()?.$table.values().cloned().collect())
                }
            }
        )+
    };
}

row_source! {
    Product => products,
    StockAdjustment => adjustments,
    StockAlert => alerts,
    Sale => sales,
    SaleLine => sale_lines,
    PurchaseOrder => purchase_orders,
    PurchaseLine => purchase_lines,
    Supplier => suppliers,
    Customer => customers,
    SupplierPayment => supplier_payments,
    CustomerPayment => customer_payments,
    ProductVariant => variants,
}

impl RowSource<StockMovement> for InMemoryInventoryStore {
    fn rows(&self) -> DomainResult<Vec<StockMovement>> {
        Ok(self.read()?.movements.values().flatten().cloned().collect())
    }
}
