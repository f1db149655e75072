//! Alert engine: runs the alert rules against stored products and ledger
//! history, deduplicates against open alerts and fans new alerts out as
//! notifications.
//!
//! A scan without a tenant in the context walks every tenant that owns stock
//! and scans each one under its own context. Failures are isolated: a broken
//! product is counted and skipped, a broken tenant is counted and the scan
//! moves on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use stockguard_core::{AlertId, DomainError, DomainResult, ProductId, TenantContext, TenantId, UserId};
use stockguard_events::bus::EventBus;
use stockguard_events::notification::StockNotification;
use stockguard_inventory::{
    AlertDraft, AlertThresholds, AlertType, Product, SalesWindow, StockAlert, StockMovement, rules,
};

use crate::store::InventoryStore;

/// Per-tenant tallies of one scan.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ScanCounts {
    pub created: usize,
    pub deduplicated: usize,
    pub failed: usize,
}

impl ScanCounts {
    fn add(&mut self, other: ScanCounts) {
        self.created += other.created;
        self.deduplicated += other.deduplicated;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    tenants: BTreeMap<TenantId, ScanCounts>,
}

impl ScanReport {
    pub fn counts(&self, tenant_id: TenantId) -> ScanCounts {
        self.tenants.get(&tenant_id).copied().unwrap_or_default()
    }

    pub fn tenants(&self) -> impl Iterator<Item = TenantId> + '_ {
        self.tenants.keys().copied()
    }

    pub fn totals(&self) -> ScanCounts {
        let mut total = ScanCounts::default();
        for counts in self.tenants.values() {
            total.add(*counts);
        }
        total
    }

    pub fn merge(&mut self, other: ScanReport) {
        for (tenant, counts) in other.tenants {
            self.tenants.entry(tenant).or_default().add(counts);
        }
    }

    fn entry(&mut self, tenant_id: TenantId) -> &mut ScanCounts {
        self.tenants.entry(tenant_id).or_default()
    }
}

/// Told about a committed quantity change that left a product at or below
/// its reorder level.
pub trait StockWatcher: Send + Sync {
    fn quantity_changed(&self, ctx: &TenantContext, product: &Product);
}

#[derive(Debug)]
pub struct AlertEngine<S, B> {
    store: S,
    bus: B,
    thresholds: AlertThresholds,
    near_expiry_days: BTreeMap<TenantId, i64>,
}

impl<S, B> AlertEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<StockNotification>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            thresholds: AlertThresholds::default(),
            near_expiry_days: BTreeMap::new(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Near-expiry lookahead for individual tenants. Tenants without an
    /// entry use the engine-wide thresholds.
    pub fn with_tenant_near_expiry_days(mut self, windows: BTreeMap<TenantId, i64>) -> Self {
        self.near_expiry_days = windows;
        self
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    pub fn thresholds_for(&self, tenant_id: TenantId) -> AlertThresholds {
        match self.near_expiry_days.get(&tenant_id) {
            Some(days) => self.thresholds.with_near_expiry_days(*days),
            None => self.thresholds.clone(),
        }
    }

    pub fn check_low_stock(&self, ctx: &TenantContext, now: DateTime<Utc>) -> DomainResult<ScanReport> {
        self.scan(ctx, AlertType::LowStock, |scoped, counts| {
            self.scan_products(scoped, now, counts, rules::low_stock)
        })
    }

    pub fn check_expired(&self, ctx: &TenantContext, now: DateTime<Utc>) -> DomainResult<ScanReport> {
        let today = now.date_naive();
        self.scan(ctx, AlertType::Expired, |scoped, counts| {
            self.scan_products(scoped, now, counts, |p| rules::expired(p, today))
        })
    }

    pub fn check_near_expiry(&self, ctx: &TenantContext, now: DateTime<Utc>) -> DomainResult<ScanReport> {
        let today = now.date_naive();
        self.scan(ctx, AlertType::NearExpiry, |scoped, counts| {
            let thresholds = self.thresholds_for(scoped.require()?);
            self.scan_products(scoped, now, counts, |p| rules::near_expiry(p, today, &thresholds))
        })
    }

    /// Compares each product's recent sales with its mean daily sales over
    /// the baseline window. Only products sold within the recent window are
    /// considered.
    pub fn check_abnormal_reduction(
        &self,
        ctx: &TenantContext,
        now: DateTime<Utc>,
    ) -> DomainResult<ScanReport> {
        self.scan(ctx, AlertType::AbnormalReduction, |scoped, counts| {
            let tenant_id = scoped.require()?;
            let since = now - self.thresholds.baseline_window();

            let mut by_product: BTreeMap<ProductId, Vec<StockMovement>> = BTreeMap::new();
            for m in self.store.sale_movements_since(tenant_id, since)? {
                by_product.entry(m.product_id).or_default().push(m);
            }

            for (product_id, movements) in by_product {
                let window = SalesWindow::from_movements(&movements, now, &self.thresholds);
                if window.recent <= 0 {
                    continue;
                }
                let draft = match self.store.product(tenant_id, product_id) {
                    Ok(Some(product)) => rules::abnormal_reduction(&product, window, &self.thresholds),
                    Ok(None) => continue,
                    Err(e) => {
                        counts.failed += 1;
                        warn!(tenant = %tenant_id, product = %product_id, error = %e, "failed to load product for sales check");
                        continue;
                    }
                };
                self.consider(tenant_id, draft, now, counts);
            }
            Ok(())
        })
    }

    /// The four scans in order: low stock, abnormal reduction, expired, near
    /// expiry.
    pub fn run_all(&self, ctx: &TenantContext, now: DateTime<Utc>) -> DomainResult<ScanReport> {
        let mut report = self.check_low_stock(ctx, now)?;
        report.merge(self.check_abnormal_reduction(ctx, now)?);
        report.merge(self.check_expired(ctx, now)?);
        report.merge(self.check_near_expiry(ctx, now)?);

        let totals = report.totals();
        info!(
            created = totals.created,
            deduplicated = totals.deduplicated,
            failed = totals.failed,
            "stock alert scan finished"
        );
        Ok(report)
    }

    /// Low-stock check for a single product. `None` when the product is not
    /// low or an open alert already covers it.
    pub fn check_low_stock_for(
        &self,
        ctx: &TenantContext,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<StockAlert>> {
        let tenant_id = ctx.require()?;
        let product = self
            .store
            .product(tenant_id, product_id)?
            .ok_or(DomainError::NotFound)?;
        match rules::low_stock(&product) {
            Some(draft) => self.raise(tenant_id, draft, now),
            None => Ok(None),
        }
    }

    /// Resolving an already resolved alert returns it unchanged.
    pub fn resolve(
        &self,
        ctx: &TenantContext,
        alert_id: AlertId,
        resolved_by: Option<UserId>,
    ) -> DomainResult<StockAlert> {
        let tenant_id = ctx.require()?;
        let alert = self
            .store
            .resolve_alert(tenant_id, alert_id, resolved_by, Utc::now())?;
        info!(tenant = %tenant_id, alert = %alert.id, alert_type = alert.alert_type.as_str(), "stock alert resolved");
        Ok(alert)
    }

    pub fn open_alerts(&self, ctx: &TenantContext) -> DomainResult<Vec<StockAlert>> {
        let tenant_id = ctx.require()?;
        Ok(self
            .store
            .alerts(tenant_id)?
            .into_iter()
            .filter(StockAlert::is_open)
            .collect())
    }

    pub fn alerts_for(&self, ctx: &TenantContext, product_id: ProductId) -> DomainResult<Vec<StockAlert>> {
        let tenant_id = ctx.require()?;
        Ok(self
            .store
            .alerts(tenant_id)?
            .into_iter()
            .filter(|a| a.product_id == product_id)
            .collect())
    }

    fn scan<F>(&self, ctx: &TenantContext, alert_type: AlertType, mut per_tenant: F) -> DomainResult<ScanReport>
    where
        F: FnMut(&TenantContext, &mut ScanCounts) -> DomainResult<()>,
    {
        let tenants = match ctx.current() {
            Some(tenant_id) => vec![tenant_id],
            None => self.store.tenants_with_stock()?,
        };

        let mut report = ScanReport::default();
        for tenant_id in tenants {
            let scoped = TenantContext::for_tenant(tenant_id);
            let counts = report.entry(tenant_id);
            if let Err(e) = per_tenant(&scoped, counts) {
                counts.failed += 1;
                warn!(
                    tenant = %tenant_id,
                    alert_type = alert_type.as_str(),
                    error = %e,
                    "alert scan failed for tenant"
                );
            }
        }
        Ok(report)
    }

    fn scan_products<R>(
        &self,
        ctx: &TenantContext,
        now: DateTime<Utc>,
        counts: &mut ScanCounts,
        rule: R,
    ) -> DomainResult<()>
    where
        R: Fn(&Product) -> Option<AlertDraft>,
    {
        let tenant_id = ctx.require()?;
        for product in self.store.products(tenant_id)? {
            self.consider(tenant_id, rule(&product), now, counts);
        }
        Ok(())
    }

    fn consider(
        &self,
        tenant_id: TenantId,
        draft: Option<AlertDraft>,
        now: DateTime<Utc>,
        counts: &mut ScanCounts,
    ) {
        let Some(draft) = draft else {
            return;
        };
        let product_id = draft.product_id;
        match self.raise(tenant_id, draft, now) {
            Ok(Some(_)) => counts.created += 1,
            Ok(None) => counts.deduplicated += 1,
            Err(e) => {
                counts.failed += 1;
                warn!(tenant = %tenant_id, product = %product_id, error = %e, "failed to raise stock alert");
            }
        }
    }

    fn raise(
        &self,
        tenant_id: TenantId,
        draft: AlertDraft,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<StockAlert>> {
        if self
            .store
            .open_alert(tenant_id, draft.product_id, draft.alert_type)?
            .is_some()
        {
            debug!(tenant = %tenant_id, product = %draft.product_id, alert_type = draft.alert_type.as_str(), "open alert exists");
            return Ok(None);
        }

        let alert = match self.store.insert_alert(StockAlert::raise(tenant_id, draft, now)) {
            Ok(alert) => alert,
            // Lost a race against a concurrent scan.
            Err(DomainError::StorageConflict(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        info!(
            tenant = %tenant_id,
            product = %alert.product_id,
            alert_type = alert.alert_type.as_str(),
            severity = alert.severity.as_str(),
            "stock alert raised"
        );
        if let Err(e) = self.bus.publish(alert.notification()) {
            warn!(tenant = %tenant_id, alert = %alert.id, error = ?e, "failed to publish stock notification");
        }
        Ok(Some(alert))
    }
}

impl<S, B> StockWatcher for AlertEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<StockNotification>,
{
    fn quantity_changed(&self, ctx: &TenantContext, product: &Product) {
        if let Err(e) = self.check_low_stock_for(ctx, product.id, Utc::now()) {
            warn!(product = %product.id, error = %e, "low stock check failed");
        }
    }
}
