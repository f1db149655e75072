//! Postgres-backed inventory store.
//!
//! Schema: `migrations/0001_stock.sql`. Every query filters on `tenant_id`
//! (purchase lines join through their purchase order).
//!
//! ## Locking
//!
//! Stock-changing calls open a transaction, set a local `lock_timeout`, and
//! take `SELECT ... FOR UPDATE` on the product row before planning the
//! movement. Concurrent writers to the same product therefore serialize; a
//! writer that cannot get the lock in time fails with `Transient`.
//!
//! ## Error mapping
//!
//! | Postgres code | Meaning | DomainError |
//! |---------------|---------|-------------|
//! | `23505` | unique violation | `StorageConflict` |
//! | `40001` | serialization failure | `Transient` |
//! | `40P01` | deadlock detected | `Transient` |
//! | `55P03` | lock not available | `Transient` |
//! | other / non-database | | `Storage` |
//!
//! ## Runtime
//!
//! The [`InventoryStore`] trait is synchronous. The trait impl drives the async
//! methods depending on where it is called from:
//!
//! - inside a multi-threaded tokio runtime: `block_in_place` + `Handle::block_on`;
//! - outside any runtime (e.g. the alert scan thread): `block_on` on the
//!   multi-threaded runtime the store was created in, or the one given to
//!   [`PostgresInventoryStore::with_runtime`];
//! - inside a current-thread runtime: `Configuration` error, since blocking
//!   there would stall the only worker.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, instrument};
use uuid::Uuid;

use stockguard_core::{
    AdjustmentId, AlertId, BranchId, DomainError, DomainResult, MovementId, ProductId,
    PurchaseLineId, PurchaseOrderId, SaleId, SaleLineId, SupplierId, TenantId, UserId,
};
use stockguard_inventory::{
    AdjustmentReason, AdjustmentStatus, AlertType, Direction, MovementReference, MovementRequest,
    MovementType, OwnerRef, Product, PurchaseLine, PurchaseOrder, SaleLine, Severity,
    StockAdjustment, StockAlert, StockMovement,
};

use super::{InventoryStore, RowSource, TenantDirectory};

const MIGRATION: &str = include_str!("../../migrations/0001_stock.sql");

const PRODUCT_COLUMNS: &str = "id, tenant_id, branch_id, name, sku, unit_symbol, \
    initial_quantity, quantity, reorder_level, expiry_date, cost_price, selling_price, \
    is_active, created_at";

const MOVEMENT_COLUMNS: &str = "id, tenant_id, product_id, movement_type, direction, quantity, \
    previous_quantity, new_quantity, reference_kind, reference_id, created_by, created_at, sequence";

const ADJUSTMENT_COLUMNS: &str = "id, tenant_id, product_id, direction, quantity, reason, \
    description, requested_by, requested_at, status, decided_by, decided_at, decision_notes";

const ALERT_COLUMNS: &str = "id, tenant_id, product_id, alert_type, severity, title, message, \
    current_stock, previous_stock, threshold, is_resolved, resolved_by, resolved_at, created_at";

const SALE_LINE_COLUMNS: &str = "id, tenant_id, sale_id, product_id, quantity, unit_price";

const PURCHASE_LINE_COLUMNS: &str = "pl.id, pl.purchase_order_id, pl.product_id, \
    pl.ordered_quantity, pl.received_quantity, pl.unit_cost";

#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
    lock_timeout_ms: u64,
    runtime: Option<Handle>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout_ms: 5_000,
            runtime: Handle::try_current()
                .ok()
                .filter(|h| h.runtime_flavor() == RuntimeFlavor::MultiThread),
        }
    }

    /// Runtime used for calls made from threads outside any tokio runtime.
    /// Must be multi-threaded: a current-thread runtime's IO is only driven
    /// by its own `block_on`.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub async fn connect(database_url: &str) -> DomainResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn with_lock_timeout_ms(mut self, lock_timeout_ms: u64) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self
    }

    /// Apply the schema (idempotent).
    pub async fn migrate(&self) -> DomainResult<()> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin_locked(&self) -> DomainResult<Transaction<'static, Postgres>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        // SET does not take bind parameters.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        Ok(tx)
    }

    fn block<F, T>(&self, fut: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| current.block_on(fut))
            }
            Ok(_) => Err(DomainError::configuration(
                "PostgresInventoryStore cannot block inside a current-thread tokio runtime; \
                 use the async methods or a multi-threaded runtime",
            )),
            Err(_) => match &self.runtime {
                Some(handle) => handle.block_on(fut),
                None => Err(DomainError::configuration(
                    "PostgresInventoryStore has no tokio runtime; create it inside a \
                     multi-threaded runtime or set one with with_runtime",
                )),
            },
        }
    }

    #[instrument(skip(self))]
    pub async fn fetch_tenants_with_stock(&self) -> DomainResult<Vec<TenantId>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id FROM products
            UNION
            SELECT tenant_id FROM stock_movements
            ORDER BY tenant_id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("tenants_with_stock", e))?;

        rows.iter()
            .map(|row| col::<Uuid>(row, "tenant_id").map(TenantId::from_uuid))
            .collect()
    }

    #[instrument(skip(self, product), fields(tenant_id = %product.tenant_id, product_id = %product.id), err)]
    pub async fn create_product(&self, product: Product) -> DomainResult<Product> {
        product.validate()?;
        sqlx::query(
            r#"
            INSERT INTO products (
                id, tenant_id, branch_id, name, sku, unit_symbol, initial_quantity, quantity,
                reorder_level, expiry_date, cost_price, selling_price, is_active, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(product.tenant_id.as_uuid())
        .bind(product.branch_id.map(|b| *b.as_uuid()))
        .bind(&product.name)
        .bind(&product.sku)
        .bind(&product.unit_symbol)
        .bind(product.initial_quantity)
        .bind(product.quantity())
        .bind(product.reorder_level)
        .bind(product.expiry_date)
        .bind(product.cost_price)
        .bind(product.selling_price)
        .bind(product.is_active)
        .bind(product.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(product)
    }

    #[instrument(skip(self, product), fields(tenant_id = %tenant_id, product_id = %product.id), err)]
    pub async fn save_catalog(&self, tenant_id: TenantId, product: Product) -> DomainResult<Product> {
        product.validate()?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE products SET
                branch_id = $3, name = $4, sku = $5, unit_symbol = $6, reorder_level = $7,
                expiry_date = $8, cost_price = $9, selling_price = $10, is_active = $11
            WHERE id = $1 AND tenant_id = $2
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(product.id.as_uuid())
        .bind(tenant_id.as_uuid())
        .bind(product.branch_id.map(|b| *b.as_uuid()))
        .bind(&product.name)
        .bind(&product.sku)
        .bind(&product.unit_symbol)
        .bind(product.reorder_level)
        .bind(product.expiry_date)
        .bind(product.cost_price)
        .bind(product.selling_price)
        .bind(product.is_active)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_catalog", e))?
        .ok_or(DomainError::NotFound)?;
        decode_product(&row)
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_product(
        &self,
        tenant_id: TenantId,
        id: ProductId,
    ) -> DomainResult<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id.as_uuid())
        .bind(tenant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product", e))?;
        row.as_ref().map(decode_product).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_products(&self, tenant_id: Option<TenantId>) -> DomainResult<Vec<Product>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE ($1::uuid IS NULL OR tenant_id = $1) ORDER BY id"
        ))
        .bind(tenant_id.map(|t| *t.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("products", e))?;
        rows.iter().map(decode_product).collect()
    }

    #[instrument(
        skip(self, request),
        fields(tenant_id = %tenant_id, product_id = %request.product_id, quantity = request.quantity),
        err
    )]
    pub async fn append_movement(
        &self,
        tenant_id: TenantId,
        request: &MovementRequest,
    ) -> DomainResult<(StockMovement, Product)> {
        let mut tx = self.begin_locked().await?;
        let planned = plan_locked(&mut tx, tenant_id, request).await?;
        let (movement, product) = planned;
        write_movement(&mut tx, &movement).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        debug!(sequence = movement.sequence, new_quantity = movement.new_quantity, "movement committed");
        Ok((movement, product))
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_movements(
        &self,
        tenant_id: TenantId,
        product_id: Option<ProductId>,
    ) -> DomainResult<Vec<StockMovement>> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE tenant_id = $1 AND ($2::uuid IS NULL OR product_id = $2) \
             ORDER BY product_id, sequence"
        ))
        .bind(tenant_id.as_uuid())
        .bind(product_id.map(|p| *p.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("movements", e))?;
        rows.iter().map(decode_movement).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_sale_movements_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<StockMovement>> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE tenant_id = $1 AND movement_type = 'sale' AND created_at >= $2 \
             ORDER BY product_id, sequence"
        ))
        .bind(tenant_id.as_uuid())
        .bind(since)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sale_movements_since", e))?;
        rows.iter().map(decode_movement).collect()
    }

    #[instrument(skip(self, adjustment), fields(tenant_id = %adjustment.tenant_id, adjustment_id = %adjustment.id), err)]
    pub async fn create_adjustment(&self, adjustment: StockAdjustment) -> DomainResult<StockAdjustment> {
        sqlx::query(
            r#"
            INSERT INTO stock_adjustments (
                id, tenant_id, product_id, direction, quantity, reason, description,
                requested_by, requested_at, status, decided_by, decided_at, decision_notes
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
            WHERE EXISTS (SELECT 1 FROM products WHERE id = $3 AND tenant_id = $2)
            "#,
        )
        .bind(adjustment.id.as_uuid())
        .bind(adjustment.tenant_id.as_uuid())
        .bind(adjustment.product_id.as_uuid())
        .bind(adjustment.direction.as_str())
        .bind(adjustment.quantity)
        .bind(adjustment.reason.as_str())
        .bind(&adjustment.description)
        .bind(adjustment.requested_by.as_uuid())
        .bind(adjustment.requested_at)
        .bind(adjustment.status.as_str())
        .bind(adjustment.decided_by.map(|u| *u.as_uuid()))
        .bind(adjustment.decided_at)
        .bind(&adjustment.decision_notes)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_adjustment", e))
        .and_then(|done| {
            if done.rows_affected() == 0 {
                Err(DomainError::NotFound)
            } else {
                Ok(())
            }
        })?;
        Ok(adjustment)
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_adjustments(
        &self,
        tenant_id: Option<TenantId>,
        id: Option<AdjustmentId>,
    ) -> DomainResult<Vec<StockAdjustment>> {
        let rows = sqlx::query(&format!(
            "SELECT {ADJUSTMENT_COLUMNS} FROM stock_adjustments \
             WHERE ($1::uuid IS NULL OR tenant_id = $1) AND ($2::uuid IS NULL OR id = $2) \
             ORDER BY id"
        ))
        .bind(tenant_id.map(|t| *t.as_uuid()))
        .bind(id.map(|a| *a.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("adjustments", e))?;
        rows.iter().map(decode_adjustment).collect()
    }

    #[instrument(
        skip(self, decided, movement),
        fields(tenant_id = %decided.tenant_id, adjustment_id = %decided.id, status = decided.status.as_str()),
        err
    )]
    pub async fn save_decision(
        &self,
        decided: &StockAdjustment,
        movement: Option<&MovementRequest>,
    ) -> DomainResult<Option<StockMovement>> {
        let mut tx = self.begin_locked().await?;

        let status = sqlx::query(
            "SELECT status FROM stock_adjustments WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
        )
        .bind(decided.id.as_uuid())
        .bind(decided.tenant_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_adjustment", e))?
        .ok_or(DomainError::NotFound)?;
        let status = AdjustmentStatus::parse(&col::<String>(&status, "status")?)?;
        if status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "adjustment {} is already {}",
                decided.id,
                status.as_str()
            )));
        }

        let committed = match movement {
            Some(request) => {
                let (m, _) = plan_locked(&mut tx, decided.tenant_id, request).await?;
                write_movement(&mut tx, &m).await?;
                Some(m)
            }
            None => None,
        };

        sqlx::query(
            r#"
            UPDATE stock_adjustments
            SET status = $3, decided_by = $4, decided_at = $5, decision_notes = $6
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(decided.id.as_uuid())
        .bind(decided.tenant_id.as_uuid())
        .bind(decided.status.as_str())
        .bind(decided.decided_by.map(|u| *u.as_uuid()))
        .bind(decided.decided_at)
        .bind(&decided.decision_notes)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_adjustment", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(committed)
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_alerts(
        &self,
        tenant_id: Option<TenantId>,
        id: Option<AlertId>,
    ) -> DomainResult<Vec<StockAlert>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM stock_alerts \
             WHERE ($1::uuid IS NULL OR tenant_id = $1) AND ($2::uuid IS NULL OR id = $2) \
             ORDER BY id"
        ))
        .bind(tenant_id.map(|t| *t.as_uuid()))
        .bind(id.map(|a| *a.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("alerts", e))?;
        rows.iter().map(decode_alert).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_open_alert(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        alert_type: AlertType,
    ) -> DomainResult<Option<StockAlert>> {
        let row = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM stock_alerts \
             WHERE tenant_id = $1 AND product_id = $2 AND alert_type = $3 AND NOT is_resolved"
        ))
        .bind(tenant_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(alert_type.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("open_alert", e))?;
        row.as_ref().map(decode_alert).transpose()
    }

    /// The partial unique index on open alerts turns a racing duplicate into
    /// `StorageConflict`.
    #[instrument(skip(self, alert), fields(tenant_id = %alert.tenant_id, product_id = %alert.product_id, alert_type = alert.alert_type.as_str()), err)]
    pub async fn create_alert(&self, alert: StockAlert) -> DomainResult<StockAlert> {
        sqlx::query(
            r#"
            INSERT INTO stock_alerts (
                id, tenant_id, product_id, alert_type, severity, title, message, current_stock,
                previous_stock, threshold, is_resolved, resolved_by, resolved_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(alert.id.as_uuid())
        .bind(alert.tenant_id.as_uuid())
        .bind(alert.product_id.as_uuid())
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(alert.current_stock)
        .bind(alert.previous_stock)
        .bind(alert.threshold)
        .bind(alert.is_resolved)
        .bind(alert.resolved_by.map(|u| *u.as_uuid()))
        .bind(alert.resolved_at)
        .bind(alert.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_alert", e))?;
        Ok(alert)
    }

    /// `COALESCE` keeps the first resolver and timestamp on repeat calls.
    #[instrument(skip(self), err)]
    pub async fn mark_alert_resolved(
        &self,
        tenant_id: TenantId,
        id: AlertId,
        resolved_by: Option<UserId>,
        resolved_at: DateTime<Utc>,
    ) -> DomainResult<StockAlert> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE stock_alerts SET
                resolved_by = CASE WHEN is_resolved THEN resolved_by ELSE $3 END,
                resolved_at = COALESCE(resolved_at, $4),
                is_resolved = TRUE
            WHERE id = $1 AND tenant_id = $2
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(tenant_id.as_uuid())
        .bind(resolved_by.map(|u| *u.as_uuid()))
        .bind(resolved_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("resolve_alert", e))?
        .ok_or(DomainError::NotFound)?;
        decode_alert(&row)
    }

    #[instrument(skip(self, line), fields(tenant_id = %line.tenant_id, sale_line_id = %line.id), err)]
    pub async fn create_sale_line(&self, line: SaleLine) -> DomainResult<SaleLine> {
        line.validate()?;
        let done = sqlx::query(
            r#"
            INSERT INTO sale_lines (id, tenant_id, sale_id, product_id, quantity, unit_price)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE EXISTS (SELECT 1 FROM products WHERE id = $4 AND tenant_id = $2)
            "#,
        )
        .bind(line.id.as_uuid())
        .bind(line.tenant_id.as_uuid())
        .bind(line.sale_id.as_uuid())
        .bind(line.product_id.as_uuid())
        .bind(line.quantity)
        .bind(line.unit_price)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_sale_line", e))?;
        if done.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(line)
    }

    #[instrument(skip(self), err)]
    pub async fn remove_sale_line(&self, tenant_id: TenantId, id: SaleLineId) -> DomainResult<SaleLine> {
        let row = sqlx::query(&format!(
            "DELETE FROM sale_lines WHERE id = $1 AND tenant_id = $2 RETURNING {SALE_LINE_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(tenant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_sale_line", e))?
        .ok_or(DomainError::NotFound)?;
        decode_sale_line(&row)
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_sale_lines(&self, tenant_id: Option<TenantId>) -> DomainResult<Vec<SaleLine>> {
        let rows = sqlx::query(&format!(
            "SELECT {SALE_LINE_COLUMNS} FROM sale_lines \
             WHERE ($1::uuid IS NULL OR tenant_id = $1) ORDER BY id"
        ))
        .bind(tenant_id.map(|t| *t.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sale_lines", e))?;
        rows.iter().map(decode_sale_line).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_purchase_orders(
        &self,
        tenant_id: Option<TenantId>,
    ) -> DomainResult<Vec<PurchaseOrder>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, supplier_id, created_at FROM purchase_orders \
             WHERE ($1::uuid IS NULL OR tenant_id = $1) ORDER BY id",
        )
        .bind(tenant_id.map(|t| *t.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purchase_orders", e))?;
        rows.iter().map(decode_purchase_order).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_purchase_lines(
        &self,
        tenant_id: Option<TenantId>,
        id: Option<PurchaseLineId>,
    ) -> DomainResult<Vec<PurchaseLine>> {
        let rows = sqlx::query(&format!(
            "SELECT {PURCHASE_LINE_COLUMNS} FROM purchase_lines pl \
             JOIN purchase_orders po ON po.id = pl.purchase_order_id \
             WHERE ($1::uuid IS NULL OR po.tenant_id = $1) AND ($2::uuid IS NULL OR pl.id = $2) \
             ORDER BY pl.id"
        ))
        .bind(tenant_id.map(|t| *t.as_uuid()))
        .bind(id.map(|l| *l.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purchase_lines", e))?;
        rows.iter().map(decode_purchase_line).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn update_received_quantity(
        &self,
        tenant_id: TenantId,
        id: PurchaseLineId,
        received: i64,
    ) -> DomainResult<(i64, PurchaseLine)> {
        let mut tx = self.begin_locked().await?;
        let row = sqlx::query(&format!(
            "SELECT {PURCHASE_LINE_COLUMNS} FROM purchase_lines pl \
             JOIN purchase_orders po ON po.id = pl.purchase_order_id \
             WHERE pl.id = $1 AND po.tenant_id = $2 \
             FOR UPDATE OF pl"
        ))
        .bind(id.as_uuid())
        .bind(tenant_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_purchase_line", e))?
        .ok_or(DomainError::NotFound)?;
        let mut line = decode_purchase_line(&row)?;
        line.check_received(received)?;
        let previous = line.received_quantity;

        sqlx::query("UPDATE purchase_lines SET received_quantity = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(received)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_received_quantity", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        line.received_quantity = received;
        Ok((previous, line))
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_owner_tenant(&self, owner: OwnerRef) -> DomainResult<Option<TenantId>> {
        let (sql, id) = match owner {
            OwnerRef::PurchaseOrder(id) => {
                ("SELECT tenant_id FROM purchase_orders WHERE id = $1", *id.as_uuid())
            }
            OwnerRef::Product(id) => ("SELECT tenant_id FROM products WHERE id = $1", *id.as_uuid()),
            // Suppliers and customers live in the parties schema.
            OwnerRef::Supplier(_) | OwnerRef::Customer(_) => return Ok(None),
        };
        let row = sqlx::query(sql)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("owner_tenant", e))?;
        row.map(|r| col::<Uuid>(&r, "tenant_id").map(TenantId::from_uuid))
            .transpose()
    }
}

/// Lock the product row and plan `request` against it.
async fn plan_locked(
    tx: &mut Transaction<'static, Postgres>,
    tenant_id: TenantId,
    request: &MovementRequest,
) -> DomainResult<(StockMovement, Product)> {
    let row = sqlx::query(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND tenant_id = $2 FOR UPDATE"
    ))
    .bind(request.product_id.as_uuid())
    .bind(tenant_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_product", e))?
    .ok_or(DomainError::NotFound)?;
    let product = decode_product(&row)?;

    let last = sqlx::query(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
         WHERE product_id = $1 ORDER BY sequence DESC LIMIT 1"
    ))
    .bind(request.product_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("last_movement", e))?;
    let last = last.as_ref().map(decode_movement).transpose()?;

    let movement = request.plan(tenant_id, &product, last.as_ref())?;
    let mut updated = product;
    updated.apply(&movement)?;
    Ok((movement, updated))
}

async fn write_movement(
    tx: &mut Transaction<'static, Postgres>,
    movement: &StockMovement,
) -> DomainResult<()> {
    let (reference_kind, reference_id) = match movement.reference.as_ref().map(|r| r.to_parts()) {
        Some((kind, id)) => (Some(kind), Some(id)),
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, tenant_id, product_id, movement_type, direction, quantity, previous_quantity,
            new_quantity, reference_kind, reference_id, created_by, created_at, sequence
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(movement.id.as_uuid())
    .bind(movement.tenant_id.as_uuid())
    .bind(movement.product_id.as_uuid())
    .bind(movement.movement_type.as_str())
    .bind(movement.direction.as_str())
    .bind(movement.quantity)
    .bind(movement.previous_quantity)
    .bind(movement.new_quantity)
    .bind(reference_kind)
    .bind(reference_id)
    .bind(movement.created_by.map(|u| *u.as_uuid()))
    .bind(movement.created_at)
    .bind(movement.sequence as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;

    sqlx::query("UPDATE products SET quantity = $3 WHERE id = $1 AND tenant_id = $2")
        .bind(movement.product_id.as_uuid())
        .bind(movement.tenant_id.as_uuid())
        .bind(movement.new_quantity)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_quantity", e))?;
    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => DomainError::StorageConflict(msg),
                Some("40001") | Some("40P01") | Some("55P03") => DomainError::Transient(msg),
                _ => DomainError::Storage(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            DomainError::Transient(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            DomainError::Storage(format!("connection pool closed in {}", operation))
        }
        other => DomainError::Storage(format!("sqlx error in {}: {}", operation, other)),
    }
}

// Row decoding

fn col<'r, T>(row: &'r PgRow, name: &str) -> DomainResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| DomainError::storage(format!("failed to decode column {name}: {e}")))
}

fn decode_product(row: &PgRow) -> DomainResult<Product> {
    let mut product = Product::new(
        TenantId::from_uuid(col(row, "tenant_id")?),
        col::<String>(row, "name")?,
        col::<String>(row, "sku")?,
        col(row, "initial_quantity")?,
        col(row, "reorder_level")?,
    )
    .with_id(ProductId::from_uuid(col(row, "id")?))
    .with_stored_quantity(col(row, "quantity")?);

    product.branch_id = col::<Option<Uuid>>(row, "branch_id")?.map(BranchId::from_uuid);
    product.unit_symbol = col(row, "unit_symbol")?;
    product.expiry_date = col::<Option<NaiveDate>>(row, "expiry_date")?;
    product.cost_price = col(row, "cost_price")?;
    product.selling_price = col(row, "selling_price")?;
    product.is_active = col(row, "is_active")?;
    product.created_at = col(row, "created_at")?;
    Ok(product)
}

fn decode_movement(row: &PgRow) -> DomainResult<StockMovement> {
    let reference = match (
        col::<Option<String>>(row, "reference_kind")?,
        col::<Option<Uuid>>(row, "reference_id")?,
    ) {
        (Some(kind), Some(id)) => Some(MovementReference::from_parts(&kind, id)?),
        _ => None,
    };

    Ok(StockMovement {
        id: MovementId::from_uuid(col(row, "id")?),
        tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        movement_type: MovementType::parse(&col::<String>(row, "movement_type")?)?,
        direction: Direction::parse(&col::<String>(row, "direction")?)?,
        quantity: col(row, "quantity")?,
        previous_quantity: col(row, "previous_quantity")?,
        new_quantity: col(row, "new_quantity")?,
        reference,
        created_by: col::<Option<Uuid>>(row, "created_by")?.map(UserId::from_uuid),
        created_at: col(row, "created_at")?,
        sequence: col::<i64>(row, "sequence")? as u64,
    })
}

fn decode_adjustment(row: &PgRow) -> DomainResult<StockAdjustment> {
    Ok(StockAdjustment {
        id: AdjustmentId::from_uuid(col(row, "id")?),
        tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        direction: Direction::parse(&col::<String>(row, "direction")?)?,
        quantity: col(row, "quantity")?,
        reason: AdjustmentReason::parse(&col::<String>(row, "reason")?)?,
        description: col(row, "description")?,
        requested_by: UserId::from_uuid(col(row, "requested_by")?),
        requested_at: col(row, "requested_at")?,
        status: AdjustmentStatus::parse(&col::<String>(row, "status")?)?,
        decided_by: col::<Option<Uuid>>(row, "decided_by")?.map(UserId::from_uuid),
        decided_at: col(row, "decided_at")?,
        decision_notes: col(row, "decision_notes")?,
    })
}

fn decode_alert(row: &PgRow) -> DomainResult<StockAlert> {
    Ok(StockAlert {
        id: AlertId::from_uuid(col(row, "id")?),
        tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        alert_type: AlertType::parse(&col::<String>(row, "alert_type")?)?,
        severity: Severity::parse(&col::<String>(row, "severity")?)?,
        title: col(row, "title")?,
        message: col(row, "message")?,
        current_stock: col(row, "current_stock")?,
        previous_stock: col(row, "previous_stock")?,
        threshold: col(row, "threshold")?,
        is_resolved: col(row, "is_resolved")?,
        resolved_by: col::<Option<Uuid>>(row, "resolved_by")?.map(UserId::from_uuid),
        resolved_at: col(row, "resolved_at")?,
        created_at: col(row, "created_at")?,
    })
}

fn decode_sale_line(row: &PgRow) -> DomainResult<SaleLine> {
    Ok(SaleLine {
        id: SaleLineId::from_uuid(col(row, "id")?),
        tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
        sale_id: SaleId::from_uuid(col(row, "sale_id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        quantity: col(row, "quantity")?,
        unit_price: col(row, "unit_price")?,
    })
}

fn decode_purchase_order(row: &PgRow) -> DomainResult<PurchaseOrder> {
    Ok(PurchaseOrder {
        id: PurchaseOrderId::from_uuid(col(row, "id")?),
        tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
        supplier_id: SupplierId::from_uuid(col(row, "supplier_id")?),
        created_at: col(row, "created_at")?,
    })
}

fn decode_purchase_line(row: &PgRow) -> DomainResult<PurchaseLine> {
    Ok(PurchaseLine {
        id: PurchaseLineId::from_uuid(col(row, "id")?),
        purchase_order_id: PurchaseOrderId::from_uuid(col(row, "purchase_order_id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        ordered_quantity: col(row, "ordered_quantity")?,
        received_quantity: col(row, "received_quantity")?,
        unit_cost: col(row, "unit_cost")?,
    })
}

impl InventoryStore for PostgresInventoryStore {
    fn tenants_with_stock(&self) -> DomainResult<Vec<TenantId>> {
        self.block(self.fetch_tenants_with_stock())
    }

    fn insert_product(&self, product: Product) -> DomainResult<Product> {
        self.block(self.create_product(product))
    }

    fn update_catalog(&self, tenant_id: TenantId, product: Product) -> DomainResult<Product> {
        self.block(self.save_catalog(tenant_id, product))
    }

    fn product(&self, tenant_id: TenantId, id: ProductId) -> DomainResult<Option<Product>> {
        self.block(self.fetch_product(tenant_id, id))
    }

    fn products(&self, tenant_id: TenantId) -> DomainResult<Vec<Product>> {
        self.block(self.fetch_products(Some(tenant_id)))
    }

    fn record_movement(
        &self,
        tenant_id: TenantId,
        request: &MovementRequest,
    ) -> DomainResult<(StockMovement, Product)> {
        self.block(self.append_movement(tenant_id, request))
    }

    fn movements(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> DomainResult<Vec<StockMovement>> {
        self.block(self.fetch_movements(tenant_id, Some(product_id)))
    }

    fn sale_movements_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<StockMovement>> {
        self.block(self.fetch_sale_movements_since(tenant_id, since))
    }

    fn insert_adjustment(&self, adjustment: StockAdjustment) -> DomainResult<StockAdjustment> {
        self.block(self.create_adjustment(adjustment))
    }

    fn adjustment(
        &self,
        tenant_id: TenantId,
        id: AdjustmentId,
    ) -> DomainResult<Option<StockAdjustment>> {
        let mut rows = self.block(self.fetch_adjustments(Some(tenant_id), Some(id)))?;
        Ok(rows.pop())
    }

    fn adjustments(&self, tenant_id: TenantId) -> DomainResult<Vec<StockAdjustment>> {
        self.block(self.fetch_adjustments(Some(tenant_id), None))
    }

    fn commit_decision(
        &self,
        decided: &StockAdjustment,
        movement: Option<&MovementRequest>,
    ) -> DomainResult<Option<StockMovement>> {
        self.block(self.save_decision(decided, movement))
    }

    fn open_alert(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        alert_type: AlertType,
    ) -> DomainResult<Option<StockAlert>> {
        self.block(self.fetch_open_alert(tenant_id, product_id, alert_type))
    }

    fn insert_alert(&self, alert: StockAlert) -> DomainResult<StockAlert> {
        self.block(self.create_alert(alert))
    }

    fn alert(&self, tenant_id: TenantId, id: AlertId) -> DomainResult<Option<StockAlert>> {
        let mut rows = self.block(self.fetch_alerts(Some(tenant_id), Some(id)))?;
        Ok(rows.pop())
    }

    fn alerts(&self, tenant_id: TenantId) -> DomainResult<Vec<StockAlert>> {
        self.block(self.fetch_alerts(Some(tenant_id), None))
    }

    fn resolve_alert(
        &self,
        tenant_id: TenantId,
        id: AlertId,
        resolved_by: Option<UserId>,
        resolved_at: DateTime<Utc>,
    ) -> DomainResult<StockAlert> {
        self.block(self.mark_alert_resolved(tenant_id, id, resolved_by, resolved_at))
    }

    fn insert_sale_line(&self, line: SaleLine) -> DomainResult<SaleLine> {
        self.block(self.create_sale_line(line))
    }

    fn delete_sale_line(&self, tenant_id: TenantId, id: SaleLineId) -> DomainResult<SaleLine> {
        self.block(self.remove_sale_line(tenant_id, id))
    }

    fn purchase_line(
        &self,
        tenant_id: TenantId,
        id: PurchaseLineId,
    ) -> DomainResult<Option<PurchaseLine>> {
        let mut rows = self.block(self.fetch_purchase_lines(Some(tenant_id), Some(id)))?;
        Ok(rows.pop())
    }

    fn set_received_quantity(
        &self,
        tenant_id: TenantId,
        id: PurchaseLineId,
        received: i64,
    ) -> DomainResult<(i64, PurchaseLine)> {
        self.block(self.update_received_quantity(tenant_id, id, received))
    }
}

impl TenantDirectory for PostgresInventoryStore {
    fn owner_tenant(&self, owner: OwnerRef) -> DomainResult<Option<TenantId>> {
        self.block(self.fetch_owner_tenant(owner))
    }
}

impl RowSource<Product> for PostgresInventoryStore {
    fn rows(&self) -> DomainResult<Vec<Product>> {
        self.block(self.fetch_products(None))
    }

    fn rows_owned_by(&self, tenant_id: TenantId) -> DomainResult<Vec<Product>> {
        self.block(self.fetch_products(Some(tenant_id)))
    }
}

impl RowSource<StockMovement> for PostgresInventoryStore {
    fn rows(&self) -> DomainResult<Vec<StockMovement>> {
        let mut all = Vec::new();
        for tenant_id in self.tenants_with_stock()? {
            all.extend(self.block(self.fetch_movements(tenant_id, None))?);
        }
        Ok(all)
    }

    fn rows_owned_by(&self, tenant_id: TenantId) -> DomainResult<Vec<StockMovement>> {
        self.block(self.fetch_movements(tenant_id, None))
    }
}

impl RowSource<StockAdjustment> for PostgresInventoryStore {
    fn rows(&self) -> DomainResult<Vec<StockAdjustment>> {
        self.block(self.fetch_adjustments(None, None))
    }

    fn rows_owned_by(&self, tenant_id: TenantId) -> DomainResult<Vec<StockAdjustment>> {
        self.block(self.fetch_adjustments(Some(tenant_id), None))
    }
}

impl RowSource<StockAlert> for PostgresInventoryStore {
    fn rows(&self) -> DomainResult<Vec<StockAlert>> {
        self.block(self.fetch_alerts(None, None))
    }

    fn rows_owned_by(&self, tenant_id: TenantId) -> DomainResult<Vec<StockAlert>> {
        self.block(self.fetch_alerts(Some(tenant_id), None))
    }
}

impl RowSource<SaleLine> for PostgresInventoryStore {
    fn rows(&self) -> DomainResult<Vec<SaleLine>> {
        self.block(self.fetch_sale_lines(None))
    }

    fn rows_owned_by(&self, tenant_id: TenantId) -> DomainResult<Vec<SaleLine>> {
        self.block(self.fetch_sale_lines(Some(tenant_id)))
    }
}

impl RowSource<PurchaseOrder> for PostgresInventoryStore {
    fn rows(&self) -> DomainResult<Vec<PurchaseOrder>> {
        self.block(self.fetch_purchase_orders(None))
    }

    fn rows_owned_by(&self, tenant_id: TenantId) -> DomainResult<Vec<PurchaseOrder>> {
        self.block(self.fetch_purchase_orders(Some(tenant_id)))
    }
}

impl RowSource<PurchaseLine> for PostgresInventoryStore {
    fn rows(&self) -> DomainResult<Vec<PurchaseLine>> {
        self.block(self.fetch_purchase_lines(None, None))
    }

    fn rows_owned_by(&self, tenant_id: TenantId) -> DomainResult<Vec<PurchaseLine>> {
        self.block(self.fetch_purchase_lines(Some(tenant_id), None))
    }
}
