//! # Sale Repository
//!
//! Atomic sale commit against an open register.
//!
//! ## Commit Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  commit(ctx, request)                                                   │
//! │                                                                         │
//! │  validate_sale_request ── fail ──► Validation / PaymentTotalMismatch    │
//! │       │                            (nothing written)                    │
//! │       ▼                                                                 │
//! │  BEGIN                                                                  │
//! │  ├── client_key already stored? ──► AlreadyCommitted(original)          │
//! │  ├── open register?  ── no ──────► NoOpenRegister                       │
//! │  ├── INSERT sales, sale_items, sale_payments                            │
//! │  ├── per stock-tracked line:                                            │
//! │  │     SAVEPOINT                                                        │
//! │  │       UPDATE varieties SET stock_milli = stock_milli - qty           │
//! │  │     RELEASE  (or ROLLBACK TO on failure:                             │
//! │  │               flag sale + INSERT stock_discrepancies)                │
//! │  COMMIT ──────────────────────────► Created(sale)                       │
//! │                                                                         │
//! │  Manual-override lines never touch stock.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{Acquire, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use stall_core::validation::validate_sale_request;
use stall_core::{
    CommitOutcome, CommitSaleRequest, Money, OperatorContext, PaymentMethod, Quantity, Sale,
    SaleItem, SalePayment, StockDiscrepancy,
};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::register::{find_open, no_open};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: String,
    client_key: Option<String>,
    tenant_id: String,
    operator_id: String,
    register_id: String,
    location_id: Option<String>,
    total: Money,
    stock_reconciliation_pending: bool,
    created_at: DateTime<Utc>,
}

impl SaleRow {
    fn into_sale(self, items: Vec<SaleItem>, payments: Vec<SalePayment>) -> Sale {
        Sale {
            id: self.id,
            client_key: self.client_key,
            tenant_id: self.tenant_id,
            operator_id: self.operator_id,
            register_id: self.register_id,
            location_id: self.location_id,
            total: self.total,
            stock_reconciliation_pending: self.stock_reconciliation_pending,
            created_at: self.created_at,
            items,
            payments,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SaleItemRow {
    id: String,
    sale_id: String,
    line_no: i64,
    variety_id: String,
    quantity_milli: Option<Quantity>,
    unit_price: Money,
    subtotal: Money,
    is_manual_override: bool,
}

impl From<SaleItemRow> for SaleItem {
    fn from(row: SaleItemRow) -> Self {
        SaleItem {
            id: row.id,
            sale_id: row.sale_id,
            line_no: row.line_no,
            variety_id: row.variety_id,
            quantity: row.quantity_milli,
            unit_price: row.unit_price,
            subtotal: row.subtotal,
            is_manual_override: row.is_manual_override,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SalePaymentRow {
    id: String,
    sale_id: String,
    line_no: i64,
    method: PaymentMethod,
    amount: Money,
    reference: Option<String>,
}

impl From<SalePaymentRow> for SalePayment {
    fn from(row: SalePaymentRow) -> Self {
        SalePayment {
            id: row.id,
            sale_id: row.sale_id,
            line_no: row.line_no,
            method: row.method,
            amount: row.amount,
            reference: row.reference,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StockDiscrepancyRow {
    id: String,
    tenant_id: String,
    sale_id: String,
    variety_id: String,
    quantity_milli: Quantity,
    reason: String,
    created_at: DateTime<Utc>,
}

impl From<StockDiscrepancyRow> for StockDiscrepancy {
    fn from(row: StockDiscrepancyRow) -> Self {
        StockDiscrepancy {
            id: row.id,
            tenant_id: row.tenant_id,
            sale_id: row.sale_id,
            variety_id: row.variety_id,
            quantity: row.quantity_milli,
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for sale operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Commits a sale as one all-or-nothing unit.
    ///
    /// ## Returns
    /// * `Created(sale)` - the sale was stored now
    /// * `AlreadyCommitted(sale)` - `client_key` was seen before; the stored
    ///   sale is returned and nothing is written
    ///
    /// ## Errors
    /// - `Domain(Validation | ItemTotalMismatch | PaymentTotalMismatch)`
    /// - `Domain(NoOpenRegister)`
    /// - infrastructure errors from SQLite
    ///
    /// A failed stock decrement is not an error: the sale is flagged with
    /// `stock_reconciliation_pending` and a discrepancy row is written.
    pub async fn commit(
        &self,
        ctx: &OperatorContext,
        request: CommitSaleRequest,
    ) -> DbResult<CommitOutcome> {
        validate_sale_request(&request)?;

        let mut tx = begin_write(&self.pool).await?;

        if let Some(key) = request.client_key.as_deref() {
            if let Some(existing) = load_by_client_key(&mut tx, &ctx.tenant_id, key).await? {
                debug!(client_key = %key, sale_id = %existing.id, "Replayed client key");
                return Ok(CommitOutcome::AlreadyCommitted(existing));
            }
        }

        let register = find_open(&mut tx, ctx).await?.ok_or_else(|| no_open(ctx))?;

        let sale_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        // Replayed offline sales keep their till timestamp; clocks ahead of
        // ours are not trusted
        let created_at = request.occurred_at.filter(|at| *at <= now).unwrap_or(now);

        let inserted = sqlx::query(
            r#"
            INSERT INTO sales (
                id, client_key, tenant_id, operator_id, register_id,
                location_id, total, stock_reconciliation_pending, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
            "#,
        )
        .bind(&sale_id)
        .bind(&request.client_key)
        .bind(&ctx.tenant_id)
        .bind(&ctx.operator_id)
        .bind(&register.id)
        .bind(request.location_id.as_ref().or(register.location_id.as_ref()))
        .bind(request.total)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from);

        if let Err(e) = inserted {
            return resolve_key_conflict(&mut tx, ctx, request.client_key.as_deref(), e).await;
        }

        for (line_no, item) in request.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sale_items (
                    id, sale_id, line_no, variety_id, quantity_milli,
                    unit_price, subtotal, is_manual_override
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&sale_id)
            .bind(line_no as i64)
            .bind(&item.variety_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.subtotal)
            .bind(item.is_manual_override)
            .execute(&mut *tx)
            .await?;
        }

        for (line_no, payment) in request.payments.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sale_payments (id, sale_id, line_no, method, amount, reference)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&sale_id)
            .bind(line_no as i64)
            .bind(payment.method)
            .bind(payment.amount)
            .bind(&payment.reference)
            .execute(&mut *tx)
            .await?;
        }

        // Best-effort stock effects. Failures never roll back the sale.
        let mut discrepancies = 0usize;
        for item in &request.items {
            let Some(quantity) = item.stock_quantity() else {
                continue;
            };

            if let Err(e) = decrement_stock(&mut tx, &ctx.tenant_id, &item.variety_id, quantity).await
            {
                warn!(
                    sale_id = %sale_id,
                    variety_id = %item.variety_id,
                    quantity = %quantity,
                    error = %e,
                    "Stock decrement failed, flagging sale for reconciliation"
                );
                record_discrepancy(
                    &mut tx,
                    &ctx.tenant_id,
                    &sale_id,
                    &item.variety_id,
                    quantity,
                    &e.to_string(),
                )
                .await?;
                discrepancies += 1;
            }
        }

        if discrepancies > 0 {
            sqlx::query("UPDATE sales SET stock_reconciliation_pending = 1 WHERE id = ?1")
                .bind(&sale_id)
                .execute(&mut *tx)
                .await?;
        }

        let sale = load_sale(&mut tx, &ctx.tenant_id, &sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", &sale_id))?;

        tx.commit().await?;

        info!(
            sale_id = %sale.id,
            register_id = %sale.register_id,
            total = %sale.total,
            items = sale.items.len(),
            payments = sale.payments.len(),
            stock_reconciliation_pending = sale.stock_reconciliation_pending,
            "Sale committed"
        );

        Ok(CommitOutcome::Created(sale))
    }

    /// Gets a sale by server ID.
    pub async fn get_by_id(&self, tenant_id: &str, sale_id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        load_sale(&mut conn, tenant_id, sale_id).await
    }

    /// Gets a sale by its client idempotency key.
    pub async fn get_by_client_key(&self, tenant_id: &str, client_key: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        load_by_client_key(&mut conn, tenant_id, client_key).await
    }

    /// Lists every sale of a register in commit order.
    pub async fn list_for_register(&self, tenant_id: &str, register_id: &str) -> DbResult<Vec<Sale>> {
        let mut conn = self.pool.acquire().await?;

        let rows: Vec<SaleRow> = sqlx::query_as(
            r#"
            SELECT id, client_key, tenant_id, operator_id, register_id, location_id,
                   total, stock_reconciliation_pending, created_at
            FROM sales
            WHERE tenant_id = ?1 AND register_id = ?2
            ORDER BY created_at, id
            "#,
        )
        .bind(tenant_id)
        .bind(register_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut sales = Vec::with_capacity(rows.len());
        for row in rows {
            let (items, payments) = load_lines(&mut conn, &row.id).await?;
            sales.push(row.into_sale(items, payments));
        }
        Ok(sales)
    }

    /// Number of sales stored for a tenant.
    pub async fn count(&self, tenant_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales WHERE tenant_id = ?1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Lists stock decrements that could not be applied, newest first.
    pub async fn stock_discrepancies(
        &self,
        tenant_id: &str,
        limit: u32,
    ) -> DbResult<Vec<StockDiscrepancy>> {
        let rows: Vec<StockDiscrepancyRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, sale_id, variety_id, quantity_milli, reason, created_at
            FROM stock_discrepancies
            WHERE tenant_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StockDiscrepancy::from).collect())
    }
}

// =============================================================================
// Stock Effects
// =============================================================================

/// Takes `quantity` out of a variety's stock inside a savepoint.
///
/// Untracked varieties (`stock_milli IS NULL`) are left alone. On failure the
/// savepoint is rolled back and the enclosing transaction stays usable.
async fn decrement_stock(
    tx: &mut Transaction<'static, Sqlite>,
    tenant_id: &str,
    variety_id: &str,
    quantity: Quantity,
) -> DbResult<()> {
    let mut savepoint = tx.begin().await?;

    match apply_decrement(&mut savepoint, tenant_id, variety_id, quantity).await {
        Ok(()) => {
            savepoint.commit().await?;
            Ok(())
        }
        Err(e) => {
            savepoint.rollback().await?;
            Err(e)
        }
    }
}

async fn apply_decrement(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    variety_id: &str,
    quantity: Quantity,
) -> DbResult<()> {
    let stock: Option<Option<i64>> = sqlx::query_scalar(
        "SELECT stock_milli FROM varieties WHERE tenant_id = ?1 AND id = ?2",
    )
    .bind(tenant_id)
    .bind(variety_id)
    .fetch_optional(&mut *conn)
    .await?;

    match stock {
        None => Err(DbError::not_found("Variety", variety_id)),
        Some(None) => {
            debug!(variety_id = %variety_id, "Stock not tracked, skipping decrement");
            Ok(())
        }
        Some(Some(_)) => {
            sqlx::query(
                r#"
                UPDATE varieties SET stock_milli = stock_milli - ?3
                WHERE tenant_id = ?1 AND id = ?2
                "#,
            )
            .bind(tenant_id)
            .bind(variety_id)
            .bind(quantity)
            .execute(&mut *conn)
            .await?;
            Ok(())
        }
    }
}

async fn record_discrepancy(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    sale_id: &str,
    variety_id: &str,
    quantity: Quantity,
    reason: &str,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_discrepancies (
            id, tenant_id, sale_id, variety_id, quantity_milli, reason, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(tenant_id)
    .bind(sale_id)
    .bind(variety_id)
    .bind(quantity)
    .bind(reason)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// =============================================================================
// Loading
// =============================================================================

/// Maps a lost insert race on the client key to the sale that won it.
///
/// Any other error, or a key whose winner cannot be read back, is returned
/// as is.
async fn resolve_key_conflict(
    conn: &mut SqliteConnection,
    ctx: &OperatorContext,
    client_key: Option<&str>,
    err: DbError,
) -> DbResult<CommitOutcome> {
    if let (true, Some(key)) = (err.is_unique_violation_on("sales.client_key"), client_key) {
        if let Some(existing) = load_by_client_key(conn, &ctx.tenant_id, key).await? {
            debug!(client_key = %key, sale_id = %existing.id, "Lost commit race on client key");
            return Ok(CommitOutcome::AlreadyCommitted(existing));
        }
    }
    Err(err)
}

async fn load_by_client_key(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    client_key: &str,
) -> DbResult<Option<Sale>> {
    let sale_id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM sales WHERE tenant_id = ?1 AND client_key = ?2",
    )
    .bind(tenant_id)
    .bind(client_key)
    .fetch_optional(&mut *conn)
    .await?;

    match sale_id {
        Some(id) => load_sale(conn, tenant_id, &id).await,
        None => Ok(None),
    }
}

async fn load_sale(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    sale_id: &str,
) -> DbResult<Option<Sale>> {
    let row: Option<SaleRow> = sqlx::query_as(
        r#"
        SELECT id, client_key, tenant_id, operator_id, register_id, location_id,
               total, stock_reconciliation_pending, created_at
        FROM sales
        WHERE tenant_id = ?1 AND id = ?2
        "#,
    )
    .bind(tenant_id)
    .bind(sale_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let (items, payments) = load_lines(conn, &row.id).await?;
    Ok(Some(row.into_sale(items, payments)))
}

async fn load_lines(
    conn: &mut SqliteConnection,
    sale_id: &str,
) -> DbResult<(Vec<SaleItem>, Vec<SalePayment>)> {
    let items: Vec<SaleItemRow> = sqlx::query_as(
        r#"
        SELECT id, sale_id, line_no, variety_id, quantity_milli,
               unit_price, subtotal, is_manual_override
        FROM sale_items
        WHERE sale_id = ?1
        ORDER BY line_no
        "#,
    )
    .bind(sale_id)
    .fetch_all(&mut *conn)
    .await?;

    let payments: Vec<SalePaymentRow> = sqlx::query_as(
        r#"
        SELECT id, sale_id, line_no, method, amount, reference
        FROM sale_payments
        WHERE sale_id = ?1
        ORDER BY line_no
        "#,
    )
    .bind(sale_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok((
        items.into_iter().map(SaleItem::from).collect(),
        payments.into_iter().map(SalePayment::from).collect(),
    ))
}

// =============================================================================
// Unit Tests
// =============================================================================
