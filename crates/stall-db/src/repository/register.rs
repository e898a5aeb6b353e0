//! # Register Repository
//!
//! Open/close state machine for cash registers.
//!
//! ## Register Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   open(opening ≥ 0)                 close(closing?)                     │
//! │  ─────────────────► ┌────────┐ ─────────────────────► ┌────────┐        │
//! │                     │  OPEN  │                        │ CLOSED │        │
//! │  second open ──✗──► └────────┘   no open register ─✗─ └────────┘        │
//! │  (RegisterAlreadyOpen)            (NoOpenRegister)      terminal,       │
//! │                                                         never deleted   │
//! │                                                                         │
//! │  One OPEN per (tenant, operator), enforced by a partial unique index   │
//! │  on top of the check inside the opening transaction.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use stall_core::reconciliation::summarize;
use stall_core::validation::{validate_closing_amount, validate_notes, validate_opening_amount};
use stall_core::{
    CloseRegisterRequest, CoreError, Money, OpenRegisterRequest, OperatorContext, PaymentMethod,
    ReconciliationSummary, Register, RegisterClosure, RegisterStatus,
};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;

#[derive(Debug, sqlx::FromRow)]
struct RegisterRow {
    id: String,
    tenant_id: String,
    operator_id: String,
    status: RegisterStatus,
    opening_amount: Money,
    opened_at: DateTime<Utc>,
    closing_amount: Option<Money>,
    closed_at: Option<DateTime<Utc>>,
    location_id: Option<String>,
    notes: Option<String>,
}

impl From<RegisterRow> for Register {
    fn from(row: RegisterRow) -> Self {
        Register {
            id: row.id,
            tenant_id: row.tenant_id,
            operator_id: row.operator_id,
            status: row.status,
            opening_amount: row.opening_amount,
            opened_at: row.opened_at,
            closing_amount: row.closing_amount,
            closed_at: row.closed_at,
            location_id: row.location_id,
            notes: row.notes,
        }
    }
}

/// Reconciliation figures written by `close`.
#[derive(Debug, sqlx::FromRow)]
struct ClosedFiguresRow {
    total_sales: Option<Money>,
    sales_count: Option<i64>,
    expected_amount: Option<Money>,
    difference: Option<Money>,
}

impl ClosedFiguresRow {
    /// `None` when any figure is missing.
    fn into_summary(
        self,
        register: &Register,
        live: &ReconciliationSummary,
    ) -> Option<ReconciliationSummary> {
        let expected_amount = self.expected_amount?;
        Some(ReconciliationSummary {
            opening_amount: register.opening_amount,
            closing_amount: register.closing_amount.unwrap_or(expected_amount),
            total_sales: self.total_sales?,
            sales_count: self.sales_count?,
            expected_amount,
            difference: self.difference?,
            by_method: live.by_method.clone(),
        })
    }
}

/// Repository for register operations.
#[derive(Debug, Clone)]
pub struct RegisterRepository {
    pool: SqlitePool,
}

impl RegisterRepository {
    /// Creates a new RegisterRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RegisterRepository { pool }
    }

    /// Opens a register for the operator.
    ///
    /// ## Errors
    /// - `Validation` if the opening amount is negative
    /// - `RegisterAlreadyOpen` if the operator already has one open
    pub async fn open(
        &self,
        ctx: &OperatorContext,
        request: OpenRegisterRequest,
    ) -> DbResult<Register> {
        validate_opening_amount(request.opening_amount).map_err(CoreError::from)?;
        validate_notes(request.notes.as_deref()).map_err(CoreError::from)?;

        let mut tx = begin_write(&self.pool).await?;

        if let Some(existing) = find_open(&mut tx, ctx).await? {
            return Err(already_open(ctx, &existing.id));
        }

        let register = Register {
            id: Uuid::new_v4().to_string(),
            tenant_id: ctx.tenant_id.clone(),
            operator_id: ctx.operator_id.clone(),
            status: RegisterStatus::Open,
            opening_amount: request.opening_amount,
            opened_at: Utc::now(),
            closing_amount: None,
            closed_at: None,
            location_id: request.location_id,
            notes: request.notes,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO registers (
                id, tenant_id, operator_id, status,
                opening_amount, opened_at, location_id, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&register.id)
        .bind(&register.tenant_id)
        .bind(&register.operator_id)
        .bind(register.status)
        .bind(register.opening_amount)
        .bind(register.opened_at)
        .bind(&register.location_id)
        .bind(&register.notes)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from);

        if let Err(e) = inserted {
            return Err(resolve_open_conflict(&mut tx, ctx, e).await);
        }

        tx.commit().await?;

        info!(
            register_id = %register.id,
            operator_id = %register.operator_id,
            opening_amount = %register.opening_amount,
            "Register opened"
        );
        Ok(register)
    }

    /// Returns the operator's open register, if any.
    pub async fn current(&self, ctx: &OperatorContext) -> DbResult<Option<Register>> {
        let mut conn = self.pool.acquire().await?;
        find_open(&mut conn, ctx).await
    }

    /// Closes the operator's open register and records its reconciliation.
    ///
    /// ## What This Does
    /// 1. Finds the open register (`NoOpenRegister` otherwise)
    /// 2. Sums every sale and payment committed against it
    /// 3. Writes status, closing amount, closed-at and the figures
    ///
    /// All in one transaction. A negative difference is reported, not
    /// rejected.
    pub async fn close(
        &self,
        ctx: &OperatorContext,
        request: CloseRegisterRequest,
    ) -> DbResult<RegisterClosure> {
        validate_closing_amount(request.closing_amount).map_err(CoreError::from)?;
        validate_notes(request.notes.as_deref()).map_err(CoreError::from)?;

        let mut tx = begin_write(&self.pool).await?;

        let mut register = find_open(&mut tx, ctx).await?.ok_or_else(|| no_open(ctx))?;
        let summary = reconcile(&mut tx, &register, request.closing_amount).await?;
        let closed_at = Utc::now();
        let notes = request.notes.or(register.notes.take());

        let result = sqlx::query(
            r#"
            UPDATE registers SET
                status = 'closed',
                closing_amount = ?2,
                closed_at = ?3,
                notes = ?4,
                total_sales = ?5,
                sales_count = ?6,
                expected_amount = ?7,
                difference = ?8
            WHERE id = ?1 AND status = 'open'
            "#,
        )
        .bind(&register.id)
        .bind(summary.closing_amount)
        .bind(closed_at)
        .bind(&notes)
        .bind(summary.total_sales)
        .bind(summary.sales_count)
        .bind(summary.expected_amount)
        .bind(summary.difference)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(no_open(ctx).into());
        }

        tx.commit().await?;

        register.status = RegisterStatus::Closed;
        register.closing_amount = Some(summary.closing_amount);
        register.closed_at = Some(closed_at);
        register.notes = notes;

        info!(
            register_id = %register.id,
            total_sales = %summary.total_sales,
            sales_count = summary.sales_count,
            difference = %summary.difference,
            "Register closed"
        );

        Ok(RegisterClosure { register, summary })
    }

    /// Loads the closure report of a closed register.
    ///
    /// Totals, count, expected amount and difference are the figures stored
    /// at close. The per-method breakdown is summed from the register's
    /// payments, which are immutable once committed. Registers closed before
    /// the figures were stored are recomputed in full.
    pub async fn closure(
        &self,
        tenant_id: &str,
        register_id: &str,
    ) -> DbResult<Option<RegisterClosure>> {
        let mut conn = self.pool.acquire().await?;

        let Some(register) = get_by_id(&mut conn, tenant_id, register_id).await? else {
            return Ok(None);
        };
        if register.is_open() {
            return Ok(None);
        }

        let live = reconcile(&mut conn, &register, register.closing_amount).await?;
        let stored: ClosedFiguresRow = sqlx::query_as(
            r#"
            SELECT total_sales, sales_count, expected_amount, difference
            FROM registers
            WHERE tenant_id = ?1 AND id = ?2
            "#,
        )
        .bind(tenant_id)
        .bind(register_id)
        .fetch_one(&mut *conn)
        .await?;

        let summary = match stored.into_summary(&register, &live) {
            Some(summary) => {
                if summary.total_sales != live.total_sales
                    || summary.sales_count != live.sales_count
                {
                    warn!(
                        register_id = %register.id,
                        stored_total = %summary.total_sales,
                        live_total = %live.total_sales,
                        "Closed register no longer matches its sales"
                    );
                }
                summary
            }
            None => live,
        };

        Ok(Some(RegisterClosure { register, summary }))
    }

    /// Looks a register up by id within the tenant, open or closed.
    pub async fn get_by_id(&self, tenant_id: &str, register_id: &str) -> DbResult<Option<Register>> {
        let mut conn = self.pool.acquire().await?;
        get_by_id(&mut conn, tenant_id, register_id).await
    }

    /// Lists the operator's closed registers, most recent first.
    pub async fn list_closed(&self, ctx: &OperatorContext, limit: u32) -> DbResult<Vec<Register>> {
        let rows: Vec<RegisterRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, operator_id, status, opening_amount, opened_at,
                   closing_amount, closed_at, location_id, notes
            FROM registers
            WHERE tenant_id = ?1 AND operator_id = ?2 AND status = 'closed'
            ORDER BY closed_at DESC
            LIMIT ?3
            "#,
        )
        .bind(&ctx.tenant_id)
        .bind(&ctx.operator_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "Listed closed registers");
        Ok(rows.into_iter().map(Register::from).collect())
    }
}

// =============================================================================
// Connection-level helpers (shared with the sale commit transaction)
// =============================================================================

/// Finds the open register for an operator on an existing connection.
pub(crate) async fn find_open(
    conn: &mut SqliteConnection,
    ctx: &OperatorContext,
) -> DbResult<Option<Register>> {
    let row: Option<RegisterRow> = sqlx::query_as(
        r#"
        SELECT id, tenant_id, operator_id, status, opening_amount, opened_at,
               closing_amount, closed_at, location_id, notes
        FROM registers
        WHERE tenant_id = ?1 AND operator_id = ?2 AND status = 'open'
        "#,
    )
    .bind(&ctx.tenant_id)
    .bind(&ctx.operator_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Register::from))
}

async fn get_by_id(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    register_id: &str,
) -> DbResult<Option<Register>> {
    let row: Option<RegisterRow> = sqlx::query_as(
        r#"
        SELECT id, tenant_id, operator_id, status, opening_amount, opened_at,
               closing_amount, closed_at, location_id, notes
        FROM registers
        WHERE tenant_id = ?1 AND id = ?2
        "#,
    )
    .bind(tenant_id)
    .bind(register_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Register::from))
}

/// Sums the sales and payments of a register.
async fn reconcile(
    conn: &mut SqliteConnection,
    register: &Register,
    closing: Option<Money>,
) -> DbResult<ReconciliationSummary> {
    let totals: Vec<Money> = sqlx::query_scalar(
        "SELECT total FROM sales WHERE tenant_id = ?1 AND register_id = ?2",
    )
    .bind(&register.tenant_id)
    .bind(&register.id)
    .fetch_all(&mut *conn)
    .await?;

    let payments: Vec<(PaymentMethod, Money)> = sqlx::query_as(
        r#"
        SELECT p.method, p.amount
        FROM sale_payments p
        INNER JOIN sales s ON s.id = p.sale_id
        WHERE s.tenant_id = ?1 AND s.register_id = ?2
        "#,
    )
    .bind(&register.tenant_id)
    .bind(&register.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(summarize(register.opening_amount, closing, totals, payments))
}

/// Maps a lost insert race on the one-open index to `RegisterAlreadyOpen`
/// naming the winner.
async fn resolve_open_conflict(
    conn: &mut SqliteConnection,
    ctx: &OperatorContext,
    err: DbError,
) -> DbError {
    if !err.is_unique_violation_on("registers.") {
        return err;
    }
    match find_open(conn, ctx).await {
        Ok(winner) => already_open(ctx, &winner.map(|r| r.id).unwrap_or_default()),
        Err(lookup) => lookup,
    }
}

fn already_open(ctx: &OperatorContext, register_id: &str) -> DbError {
    CoreError::RegisterAlreadyOpen {
        operator_id: ctx.operator_id.clone(),
        register_id: register_id.to_string(),
    }
    .into()
}

pub(crate) fn no_open(ctx: &OperatorContext) -> CoreError {
    CoreError::NoOpenRegister {
        operator_id: ctx.operator_id.clone(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use stall_core::{CommitSaleRequest, NewSaleItem, NewSalePayment, Quantity};

    fn m(minor: i64) -> Money {
        Money::from_minor(minor)
    }

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn open_with(amount: i64) -> OpenRegisterRequest {
        OpenRegisterRequest {
            opening_amount: m(amount),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_open_and_current() {
        let db = setup().await;
        let ctx = OperatorContext::new("t1", "op1");

        assert!(db.registers().current(&ctx).await.unwrap().is_none());

        let register = db.registers().open(&ctx, open_with(10_000)).await.unwrap();
        assert!(register.is_open());

        let current = db.registers().current(&ctx).await.unwrap().unwrap();
        assert_eq!(current.id, register.id);
        assert_eq!(current.opening_amount, m(10_000));
    }

    #[tokio::test]
    async fn test_second_open_rejected() {
        let db = setup().await;
        let ctx = OperatorContext::new("t1", "op1");

        let first = db.registers().open(&ctx, open_with(0)).await.unwrap();
        let err = db.registers().open(&ctx, open_with(500)).await.unwrap_err();

        match err {
            DbError::Domain(CoreError::RegisterAlreadyOpen { register_id, .. }) => {
                assert_eq!(register_id, first.id);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_is_scoped_per_operator_and_tenant() {
        let db = setup().await;
        db.registers()
            .open(&OperatorContext::new("t1", "op1"), open_with(0))
            .await
            .unwrap();
        db.registers()
            .open(&OperatorContext::new("t1", "op2"), open_with(0))
            .await
            .unwrap();
        db.registers()
            .open(&OperatorContext::new("t2", "op1"), open_with(0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_negative_opening_rejected() {
        let db = setup().await;
        let ctx = OperatorContext::new("t1", "op1");
        let err = db.registers().open(&ctx, open_with(-1)).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
        assert!(db.registers().current(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_without_open_register() {
        let db = setup().await;
        let ctx = OperatorContext::new("t1", "op1");
        let err = db
            .registers()
            .close(&ctx, CloseRegisterRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::NoOpenRegister { .. })));
    }

    #[tokio::test]
    async fn test_close_trusting_the_ledger() {
        let db = setup().await;
        let ctx = OperatorContext::new("t1", "op1");
        db.registers().open(&ctx, open_with(10_000)).await.unwrap();

        let request = CommitSaleRequest::new(
            vec![NewSaleItem::manual("v1", None, m(5_000))],
            vec![NewSalePayment::new(PaymentMethod::Cash, m(5_000))],
        );
        db.sales().commit(&ctx, request).await.unwrap();

        let closure = db
            .registers()
            .close(&ctx, CloseRegisterRequest::default())
            .await
            .unwrap();

        assert_eq!(closure.summary.total_sales, m(5_000));
        assert_eq!(closure.summary.sales_count, 1);
        assert_eq!(closure.summary.expected_amount, m(15_000));
        assert_eq!(closure.summary.closing_amount, m(15_000));
        assert_eq!(closure.summary.difference, m(0));
        assert_eq!(closure.register.status, RegisterStatus::Closed);
        assert!(db.registers().current(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_with_split_payments_and_shortage() {
        let db = setup().await;
        let ctx = OperatorContext::new("t1", "op1");
        db.registers().open(&ctx, open_with(10_000)).await.unwrap();

        let request = CommitSaleRequest::new(
            vec![NewSaleItem::priced("v1", Quantity::from_units(2), m(2_500))],
            vec![
                NewSalePayment::new(PaymentMethod::Cash, m(3_000)),
                NewSalePayment::new(PaymentMethod::Debit, m(2_000)),
            ],
        );
        db.sales().commit(&ctx, request).await.unwrap();

        let closure = db
            .registers()
            .close(
                &ctx,
                CloseRegisterRequest {
                    closing_amount: Some(m(14_500)),
                    notes: Some("short a note".into()),
                },
            )
            .await
            .unwrap();

        let by_method = &closure.summary.by_method;
        assert_eq!(by_method.get(&PaymentMethod::Cash), Some(&m(3_000)));
        assert_eq!(by_method.get(&PaymentMethod::Debit), Some(&m(2_000)));
        assert_eq!(closure.summary.difference, m(-500));

        // The stored report matches what close returned
        let stored = db
            .registers()
            .closure("t1", &closure.register.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.summary, closure.summary);
        assert_eq!(stored.register.notes.as_deref(), Some("short a note"));
    }

    #[tokio::test]
    async fn test_reopen_after_close_and_history() {
        let db = setup().await;
        let ctx = OperatorContext::new("t1", "op1");

        db.registers().open(&ctx, open_with(100)).await.unwrap();
        db.registers()
            .close(&ctx, CloseRegisterRequest::default())
            .await
            .unwrap();
        db.registers().open(&ctx, open_with(200)).await.unwrap();

        let closed = db.registers().list_closed(&ctx, 10).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].opening_amount, m(100));
        assert_eq!(closed[0].closing_amount, Some(m(100)));

        let other_tenant = OperatorContext::new("t2", "op1");
        assert!(db
            .registers()
            .list_closed(&other_tenant, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_closure_reports_figures_stored_at_close() {
        let db = setup().await;
        let ctx = OperatorContext::new("t1", "op1");
        db.registers().open(&ctx, open_with(1_000)).await.unwrap();

        let request = CommitSaleRequest::new(
            vec![NewSaleItem::manual("v1", None, m(400))],
            vec![NewSalePayment::new(PaymentMethod::Cash, m(400))],
        );
        db.sales().commit(&ctx, request).await.unwrap();
        let closed = db
            .registers()
            .close(&ctx, CloseRegisterRequest::default())
            .await
            .unwrap();

        // Sales touched after close do not rewrite the report
        sqlx::query("UPDATE sales SET total = total + 100 WHERE register_id = ?1")
            .bind(&closed.register.id)
            .execute(db.pool())
            .await
            .unwrap();

        let report = db
            .registers()
            .closure("t1", &closed.register.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.summary.total_sales, m(400));
        assert_eq!(report.summary.expected_amount, m(1_400));
        assert_eq!(report.summary.difference, m(0));
        assert_eq!(report.summary, closed.summary);
    }

    #[tokio::test]
    async fn test_closure_recomputes_when_figures_missing() {
        let db = setup().await;
        let ctx = OperatorContext::new("t1", "op1");
        db.registers().open(&ctx, open_with(1_000)).await.unwrap();
        let closed = db
            .registers()
            .close(
                &ctx,
                CloseRegisterRequest {
                    closing_amount: Some(m(900)),
                    notes: None,
                },
            )
            .await
            .unwrap();

        sqlx::query(
            "UPDATE registers SET total_sales = NULL, sales_count = NULL, \
             expected_amount = NULL, difference = NULL WHERE id = ?1",
        )
        .bind(&closed.register.id)
        .execute(db.pool())
        .await
        .unwrap();

        let report = db
            .registers()
            .closure("t1", &closed.register.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.summary.expected_amount, m(1_000));
        assert_eq!(report.summary.difference, m(-100));

        // Open or unknown registers have no closure
        db.registers().open(&ctx, open_with(0)).await.unwrap();
        let open = db.registers().current(&ctx).await.unwrap().unwrap();
        assert!(db.registers().closure("t1", &open.id).await.unwrap().is_none());
        assert!(db.registers().closure("t1", "nope").await.unwrap().is_none());
        assert!(db
            .registers()
            .get_by_id("t2", &closed.register.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lost_open_race_names_the_winner() {
        let db = setup().await;
        let ctx = OperatorContext::new("t1", "op1");
        let winner = db.registers().open(&ctx, open_with(0)).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let violation = DbError::duplicate("registers.tenant_id, registers.operator_id", "op1");
        match resolve_open_conflict(&mut conn, &ctx, violation).await {
            DbError::Domain(CoreError::RegisterAlreadyOpen { register_id, .. }) => {
                assert_eq!(register_id, winner.id);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Other failures pass through untouched
        let other = DbError::duplicate("sales.tenant_id, sales.client_key", "K-1");
        assert!(matches!(
            resolve_open_conflict(&mut conn, &ctx, other).await,
            DbError::UniqueViolation { .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_leave_one_register() {
        let path = std::env::temp_dir().join(format!("stall-open-{}.db", Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(8))
            .await
            .unwrap();
        let ctx = OperatorContext::new("t1", "op1");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move { db.registers().open(&ctx, open_with(i)).await })
            })
            .collect();

        let mut opened = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(register) => opened.push(register.id),
                Err(DbError::Domain(CoreError::RegisterAlreadyOpen { .. })) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(opened.len(), 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM registers")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.registers().current(&ctx).await.unwrap().unwrap().id, opened[0]);

        db.close().await;
        let _ = std::fs::remove_file(&path);
    }
}
