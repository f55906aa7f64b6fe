//! Repository over the trade ledger table.
//!
//! All status transitions go through [`Repository::update_trade_if_status`],
//! the conditional-write primitive that implements "update only if the row is
//! still in an expected status". A write matching zero rows is reported back
//! as `false`, never as an error; concurrency control rests entirely on this.

use crate::domain::{Side, Symbol, TimeMs, TradeRecord, TradeStatus, UserId};
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// Filter for ledger reads.
#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub symbol: Option<Symbol>,
    pub statuses: Option<Vec<TradeStatus>>,
    pub side: Option<Side>,
    pub from: Option<TimeMs>,
    pub to: Option<TimeMs>,
}

impl TradeFilter {
    pub fn with_statuses(statuses: &[TradeStatus]) -> Self {
        TradeFilter {
            statuses: Some(statuses.to_vec()),
            ..TradeFilter::default()
        }
    }

    pub fn created_between(from: Option<TimeMs>, to: Option<TimeMs>) -> Self {
        TradeFilter {
            from,
            to,
            ..TradeFilter::default()
        }
    }
}

/// Fields a conditional update may change. `None` leaves the column as-is.
#[derive(Debug, Clone, Default)]
pub struct TradePatch {
    pub status: Option<TradeStatus>,
    pub fill_price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub external_order_id: Option<String>,
    pub external_exec_id: Option<String>,
}

impl TradePatch {
    /// An empty patch would only bump `updated_at`; callers skip those.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.fill_price.is_none()
            && self.quantity.is_none()
            && self.realized_pnl.is_none()
            && self.external_order_id.is_none()
            && self.external_exec_id.is_none()
    }
}

/// Repository for ledger operations.
pub struct Repository {
    pool: SqlitePool,
}

fn decimal_to_db(value: Decimal) -> String {
    value.normalize().to_string()
}

fn decimal_from_db(s: &str, field: &str, id: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_else(|_| {
        warn!(trade_id = id, field, raw = s, "unparseable decimal in ledger row");
        Decimal::ZERO
    })
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Insert a new trade record.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_trade(&self, trade: &TradeRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, user, symbol, side, quantity, requested_price, fill_price,
                external_order_id, external_exec_id, status, realized_pnl,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(trade.user.as_str())
        .bind(trade.symbol.as_str())
        .bind(trade.side.as_str())
        .bind(decimal_to_db(trade.quantity))
        .bind(decimal_to_db(trade.requested_price))
        .bind(trade.fill_price.map(decimal_to_db))
        .bind(trade.external_order_id.as_deref())
        .bind(trade.external_exec_id.as_deref())
        .bind(trade.status.as_str())
        .bind(trade.realized_pnl.map(decimal_to_db))
        .bind(trade.created_at.as_ms())
        .bind(trade.updated_at.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch one trade by internal id.
    pub async fn get_trade(&self, id: &str) -> Result<Option<TradeRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_trade(&r)))
    }

    /// Query trades for a user with optional symbol/status/side/time filters.
    ///
    /// Results are ordered by creation time then id for deterministic
    /// processing within a reconciliation pass.
    pub async fn query_trades(
        &self,
        user: &UserId,
        filter: &TradeFilter,
    ) -> Result<Vec<TradeRecord>, sqlx::Error> {
        let mut sql = String::from("SELECT * FROM trades WHERE user = ?");
        if filter.symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        if let Some(statuses) = &filter.statuses {
            let placeholders = vec!["?"; statuses.len()].join(",");
            sql.push_str(&format!(" AND status IN ({})", placeholders));
        }
        if filter.side.is_some() {
            sql.push_str(" AND side = ?");
        }
        if filter.from.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if filter.to.is_some() {
            sql.push_str(" AND created_at <= ?");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut query = sqlx::query(&sql).bind(user.as_str());
        if let Some(symbol) = &filter.symbol {
            query = query.bind(symbol.as_str());
        }
        if let Some(statuses) = &filter.statuses {
            for status in statuses {
                query = query.bind(status.as_str());
            }
        }
        if let Some(side) = filter.side {
            query = query.bind(side.as_str());
        }
        if let Some(from) = filter.from {
            query = query.bind(from.as_ms());
        }
        if let Some(to) = filter.to {
            query = query.bind(to.as_ms());
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_trade).collect())
    }

    /// Conditionally update a trade: the patch applies only if the row's
    /// current status is one of `expected`.
    ///
    /// Returns whether a row was affected. A `false` result means another
    /// writer got there first; callers treat it as a no-op.
    pub async fn update_trade_if_status(
        &self,
        id: &str,
        expected: &[TradeStatus],
        patch: &TradePatch,
    ) -> Result<bool, sqlx::Error> {
        if expected.is_empty() {
            return Ok(false);
        }

        let mut sets = vec!["updated_at = ?".to_string()];
        if patch.status.is_some() {
            sets.push("status = ?".to_string());
        }
        if patch.fill_price.is_some() {
            sets.push("fill_price = ?".to_string());
        }
        if patch.quantity.is_some() {
            sets.push("quantity = ?".to_string());
        }
        if patch.realized_pnl.is_some() {
            sets.push("realized_pnl = ?".to_string());
        }
        if patch.external_order_id.is_some() {
            sets.push("external_order_id = ?".to_string());
        }
        if patch.external_exec_id.is_some() {
            sets.push("external_exec_id = ?".to_string());
        }

        let placeholders = vec!["?"; expected.len()].join(",");
        let sql = format!(
            "UPDATE trades SET {} WHERE id = ? AND status IN ({})",
            sets.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(TimeMs::now().as_ms());
        if let Some(status) = patch.status {
            query = query.bind(status.as_str());
        }
        if let Some(fill_price) = patch.fill_price {
            query = query.bind(decimal_to_db(fill_price));
        }
        if let Some(quantity) = patch.quantity {
            query = query.bind(decimal_to_db(quantity));
        }
        if let Some(realized_pnl) = patch.realized_pnl {
            query = query.bind(decimal_to_db(realized_pnl));
        }
        if let Some(order_id) = &patch.external_order_id {
            query = query.bind(order_id.as_str());
        }
        if let Some(exec_id) = &patch.external_exec_id {
            query = query.bind(exec_id.as_str());
        }
        query = query.bind(id);
        for status in expected {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// External order ids recorded more than once for a user. Duplicates are
    /// surfaced to the operator, never merged.
    pub async fn find_duplicate_external_order_ids(
        &self,
        user: &UserId,
    ) -> Result<Vec<(String, i64)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT external_order_id, COUNT(*) AS n
            FROM trades
            WHERE user = ? AND external_order_id IS NOT NULL
            GROUP BY external_order_id
            HAVING COUNT(*) > 1
            ORDER BY external_order_id ASC
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("external_order_id"),
                    row.get::<i64, _>("n"),
                )
            })
            .collect())
    }
}

fn row_to_trade(row: &sqlx::sqlite::SqliteRow) -> TradeRecord {
    let id: String = row.get("id");

    let side_str: String = row.get("side");
    let side = Side::parse(&side_str).unwrap_or_else(|| {
        warn!(trade_id = %id, raw = %side_str, "unknown side in ledger row");
        Side::Buy
    });

    let status_str: String = row.get("status");
    let status = TradeStatus::parse(&status_str).unwrap_or_else(|| {
        warn!(trade_id = %id, raw = %status_str, "unknown status in ledger row");
        TradeStatus::Pending
    });

    let quantity_str: String = row.get("quantity");
    let requested_price_str: String = row.get("requested_price");
    let fill_price: Option<String> = row.get("fill_price");
    let realized_pnl: Option<String> = row.get("realized_pnl");

    TradeRecord {
        quantity: decimal_from_db(&quantity_str, "quantity", &id),
        requested_price: decimal_from_db(&requested_price_str, "requested_price", &id),
        fill_price: fill_price.map(|s| decimal_from_db(&s, "fill_price", &id)),
        realized_pnl: realized_pnl.map(|s| decimal_from_db(&s, "realized_pnl", &id)),
        user: UserId::new(row.get::<String, _>("user")),
        symbol: Symbol::new(row.get::<String, _>("symbol")),
        side,
        external_order_id: row.get("external_order_id"),
        external_exec_id: row.get("external_exec_id"),
        status,
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
        id,
    }
}
