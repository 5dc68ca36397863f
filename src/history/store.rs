//! SQLite persistence for target account history.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use super::HistoryRecorder;
use crate::models::{Fill, Order, Position};

/// History recorder backed by a SQLite pool.
pub struct SqliteRecorder {
    pool: SqlitePool,
}

impl SqliteRecorder {
    /// Connect and create the history tables if needed.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 5).await
    }

    async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to history database")?;

        let recorder = Self { pool };
        recorder.run_migrations().await?;

        Ok(recorder)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                oid INTEGER NOT NULL,
                coin TEXT NOT NULL,
                class TEXT NOT NULL,
                side TEXT NOT NULL,
                limit_px TEXT NOT NULL,
                sz TEXT NOT NULL,
                placed_at_ms INTEGER NOT NULL,
                recorded_at TEXT NOT NULL,
                UNIQUE(address, oid)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS position_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                coin TEXT NOT NULL,
                class TEXT NOT NULL,
                szi TEXT NOT NULL,
                entry_px TEXT NOT NULL,
                leverage INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                fill_key TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                coin TEXT NOT NULL,
                side TEXT NOT NULL,
                px TEXT NOT NULL,
                sz TEXT NOT NULL,
                closed_pnl TEXT NOT NULL,
                fee TEXT NOT NULL,
                time_ms INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_position_history_coin ON position_history(address, coin)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of rows in one of the history tables.
    pub async fn count(&self, table: HistoryTable) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }
}

/// Tables written by [`SqliteRecorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryTable {
    Orders,
    Positions,
    Trades,
}

impl HistoryTable {
    fn as_str(&self) -> &'static str {
        match self {
            HistoryTable::Orders => "order_history",
            HistoryTable::Positions => "position_history",
            HistoryTable::Trades => "trade_history",
        }
    }
}

#[async_trait]
impl HistoryRecorder for SqliteRecorder {
    async fn log_order(&self, address: &str, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO order_history (
                address, oid, coin, class, side, limit_px, sz, placed_at_ms, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(address)
        .bind(order.order_id as i64)
        .bind(&order.instrument)
        .bind(order.class.as_str())
        .bind(order.side.as_str())
        .bind(order.limit_price.to_string())
        .bind(order.size.to_string())
        .bind(order.placed_at_ms)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert order history")?;

        Ok(())
    }

    async fn log_position(&self, address: &str, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO position_history (
                address, coin, class, szi, entry_px, leverage, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(address)
        .bind(&position.instrument)
        .bind(position.class.as_str())
        .bind(position.signed_size.to_string())
        .bind(position.entry_price.to_string())
        .bind(position.leverage)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert position history")?;

        Ok(())
    }

    async fn log_trade(&self, address: &str, fill: &Fill) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO trade_history (
                fill_key, address, coin, side, px, sz, closed_pnl, fee, time_ms, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(fill.dedup_key())
        .bind(address)
        .bind(&fill.instrument)
        .bind(fill.side.as_str())
        .bind(fill.price.to_string())
        .bind(fill.size.to_string())
        .bind(fill.closed_pnl.to_string())
        .bind(fill.fee.to_string())
        .bind(fill.time_ms)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert trade history")?;

        Ok(())
    }
}
