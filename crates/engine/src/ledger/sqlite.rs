use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use common::{Error, Ledger, Result, TradeIntent};

/// Trade log in a SQLite `trades` table.
///
/// Inserts are idempotent on the intent id, so re-recording an intent after
/// a retry never duplicates a row. The cumulative P&L of a SELL row is
/// computed in the same statement that inserts it.
#[derive(Clone)]
pub struct SqliteLedger {
    db: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if missing) the database at `database_url` and apply
    /// migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // One connection keeps `sqlite::memory:` databases coherent and
        // serializes appends.
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("../../migrations")
            .run(&db)
            .await
            .map_err(|e| Error::Ledger(format!("database migration failed: {e}")))?;

        let ledger = Self { db };
        info!(cumulative_pnl = ledger.cumulative_pnl().await?, "SQLite ledger ready");
        Ok(ledger)
    }

    /// Sum of realized P&L over every recorded SELL.
    pub async fn cumulative_pnl(&self) -> Result<f64> {
        let (total,): (f64,) =
            sqlx::query_as("SELECT COALESCE(SUM(realized_pnl), 0.0) FROM trades")
                .fetch_one(&self.db)
                .await?;
        Ok(total)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn record(&self, intent: &TradeIntent) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades
                (id, timestamp, symbol, action, price, quantity, spent_or_received,
                 realized_pnl, cumulative_pnl)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                CASE WHEN ?8 IS NULL THEN NULL
                     ELSE (SELECT COALESCE(SUM(realized_pnl), 0.0) FROM trades) + ?8
                END)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&intent.id)
        .bind(intent.timestamp.to_rfc3339())
        .bind(&intent.symbol)
        .bind(intent.action.to_string())
        .bind(intent.price)
        .bind(intent.quantity)
        .bind(intent.notional())
        .bind(intent.realized_pnl)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            debug!(id = %intent.id, "Intent already recorded, skipping");
        }
        Ok(())
    }
}
