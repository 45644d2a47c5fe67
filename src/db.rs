//! Database helpers.
//!
//! Opens the SQLite pool that backs channels, orders, sync configs,
//! webhook receipts and daily stats, and applies the embedded migrations.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

/// Type alias for the application database pool.
pub type AppDb = SqlitePool;

/// Open the database at `url` and run migrations.
///
/// `sqlite::memory:` URLs are routed to [`connect_in_memory`] because every
/// new connection to an in-memory database would otherwise see an empty one.
pub async fn connect(url: &str) -> anyhow::Result<AppDb> {
    if url.contains(":memory:") {
        return connect_in_memory().await;
    }

    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    info!("Connected to database {}", url);

    migrate(&pool).await?;
    Ok(pool)
}

/// Open a private in-memory database with migrations applied.
///
/// The pool is pinned to one connection that never expires.
pub async fn connect_in_memory() -> anyhow::Result<AppDb> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &AppDb) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations complete");
    Ok(())
}
