//! The SQLite pool behind a symbol store.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Schema migrations, compiled into the binary and applied on every connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
/// All writes come from one deploy worker; extra connections only serve
/// concurrent readers such as `find`.
const MAX_CONNECTIONS: u32 = 2;
/// File name of the database inside a store root.
pub const DATABASE_FILE: &str = "symbols.db";

/// Database connection pool for the symbol store.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Query-based PRAGMAs must be applied to every pooled connection,
            // not just the first one.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Open (creating if missing) the database file at `path` and bring its
    /// schema up to date.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options().filename(path.as_ref()).create_if_missing(true);
        Self::new(options, MAX_CONNECTIONS).await
    }

    /// Connect to the database kept in a store root directory
    /// (`<root>/symbols.db`), creating the directory if needed.
    pub async fn open_store(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        create_store_dir(root)?;
        Self::connect(root.join(DATABASE_FILE)).await
    }

    /// A private, throwaway database.
    ///
    /// Not `#[cfg(test)]`: other crates use this in their tests too.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Every connection to ":memory:" is its own database; one connection
        // keeps all queries looking at the same data.
        Self::new(options, 1).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // A `find` running next to a publish must wait out the writer.
            .busy_timeout(Duration::from_secs(5))
            .auto_vacuum(SqliteAutoVacuum::None)
    }

    /// Per-connection PRAGMAs with no `SqliteConnectOptions` setter.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 1000;
                PRAGMA cache_size = -4096;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Apply pending schema migrations.
    #[instrument("migrating symbol store schema", skip_all)]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool, waiting for checked-out connections.
    pub async fn close(&self) {
        // Best effort: refresh planner statistics before the last connection goes.
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

fn create_store_dir(root: &Path) -> Result<()> {
    // Runs once at startup, before any concurrent work.
    std::fs::create_dir_all(root).or_raise(|| ErrorKind::StoreDirectory(root.display().to_string()))
}
