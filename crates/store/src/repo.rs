//! Symbol and source persistence.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{Source, SourceRow, Symbol, SymbolColumns, SymbolRow};
use exn::ResultExt;
use sqlx::SqlitePool;

/// What [`SymbolStore::store_symbol`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stored {
    /// No matching symbol existed; a new row was created.
    Inserted,
    /// A matching symbol existed; its location fields were overwritten.
    Updated,
}

/// Handle for reading and writing symbols and sources.
///
/// # Matching
///
/// A symbol *matches* when its hash equals the given hash **or** its filename
/// equals the given filename; the first such row in insertion order wins. This
/// is lenient on purpose (a file renamed between builds still resolves) but
/// means two unrelated artifacts sharing a filename are treated as the same
/// symbol. The identity pair of the row that was found first is never
/// rewritten.
#[derive(Debug, Clone)]
pub struct SymbolStore {
    pool: SqlitePool,
}
impl From<&Database> for SymbolStore {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl SymbolStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find the first symbol matching `hash` or `filename`.
    ///
    /// With no hash, only the filename can match.
    pub async fn find_symbol(&self, hash: Option<&str>, filename: &str) -> Result<Option<Symbol>> {
        let row: Option<SymbolRow> = sqlx::query_as(include_str!("../queries/find_symbol.sql"))
            .bind(hash)
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(Symbol::from))
    }

    /// Insert a symbol, or overwrite the location fields of the first
    /// matching one.
    ///
    /// Lookup and write happen in one transaction.
    pub async fn store_symbol(&self, symbol: &Symbol) -> Result<Stored> {
        let columns = SymbolColumns::try_from(symbol)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let existing: Option<SymbolRow> = sqlx::query_as(include_str!("../queries/find_symbol.sql"))
            .bind(columns.hash)
            .bind(columns.filename)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let stored = match existing {
            Some(row) => {
                sqlx::query(include_str!("../queries/update_symbol.sql"))
                    .bind(columns.url)
                    .bind(columns.store_path)
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                Stored::Updated
            },
            None => {
                sqlx::query(include_str!("../queries/insert_symbol.sql"))
                    .bind(columns.hash)
                    .bind(columns.filename)
                    .bind(columns.url)
                    .bind(columns.store_path)
                    .execute(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                Stored::Inserted
            },
        };
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::trace!(hash = %symbol.hash, filename = %symbol.filename, ?stored, "Stored symbol");
        Ok(stored)
    }

    /// All symbols in insertion order.
    pub async fn list_symbols(&self) -> Result<Vec<Symbol>> {
        let rows: Vec<SymbolRow> = sqlx::query_as(include_str!("../queries/list_symbols.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(Symbol::from).collect())
    }

    /// Find a source by its exact path.
    pub async fn find_source(&self, path: &str) -> Result<Option<Source>> {
        let row: Option<SourceRow> = sqlx::query_as(include_str!("../queries/find_source.sql"))
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Source::try_from).transpose()
    }

    /// Insert or replace the source with the same path.
    pub async fn store_source(&self, source: &Source) -> Result<()> {
        sqlx::query(include_str!("../queries/upsert_source.sql"))
            .bind(&source.path)
            .bind(source.loaded)
            .bind(i64::from(source.failure_count))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// All sources in insertion order.
    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(include_str!("../queries/list_sources.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Source::try_from).collect()
    }
}
