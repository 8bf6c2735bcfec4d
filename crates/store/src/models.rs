//! Store models and their row representations.
//!
//! Optional text columns are stored as `''` rather than `NULL`; the row types
//! here are the only place that knows about that sentinel.

use crate::error::{Error, ErrorKind};
use exn::ResultExt;

/// One binary artifact variant known to the store.
///
/// `hash` and `filename` form the identity of a symbol and are never changed
/// once a row exists; `origin_url` and `store_path` describe where the bytes
/// live and are rewritten on every publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub hash: String,
    pub filename: String,
    /// Location the bytes were fetched from. Only set in link mode; a copied
    /// artifact is found through `store_path` alone and leaves this `None`.
    pub origin_url: Option<String>,
    /// Path relative to the store root of the copied bytes or pointer file.
    pub store_path: Option<String>,
}
impl Symbol {
    pub fn new(hash: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            filename: filename.into(),
            origin_url: None,
            store_path: None,
        }
    }

    pub fn with_origin_url(mut self, url: impl Into<String>) -> Self {
        self.origin_url = Some(url.into());
        self
    }

    pub fn with_store_path(mut self, path: impl Into<String>) -> Self {
        self.store_path = Some(path.into());
        self
    }
}

/// One ingestion-attempt origin and how it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub path: String,
    pub loaded: bool,
    pub failure_count: u32,
}
impl Source {
    /// A source that has never been attempted.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            loaded: false,
            failure_count: 0,
        }
    }

    /// Record a successful load; earlier failures are forgotten.
    pub fn record_success(&mut self) {
        self.loaded = true;
        self.failure_count = 0;
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self) {
        self.loaded = false;
        self.failure_count = self.failure_count.saturating_add(1);
    }
}

fn from_sentinel(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn to_sentinel(value: Option<&str>) -> &str {
    value.unwrap_or_default()
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SymbolRow {
    pub(crate) id: i64,
    hash: String,
    filename: String,
    url: String,
    store_path: String,
}
impl From<SymbolRow> for Symbol {
    fn from(row: SymbolRow) -> Self {
        Self {
            hash: row.hash,
            filename: row.filename,
            origin_url: from_sentinel(row.url),
            store_path: from_sentinel(row.store_path),
        }
    }
}

/// Borrowed column values for writing a [`Symbol`].
pub(crate) struct SymbolColumns<'a> {
    pub(crate) hash: &'a str,
    pub(crate) filename: &'a str,
    pub(crate) url: &'a str,
    pub(crate) store_path: &'a str,
}
impl<'a> TryFrom<&'a Symbol> for SymbolColumns<'a> {
    type Error = Error;
    fn try_from(symbol: &'a Symbol) -> Result<Self, Self::Error> {
        if symbol.hash.is_empty() {
            exn::bail!(ErrorKind::InvalidData("symbol hash"));
        }
        if symbol.filename.is_empty() {
            exn::bail!(ErrorKind::InvalidData("symbol filename"));
        }
        Ok(Self {
            hash: &symbol.hash,
            filename: &symbol.filename,
            url: to_sentinel(symbol.origin_url.as_deref()),
            store_path: to_sentinel(symbol.store_path.as_deref()),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceRow {
    path: String,
    loaded: bool,
    failure_count: i64,
}
impl TryFrom<SourceRow> for Source {
    type Error = Error;
    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            path: row.path,
            loaded: row.loaded,
            failure_count: u32::try_from(row.failure_count).or_raise(|| ErrorKind::InvalidData("failure count"))?,
        })
    }
}
