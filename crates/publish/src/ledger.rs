//! Persistent set of artifacts already handled.
//!
//! Every artifact the deploy pipeline finishes (published, skipped, or
//! excluded; not failed) is marked by its node key. Marks are persisted
//! periodically so that an interrupted run resumes where it left off.
//!
//! The on-disk format is versioned JSON, written to `<path>.tmp` and then
//! renamed over the target so a crash mid-write never leaves a torn file.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub const LEDGER_FILE: &str = "ledger.json";
const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Persisted {
    version: u32,
    #[serde(with = "time::serde::rfc3339")]
    committed_at: OffsetDateTime,
    visited: BTreeSet<String>,
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    visited: HashSet<String>,
    flush_every: usize,
    until_flush: usize,
}
impl Ledger {
    /// An empty ledger that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>, flush_every: usize) -> Self {
        let flush_every = flush_every.max(1);
        Self {
            path: path.into(),
            visited: HashSet::new(),
            flush_every,
            until_flush: flush_every,
        }
    }

    /// Load the ledger at `path`.
    ///
    /// A missing file starts an empty ledger silently; an unreadable,
    /// corrupt or version-incompatible one is logged and also starts empty.
    pub async fn load(path: impl Into<PathBuf>, flush_every: usize) -> Self {
        let mut ledger = Self::new(path, flush_every);
        match tokio::fs::try_exists(&ledger.path).await {
            Ok(false) => {
                tracing::debug!(path = %ledger.path.display(), "No ledger yet, starting empty");
                return ledger;
            },
            Ok(true) | Err(_) => {},
        }
        match read(&ledger.path).await {
            Ok(visited) => {
                tracing::info!(path = %ledger.path.display(), entries = visited.len(), "Loaded ledger");
                ledger.visited = visited;
            },
            Err(err) => {
                tracing::warn!(path = %ledger.path.display(), error = ?err, "Ignoring unusable ledger, starting empty");
            },
        }
        ledger
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.visited.contains(key)
    }

    /// Returns `true` if the key was not marked before.
    pub fn mark(&mut self, key: impl Into<String>) -> bool {
        self.visited.insert(key.into())
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    /// Count one handled artifact and persist once every `flush_every` calls.
    ///
    /// Returns whether this call wrote the file.
    pub async fn buffered_flush(&mut self) -> Result<bool> {
        self.until_flush = self.until_flush.saturating_sub(1);
        if self.until_flush > 0 {
            return Ok(false);
        }
        self.commit().await?;
        Ok(true)
    }

    /// Persist now and restart the flush countdown.
    pub async fn commit(&mut self) -> Result<()> {
        self.until_flush = self.flush_every;
        let persisted = Persisted {
            version: LEDGER_VERSION,
            committed_at: OffsetDateTime::now_utc(),
            visited: self.visited.iter().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&persisted).or_raise(|| ErrorKind::Ledger)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Ledger)?;
        }
        let temp = temp_path(&self.path);
        tokio::fs::write(&temp, json).await.or_raise(|| ErrorKind::Ledger)?;
        tokio::fs::rename(&temp, &self.path).await.or_raise(|| ErrorKind::Ledger)?;
        tracing::debug!(path = %self.path.display(), entries = self.visited.len(), "Committed ledger");
        Ok(())
    }
}

async fn read(path: &Path) -> Result<HashSet<String>> {
    let bytes = tokio::fs::read(path).await.or_raise(|| ErrorKind::LedgerLoad)?;
    let persisted: Persisted = serde_json::from_slice(&bytes).or_raise(|| ErrorKind::LedgerLoad)?;
    if persisted.version != LEDGER_VERSION {
        exn::bail!(ErrorKind::LedgerLoad);
    }
    Ok(persisted.visited.into_iter().collect())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = OsString::from(path.as_os_str());
    temp.push(".tmp");
    PathBuf::from(temp)
}
