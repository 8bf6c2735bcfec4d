//! Publish debug symbols from artifact repositories into a symbol store.
//!
//! A run crawls a [`Repository`](symsrv_storage::Repository) breadth-first
//! across a bounded pool of listing tasks and feeds every candidate artifact
//! (`.dll`, `.exe`, `.pdb`, plus archives that are recognised but not yet
//! expanded) to a single deploy worker. The worker hashes each artifact,
//! copies it (or writes a pointer to it) under the store root, and records it
//! in the [`SymbolStore`](symsrv_store::SymbolStore).
//!
//! Handled artifacts are remembered in a [`Ledger`] that is flushed every
//! few artifacts, so an interrupted run picks up where it stopped.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use symsrv_publish::{Blake3Digest, Params, Publisher, publish_repository};
//! # async fn run(repository: symsrv_storage::RepositoryHandle, db: symsrv_store::Database) -> symsrv_publish::error::Result<()> {
//! let params = Params::new("/srv/symbols").with_excludes(vec!["/test/".to_string()]);
//! let publisher = Publisher::open(params, (&db).into(), Arc::new(Blake3Digest)).await;
//! let report = publish_repository(repository, publisher, 8).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

mod classify;
mod crawl;
mod deploy;
pub mod error;
mod hash;
mod layout;
mod ledger;
mod report;
pub mod scheduler;

pub use crate::classify::{ArtifactKind, is_excluded};
pub use crate::crawl::{publish_location, publish_repository};
pub use crate::deploy::{Artifact, Outcome, Publisher};
pub use crate::hash::{Blake3Digest, FormatChain, HashProvider};
pub use crate::layout::{POINTER_FILE, read_pointer};
pub use crate::ledger::{LEDGER_FILE, Ledger};
pub use crate::report::{PublishReport, SkipReason};
use std::path::PathBuf;

pub const DEFAULT_FLUSH_EVERY: usize = 16;

/// Knobs for a publish run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Params {
    /// Copies, pointer files and the ledger live under here.
    pub store_root: PathBuf,
    pub excludes: Vec<String>,
    pub link_mode: bool,
    pub overwrite: bool,
    pub flush_every: usize,
}
impl Params {
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            excludes: Vec::new(),
            link_mode: false,
            overwrite: false,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }

    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn with_link_mode(mut self, link_mode: bool) -> Self {
        self.link_mode = link_mode;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.store_root.join(LEDGER_FILE)
    }
}
