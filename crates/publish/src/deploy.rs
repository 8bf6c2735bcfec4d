//! The per-artifact deploy pipeline.
//!
//! Each artifact ends in exactly one [`Outcome`]:
//!
//! 1. excluded location: skipped,
//! 2. already in the ledger: skipped,
//! 3. archive or unknown extension: failed,
//! 4. no hash provider recognises it: failed,
//! 5. the store already has it and overwriting is off: skipped,
//! 6. otherwise its bytes (or a pointer to them) land under the store root
//!    and the symbol is recorded: published.
//!
//! Published and failed artifacts update the source table. Everything but a
//! failure is marked in the ledger, so failures are retried on the next run.

use crate::Params;
use crate::classify::{ArtifactKind, is_excluded};
use crate::error::{Error, ErrorKind, Result};
use crate::hash::HashProvider;
use crate::layout;
use crate::ledger::Ledger;
use crate::report::{PublishReport, SkipReason};
use crate::scheduler::Worker;
use async_trait::async_trait;
use exn::ResultExt;
use std::ops::ControlFlow;
use std::sync::Arc;
use symsrv_storage::{Node, RepositoryHandle};
use symsrv_store::{Source, Symbol, SymbolStore};

/// An artifact waiting in the deploy queue.
pub struct Artifact {
    pub repository: RepositoryHandle,
    pub node: Node,
}
impl Artifact {
    pub fn new(repository: RepositoryHandle, node: Node) -> Self {
        Self { repository, node }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Published {
        /// An existing symbol matched and was replaced.
        overwritten: bool,
        store_path: String,
    },
    Skipped(SkipReason),
    Failed(Error),
}

/// Owns everything the pipeline mutates: the symbol store handle, the ledger
/// and the run's counters.
pub struct Publisher {
    params: Params,
    store: SymbolStore,
    ledger: Ledger,
    hasher: Arc<dyn HashProvider>,
    report: PublishReport,
    fatal: Option<Error>,
}
impl Publisher {
    pub fn new(params: Params, store: SymbolStore, ledger: Ledger, hasher: Arc<dyn HashProvider>) -> Self {
        Self {
            params,
            store,
            ledger,
            hasher,
            report: PublishReport::default(),
            fatal: None,
        }
    }

    /// Like [`Publisher::new`], loading the ledger from
    /// [`Params::ledger_path`].
    pub async fn open(params: Params, store: SymbolStore, hasher: Arc<dyn HashProvider>) -> Self {
        let ledger = Ledger::load(params.ledger_path(), params.flush_every).await;
        Self::new(params, store, ledger, hasher)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn report(&self) -> &PublishReport {
        &self.report
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run one artifact through the pipeline.
    ///
    /// Per-artifact problems come back as [`Outcome::Failed`]; `Err` means
    /// the symbol store itself failed and the run should stop.
    pub async fn deploy(&mut self, repository: &RepositoryHandle, node: &Node) -> Result<Outcome> {
        let outcome = match self.attempt(repository, node).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => Outcome::Failed(err),
        };
        match &outcome {
            Outcome::Published { overwritten, store_path } => {
                self.record_source(node.location(), true).await?;
                self.report.record_published(*overwritten);
                tracing::info!(location = %node, path = %store_path, overwritten, "Published");
            },
            Outcome::Skipped(reason) => {
                self.report.record_skipped(*reason);
                tracing::debug!(location = %node, ?reason, "Skipped");
            },
            Outcome::Failed(err) => {
                self.record_source(node.location(), false).await?;
                self.report.record_failed();
                tracing::warn!(location = %node, error = ?err, "Failed to publish");
            },
        }
        if !matches!(outcome, Outcome::Failed(_)) {
            self.ledger.mark(node.key());
            if let Err(err) = self.ledger.buffered_flush().await {
                tracing::warn!(path = %self.ledger.path().display(), error = ?err, "Could not flush ledger");
            }
        }
        Ok(outcome)
    }

    async fn attempt(&self, repository: &RepositoryHandle, node: &Node) -> Result<Outcome> {
        let location = node.location().to_string();
        if is_excluded(&location, &self.params.excludes) {
            return Ok(Outcome::Skipped(SkipReason::Excluded));
        }
        if self.ledger.contains(&node.key()) {
            return Ok(Outcome::Skipped(SkipReason::Visited));
        }
        match ArtifactKind::from_name(node.name()) {
            ArtifactKind::Symbol => {},
            ArtifactKind::Archive => exn::bail!(ErrorKind::ArchiveExpansion(location)),
            ArtifactKind::Other => exn::bail!(ErrorKind::UnsupportedArtifact(location)),
        }

        let stream = match repository.open(node).await {
            Ok(stream) => stream,
            Err(err) => {
                let kind = if err.is_not_found() {
                    ErrorKind::NotFound(location)
                } else {
                    ErrorKind::Transport(location)
                };
                return Err(err.raise(kind));
            },
        };
        let hasher = Arc::clone(&self.hasher);
        let (stream, hash) = tokio::task::spawn_blocking(move || {
            let mut stream = stream;
            let hash = hasher.hash(&mut *stream);
            (stream, hash)
        })
        .await
        .or_raise(|| ErrorKind::Transport(location.clone()))?;
        let Some(hash) = hash.filter(|hash| !hash.is_empty()) else {
            exn::bail!(ErrorKind::HashUnavailable(location));
        };

        let filename = node.name().to_string();
        let existing = self.store.find_symbol(Some(&hash), &filename).await.or_raise(|| ErrorKind::Store)?;
        let overwritten = existing.is_some();
        if overwritten && !self.params.overwrite {
            return Ok(Outcome::Skipped(SkipReason::Existing));
        }
        if overwritten {
            tracing::info!(location = %node, %hash, "Overwriting existing symbol");
        }

        let root = self.params.store_root.clone();
        let symbol = if self.params.link_mode {
            drop(stream);
            let (f, h, l) = (filename.clone(), hash.clone(), location.clone());
            let store_path = tokio::task::spawn_blocking(move || layout::write_pointer(&root, &f, &h, &l))
                .await
                .or_raise(|| ErrorKind::StoreFiles(location.clone()))??;
            Symbol::new(hash, filename).with_origin_url(location).with_store_path(store_path)
        } else {
            let (f, h) = (filename.clone(), hash.clone());
            let store_path = tokio::task::spawn_blocking(move || {
                let mut stream = stream;
                layout::copy_into(&root, &f, &h, &mut *stream)
            })
            .await
            .or_raise(|| ErrorKind::StoreFiles(location.clone()))??;
            // The copy under the store root is the only location recorded.
            Symbol::new(hash, filename).with_store_path(store_path)
        };
        self.store.store_symbol(&symbol).await.or_raise(|| ErrorKind::Store)?;
        Ok(Outcome::Published {
            overwritten,
            store_path: symbol.store_path.unwrap_or_default(),
        })
    }

    async fn record_source(&self, location: &str, success: bool) -> Result<()> {
        let mut source = self
            .store
            .find_source(location)
            .await
            .or_raise(|| ErrorKind::Store)?
            .unwrap_or_else(|| Source::new(location));
        if success {
            source.record_success();
        } else {
            source.record_failure();
        }
        self.store.store_source(&source).await.or_raise(|| ErrorKind::Store)
    }

    /// Persist the ledger and hand back the run's counters.
    ///
    /// A fatal store error seen by the worker takes precedence over a ledger
    /// failure.
    pub async fn finish(mut self) -> Result<PublishReport> {
        let committed = self.ledger.commit().await;
        if let Some(fatal) = self.fatal.take() {
            if let Err(err) = committed {
                tracing::warn!(error = ?err, "Could not commit ledger after store failure");
            }
            return Err(fatal);
        }
        committed?;
        Ok(self.report)
    }
}

#[async_trait]
impl Worker for Publisher {
    type Item = Artifact;

    async fn process(&mut self, artifact: Artifact) -> ControlFlow<()> {
        match self.deploy(&artifact.repository, &artifact.node).await {
            Ok(_) => ControlFlow::Continue(()),
            Err(err) => {
                tracing::error!(location = %artifact.node, error = ?err, "Symbol store failed, stopping");
                self.fatal = Some(err);
                ControlFlow::Break(())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::FormatChain;
    use std::io::Read;
    use symsrv_storage::ReadSeek;
    use symsrv_storage::backend::MockRepository;
    use symsrv_store::Database;

    /// Hashes `HASH:<value>` contents to `<value>`.
    struct Marker;
    impl HashProvider for Marker {
        fn name(&self) -> &str {
            "marker"
        }

        fn hash(&self, stream: &mut dyn ReadSeek) -> Option<String> {
            let mut contents = String::new();
            stream.read_to_string(&mut contents).ok()?;
            contents.strip_prefix("HASH:").map(String::from)
        }
    }

    struct Fixture {
        store_dir: tempfile::TempDir,
        db: Database,
        mock: Arc<MockRepository>,
        repository: RepositoryHandle,
        root: Node,
    }
    impl Fixture {
        async fn new(files: &[(&str, &str)]) -> Self {
            let store_dir = tempfile::tempdir().unwrap();
            let db = Database::connect_in_memory().await.unwrap();
            let mock = Arc::new(MockRepository::with_files(files.iter().map(|(path, contents)| (*path, contents.as_bytes()))));
            let repository: RepositoryHandle = mock.clone();
            let root = repository.roots().await.unwrap().remove(0);
            Self {
                store_dir,
                db,
                mock,
                repository,
                root,
            }
        }

        fn params(&self) -> Params {
            Params::new(self.store_dir.path()).with_flush_every(1)
        }

        fn publisher(&self, params: Params) -> Publisher {
            let ledger = Ledger::new(params.ledger_path(), params.flush_every);
            let hasher: Arc<dyn HashProvider> = Arc::new(FormatChain::new().with(Marker));
            Publisher::new(params, SymbolStore::from(&self.db), ledger, hasher)
        }

        async fn node(&self, name: &str) -> Node {
            let children = self.repository.children(&self.root).await.unwrap();
            children.into_iter().find(|child| child.name() == name).unwrap()
        }
    }

    #[tokio::test]
    async fn test_publish_copy_mode() {
        let fixture = Fixture::new(&[("a.exe", "HASH:H1")]).await;
        let mut publisher = fixture.publisher(fixture.params());
        let node = fixture.node("a.exe").await;
        let outcome = publisher.deploy(&fixture.repository, &node).await.unwrap();
        let Outcome::Published { overwritten, store_path } = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert!(!overwritten);
        assert_eq!(store_path, "a.exe/H1/a.exe");
        let copied = std::fs::read(publisher.params().store_root.join("a.exe/H1/a.exe")).unwrap();
        assert_eq!(copied, b"HASH:H1");

        let store = SymbolStore::from(&fixture.db);
        let symbol = store.find_symbol(Some("H1"), "a.exe").await.unwrap().unwrap();
        assert_eq!(symbol.origin_url, None);
        assert_eq!(symbol.store_path.as_deref(), Some("a.exe/H1/a.exe"));
        let source = store.find_source(node.location()).await.unwrap().unwrap();
        assert!(source.loaded);
        assert!(publisher.ledger().contains(&node.key()));
    }

    #[tokio::test]
    async fn test_publish_link_mode() {
        let fixture = Fixture::new(&[("b.pdb", "HASH:H2")]).await;
        let mut publisher = fixture.publisher(fixture.params().with_link_mode(true));
        let node = fixture.node("b.pdb").await;
        publisher.deploy(&fixture.repository, &node).await.unwrap();
        let pointer = publisher.params().store_root.join("b.pdb/H2/file.ptr");
        assert_eq!(layout::read_pointer(&pointer).as_deref(), Some(node.location()));
        let symbol = SymbolStore::from(&fixture.db).find_symbol(Some("H2"), "b.pdb").await.unwrap().unwrap();
        assert_eq!(symbol.origin_url.as_deref(), Some(node.location()));
        assert_eq!(symbol.store_path.as_deref(), Some("b.pdb/H2/file.ptr"));
        assert!(!publisher.params().store_root.join("b.pdb/H2/b.pdb").exists());
    }

    #[tokio::test]
    async fn test_existing_symbol_skipped_unless_overwrite() {
        let fixture = Fixture::new(&[("a.exe", "HASH:H1")]).await;
        let store = SymbolStore::from(&fixture.db);
        store.store_symbol(&Symbol::new("H1", "other.exe")).await.unwrap();
        let node = fixture.node("a.exe").await;

        let mut publisher = fixture.publisher(fixture.params());
        let outcome = publisher.deploy(&fixture.repository, &node).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::Existing)));
        // Skips are still marked.
        assert!(publisher.ledger().contains(&node.key()));
        assert_eq!(store.find_source(node.location()).await.unwrap(), None);

        let mut publisher = fixture.publisher(fixture.params().with_overwrite(true));
        let outcome = publisher.deploy(&fixture.repository, &node).await.unwrap();
        assert!(matches!(outcome, Outcome::Published { overwritten: true, .. }));
        assert_eq!(publisher.report().overwritten, 1);
        // The first row keeps its identity; only the location moved.
        let symbols = store.list_symbols().await.unwrap();
        assert_eq!(symbols, vec![Symbol::new("H1", "other.exe").with_store_path("a.exe/H1/a.exe")]);
    }

    #[tokio::test]
    async fn test_visited_and_excluded_are_skipped() {
        let fixture = Fixture::new(&[("a.exe", "HASH:H1"), ("test/b.dll", "HASH:H2")]).await;
        let mut publisher = fixture.publisher(fixture.params().with_excludes(vec!["/test/".to_string()]));
        let node = fixture.node("a.exe").await;
        publisher.ledger.mark(node.key());
        let outcome = publisher.deploy(&fixture.repository, &node).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::Visited)));

        let dir = fixture.node("test").await;
        let excluded = fixture.repository.children(&dir).await.unwrap().remove(0);
        let outcome = publisher.deploy(&fixture.repository, &excluded).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::Excluded)));
        assert_eq!(publisher.report().skipped(), 2);
        assert!(SymbolStore::from(&fixture.db).list_symbols().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_marked() {
        let fixture = Fixture::new(&[("a.zip", "PK"), ("c.exe", "MZ"), ("notes.txt", "x")]).await;
        let mut publisher = fixture.publisher(fixture.params());
        let store = SymbolStore::from(&fixture.db);

        let archive = fixture.node("a.zip").await;
        let Outcome::Failed(err) = publisher.deploy(&fixture.repository, &archive).await.unwrap() else {
            panic!("archive should fail");
        };
        assert!(matches!(&*err, ErrorKind::ArchiveExpansion(_)));

        let unhashable = fixture.node("c.exe").await;
        for _ in 0..2 {
            let Outcome::Failed(err) = publisher.deploy(&fixture.repository, &unhashable).await.unwrap() else {
                panic!("unrecognised content should fail");
            };
            assert!(matches!(&*err, ErrorKind::HashUnavailable(_)));
        }
        let source = store.find_source(unhashable.location()).await.unwrap().unwrap();
        assert_eq!(source.failure_count, 2);
        assert!(!source.loaded);

        let other = fixture.node("notes.txt").await;
        let Outcome::Failed(err) = publisher.deploy(&fixture.repository, &other).await.unwrap() else {
            panic!("unsupported extension should fail");
        };
        assert!(matches!(&*err, ErrorKind::UnsupportedArtifact(_)));

        assert_eq!(publisher.report().failed, 4);
        assert!(publisher.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let fixture = Fixture::new(&[("a.exe", "MZ")]).await;
        let mut publisher = fixture.publisher(fixture.params());
        let node = fixture.node("a.exe").await;
        publisher.deploy(&fixture.repository, &node).await.unwrap();

        fixture.mock.write("a.exe", b"HASH:H1".to_vec()).await.unwrap();
        let outcome = publisher.deploy(&fixture.repository, &node).await.unwrap();
        assert!(matches!(outcome, Outcome::Published { .. }));
        let source = SymbolStore::from(&fixture.db).find_source(node.location()).await.unwrap().unwrap();
        assert!(source.loaded);
        assert_eq!(source.failure_count, 0);
    }

    #[tokio::test]
    async fn test_finish_commits_ledger() {
        let fixture = Fixture::new(&[("a.exe", "HASH:H1")]).await;
        let params = fixture.params().with_flush_every(100);
        let ledger_path = params.ledger_path();
        let mut publisher = fixture.publisher(params);
        let node = fixture.node("a.exe").await;
        publisher.deploy(&fixture.repository, &node).await.unwrap();
        assert!(!ledger_path.exists());
        let report = publisher.finish().await.unwrap();
        assert_eq!(report.published, 1);
        assert!(Ledger::load(&ledger_path, 1).await.contains(&node.key()));
    }
}
