//! Repository crawls.

use crate::classify::{ArtifactKind, is_excluded};
use crate::deploy::{Artifact, Publisher};
use crate::error::{ErrorKind, Result};
use crate::report::PublishReport;
use crate::scheduler::{ForkJoinPool, SerialQueue};
use exn::ResultExt;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use symsrv_storage::{Node, NodeKind, RepositoryHandle};
use tracing::instrument;

struct Crawl {
    repository: RepositoryHandle,
    excludes: Vec<String>,
    pool: ForkJoinPool,
    queue: SerialQueue<Artifact>,
}
impl Crawl {
    /// Route one listed node: directories go back to the pool, eligible files
    /// to the deploy queue, everything else is dropped.
    fn visit(self: &Arc<Self>, node: Node) {
        match node.kind() {
            NodeKind::Directory if is_excluded(node.location(), &self.excludes) => {
                tracing::debug!(location = %node, "Skipping excluded directory");
            },
            NodeKind::Directory => self.pool.submit(traverse(Arc::clone(self), node)),
            NodeKind::File if ArtifactKind::from_name(node.name()).is_eligible() => {
                if !self.queue.submit(Artifact::new(Arc::clone(&self.repository), node)) {
                    tracing::trace!("Deploy worker stopped, dropping artifact");
                }
            },
            NodeKind::File => tracing::trace!(location = %node, "Ignoring file"),
        }
    }
}

fn traverse(crawl: Arc<Crawl>, node: Node) -> BoxFuture<'static, Result<()>> {
    async move {
        if crawl.queue.is_closed() {
            tracing::debug!(location = %node, "Deploy worker stopped, not descending");
            return Ok(());
        }
        let children = crawl
            .repository
            .children(&node)
            .await
            .or_raise(|| ErrorKind::Enumerate(node.location().to_string()))?;
        tracing::trace!(location = %node, count = children.len(), "Listed directory");
        for child in children {
            crawl.visit(child);
        }
        Ok(())
    }
    .boxed()
}

/// Crawl every root of `repository` and publish what it holds.
///
/// Directory listings run `threads` at a time; artifacts are deployed one
/// at a time by a single worker that owns `publisher`. Listing failures are
/// logged and only lose that subtree. Returns an error only if the roots
/// cannot be listed, the symbol store fails, or the ledger cannot be
/// committed at the end.
#[instrument(skip_all, fields(repository = repository.name()))]
pub async fn publish_repository(
    repository: RepositoryHandle,
    publisher: Publisher,
    threads: usize,
) -> Result<PublishReport> {
    let roots = repository
        .roots()
        .await
        .or_raise(|| ErrorKind::Enumerate(repository.name().to_string()))?;
    tracing::info!(roots = roots.len(), threads, "Starting crawl");
    let excludes = publisher.params().excludes.clone();
    let (queue, worker) = SerialQueue::spawn(publisher);
    let crawl = Arc::new(Crawl {
        repository,
        excludes,
        pool: ForkJoinPool::new("traversal", threads),
        queue,
    });
    for root in roots {
        crawl.visit(root);
    }
    crawl.pool.join().await;
    // Last sender: the worker drains its backlog and returns.
    drop(crawl);
    let report = worker.join().await?.finish().await?;
    tracing::info!(%report, "Publish complete");
    Ok(report)
}

/// Publish a single artifact, bypassing the crawl.
#[instrument(skip_all, fields(location = %node))]
pub async fn publish_location(repository: RepositoryHandle, node: Node, publisher: Publisher) -> Result<PublishReport> {
    let mut publisher = publisher;
    publisher.deploy(&repository, &node).await?;
    let report = publisher.finish().await?;
    tracing::info!(%report, "Publish complete");
    Ok(report)
}
