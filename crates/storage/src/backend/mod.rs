//! Repository trait and implementations.
//!
//! A [`Repository`] is anything that can be walked like a directory tree and
//! whose leaves can be opened as seekable byte streams: a local directory, an
//! Artifactory server, an S3-compatible bucket, or an in-memory mock.

mod http;
mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::http::{HttpOptions, HttpRepository};
pub use self::local::LocalRepository;
#[cfg(feature = "mock")]
pub use self::mock::MockRepository;
#[cfg(feature = "s3")]
pub use self::s3::S3Repository;
use crate::error::{ErrorKind, Result};
use crate::node::Node;
use crate::reader::BoxSyncReadSeek;
use crate::RepositoryHandle;
use async_trait::async_trait;
use std::sync::Arc;

/// Unified interface for walking and reading artifact repositories.
///
/// Enumeration is deliberately one level at a time: callers decide how to
/// fan out over directories, so a slow or failing subtree never holds up the
/// rest of the walk.
///
/// # Examples
///
/// ```no_run
/// use symsrv_storage::{Node, Repository, error::Result};
///
/// async fn count_files(repo: &dyn Repository) -> Result<usize> {
///     let mut pending: Vec<Node> = repo.roots().await?;
///     let mut files = 0;
///     while let Some(node) = pending.pop() {
///         for child in repo.children(&node).await? {
///             if child.is_directory() {
///                 pending.push(child);
///             } else {
///                 files += 1;
///             }
///         }
///     }
///     Ok(files)
/// }
/// ```
#[async_trait]
pub trait Repository: Send + Sync {
    /// Name of the repository (used for logging only).
    fn name(&self) -> &str;

    /// Top-level directory nodes where a crawl starts.
    async fn roots(&self) -> Result<Vec<Node>>;

    /// Immediate children of a directory node.
    ///
    /// Listing a file node is an error. Entries that are neither files nor
    /// directories (broken symlinks, for example) are silently dropped.
    async fn children(&self, node: &Node) -> Result<Vec<Node>>;

    /// Open a file node for buffered, seekable reads.
    ///
    /// Returns a `'static` boxed stream suitable for use inside
    /// [`spawn_blocking`](tokio::task::spawn_blocking). The async setup
    /// (opening the file, discovering the remote length) happens before
    /// returning; remote streams then block on each window fetch, so they
    /// **must** be read from a blocking context. Dropping the stream releases
    /// the file handle or connection.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn open(&self, node: &Node) -> Result<BoxSyncReadSeek>;
}

/// Resolve a single location (a local path or an `http(s)://` URL) to the
/// repository that can open it and the file node itself.
pub async fn locate(location: &str, options: &HttpOptions) -> Result<(RepositoryHandle, Node)> {
    let lowered = location.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        let (repository, node) = HttpRepository::locate(location, options.clone())?;
        return Ok((Arc::new(repository), node));
    }
    let (repository, node) = LocalRepository::locate(location).await?;
    if node.is_directory() {
        exn::bail!(ErrorKind::InvalidLocation(format!("{location} is a directory, not a file")));
    }
    Ok((Arc::new(repository), node))
}
