//! Local filesystem repository.
//!
//! Walks a directory on the local filesystem. Directory listings use
//! `tokio::fs`; opened files are plain buffered [`std::fs::File`]s, which
//! already provide native random access.

use crate::error::{ErrorKind, Result};
use crate::node::{Node, NodeKind};
use crate::reader::BoxSyncReadSeek;
use crate::Repository;
use async_trait::async_trait;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};

/// Local filesystem repository rooted at an absolute directory.
///
/// # Examples
///
/// ```no_run
/// use symsrv_storage::backend::LocalRepository;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let repository = LocalRepository::new("builds", "/mnt/builds/symbols")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalRepository {
    name: String,
    root: PathBuf,
}
impl LocalRepository {
    /// Create a repository over an existing, absolute directory.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidLocation`](ErrorKind::InvalidLocation) if the path is
    /// relative or not a directory, and [`NotFound`](ErrorKind::NotFound) if
    /// it does not exist.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidLocation(root.display().to_string()));
        }
        // Use non-async here; it'll only happen once when the repository is
        // configured and it's not worth making the constructor async.
        let metadata = std::fs::metadata(&root).map_err(|e| Self::map_io_error(e, &root))?;
        if !metadata.is_dir() {
            exn::bail!(ErrorKind::InvalidLocation(root.display().to_string()));
        }
        Ok(Self { name: name.into(), root })
    }

    /// Resolve a single local path to a repository rooted at its parent
    /// directory, and the node for the path itself.
    pub(crate) async fn locate(location: impl AsRef<Path>) -> Result<(Self, Node)> {
        let path = location.as_ref();
        let absolute = fs::canonicalize(path).await.map_err(|e| Self::map_io_error(e, path))?;
        let metadata = fs::metadata(&absolute).await.map_err(|e| Self::map_io_error(e, &absolute))?;
        let parent = absolute.parent().unwrap_or(&absolute).to_path_buf();
        let repository = Self::new("local", &parent)?;
        let kind = if metadata.is_dir() { NodeKind::Directory } else { NodeKind::File };
        let name = absolute.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let node = repository.root_node().child(name, kind, absolute.display().to_string());
        Ok((repository, node))
    }

    fn root_node(&self) -> Node {
        let root = self.root.display().to_string();
        Node::directory(vec![root.clone()], root)
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.display().to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Classify one directory entry, following symlinks.
    async fn process_entry(&self, parent: &Node, entry: DirEntry) -> Result<Option<Node>> {
        let path = entry.path();
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            // Note: silently drop what is most likely a broken symlink.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => exn::bail!(Self::map_io_error(e, &path)),
        };
        let kind = match (metadata.is_dir(), metadata.is_file()) {
            (true, _) => NodeKind::Directory,
            (_, true) => NodeKind::File,
            _ => return Ok(None),
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        Ok(Some(parent.child(name, kind, path.display().to_string())))
    }
}

#[async_trait]
impl Repository for LocalRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn roots(&self) -> Result<Vec<Node>> {
        Ok(vec![self.root_node()])
    }

    async fn children(&self, node: &Node) -> Result<Vec<Node>> {
        if !node.is_directory() {
            exn::bail!(ErrorKind::InvalidLocation(format!("cannot list file {}", node.location())));
        }
        let directory = PathBuf::from(node.location());
        let mut entries = fs::read_dir(&directory).await.map_err(|e| Self::map_io_error(e, &directory))?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io_error(e, &directory))? {
            if let Some(child) = self.process_entry(node, entry).await? {
                children.push(child);
            }
        }
        // Directory iteration order is filesystem-dependent.
        children.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(children)
    }

    async fn open(&self, node: &Node) -> Result<BoxSyncReadSeek> {
        let path = Path::new(node.location());
        let file = fs::File::open(path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(BufReader::new(file.into_std().await)))
    }
}
