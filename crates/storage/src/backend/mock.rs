//! In-memory repository for testing.

use crate::error::{ErrorKind, Result};
use crate::node::{Node, NodeKind};
use crate::path::validate as validate_path;
use crate::reader::BoxSyncReadSeek;
use crate::Repository;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::RwLock;

/// In-memory repository for testing.
///
/// Files are stored in a `BTreeMap` behind a [`RwLock`]; directories exist
/// implicitly wherever a file path passes through them. Listing a directory
/// registered with [`with_failing_directory`](Self::with_failing_directory)
/// fails, and every [`open`](Repository::open) is recorded so tests can
/// assert which files were actually read.
///
/// # Examples
///
/// ```
/// use symsrv_storage::{Repository, backend::MockRepository};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let repository = MockRepository::with_files([
///     ("bin/app.exe", b"MZ..."),
/// ]);
/// let root = repository.roots().await?.remove(0);
/// let bin = repository.children(&root).await?.remove(0);
/// assert_eq!(repository.children(&bin).await?[0].name(), "app.exe");
/// # Ok(())
/// # }
/// ```
pub struct MockRepository {
    name: String,
    files: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
    failing: HashSet<PathBuf>,
    opened: Mutex<Vec<String>>,
}

impl MockRepository {
    /// Create a mock repository pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockRepository::with_files: invalid path {}", path.display());
            };
            map.insert(validated, data.into());
        }
        Self {
            name: "mock".to_string(),
            files: RwLock::new(map),
            failing: HashSet::new(),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Change the name of the mock repository (also its root location).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make listing `directory` fail with a transport error.
    pub fn with_failing_directory(mut self, directory: impl AsRef<Path>) -> Self {
        match validate_path(directory.as_ref()) {
            Ok(validated) => self.failing.insert(validated),
            Err(_) => panic!("MockRepository::with_failing_directory: invalid path {}", directory.as_ref().display()),
        };
        self
    }

    /// Add or replace a file.
    pub async fn write(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> Result<()> {
        let path = validate_path(path)?;
        self.files.write().await.insert(path, data.into());
        Ok(())
    }

    /// Remove a file, returning whether it existed.
    pub async fn remove(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.files.write().await.remove(&path).is_some())
    }

    /// Locations opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().map(|opened| opened.clone()).unwrap_or_default()
    }

    fn location(&self, relative: &Path) -> String {
        if relative.as_os_str().is_empty() {
            format!("mock://{}", self.name)
        } else {
            format!("mock://{}/{}", self.name, relative.display())
        }
    }

    /// Repository-relative path of a node (everything after the root part).
    fn relative(node: &Node) -> PathBuf {
        node.parts().iter().skip(1).collect()
    }
}
impl Default for MockRepository {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl Repository for MockRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn roots(&self) -> Result<Vec<Node>> {
        Ok(vec![Node::directory(vec![self.name.clone()], self.location(Path::new("")))])
    }

    async fn children(&self, node: &Node) -> Result<Vec<Node>> {
        let directory = Self::relative(node);
        if !node.is_directory() {
            exn::bail!(ErrorKind::InvalidLocation(format!("cannot list file {}", node.location())));
        }
        if self.failing.contains(&directory) {
            exn::bail!(ErrorKind::Transport(format!("listing {} failed", node.location())));
        }
        // Snapshot under the read lock; directories are derived from file paths.
        let mut entries: BTreeMap<String, NodeKind> = BTreeMap::new();
        let mut dirs = BTreeSet::new();
        for path in self.files.read().await.keys() {
            let Ok(rest) = path.strip_prefix(&directory) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next() else {
                continue;
            };
            let name = first.as_os_str().to_string_lossy().into_owned();
            match components.next() {
                Some(_) => dirs.insert(name),
                None => entries.insert(name, NodeKind::File).is_none(),
            };
        }
        for dir in dirs {
            entries.insert(dir, NodeKind::Directory);
        }
        Ok(entries
            .into_iter()
            .map(|(name, kind)| {
                let location = self.location(&directory.join(&name));
                node.child(name, kind, location)
            })
            .collect())
    }

    async fn open(&self, node: &Node) -> Result<BoxSyncReadSeek> {
        let path = Self::relative(node);
        let data = self.files.read().await.get(&path).cloned();
        let Some(data) = data else {
            exn::bail!(ErrorKind::NotFound(node.location().to_string()));
        };
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(node.location().to_string());
        }
        Ok(Box::new(Cursor::new(data)))
    }
}
