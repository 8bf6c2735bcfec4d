//! Repository tree nodes.

use std::fmt;

/// Whether a node can be listed or opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Directory,
    File,
}

/// One entry in a repository tree.
///
/// A node is identified by its ordered path segments (`parts`), which stay
/// stable between runs and are used as the dedup ledger key. The `location`
/// is the human/transport-facing address of the same entry: an absolute
/// filesystem path, or the URL the bytes are downloaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    parts: Vec<String>,
    kind: NodeKind,
    location: String,
}
impl Node {
    pub fn new(parts: Vec<String>, kind: NodeKind, location: impl Into<String>) -> Self {
        Self {
            parts,
            kind,
            location: location.into(),
        }
    }

    pub fn directory(parts: Vec<String>, location: impl Into<String>) -> Self {
        Self::new(parts, NodeKind::Directory, location)
    }

    pub fn file(parts: Vec<String>, location: impl Into<String>) -> Self {
        Self::new(parts, NodeKind::File, location)
    }

    /// Create a node one level below this one.
    pub fn child(&self, name: impl Into<String>, kind: NodeKind, location: impl Into<String>) -> Self {
        let mut parts = self.parts.clone();
        parts.push(name.into());
        Self::new(parts, kind, location)
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Base name of the entry (its last path segment).
    pub fn name(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or_default()
    }

    /// Stable identity of the node across runs.
    ///
    /// Segments are joined with `/` so that `["ab", "c"]` and `["a", "bc"]`
    /// never collide.
    pub fn key(&self) -> String {
        self.parts.join("/")
    }
}
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}
