//! Artifact repository access.
//!
//! Two concerns live here:
//!
//! - **Enumeration**: the [`Repository`] trait walks a directory-like tree of
//!   [`Node`]s (a local directory, an Artifactory server, an S3 bucket) one
//!   level at a time.
//! - **Streaming reads**: every file node can be opened as a seekable,
//!   buffered [`ReadSeek`] stream. Remote streams fetch fixed-size windows with
//!   ranged requests so that format parsers can jump around a multi-hundred-MB
//!   binary without downloading all of it.

pub mod backend;
pub mod error;
mod node;
mod path;
pub mod reader;

pub use crate::backend::{Repository, locate};
pub use crate::node::{Node, NodeKind};
pub use crate::path::{normalize_separators, validate as validate_path};
pub use crate::reader::{BoxSyncReadSeek, DEFAULT_WINDOW_SIZE, ReadSeek};
use std::sync::Arc;

pub type RepositoryHandle = Arc<dyn Repository + Send + Sync>;
