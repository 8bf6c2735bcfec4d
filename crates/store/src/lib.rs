//! SQLite symbol store.
//!
//! The store remembers every binary artifact variant that was published, so
//! that later lookups by content hash or by filename can resolve a symbol to
//! where its bytes (or a pointer to them) are kept, and where they came from.
//!
//! # Architecture
//! Two tables:
//! - **Symbols**: one row per artifact variant, identified by its content hash
//!   and the filename it was observed under. Only the location fields
//!   (`origin_url`, `store_path`) are ever rewritten.
//! - **Sources**: one row per ingestion location, counting failed attempts
//!   until the location loads successfully.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::{DATABASE_FILE, Database};
pub use crate::models::{Source, Symbol};
pub use crate::repo::{Stored, SymbolStore};
