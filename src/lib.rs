//! # Nadeko - Archives as SQLite Tables
//!
//! `nadeko` is an SQLite virtual table module that exposes an archive file or
//! a directory tree as a two-column table `(filename, contents)`:
//!
//! - **Lazy materialization**: entries are read from the origin only when a
//!   scan reaches them, and cached as rows in a `<table>_store` relation
//! - **Mutable**: rows can be inserted, updated and deleted like any table
//! - **Atomic write-back**: committing a write transaction serializes the
//!   table into a fresh archive and renames it over the original
//! - **Formats**: tar (plain, gzip, zstd, xz) and zip; directories read-only
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nadeko::{register_default_module, Result};
//! use rusqlite::Connection;
//!
//! # fn main() -> Result<()> {
//! let conn = Connection::open("catalog.db")?;
//! register_default_module(&conn)?;
//!
//! conn.execute_batch("CREATE VIRTUAL TABLE files USING nadeko('backup.tar.gz')")?;
//!
//! // Only the entries this scan reaches are decompressed
//! let first: String = conn.query_row("SELECT filename FROM files LIMIT 1", [], |r| r.get(0))?;
//!
//! // Writes rewrite the archive on commit
//! conn.execute(
//!     "INSERT INTO files(filename, contents) VALUES (?1, ?2)",
//!     ("notes/todo.txt", b"ship it".as_slice()),
//! )?;
//! # let _ = first;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use nadeko::{register_module, ModuleOptions, Result};
//! use rusqlite::Connection;
//!
//! # fn main() -> Result<()> {
//! let options = ModuleOptions::from_toml_str("chunk_size = 16384\ncompression_level = 9")?;
//! let conn = Connection::open_in_memory()?;
//! register_module(&conn, options)?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;

// Re-export core modules internally so crate:: paths in core resolve
#[allow(unused_imports)]
pub(crate) use core::{
    args, cursor, format, materializer, options, source, store, table, transaction, vtab, writer,
};

pub use crate::core::{
    args::AttachArgs,
    cursor::LazyCursor,
    format::{ArchiveFormat, Filter},
    materializer::Materializer,
    options::ModuleOptions,
    source::{EntryHeader, EntrySource, Origin, OriginKind},
    store::BackingStore,
    table::ArchiveTable,
    transaction::TransactionState,
    vtab::{register_module, MODULE_NAME},
};
pub use error::{NadekoError, Result};

use rusqlite::Connection;

/// Register the module on `conn` with [`ModuleOptions::default`]
pub fn register_default_module(conn: &Connection) -> Result<()> {
    register_module(conn, ModuleOptions::default())
}
