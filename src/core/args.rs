//! Parsing of CREATE VIRTUAL TABLE arguments
//!
//! SQLite hands the module `argv = [module, db-name, table-name, args...]`
//! with each module argument as raw SQL text, quotes included.

use crate::error::{NadekoError, Result};
use std::path::PathBuf;

/// Number of argv slots SQLite fills before the module arguments
const RESERVED_ARGS: usize = 3;

/// Validated arguments of one attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachArgs {
    /// Schema the virtual table lives in ("main", "temp", or an attached name)
    pub schema: String,
    /// Name the caller gave the virtual table
    pub table: String,
    /// Archive file or directory the table exposes
    pub origin: PathBuf,
}

impl AttachArgs {
    pub fn parse<S: AsRef<str>>(argv: &[S]) -> Result<Self> {
        if argv.len() != RESERVED_ARGS + 1 {
            return Err(NadekoError::ArgumentCount(
                argv.len().saturating_sub(RESERVED_ARGS),
            ));
        }

        let origin = unquote(argv[3].as_ref())?;

        Ok(Self {
            schema: argv[1].as_ref().to_string(),
            table: argv[2].as_ref().to_string(),
            origin: PathBuf::from(origin),
        })
    }

    /// Name of the backing store relation
    pub fn store_table(&self) -> String {
        store_table_name(&self.table)
    }
}

/// Backing store relation name for a virtual table
pub fn store_table_name(table: &str) -> String {
    format!("{}_{}", table, STORE_SUFFIX)
}

/// Materialization progress relation name for a virtual table
pub fn progress_table_name(table: &str) -> String {
    format!("{}_{}", table, PROGRESS_SUFFIX)
}

/// Shadow suffix of the cached rows
pub const STORE_SUFFIX: &str = "store";

/// Shadow suffix of the materialization progress record
pub const PROGRESS_SUFFIX: &str = "progress";

/// Every suffix SQLite should report as a shadow table to `xShadowName`
pub const SHADOW_SUFFIXES: [&str; 2] = [STORE_SUFFIX, PROGRESS_SUFFIX];

/// Strip exactly one pair of matching quotes from a module argument
pub fn unquote(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let invalid = || NadekoError::UnquotedOrigin(raw.to_string());

    let quote = match trimmed.chars().next() {
        Some(q @ ('\'' | '"')) => q,
        _ => return Err(invalid()),
    };

    if trimmed.len() < 2 || !trimmed.ends_with(quote) {
        return Err(invalid());
    }

    let inner = &trimmed[1..trimmed.len() - 1];
    if inner.contains(quote) || inner.is_empty() {
        return Err(invalid());
    }

    Ok(inner.to_string())
}

/// Quote an SQL identifier
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
