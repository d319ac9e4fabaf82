//! Backing store: the persistent `(rowid, filename, contents)` relation
//!
//! Every attached table caches its rows in `<table>_store` inside the same
//! schema. The store only ever runs prepared statements and incremental
//! blob I/O against that relation.
//!
//! How far the origin has been read is kept in a one-row `<table>_progress`
//! relation written in the same transaction as the rows it describes, so a
//! rollback reverts both together.

use crate::args::{progress_table_name, quote_identifier, store_table_name};
use crate::error::{NadekoError, Result};
use rusqlite::blob::{Blob, ZeroBlob};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use std::io::{self, BufReader, Read};

/// Column holding entry bytes
const CONTENTS_COLUMN: &str = "contents";

/// A row as a cursor sees it; contents are fetched separately on demand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub rowid: i64,
    pub filename: String,
}

/// Materialization progress as recorded in `<table>_progress`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Highest rowid materialized from the origin
    pub known: i64,
    /// Origin entries consumed, including ones that failed to materialize
    pub pulled: u64,
    /// The origin has no entries left
    pub exhausted: bool,
}

/// Statements over one table's backing relation
pub struct BackingStore {
    conn: Connection,
    schema: String,
    table: String,
    /// `"schema"."table"` for use in SQL text
    qualified: String,
    /// Qualified name of the progress relation
    progress: String,
}

impl BackingStore {
    /// Bind to `<table>_store` in `schema` without touching the database
    pub fn new(conn: Connection, schema: &str, table: &str) -> Self {
        let store_table = store_table_name(table);
        let qualified = format!(
            "{}.{}",
            quote_identifier(schema),
            quote_identifier(&store_table)
        );

        let progress = format!(
            "{}.{}",
            quote_identifier(schema),
            quote_identifier(&progress_table_name(table))
        );

        Self {
            conn,
            schema: schema.to_string(),
            table: store_table,
            qualified,
            progress,
        }
    }

    /// Name of the backing relation
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Create the relations if they do not exist yet
    pub fn create(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {store}(filename TEXT, contents BLOB);
             CREATE TABLE IF NOT EXISTS {progress}(
                 id INTEGER PRIMARY KEY CHECK (id = 0),
                 known INTEGER NOT NULL,
                 pulled INTEGER NOT NULL,
                 exhausted INTEGER NOT NULL
             );
             INSERT OR IGNORE INTO {progress}(id, known, pulled, exhausted) VALUES (0, 0, 0, 0);",
            store = self.qualified,
            progress = self.progress
        ))?;
        Ok(())
    }

    pub fn drop_table(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
            self.qualified, self.progress
        ))?;
        Ok(())
    }

    /// Progress as committed (or pending in the open transaction)
    ///
    /// A missing record reads as nothing materialized yet.
    pub fn progress(&self) -> Result<Progress> {
        let progress = self
            .conn
            .prepare_cached(&format!(
                "SELECT known, pulled, exhausted FROM {} WHERE id = 0",
                self.progress
            ))?
            .query_row([], |row| {
                Ok(Progress {
                    known: row.get(0)?,
                    pulled: u64::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
                    exhausted: row.get(2)?,
                })
            })
            .optional()?;
        Ok(progress.unwrap_or_default())
    }

    pub fn save_progress(&self, progress: &Progress) -> Result<()> {
        let pulled = i64::try_from(progress.pulled).unwrap_or(i64::MAX);
        self.conn
            .prepare_cached(&format!(
                "INSERT OR REPLACE INTO {}(id, known, pulled, exhausted) VALUES (0, ?1, ?2, ?3)",
                self.progress
            ))?
            .execute(params![progress.known, pulled, progress.exhausted])?;
        Ok(())
    }

    /// Largest rowid present, if any
    pub fn max_rowid(&self) -> Result<Option<i64>> {
        let max = self
            .conn
            .prepare_cached(&format!("SELECT max(rowid) FROM {}", self.qualified))?
            .query_row([], |row| row.get(0))?;
        Ok(max)
    }

    pub fn contains(&self, rowid: i64) -> Result<bool> {
        let exists = self
            .conn
            .prepare_cached(&format!("SELECT 1 FROM {} WHERE rowid = ?1", self.qualified))?
            .exists(params![rowid])?;
        Ok(exists)
    }

    /// First row whose rowid is at least `rowid`
    pub fn row_at_or_after(&self, rowid: i64) -> Result<Option<StoredRow>> {
        let row = self
            .conn
            .prepare_cached(&format!(
                "SELECT rowid, filename FROM {} WHERE rowid >= ?1 ORDER BY rowid LIMIT 1",
                self.qualified
            ))?
            .query_row(params![rowid], |row| {
                Ok(StoredRow {
                    rowid: row.get(0)?,
                    filename: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn contents(&self, rowid: i64) -> Result<Vec<u8>> {
        let contents: Option<Vec<u8>> = self
            .conn
            .prepare_cached(&format!(
                "SELECT contents FROM {} WHERE rowid = ?1",
                self.qualified
            ))?
            .query_row(params![rowid], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(contents.unwrap_or_default())
    }

    /// Insert a zero-filled row sized for an entry about to be streamed in
    pub fn insert_placeholder(&self, rowid: i64, filename: &str, size: u64) -> Result<()> {
        let len = i32::try_from(size).map_err(|_| NadekoError::EntryTooLarge {
            path: filename.to_string(),
            size,
        })?;

        self.conn
            .prepare_cached(&format!(
                "INSERT INTO {}(rowid, filename, contents) VALUES (?1, ?2, ?3)",
                self.qualified
            ))?
            .execute(params![rowid, filename, ZeroBlob(len)])?;
        Ok(())
    }

    /// Open the contents blob of `rowid` for incremental I/O
    pub fn open_blob(&self, rowid: i64, read_only: bool) -> Result<Blob<'_>> {
        let blob = self.conn.blob_open(
            self.database_name(),
            &self.table,
            CONTENTS_COLUMN,
            rowid,
            read_only,
        )?;
        Ok(blob)
    }

    /// Insert or replace a row; the store assigns the rowid when none is given
    pub fn upsert(&self, rowid: Option<i64>, filename: &str, contents: &[u8]) -> Result<i64> {
        let rowid = self
            .conn
            .prepare_cached(&format!(
                "INSERT OR REPLACE INTO {}(rowid, filename, contents) VALUES (?1, ?2, ?3) \
                 RETURNING rowid",
                self.qualified
            ))?
            .query_row(params![rowid, filename, contents], |row| row.get(0))?;
        Ok(rowid)
    }

    /// Remove a row; absent rows are not an error
    pub fn delete(&self, rowid: i64) -> Result<()> {
        self.conn
            .prepare_cached(&format!("DELETE FROM {} WHERE rowid = ?1", self.qualified))?
            .execute(params![rowid])?;
        Ok(())
    }

    /// Visit every row in rowid order with a streaming reader over its contents
    pub fn for_each_row<F>(&self, chunk_size: usize, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, u64, &mut dyn Read) -> Result<()>,
    {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT rowid, filename, length(contents) FROM {} ORDER BY rowid",
            self.qualified
        ))?;
        let mut rows = stmt.query([])?;

        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            let filename: Option<String> = row.get(1)?;
            let len: Option<i64> = row.get(2)?;

            let filename = filename.ok_or(NadekoError::NullFilename)?;
            let len = len.unwrap_or(0).max(0) as u64;

            if len == 0 {
                visit(&filename, 0, &mut io::empty())?;
                continue;
            }

            let blob = self.open_blob(rowid, true)?;
            let mut reader = BufReader::with_capacity(chunk_size, blob);
            visit(&filename, len, &mut reader)?;
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn database_name(&self) -> DatabaseName<'_> {
        match self.schema.as_str() {
            "main" => DatabaseName::Main,
            "temp" => DatabaseName::Temp,
            other => DatabaseName::Attached(other),
        }
    }
}
