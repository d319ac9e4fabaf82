//! Scan cursor over an attached table
//!
//! A cursor walks rowids in ascending order. Before it looks a row up it asks
//! the table's [`Materializer`] to pull origin entries far enough, so the
//! first scan drives materialization and later scans only read the store.

use crate::error::Result;
use crate::materializer::Materializer;
use crate::store::{BackingStore, StoredRow};

/// Where a cursor currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorState {
    Positioned(StoredRow),
    Exhausted,
}

#[derive(Debug)]
pub struct LazyCursor {
    state: CursorState,
}

impl Default for LazyCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyCursor {
    /// A cursor reports end-of-scan until it is filtered
    pub fn new() -> Self {
        Self {
            state: CursorState::Exhausted,
        }
    }

    /// Rewind to the start and land on the first row, if any
    pub fn filter(&mut self, store: &BackingStore, materializer: &Materializer) -> Result<()> {
        self.state = match seek(store, materializer, 1)? {
            Some(row) => CursorState::Positioned(row),
            None => CursorState::Exhausted,
        };
        Ok(())
    }

    /// Step to the next row in rowid order
    pub fn advance(&mut self, store: &BackingStore, materializer: &Materializer) -> Result<()> {
        let target = match &self.state {
            CursorState::Positioned(row) => row.rowid.saturating_add(1),
            CursorState::Exhausted => return Ok(()),
        };

        self.state = match seek(store, materializer, target)? {
            Some(row) => CursorState::Positioned(row),
            None => CursorState::Exhausted,
        };
        Ok(())
    }

    pub fn eof(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    pub fn rowid(&self) -> Option<i64> {
        match &self.state {
            CursorState::Positioned(row) => Some(row.rowid),
            CursorState::Exhausted => None,
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match &self.state {
            CursorState::Positioned(row) => Some(&row.filename),
            CursorState::Exhausted => None,
        }
    }

    /// Contents of the current row, read from the store on demand
    pub fn contents(&self, store: &BackingStore) -> Result<Option<Vec<u8>>> {
        match &self.state {
            CursorState::Positioned(row) => Ok(Some(store.contents(row.rowid)?)),
            CursorState::Exhausted => Ok(None),
        }
    }
}

/// First row with rowid >= `target`, materializing as far as needed
///
/// A stored row beyond the high-water mark is only returned once every origin
/// entry that could land below it has been pulled, so directly written rows
/// with large rowids never hide origin entries from the scan.
fn seek(
    store: &BackingStore,
    materializer: &Materializer,
    target: i64,
) -> Result<Option<StoredRow>> {
    let mut bound = target;

    loop {
        materializer.ensure_materialized(store, bound)?;
        let row = store.row_at_or_after(target)?;

        if materializer.is_exhausted() {
            return Ok(row);
        }

        let known = materializer.known();
        match row {
            Some(row) if row.rowid <= known => return Ok(Some(row)),
            Some(row) => bound = row.rowid,
            None => bound = known + 1,
        }
    }
}
