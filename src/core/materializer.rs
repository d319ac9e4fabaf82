//! Lazy materialization of origin entries into the backing store
//!
//! The materializer owns the table's entry source and its high-water mark.
//! Cursors never touch the origin themselves; they ask for everything up to
//! a rowid to be present and the materializer pulls entries, in origin
//! order, until it is. The lock makes that request atomic, so an entry is
//! read from the origin at most once no matter how many cursors are open.
//!
//! Progress is persisted through [`BackingStore::save_progress`] alongside
//! each row. When the host rolls back rows materialized inside a
//! transaction, the persisted progress rolls back with them; the next
//! request notices the mismatch, rewinds the origin and reads those entries
//! again.

use crate::error::{NadekoError, Result};
use crate::source::EntrySource;
use crate::store::{BackingStore, Progress};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Opens a fresh reader positioned before the origin's first entry
pub type OpenSource = Box<dyn Fn() -> Result<Box<dyn EntrySource>>>;

/// Source plus high-water mark, guarded together
struct MaterializerState {
    /// Reader over the origin; `None` once exhausted or not yet reopened
    source: Option<Box<dyn EntrySource>>,
    /// Entries `source` has handed out so far
    consumed: u64,
    /// What this table believes the store holds
    progress: Progress,
}

pub struct Materializer {
    state: Mutex<MaterializerState>,
    open: OpenSource,
    chunk_size: usize,
}

impl Materializer {
    /// `source` is used first; `open` is called whenever the origin must be rewound
    pub fn new(source: Box<dyn EntrySource>, open: OpenSource, chunk_size: usize) -> Self {
        Self {
            state: Mutex::new(MaterializerState {
                source: Some(source),
                consumed: 0,
                progress: Progress::default(),
            }),
            open,
            chunk_size,
        }
    }

    pub fn known(&self) -> i64 {
        self.state.lock().progress.known
    }

    /// True once no further entries can come from the origin
    pub fn is_exhausted(&self) -> bool {
        self.state.lock().progress.exhausted
    }

    /// Number of origin entries behind the rows currently in the store
    pub fn pulled(&self) -> u64 {
        self.state.lock().progress.pulled
    }

    /// Align with the progress recorded in the store
    ///
    /// Called on attach and before every request. A store reopened from disk
    /// resumes where it left off; a store whose transaction was rolled back
    /// rewinds to the last surviving entry.
    pub fn reconcile(&self, store: &BackingStore) -> Result<()> {
        let mut guard = self.state.lock();
        self.reconcile_locked(&mut guard, store)
    }

    fn reconcile_locked(&self, state: &mut MaterializerState, store: &BackingStore) -> Result<()> {
        let recorded = store.progress()?;
        if recorded != state.progress {
            debug!(
                "Store {} records {:?}, expected {:?}; rewinding origin",
                store.table_name(),
                recorded,
                state.progress
            );
            state.progress = recorded;
        }

        if state.progress.exhausted {
            state.source = None;
            return Ok(());
        }

        if state.source.is_none() || state.consumed > state.progress.pulled {
            state.source = Some((self.open)()?);
            state.consumed = 0;
        }

        while state.consumed < state.progress.pulled {
            let Some(source) = state.source.as_mut() else {
                break;
            };
            if source.next_entry()?.is_none() {
                warn!(
                    "Origin ended after {} of {} recorded entries",
                    state.consumed, state.progress.pulled
                );
                state.progress.pulled = state.consumed;
                finish(state, store)?;
                break;
            }
            state.consumed += 1;
        }

        Ok(())
    }

    /// Make sure every origin entry that could land at or below `rowid` is cached
    pub fn ensure_materialized(&self, store: &BackingStore, rowid: i64) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.reconcile_locked(state, store)?;

        while rowid > state.progress.known {
            let Some(source) = state.source.as_mut() else {
                break;
            };

            let Some(header) = source.next_entry()? else {
                debug!("Origin exhausted after {} entries", state.progress.pulled);
                finish(state, store)?;
                break;
            };
            state.consumed += 1;

            let result = header
                .size
                .ok_or_else(|| NadekoError::UnsizedEntry(header.path.clone()))
                .and_then(|size| {
                    let target = free_rowid(store, state.progress.known + 1)?;
                    store.insert_placeholder(target, &header.path, size)?;

                    if let Err(e) = stream_entry(store, &mut **source, target, size, self.chunk_size) {
                        if let Err(cleanup) = store.delete(target) {
                            warn!("Failed to remove partial row {}: {}", target, cleanup);
                        }
                        return Err(e);
                    }
                    Ok((target, size))
                });

            // A failed entry is consumed too, so the table moves past it
            state.progress.pulled += 1;
            let materialized = match result {
                Ok((target, size)) => {
                    state.progress.known = target;
                    debug!(
                        "Materialized '{}' ({} bytes) as rowid {}",
                        header.path, size, target
                    );
                    store.save_progress(&state.progress)
                }
                Err(e) => {
                    store.save_progress(&state.progress)?;
                    Err(e)
                }
            };
            materialized?;
        }

        Ok(())
    }

    /// Pull every remaining entry from the origin
    pub fn materialize_all(&self, store: &BackingStore) -> Result<()> {
        self.ensure_materialized(store, i64::MAX)
    }
}

/// Record that the origin has nothing left and release it
fn finish(state: &mut MaterializerState, store: &BackingStore) -> Result<()> {
    state.source = None;
    state.progress.exhausted = true;
    store.save_progress(&state.progress)
}

/// First rowid at or after `from` not taken by a directly written row
fn free_rowid(store: &BackingStore, from: i64) -> Result<i64> {
    let mut target = from;
    while store.contains(target)? {
        target += 1;
    }
    Ok(target)
}

/// Copy the current entry into the placeholder blob at `rowid`
fn stream_entry(
    store: &BackingStore,
    source: &mut dyn EntrySource,
    rowid: i64,
    size: u64,
    chunk_size: usize,
) -> Result<()> {
    let mut blob = store.open_blob(rowid, false)?;
    let mut buf = vec![0u8; chunk_size];
    let mut offset: u64 = 0;

    loop {
        let n = source.read_chunk(&mut buf)?;
        if n == 0 {
            break;
        }

        if offset + n as u64 > size {
            return Err(NadekoError::CorruptEntry(format!(
                "entry at rowid {} is longer than its declared {} bytes",
                rowid, size
            )));
        }

        // Offsets fit: the placeholder size was checked against i32 on insert
        blob.write_at(&buf[..n], offset as usize)?;
        offset += n as u64;
    }

    if offset < size {
        warn!(
            "Entry at rowid {} ended after {} of {} bytes; tail left zero-filled",
            rowid, offset, size
        );
    }

    Ok(())
}
