//! Per-attach table state
//!
//! `ArchiveTable` is everything one `CREATE VIRTUAL TABLE ... USING nadeko`
//! owns: the parsed arguments, the backing store, the materializer holding
//! the origin reader and the write-back coordinator holding the temporary
//! path. It is free of FFI so it can be driven directly from tests; the
//! module glue in `vtab` only translates calls.

use crate::args::AttachArgs;
use crate::cursor::LazyCursor;
use crate::error::{NadekoError, Result};
use crate::materializer::{Materializer, OpenSource};
use crate::options::ModuleOptions;
use crate::source::{Origin, OriginKind};
use crate::store::BackingStore;
use crate::transaction::{TransactionState, WriteBack};
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

/// Schema declared to SQLite for every attached table
pub const DECLARED_SCHEMA: &str = "CREATE TABLE x(filename TEXT, contents BLOB)";

/// Cost reported to the planner while the origin may still grow the table
const UNSCANNED_COST: f64 = 1_000_000.0;

pub struct ArchiveTable {
    args: AttachArgs,
    kind: OriginKind,
    options: ModuleOptions,
    store: BackingStore,
    materializer: Materializer,
    write_back: WriteBack,
}

impl ArchiveTable {
    /// Open the origin and bind to the backing store
    ///
    /// With `create` the store relations are created if missing. A store
    /// that already holds progress resumes from it, skipping the origin
    /// entries it has cached.
    pub fn attach(
        conn: Connection,
        args: AttachArgs,
        options: ModuleOptions,
        create: bool,
    ) -> Result<Self> {
        options.validate()?;
        let origin = Origin::open(&args.origin)?;

        let store = BackingStore::new(conn, &args.schema, &args.table);
        if create {
            store.create()?;
        }

        let path = origin.path.clone();
        let open: OpenSource = Box::new(move || Origin::open(&path).map(|origin| origin.source));
        let materializer = Materializer::new(origin.source, open, options.chunk_size);
        materializer.reconcile(&store)?;
        debug!(
            "Store {} resumes at rowid {} ({} origin entries cached)",
            store.table_name(),
            materializer.known(),
            materializer.pulled()
        );

        let write_back = WriteBack::new(&origin.path, origin.kind);

        info!(
            "Attached {}.{} to {:?} ({:?})",
            args.schema, args.table, origin.path, origin.kind
        );

        Ok(Self {
            args,
            kind: origin.kind,
            options,
            store,
            materializer,
            write_back,
        })
    }

    pub fn args(&self) -> &AttachArgs {
        &self.args
    }

    pub fn origin(&self) -> &Path {
        &self.args.origin
    }

    pub fn kind(&self) -> OriginKind {
        self.kind
    }

    pub fn options(&self) -> &ModuleOptions {
        &self.options
    }

    pub fn store(&self) -> &BackingStore {
        &self.store
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.write_back.state()
    }

    pub fn temp_path(&self) -> &Path {
        self.write_back.temp_path()
    }

    /// Rewind `cursor` to the first row
    pub fn filter(&self, cursor: &mut LazyCursor) -> Result<()> {
        cursor.filter(&self.store, &self.materializer)
    }

    /// Move `cursor` to the next row
    pub fn advance(&self, cursor: &mut LazyCursor) -> Result<()> {
        cursor.advance(&self.store, &self.materializer)
    }

    /// Planner cost of a full scan
    pub fn estimated_cost(&self) -> f64 {
        let known = self.materializer.known().max(1) as f64;
        if self.materializer.is_exhausted() {
            known
        } else {
            known.max(UNSCANNED_COST)
        }
    }

    pub fn begin(&mut self) -> Result<()> {
        self.write_back.begin()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.write_back
            .sync(&self.store, &self.materializer, &self.options)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.write_back.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.write_back.rollback()
    }

    /// Insert a row, replacing any row already at `rowid`
    pub fn insert(
        &self,
        rowid: Option<i64>,
        filename: Option<&str>,
        contents: Option<&[u8]>,
    ) -> Result<i64> {
        let filename = filename.ok_or(NadekoError::NullFilename)?;
        let rowid = self
            .store
            .upsert(rowid, filename, contents.unwrap_or_default())?;

        debug!("Inserted '{}' at rowid {}", filename, rowid);
        Ok(rowid)
    }

    /// Rewrite the row at `old_rowid`, moving it when `new_rowid` differs
    pub fn update(
        &self,
        old_rowid: i64,
        new_rowid: i64,
        filename: Option<&str>,
        contents: Option<&[u8]>,
    ) -> Result<()> {
        let filename = filename.ok_or(NadekoError::NullFilename)?;
        if old_rowid != new_rowid {
            self.store.delete(old_rowid)?;
        }
        self.store
            .upsert(Some(new_rowid), filename, contents.unwrap_or_default())?;

        debug!("Updated rowid {} -> {} ('{}')", old_rowid, new_rowid, filename);
        Ok(())
    }

    pub fn delete(&self, rowid: i64) -> Result<()> {
        self.store.delete(rowid)?;
        debug!("Deleted rowid {}", rowid);
        Ok(())
    }

    /// Drop the backing store; the table itself is released by dropping it
    pub fn destroy(&self) -> Result<()> {
        self.store.drop_table()?;
        info!("Destroyed {}.{}", self.args.schema, self.args.table);
        Ok(())
    }
}
