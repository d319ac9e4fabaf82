//! Write-back coordinator
//!
//! Drives SQLite's two-phase transaction protocol for one attached table:
//!
//! - `begin` marks the table dirty (rejected for directory origins)
//! - `sync` serializes the whole store into a private temporary archive
//! - `commit` renames the temporary archive over the origin
//! - `rollback` discards the temporary archive
//!
//! The origin file is only ever replaced by a rename of a fully written and
//! fsynced archive, so readers see either the old or the new archive.

use crate::error::{NadekoError, Result};
use crate::format::ArchiveFormat;
use crate::materializer::Materializer;
use crate::options::ModuleOptions;
use crate::source::OriginKind;
use crate::store::BackingStore;
use crate::writer::ArchiveWriter;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
}

#[derive(Debug)]
pub struct WriteBack {
    origin: PathBuf,
    kind: OriginKind,
    /// Sibling of the origin so the final rename stays on one filesystem
    temp: PathBuf,
    state: TransactionState,
}

impl WriteBack {
    pub fn new(origin: &Path, kind: OriginKind) -> Self {
        Self {
            origin: origin.to_path_buf(),
            kind,
            temp: temp_path_for(origin),
            state: TransactionState::Idle,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.kind.is_read_only() {
            return Err(NadekoError::ReadOnlyOrigin(self.origin.clone()));
        }

        if self.state == TransactionState::Active {
            return Err(NadekoError::TransactionActive);
        }

        self.state = TransactionState::Active;
        debug!("Write-back transaction started for {:?}", self.origin);
        Ok(())
    }

    /// Serialize every row into the temporary archive
    ///
    /// Remaining origin entries are materialized first so the archive holds
    /// the whole logical table, not only the rows some scan happened to reach.
    pub fn sync(
        &mut self,
        store: &BackingStore,
        materializer: &Materializer,
        options: &ModuleOptions,
    ) -> Result<()> {
        if self.state == TransactionState::Idle {
            return Ok(());
        }

        let detected = match self.kind {
            OriginKind::Archive(format) => format,
            OriginKind::Directory => return Err(NadekoError::ReadOnlyOrigin(self.origin.clone())),
        };
        let format = ArchiveFormat::for_destination(&self.origin, detected);

        let result = materializer
            .materialize_all(store)
            .and_then(|()| write_archive(store, &self.temp, format, options));

        match result {
            Ok(entries) => {
                debug!(
                    "Synced {} entries as {} into {:?}",
                    entries, format, self.temp
                );
                Ok(())
            }
            Err(e) => {
                self.discard_temp();
                Err(e)
            }
        }
    }

    /// Atomically replace the origin with the synced archive
    pub fn commit(&mut self) -> Result<()> {
        if self.state == TransactionState::Idle {
            return Ok(());
        }
        self.state = TransactionState::Idle;

        if let Err(source) = fs::rename(&self.temp, &self.origin) {
            self.discard_temp();
            return Err(NadekoError::CommitRename {
                temp: self.temp.clone(),
                origin: self.origin.clone(),
                source,
            });
        }

        info!("Committed archive {:?}", self.origin);
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        if self.state == TransactionState::Idle {
            return Ok(());
        }
        self.state = TransactionState::Idle;
        self.discard_temp();

        debug!("Write-back transaction rolled back for {:?}", self.origin);
        Ok(())
    }

    fn discard_temp(&self) {
        match fs::remove_file(&self.temp) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temporary archive {:?}: {}", self.temp, e),
        }
    }
}

impl Drop for WriteBack {
    fn drop(&mut self) {
        self.discard_temp();
    }
}

/// Stream every stored row into a fresh archive at `path`
fn write_archive(
    store: &BackingStore,
    path: &Path,
    format: ArchiveFormat,
    options: &ModuleOptions,
) -> Result<usize> {
    let mut writer = ArchiveWriter::create(path, format, options)?;
    let mut entries = 0;

    store.for_each_row(options.chunk_size, |filename, size, contents| {
        writer.append(filename, size, contents)?;
        entries += 1;
        Ok(())
    })?;

    writer.finish()?;
    Ok(entries)
}

/// `.<origin-name>.<random>.tmp` next to the origin
fn temp_path_for(origin: &Path) -> PathBuf {
    let name = origin
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let file_name = format!(".{}.{:016x}.tmp", name, rand::random::<u64>());

    match origin.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}
