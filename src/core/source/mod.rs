//! Entry sources: one uniform pull interface over archives and directory trees
//!
//! A source hands out entries strictly in order. Each header is only valid
//! until the next call to [`EntrySource::next_entry`]; its bytes are pulled
//! with [`EntrySource::read_chunk`] until it reports 0. Dropping the source
//! closes the underlying file handles.

mod archive;
mod directory;
mod tar_stream;
mod zip_entries;

pub use archive::open_archive;
pub use directory::{relative_path, DirectorySource};
pub use tar_stream::TarStream;
pub use zip_entries::ZipSource;

use crate::error::{NadekoError, Result};
use crate::format::ArchiveFormat;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Largest entry a row can hold; SQLite sizes blobs with an `i32`
pub const MAX_ENTRY_SIZE: u64 = i32::MAX as u64;

/// Header of the entry a source is currently positioned on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Origin-relative path stored as the row's filename
    pub path: String,
    /// Declared size in bytes, if the origin records one
    pub size: Option<u64>,
}

/// Pull interface implemented by every origin reader
pub trait EntrySource {
    /// Advance to the next regular-file entry, or `None` once exhausted
    fn next_entry(&mut self) -> Result<Option<EntryHeader>>;

    /// Copy the next bytes of the current entry into `buf`; 0 at its end
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// What kind of origin a table is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    /// Packed archive in the detected format
    Archive(ArchiveFormat),
    /// Directory tree; never written back
    Directory,
}

impl OriginKind {
    pub fn is_read_only(&self) -> bool {
        matches!(self, OriginKind::Directory)
    }
}

/// An opened origin: where it lives, what it is, and its entry reader
pub struct Origin {
    pub path: PathBuf,
    pub kind: OriginKind,
    pub source: Box<dyn EntrySource>,
}

impl Origin {
    /// Inspect `path` and open the matching reader
    ///
    /// A path that can be listed as a directory is walked; anything else is
    /// opened as an archive with format and filter auto-detection.
    pub fn open(path: &Path) -> Result<Self> {
        let unreadable = |source| NadekoError::OriginUnreadable {
            path: path.to_path_buf(),
            source,
        };

        let metadata = fs::metadata(path).map_err(unreadable)?;

        if metadata.is_dir() {
            fs::read_dir(path).map_err(unreadable)?;
            debug!("Opening directory origin {:?}", path);

            return Ok(Self {
                path: path.to_path_buf(),
                kind: OriginKind::Directory,
                source: Box::new(DirectorySource::open(path)),
            });
        }

        let (format, source) = open_archive(path)?;
        debug!("Opening {} archive origin {:?}", format, path);

        Ok(Self {
            path: path.to_path_buf(),
            kind: OriginKind::Archive(format),
            source,
        })
    }
}

impl std::fmt::Debug for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Origin")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Drain every entry of a source into memory
///
/// Test and tooling helper; the table itself never buffers whole origins.
pub fn read_all(source: &mut dyn EntrySource) -> Result<Vec<(String, Vec<u8>)>> {
    let mut entries = Vec::new();
    let mut buf = [0u8; 4096];

    while let Some(header) = source.next_entry()? {
        let mut data = Vec::new();
        loop {
            let n = source.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
        entries.push((header.path, data));
    }

    Ok(entries)
}
