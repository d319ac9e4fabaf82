//! Streaming tar reader
//!
//! Thin adapter from `tar::Archive::entries` to [`EntrySource`]. The entry
//! iterator and the entry it last yielded both borrow the archive, so the
//! archive and its walk live together in one self-referential holder that
//! stays positioned between calls from SQLite. Header checksums, GNU long
//! names and PAX records are handled by the `tar` crate.

use super::{EntryHeader, EntrySource};
use crate::error::{NadekoError, Result};
use ouroboros::self_referencing;
use std::io::{self, Read};
use tar::{Archive, Entries, Entry};
use tracing::trace;

type Stream = Box<dyn Read>;

/// Entry iterator plus the entry it is positioned on
struct Walk<'a> {
    entries: Entries<'a, Stream>,
    current: Option<Entry<'a, Stream>>,
    /// Bytes of `current` not read yet
    remaining: u64,
}

#[self_referencing]
struct TarEntries {
    archive: Archive<Stream>,
    #[borrows(mut archive)]
    #[not_covariant]
    walk: Walk<'this>,
}

/// Entry reader over an uncompressed tar byte stream
pub struct TarStream {
    entries: TarEntries,
}

impl TarStream {
    pub fn new<R: Read + 'static>(reader: R) -> Result<Self> {
        let stream: Stream = Box::new(reader);
        let entries = TarEntries::try_new(Archive::new(stream), |archive| {
            archive.entries().map(|entries| Walk {
                entries,
                current: None,
                remaining: 0,
            })
        })?;

        Ok(Self { entries })
    }
}

fn corrupt(err: io::Error) -> NadekoError {
    NadekoError::CorruptEntry(err.to_string())
}

impl EntrySource for TarStream {
    fn next_entry(&mut self) -> Result<Option<EntryHeader>> {
        self.entries.with_walk_mut(|walk| {
            // The archive skips whatever the caller left unread
            walk.current = None;
            walk.remaining = 0;

            for entry in walk.entries.by_ref() {
                let entry = entry.map_err(corrupt)?;
                let kind = entry.header().entry_type();
                let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

                if !(kind.is_file() || kind.is_contiguous()) {
                    trace!("Skipping non-file tar entry {}", path);
                    continue;
                }

                let size = entry.size();
                walk.remaining = size;
                walk.current = Some(entry);
                return Ok(Some(EntryHeader {
                    path,
                    size: Some(size),
                }));
            }

            Ok(None)
        })
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.entries.with_walk_mut(|walk| {
            let Some(entry) = walk.current.as_mut() else {
                return Ok(0);
            };
            if walk.remaining == 0 || buf.is_empty() {
                return Ok(0);
            }

            let want = buf.len().min(usize::try_from(walk.remaining).unwrap_or(usize::MAX));
            let n = entry.read(&mut buf[..want]).map_err(corrupt)?;
            if n == 0 {
                return Err(NadekoError::CorruptEntry(
                    "tar stream ended inside an entry".to_string(),
                ));
            }

            walk.remaining -= n as u64;
            Ok(n)
        })
    }
}
