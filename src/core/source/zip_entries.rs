//! Zip entry reader
//!
//! Zip is random access, so entries are visited by index. A `ZipFile`
//! borrows the archive, so the current entry is decoded into memory when it
//! is reached and served from there chunk by chunk.

use super::{EntryHeader, EntrySource, MAX_ENTRY_SIZE};
use crate::error::{NadekoError, Result};
use std::fs::File;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Upper bound on buffer space reserved up front for one entry
const PREALLOCATE_LIMIT: u64 = 1 << 20;

pub struct ZipSource {
    archive: ZipArchive<File>,
    next_index: usize,
    current: Cursor<Vec<u8>>,
}

impl ZipSource {
    pub fn new(file: File) -> Result<Self> {
        Ok(Self {
            archive: ZipArchive::new(file)?,
            next_index: 0,
            current: Cursor::new(Vec::new()),
        })
    }
}

impl EntrySource for ZipSource {
    fn next_entry(&mut self) -> Result<Option<EntryHeader>> {
        self.current = Cursor::new(Vec::new());

        while self.next_index < self.archive.len() {
            let mut file = self.archive.by_index(self.next_index)?;
            self.next_index += 1;

            if file.is_dir() {
                continue;
            }

            let size = file.size();
            if size > MAX_ENTRY_SIZE {
                return Err(NadekoError::EntryTooLarge {
                    path: file.name().to_string(),
                    size,
                });
            }

            // Grow with the bytes actually decoded, not the declared size
            let mut data = Vec::with_capacity(size.min(PREALLOCATE_LIMIT) as usize);
            (&mut file).take(size).read_to_end(&mut data)?;

            let header = EntryHeader {
                path: file.name().to_string(),
                size: Some(size),
            };
            self.current = Cursor::new(data);
            return Ok(Some(header));
        }

        Ok(None)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.current.read(buf)?)
    }
}
