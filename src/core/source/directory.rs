//! Directory-tree origins
//!
//! The walk descends into every sub-directory and only surfaces regular
//! files; interior directory nodes never become rows. Entries are visited
//! in file-name order so repeated attaches see the same rowids.

use super::{EntryHeader, EntrySource};
use crate::error::Result;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub struct DirectorySource {
    root: PathBuf,
    walker: walkdir::IntoIter,
    current: Option<io::Take<File>>,
}

impl DirectorySource {
    pub fn open(root: &Path) -> Self {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        Self {
            root: root.to_path_buf(),
            walker,
            current: None,
        }
    }
}

impl EntrySource for DirectorySource {
    fn next_entry(&mut self) -> Result<Option<EntryHeader>> {
        self.current = None;

        for entry in self.walker.by_ref() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let size = entry.metadata().map_err(io::Error::from)?.len();
            let file = File::open(entry.path())?;
            self.current = Some(file.take(size));

            return Ok(Some(EntryHeader {
                path: relative_path(&self.root, entry.path()),
                size: Some(size),
            }));
        }

        Ok(None)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.current.as_mut() {
            Some(file) => Ok(file.read(buf)?),
            None => Ok(0),
        }
    }
}

/// Path of `path` relative to `root`, '/'-separated with no leading separator
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);

    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
