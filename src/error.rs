//! Error types for archive-backed virtual tables

use libsqlite3_sys as ffi;
use std::os::raw::c_int;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, NadekoError>;

/// Errors raised while attaching, scanning, mutating or writing back a table
#[derive(Error, Debug)]
pub enum NadekoError {
    /// CREATE VIRTUAL TABLE was given the wrong number of module arguments
    #[error("Wrong number of arguments: expected exactly one origin path, got {0}")]
    ArgumentCount(usize),

    /// The origin argument is not a single quoted string literal
    #[error("Origin path must be a quoted string literal: {0}")]
    UnquotedOrigin(String),

    /// The origin could not be opened for reading
    #[error("Cannot open origin {path:?}: {source}")]
    OriginUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The origin produced a malformed header or entry body
    #[error("Corrupt entry: {0}")]
    CorruptEntry(String),

    /// An entry has no declared size, so its blob cannot be pre-allocated
    #[error("Entry '{0}' does not declare its size")]
    UnsizedEntry(String),

    /// An entry is larger than a single SQLite blob can hold
    #[error("Entry '{path}' is too large to store ({size} bytes)")]
    EntryTooLarge { path: String, size: u64 },

    /// Directory origins cannot be written back
    #[error("Origin {0:?} is a directory and is read-only")]
    ReadOnlyOrigin(PathBuf),

    /// BEGIN while a write-back transaction is already open
    #[error("A write-back transaction is already active")]
    TransactionActive,

    /// The synced archive could not replace the origin
    #[error("Cannot move {temp:?} over {origin:?}: {source}")]
    CommitRename {
        temp: PathBuf,
        origin: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rows must carry a filename to become archive entries
    #[error("filename must not be NULL")]
    NullFilename,

    /// Filenames become archive paths and must be text
    #[error("filename is not valid UTF-8: {0}")]
    InvalidFilename(#[source] std::str::Utf8Error),

    /// Module options failed validation
    #[error("Invalid module options: {0}")]
    InvalidOptions(String),

    /// sqlite3_create_module_v2 returned an error code
    #[error("Module registration failed: {0}")]
    ModuleRegistrationFailed(i32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Options parse error: {0}")]
    OptionsParse(#[from] toml::de::Error),
}

impl NadekoError {
    /// SQLite result code reported to the host engine for this error
    pub fn sqlite_code(&self) -> c_int {
        match self {
            NadekoError::ReadOnlyOrigin(_) => ffi::SQLITE_READONLY,
            NadekoError::NullFilename => ffi::SQLITE_CONSTRAINT_NOTNULL,
            NadekoError::InvalidFilename(_) => ffi::SQLITE_MISMATCH,
            NadekoError::CorruptEntry(_) => ffi::SQLITE_CORRUPT,
            NadekoError::EntryTooLarge { .. } => ffi::SQLITE_TOOBIG,
            NadekoError::CommitRename { .. } | NadekoError::Io(_) | NadekoError::Zip(_) => {
                ffi::SQLITE_IOERR
            }
            NadekoError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => err.extended_code,
            NadekoError::ModuleRegistrationFailed(rc) => *rc,
            _ => ffi::SQLITE_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_maps_to_sqlite_readonly() {
        let err = NadekoError::ReadOnlyOrigin(PathBuf::from("/srv/data"));
        assert_eq!(err.sqlite_code(), ffi::SQLITE_READONLY);
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn test_invalid_filename_maps_to_mismatch() {
        let bytes = [0x66u8, 0xff];
        let err = NadekoError::InvalidFilename(std::str::from_utf8(&bytes).unwrap_err());
        assert_eq!(err.sqlite_code(), ffi::SQLITE_MISMATCH);
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_wrapped_sqlite_error_keeps_extended_code() {
        let err = NadekoError::from(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            None,
        ));
        assert_eq!(err.sqlite_code(), ffi::SQLITE_BUSY);
    }
}
