//! Module-wide options shared by every table attached through one registration
//!
//! Options are handed to SQLite as the module's client data and cloned into
//! each table at attach time. They can be built in code or loaded from TOML:
//!
//! ```toml
//! chunk_size = 131072
//! file_mode = 0o640
//! compression_level = 9
//! ```

use crate::error::{NadekoError, Result};
use serde::{Deserialize, Serialize};

/// Default chunk size for streaming entry bytes (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 16;

/// Default permission bits for entries written on sync
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Tunables for materialization and write-back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleOptions {
    /// Bytes moved per read/write when streaming entries and blobs
    pub chunk_size: usize,

    /// Permission bits stored in every header written on sync
    pub file_mode: u32,

    /// Level for the gzip, zstd or xz encoder (codec default when `None`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<i32>,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            file_mode: DEFAULT_FILE_MODE,
            compression_level: None,
        }
    }
}

impl ModuleOptions {
    /// Parse and validate options from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options: ModuleOptions = toml::from_str(source)?;
        options.validate()?;
        Ok(options)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_file_mode(mut self, file_mode: u32) -> Self {
        self.file_mode = file_mode;
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(NadekoError::InvalidOptions(
                "chunk_size must be greater than zero".to_string(),
            ));
        }

        if self.file_mode > 0o7777 {
            return Err(NadekoError::InvalidOptions(format!(
                "file_mode {:o} has bits outside 0o7777",
                self.file_mode
            )));
        }

        Ok(())
    }
}
