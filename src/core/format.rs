//! Archive container and compression filter identification
//!
//! Reading detects the format from magic bytes; writing picks it from the
//! destination file name, falling back to whatever was detected on read.

use std::fmt;
use std::path::Path;

/// Compression filter wrapped around a tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    None,
    Gzip,
    Zstd,
    Xz,
}

/// Container format of an archive origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar(Filter),
    Zip,
}

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const ZIP_LOCAL_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";

/// Longest magic sequence [`ArchiveFormat::detect`] looks at
pub const MAGIC_LEN: usize = 6;

impl ArchiveFormat {
    /// Identify a format from the first bytes of a file
    ///
    /// Anything unrecognised is assumed to be an uncompressed tar stream;
    /// the tar reader rejects it later if the headers do not check out.
    pub fn detect(head: &[u8]) -> Self {
        if head.starts_with(ZIP_LOCAL_MAGIC) || head.starts_with(ZIP_EMPTY_MAGIC) {
            ArchiveFormat::Zip
        } else if head.starts_with(GZIP_MAGIC) {
            ArchiveFormat::Tar(Filter::Gzip)
        } else if head.starts_with(ZSTD_MAGIC) {
            ArchiveFormat::Tar(Filter::Zstd)
        } else if head.starts_with(XZ_MAGIC) {
            ArchiveFormat::Tar(Filter::Xz)
        } else {
            ArchiveFormat::Tar(Filter::None)
        }
    }

    /// Pick a writer format from a destination file name
    pub fn from_extension(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();

        let format = if name.ends_with(".zip") {
            ArchiveFormat::Zip
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveFormat::Tar(Filter::Gzip)
        } else if name.ends_with(".tar.zst")
            || name.ends_with(".tar.zstd")
            || name.ends_with(".tzst")
        {
            ArchiveFormat::Tar(Filter::Zstd)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            ArchiveFormat::Tar(Filter::Xz)
        } else if name.ends_with(".tar") {
            ArchiveFormat::Tar(Filter::None)
        } else {
            return None;
        };

        Some(format)
    }

    /// Format used when writing back to `destination`
    pub fn for_destination(destination: &Path, detected: ArchiveFormat) -> Self {
        Self::from_extension(destination).unwrap_or(detected)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::Tar(Filter::None) => write!(f, "tar"),
            ArchiveFormat::Tar(Filter::Gzip) => write!(f, "tar+gzip"),
            ArchiveFormat::Tar(Filter::Zstd) => write!(f, "tar+zstd"),
            ArchiveFormat::Tar(Filter::Xz) => write!(f, "tar+xz"),
        }
    }
}
