//! Archive writers used by sync
//!
//! Entries are appended one at a time from a streaming reader, so a sync
//! never holds more than one chunk of a blob in memory for tar output.

use crate::error::Result;
use crate::format::{ArchiveFormat, Filter};
use crate::options::ModuleOptions;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{EntryType, Header};
use xz2::write::XzEncoder;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Default xz preset when no level is configured
const XZ_DEFAULT_LEVEL: u32 = 6;

/// Compression filter around the tar byte stream
enum TarSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
    Xz(XzEncoder<BufWriter<File>>),
}

impl TarSink {
    fn new(file: BufWriter<File>, filter: Filter, level: Option<i32>) -> Result<Self> {
        let sink = match filter {
            Filter::None => TarSink::Plain(file),
            Filter::Gzip => {
                let level = level
                    .map(|l| flate2::Compression::new(l.clamp(0, 9) as u32))
                    .unwrap_or_default();
                TarSink::Gzip(GzEncoder::new(file, level))
            }
            Filter::Zstd => TarSink::Zstd(zstd::stream::write::Encoder::new(
                file,
                level.unwrap_or(zstd::DEFAULT_COMPRESSION_LEVEL),
            )?),
            Filter::Xz => {
                let level = level.map_or(XZ_DEFAULT_LEVEL, |l| l.clamp(0, 9) as u32);
                TarSink::Xz(XzEncoder::new(file, level))
            }
        };
        Ok(sink)
    }

    /// Flush the filter trailer and hand back the buffered file
    fn finish(self) -> io::Result<BufWriter<File>> {
        match self {
            TarSink::Plain(file) => Ok(file),
            TarSink::Gzip(encoder) => encoder.finish(),
            TarSink::Zstd(encoder) => encoder.finish(),
            TarSink::Xz(encoder) => encoder.finish(),
        }
    }
}

impl Write for TarSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TarSink::Plain(w) => w.write(buf),
            TarSink::Gzip(w) => w.write(buf),
            TarSink::Zstd(w) => w.write(buf),
            TarSink::Xz(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TarSink::Plain(w) => w.flush(),
            TarSink::Gzip(w) => w.flush(),
            TarSink::Zstd(w) => w.flush(),
            TarSink::Xz(w) => w.flush(),
        }
    }
}

/// Writer for one archive file in a fixed format
pub struct ArchiveWriter {
    inner: Inner,
}

enum Inner {
    Tar {
        builder: tar::Builder<TarSink>,
        mode: u32,
        mtime: u64,
    },
    Zip {
        writer: ZipWriter<BufWriter<File>>,
        options: SimpleFileOptions,
    },
}

impl ArchiveWriter {
    /// Create `path` (truncating it) and prepare to write `format`
    pub fn create(path: &Path, format: ArchiveFormat, options: &ModuleOptions) -> Result<Self> {
        let file = BufWriter::with_capacity(options.chunk_size, File::create(path)?);

        let inner = match format {
            ArchiveFormat::Tar(filter) => {
                let sink = TarSink::new(file, filter, options.compression_level)?;
                let mtime = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);

                Inner::Tar {
                    builder: tar::Builder::new(sink),
                    mode: options.file_mode,
                    mtime,
                }
            }
            ArchiveFormat::Zip => {
                let zip_options = SimpleFileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .compression_level(options.compression_level.map(i64::from))
                    .unix_permissions(options.file_mode);

                Inner::Zip {
                    writer: ZipWriter::new(file),
                    options: zip_options,
                }
            }
        };

        Ok(Self { inner })
    }

    /// Append a regular-file entry of exactly `size` bytes read from `data`
    pub fn append(&mut self, path: &str, size: u64, data: &mut dyn Read) -> Result<()> {
        match &mut self.inner {
            Inner::Tar { builder, mode, mtime } => {
                let mut header = Header::new_gnu();
                header.set_entry_type(EntryType::Regular);
                header.set_size(size);
                header.set_mode(*mode);
                header.set_mtime(*mtime);
                builder.append_data(&mut header, path, data)?;
            }
            Inner::Zip { writer, options } => {
                writer.start_file(path, options.large_file(size > u64::from(u32::MAX)))?;
                io::copy(data, writer)?;
            }
        }
        Ok(())
    }

    /// Write trailers and flush everything to disk
    pub fn finish(self) -> Result<()> {
        let mut file = match self.inner {
            Inner::Tar { builder, .. } => builder.into_inner()?.finish()?,
            Inner::Zip { writer, .. } => writer.finish()?,
        };

        file.flush()?;
        file.get_ref().sync_all()?;
        Ok(())
    }
}
