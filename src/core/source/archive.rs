//! Opening packed archives with format and filter auto-detection

use super::{EntrySource, TarStream, ZipSource};
use crate::error::{NadekoError, Result};
use crate::format::{ArchiveFormat, Filter, MAGIC_LEN};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Open `path` as an archive, sniffing the container and compression filter
pub fn open_archive(path: &Path) -> Result<(ArchiveFormat, Box<dyn EntrySource>)> {
    let unreadable = |source| NadekoError::OriginUnreadable {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(unreadable)?;
    let mut reader = BufReader::new(file);
    let head = reader.fill_buf().map_err(unreadable)?;
    let format = ArchiveFormat::detect(&head[..head.len().min(MAGIC_LEN)]);

    let source: Box<dyn EntrySource> = match format {
        ArchiveFormat::Zip => Box::new(ZipSource::new(reader.into_inner())?),
        ArchiveFormat::Tar(filter) => Box::new(TarStream::new(decoder(filter, reader)?)?),
    };

    Ok((format, source))
}

/// Wrap a buffered file in the decoder for `filter`
fn decoder(filter: Filter, reader: BufReader<File>) -> Result<Box<dyn Read>> {
    let decoded: Box<dyn Read> = match filter {
        Filter::None => Box::new(reader),
        Filter::Gzip => Box::new(flate2::bufread::MultiGzDecoder::new(reader)),
        Filter::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(reader)?),
        Filter::Xz => Box::new(xz2::bufread::XzDecoder::new_multi_decoder(reader)),
    };

    Ok(decoded)
}
