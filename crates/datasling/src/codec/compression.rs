//! Compression envelopes for file endpoints.
//!
//! | Format | Signature            | Read        | Write (extension) |
//! |--------|----------------------|-------------|-------------------|
//! | gzip   | `1f 8b`              | yes         | `.gz`             |
//! | zstd   | `28 b5 2f fd`        | yes         | `.zst`            |
//! | bzip2  | `BZh`                | rejected    | no                |
//! | xz     | `fd 37 7a 58 5a 00`  | rejected    | no                |
//! | zip    | `PK 03 04`           | rejected    | no                |

use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use tracing::debug;

use crate::error::{Result, SlingError};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const ZIP_MAGIC: &[u8] = &[0x50, 0x4b, 0x03, 0x04];

/// Longest signature we look for.
const PEEK_LEN: u64 = 6;

/// Supported compression formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Infer output compression from a file name.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("gz") => Compression::Gzip,
            Some(ext) if ext.eq_ignore_ascii_case("zst") => Compression::Zstd,
            _ => Compression::None,
        }
    }

    /// Identify the compression of a leading byte sequence.
    ///
    /// Recognised but unsupported formats are a `Compression` error.
    pub fn detect(head: &[u8]) -> Result<Self> {
        if head.starts_with(GZIP_MAGIC) {
            return Ok(Compression::Gzip);
        }
        if head.starts_with(ZSTD_MAGIC) {
            return Ok(Compression::Zstd);
        }
        for (magic, name) in [(BZIP2_MAGIC, "bzip2"), (XZ_MAGIC, "xz"), (ZIP_MAGIC, "zip")] {
            if head.starts_with(magic) {
                return Err(SlingError::Compression(format!(
                    "{} input is not supported; decompress it first",
                    name
                )));
            }
        }
        Ok(Compression::None)
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

/// Wrap `reader` in a decoder matching its leading bytes.
///
/// The signature bytes are read ahead and replayed, so the returned reader
/// yields the full stream. Uncompressed input is passed through unchanged.
pub fn decompress<R: Read + Send + 'static>(mut reader: R) -> Result<Box<dyn Read + Send>> {
    let mut head = Vec::with_capacity(PEEK_LEN as usize);
    (&mut reader).take(PEEK_LEN).read_to_end(&mut head)?;
    let compression = Compression::detect(&head)?;
    debug!("input compression: {}", compression);

    let replayed = Cursor::new(head).chain(reader);
    Ok(match compression {
        Compression::None => Box::new(replayed),
        Compression::Gzip => Box::new(MultiGzDecoder::new(replayed)),
        Compression::Zstd => Box::new(
            zstd::Decoder::new(replayed)
                .map_err(|e| SlingError::Compression(format!("zstd: {}", e)))?,
        ),
    })
}

/// A writer that compresses on the way out.
///
/// [`finish`](Self::finish) must be called to write trailers.
pub enum CompressedWriter<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(zstd::Encoder<'static, W>),
}

impl<W: Write> CompressedWriter<W> {
    /// Wrap `inner` for the given compression.
    pub fn new(inner: W, compression: Compression) -> Result<Self> {
        Ok(match compression {
            Compression::None => CompressedWriter::Plain(inner),
            Compression::Gzip => {
                CompressedWriter::Gzip(GzEncoder::new(inner, flate2::Compression::default()))
            }
            Compression::Zstd => CompressedWriter::Zstd(
                zstd::Encoder::new(inner, 3)
                    .map_err(|e| SlingError::Compression(format!("zstd: {}", e)))?,
            ),
        })
    }

    /// Flush, write any trailer and return the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            CompressedWriter::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            CompressedWriter::Gzip(enc) => {
                let mut w = enc.finish()?;
                w.flush()?;
                Ok(w)
            }
            CompressedWriter::Zstd(enc) => {
                let mut w = enc.finish()?;
                w.flush()?;
                Ok(w)
            }
        }
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressedWriter::Plain(w) => w.write(buf),
            CompressedWriter::Gzip(w) => w.write(buf),
            CompressedWriter::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressedWriter::Plain(w) => w.flush(),
            CompressedWriter::Gzip(w) => w.flush(),
            CompressedWriter::Zstd(w) => w.flush(),
        }
    }
}
