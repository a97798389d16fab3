//! CSV interchange: decompress-on-read, CSV to [`Datastream`], and back.
//!
//! The path `-` names stdin for sources and stdout for sinks.

pub mod compression;
pub mod reader;
pub mod writer;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::datastream::Datastream;
use crate::error::{Result, SlingError};

pub use compression::{decompress, CompressedWriter, Compression};
pub use reader::{read_compressed_stream, read_stream};
pub use writer::{write_stream, write_stream_into};

/// Path denoting stdin or stdout.
pub const STDIO_PATH: &str = "-";

/// Open a file endpoint (or stdin) as a decompressed CSV stream.
pub async fn open_file_stream(path: &Path, capacity: usize) -> Result<Datastream> {
    info!("Reading {}", display_path(path));
    let reader: Box<dyn Read + Send> = if path.as_os_str() == STDIO_PATH {
        Box::new(io::stdin())
    } else {
        let file = File::open(path).map_err(|e| {
            SlingError::Io(io::Error::new(
                e.kind(),
                format!("cannot open {}: {}", path.display(), e),
            ))
        })?;
        Box::new(BufReader::new(file))
    };
    read_compressed_stream(reader, capacity).await
}

/// Write a stream to a file endpoint (or stdout), compressing by extension.
///
/// A file left incomplete by an error or cancellation is removed.
pub async fn write_file_stream(stream: Datastream, path: &Path) -> Result<u64> {
    let path: PathBuf = path.to_path_buf();
    info!("Writing {}", display_path(&path));
    tokio::task::spawn_blocking(move || {
        if path.as_os_str() == STDIO_PATH {
            return write_encoded(stream, Box::new(io::stdout()), &path);
        }
        let file = File::create(&path).map_err(|e| {
            SlingError::Io(io::Error::new(
                e.kind(),
                format!("cannot create {}: {}", path.display(), e),
            ))
        })?;
        let written = write_encoded(stream, Box::new(file), &path);
        if written.is_err() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Could not remove partial output {}: {}", path.display(), e);
            }
        }
        written
    })
    .await
    .map_err(|e| SlingError::Io(io::Error::other(format!("file writer task: {}", e))))?
}

fn write_encoded(stream: Datastream, sink: Box<dyn Write + Send>, path: &Path) -> Result<u64> {
    let out = CompressedWriter::new(BufWriter::new(sink), Compression::from_path(path))?;
    let (count, out) = writer::encode(stream, out)?;
    out.finish()?.flush()?;
    Ok(count)
}

fn display_path(path: &Path) -> String {
    if path.as_os_str() == STDIO_PATH {
        "<stdio>".to_string()
    } else {
        path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;

    #[tokio::test]
    async fn test_file_round_trip_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv.gz");
        let stream = Datastream::from_rows(
            vec!["k".into(), "v".into()],
            vec![
                vec![Value::from("a"), Value::from("1")],
                vec![Value::from("b"), Value::Null],
            ],
        )
        .unwrap();

        assert_eq!(write_file_stream(stream, &path).await.unwrap(), 2);

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);

        let back = open_file_stream(&path, 4).await.unwrap();
        assert_eq!(back.fields(), &["k".to_string(), "v".to_string()]);
        let rows = back.collect_rows().await.unwrap();
        assert_eq!(rows[1], vec![Value::from("b"), Value::Null]);
    }

    #[tokio::test]
    async fn test_failed_write_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.csv.zst");
        let (tx, stream) = Datastream::channel(vec!["n".into()], 4);
        tokio::spawn(async move {
            for i in 0..100 {
                if tx.send(vec![Value::from(i.to_string())]).await.is_err() {
                    return;
                }
            }
            tx.fail(SlingError::Cancelled).await;
        });

        let err = write_file_stream(stream, &path).await.unwrap_err();
        assert!(matches!(err, SlingError::Cancelled));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = open_file_stream(Path::new("/nonexistent/input.csv"), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, SlingError::Io(_)));
    }
}
