//! CSV decoding into a [`Datastream`].
//!
//! `csv` drops quoting from decoded fields, so the raw bytes of each record
//! are kept alongside it to tell an unquoted empty field (NULL) from `""`
//! (the empty string).

use std::io::Read;

use csv::{ReaderBuilder, StringRecord};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::core::datastream::{validate_fields, Datastream, RowSender};
use crate::core::value::{Row, Value};
use crate::error::{Result, SlingError};

use super::compression::decompress;

/// Decode CSV from `reader` on a blocking worker.
///
/// Resolves once the header has been read; rows follow through the returned
/// stream. A missing, empty or duplicated header name is a parse error.
pub async fn read_stream<R: Read + Send + 'static>(reader: R, capacity: usize) -> Result<Datastream> {
    spawn_decoder(capacity, move || Ok(reader)).await
}

/// Like [`read_stream`], with [`decompress`] applied on the worker first.
pub async fn read_compressed_stream<R: Read + Send + 'static>(
    reader: R,
    capacity: usize,
) -> Result<Datastream> {
    spawn_decoder(capacity, move || decompress(reader)).await
}

async fn spawn_decoder<R, F>(capacity: usize, open: F) -> Result<Datastream>
where
    R: Read,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    let (header_tx, header_rx) = oneshot::channel();

    tokio::task::spawn_blocking(move || {
        let opened = open().and_then(|r| {
            let mut csv = csv_reader(RawTee::new(r));
            let fields = read_header(&mut csv)?;
            Ok((csv, fields))
        });
        let (mut csv, fields) = match opened {
            Ok(v) => v,
            Err(e) => {
                let _ = header_tx.send(Err(e));
                return;
            }
        };

        let (sender, stream) = Datastream::channel(fields, capacity);
        if header_tx.send(Ok(stream)).is_err() {
            return;
        }
        decode_rows(&mut csv, &sender);
    });

    header_rx
        .await
        .map_err(|_| SlingError::parse(1, "CSV decoder stopped before the header"))?
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(b',')
        .quote(b'"')
        .double_quote(true)
        .has_headers(true)
        .flexible(false)
        .from_reader(reader)
}

fn read_header<R: Read>(csv: &mut csv::Reader<R>) -> Result<Vec<String>> {
    let header = csv.headers().map_err(parse_error)?;
    if header.is_empty() {
        return Err(SlingError::parse(1, "input is empty, expected a header row"));
    }
    let fields: Vec<String> = header.iter().map(str::to_string).collect();
    validate_fields(&fields)?;
    debug!("CSV header: {:?}", fields);
    Ok(fields)
}

fn decode_rows<R: Read>(csv: &mut csv::Reader<RawTee<R>>, sender: &RowSender) {
    let mut record = StringRecord::new();
    loop {
        if sender.is_closed() {
            debug!("CSV consumer went away; stopping decoder");
            return;
        }
        match csv.read_record(&mut record) {
            Ok(true) => {
                let start = record.position().map(|p| p.byte()).unwrap_or(0);
                let end = csv.position().byte();
                let raw = csv.get_mut().record_bytes(start, end);
                let quoted = quoted_fields(&raw, record.len());
                let row: Row = record
                    .iter()
                    .enumerate()
                    .map(|(i, field)| {
                        Value::from_csv_field(field, quoted.get(i).copied().unwrap_or(false))
                    })
                    .collect();
                if sender.blocking_send(row).is_err() {
                    return;
                }
            }
            Ok(false) => return,
            Err(e) => {
                let err = parse_error(e);
                warn!("{}", err);
                sender.blocking_fail(err);
                return;
            }
        }
    }
}

/// Reader that remembers the bytes handed to the CSV parser until the
/// records covering them have been decoded.
struct RawTee<R> {
    inner: R,
    /// Stream offset of `seen[0]`.
    base: u64,
    seen: Vec<u8>,
}

impl<R: Read> RawTee<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            base: 0,
            seen: Vec::new(),
        }
    }

    /// Raw bytes of `start..end`, discarding everything before `end`.
    fn record_bytes(&mut self, start: u64, end: u64) -> Vec<u8> {
        let len = self.seen.len() as u64;
        let lo = start.saturating_sub(self.base).min(len) as usize;
        let hi = end.saturating_sub(self.base).min(len) as usize;
        let raw: Vec<u8> = self.seen.drain(..hi).skip(lo).collect();
        self.base += hi as u64;
        raw
    }
}

impl<R: Read> Read for RawTee<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.seen.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// For each field of one raw record, whether it opens with a quote.
fn quoted_fields(raw: &[u8], width: usize) -> Vec<bool> {
    let mut flags = Vec::with_capacity(width);
    let mut i = raw
        .iter()
        .position(|b| !matches!(b, b'\r' | b'\n'))
        .unwrap_or(raw.len());

    loop {
        let quoted = raw.get(i) == Some(&b'"');
        flags.push(quoted);
        if quoted {
            i += 1;
            while i < raw.len() {
                if raw[i] == b'"' {
                    if raw.get(i + 1) == Some(&b'"') {
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                i += 1;
            }
        }
        while i < raw.len() && !matches!(raw[i], b',' | b'\r' | b'\n') {
            i += 1;
        }
        if raw.get(i) == Some(&b',') && flags.len() < width {
            i += 1;
            continue;
        }
        return flags;
    }
}

/// Map a csv error to a parse error carrying the line number.
fn parse_error(err: csv::Error) -> SlingError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    match err.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => SlingError::parse(
            line,
            format!("record has {} fields, header has {}", len, expected_len),
        ),
        csv::ErrorKind::Io(e) => SlingError::parse(line, format!("read failed: {}", e)),
        _ => SlingError::parse(line, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn input(s: &str) -> Cursor<Vec<u8>> {
        Cursor::new(s.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_reads_header_and_rows() {
        let stream = read_stream(input("id,name\n1,alice\n2,\"b,ob\"\n"), 8)
            .await
            .unwrap();
        assert_eq!(stream.fields(), &["id".to_string(), "name".to_string()]);
        let rows = stream.collect_rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], Value::from("b,ob"));
    }

    #[tokio::test]
    async fn test_quotes_and_newlines() {
        let stream = read_stream(input("a,b\n\"say \"\"hi\"\"\",\"x\ny\"\n"), 8)
            .await
            .unwrap();
        let rows = stream.collect_rows().await.unwrap();
        assert_eq!(rows[0][0], Value::from("say \"hi\""));
        assert_eq!(rows[0][1], Value::from("x\ny"));
    }

    #[tokio::test]
    async fn test_empty_field_is_null() {
        let stream = read_stream(input("a,b,c\n1,,3\n"), 8).await.unwrap();
        let rows = stream.collect_rows().await.unwrap();
        assert_eq!(rows[0], vec![Value::from("1"), Value::Null, Value::from("3")]);
    }

    #[tokio::test]
    async fn test_quoted_empty_field_is_empty_string() {
        let data = "a,b,c\r\n\"\",,\"\"\r\n\"x,\"\"y\"\"\",\"\",\r\n,\"\",\"two\nlines\"\r\n";
        let stream = read_stream(input(data), 1).await.unwrap();
        let rows = stream.collect_rows().await.unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::from(""), Value::Null, Value::from("")],
                vec![Value::from("x,\"y\""), Value::from(""), Value::Null],
                vec![Value::Null, Value::from(""), Value::from("two\nlines")],
            ]
        );
    }

    #[test]
    fn test_quoted_fields_scan() {
        assert_eq!(quoted_fields(b"\"\",,x\n", 3), vec![true, false, false]);
        assert_eq!(quoted_fields(b"\n\"a\"\"b\",\"\"", 2), vec![true, true]);
        assert_eq!(quoted_fields(b"1", 1), vec![false]);
    }

    #[test]
    fn test_raw_tee_discards_consumed_bytes() {
        let mut tee = RawTee::new(input("abcdef"));
        let mut buf = [0u8; 6];
        tee.read_exact(&mut buf).unwrap();
        assert_eq!(tee.record_bytes(1, 3), b"bc".to_vec());
        assert_eq!(tee.record_bytes(3, 6), b"def".to_vec());
        assert!(tee.seen.is_empty());
        assert_eq!(tee.base, 6);
    }

    #[tokio::test]
    async fn test_short_row_is_parse_error_with_line() {
        let stream = read_stream(input("a,b,c\n1,2,3\n4,5\n"), 8).await.unwrap();
        let mut stream = stream;
        assert!(stream.next_row().await.unwrap().is_ok());
        match stream.next_row().await.unwrap() {
            Err(SlingError::Parse { line, message }) => {
                assert_eq!(line, 3);
                assert!(message.contains("2 fields"));
            }
            other => panic!("expected parse error, got {:?}", other.map(|r| r.len())),
        }
        assert!(stream.next_row().await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_header_rejected() {
        let err = read_stream(input("a,a\n1,2\n"), 8).await.unwrap_err();
        assert!(matches!(err, SlingError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let err = read_stream(input(""), 8).await.unwrap_err();
        assert!(matches!(err, SlingError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_compressed_stream() {
        use super::super::compression::{Compression, CompressedWriter};
        use std::io::Write;

        let mut w = CompressedWriter::new(Vec::new(), Compression::Gzip).unwrap();
        w.write_all(b"x\n1\n2\n").unwrap();
        let gz = w.finish().unwrap();

        let stream = read_compressed_stream(Cursor::new(gz), 8).await.unwrap();
        assert_eq!(stream.collect_rows().await.unwrap().len(), 2);
    }
}
