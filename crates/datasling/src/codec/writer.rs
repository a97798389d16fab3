//! CSV encoding of a [`Datastream`].

use std::borrow::Cow;
use std::io::Write;

use csv::{QuoteStyle, Terminator, WriterBuilder};
use tracing::debug;

use crate::core::datastream::Datastream;
use crate::core::value::Value;
use crate::error::{Result, SlingError};

/// Write the header and every row of `stream` as CSV, returning the row count.
///
/// Encoding runs on a blocking worker. NULL is written as an empty field and
/// the empty string as `""`; other fields are quoted only when they contain
/// the delimiter, a quote, CR or LF.
pub async fn write_stream<W: Write + Send + 'static>(stream: Datastream, writer: W) -> Result<u64> {
    let (count, _) = write_stream_into(stream, writer).await?;
    Ok(count)
}

/// Like [`write_stream`], also handing back the writer once it is flushed.
pub async fn write_stream_into<W: Write + Send + 'static>(
    stream: Datastream,
    writer: W,
) -> Result<(u64, W)> {
    tokio::task::spawn_blocking(move || encode(stream, writer))
        .await
        .map_err(|e| SlingError::Io(std::io::Error::other(format!("CSV writer task: {}", e))))?
}

pub(crate) fn encode<W: Write>(mut stream: Datastream, writer: W) -> Result<(u64, W)> {
    // Quoting is decided per field by `csv_field`.
    let mut csv = WriterBuilder::new()
        .delimiter(b',')
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(writer);

    let sole = stream.fields().len() == 1;
    csv.write_record(stream.fields().iter().map(|name| quote_text(name)))
        .map_err(write_error)?;

    let mut count = 0u64;
    while let Some(row) = stream.blocking_next_row() {
        let row = row?;
        csv.write_record(row.iter().map(|v| csv_field(v, sole)))
            .map_err(write_error)?;
        count += 1;
    }

    let writer = csv
        .into_inner()
        .map_err(|e| SlingError::Io(std::io::Error::other(e.to_string())))?;
    debug!("CSV writer finished after {} rows", count);
    Ok((count, writer))
}

/// Encoded form of one value. A NULL that is the only field of its record is
/// written as `""`, since a blank line is not a record.
fn csv_field(value: &Value, sole: bool) -> Cow<'_, [u8]> {
    match value {
        Value::Null if sole => Cow::Borrowed(&b"\"\""[..]),
        Value::Null => Cow::Borrowed(&b""[..]),
        Value::Text(s) => quote_text(s),
    }
}

fn quote_text(s: &str) -> Cow<'_, [u8]> {
    if s.is_empty() {
        return Cow::Borrowed(&b"\"\""[..]);
    }
    if !s.bytes().any(|b| matches!(b, b',' | b'"' | b'\r' | b'\n')) {
        return Cow::Borrowed(s.as_bytes());
    }
    Cow::Owned(format!("\"{}\"", s.replace('"', "\"\"")).into_bytes())
}

fn write_error(err: csv::Error) -> SlingError {
    match err.into_kind() {
        csv::ErrorKind::Io(e) => SlingError::Io(e),
        other => SlingError::Io(std::io::Error::other(format!("{:?}", other))),
    }
}
