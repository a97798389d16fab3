//! Bulk import through `COPY ... FROM STDIN`.
//!
//! The whole load runs in one transaction. Rows are encoded in COPY text
//! format into a reusable buffer and shipped in chunks; any failure before
//! `COMMIT` rolls everything back.

use bytes::{BufMut, Bytes, BytesMut};
use futures::SinkExt;
use tokio_postgres::Client;
use tracing::{debug, info, warn};

use crate::core::datastream::Datastream;
use crate::core::identifier::{quote_pg_list, TableRef};
use crate::core::value::{display_row, Value};
use crate::error::{describe_db_error, Result, SlingError};

/// Bytes buffered before a chunk is sent to the server.
const CHUNK_BYTES: usize = 64 * 1024;

/// Append one row in COPY text format (tab-separated, `\N` for NULL).
pub fn encode_copy_row(row: &[Value], buf: &mut BytesMut) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b'\t');
        }
        match value {
            Value::Null => buf.put_slice(b"\\N"),
            Value::Text(s) => escape_copy_text(s, buf),
        }
    }
    buf.put_u8(b'\n');
}

fn escape_copy_text(s: &str, buf: &mut BytesMut) {
    for c in s.chars() {
        match c {
            '\\' => buf.put_slice(b"\\\\"),
            '\t' => buf.put_slice(b"\\t"),
            '\n' => buf.put_slice(b"\\n"),
            '\r' => buf.put_slice(b"\\r"),
            _ => {
                let mut tmp = [0u8; 4];
                buf.put_slice(c.encode_utf8(&mut tmp).as_bytes());
            }
        }
    }
}

fn copy_statement(table: &TableRef, fields: &[String]) -> Result<String> {
    Ok(format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
        table.qualified(),
        quote_pg_list(fields)?
    ))
}

async fn rollback(client: &Client, table: &TableRef) {
    if let Err(e) = client.batch_execute("ROLLBACK").await {
        warn!("{}: rollback failed: {}", table, e);
    }
}

/// Data line named in a COPY error context such as
/// `COPY t, line 51, column id: "abc"`.
fn copy_line(context: &str) -> Option<u64> {
    let rest = &context[context.find("line ")? + 5..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Transaction error for a failed COPY.
///
/// When the server names the rejected data line, the row count is the rows
/// before it and the server's context stands in for the row.
fn copy_failure(
    label: &str,
    sent: u64,
    stage: &str,
    err: &tokio_postgres::Error,
    row: Option<String>,
) -> SlingError {
    let context = err
        .as_db_error()
        .and_then(|db| db.where_())
        .map(str::to_string);
    let rows = context
        .as_deref()
        .and_then(copy_line)
        .map(|line| line.saturating_sub(1))
        .unwrap_or(sent);
    SlingError::transaction(
        label,
        rows,
        format!("{}: {}", stage, describe_db_error(err)),
        context.or(row),
    )
}

/// Load `stream` into `table` with `COPY FROM STDIN` in one transaction.
pub(super) async fn copy_in(client: &Client, table: &TableRef, mut stream: Datastream) -> Result<u64> {
    let copy_sql = copy_statement(table, stream.fields())?;
    let label = table.to_string();

    client.batch_execute("BEGIN").await?;
    let sink = match client.copy_in::<str, Bytes>(copy_sql.as_str()).await {
        Ok(sink) => sink,
        Err(e) => {
            rollback(client, table).await;
            return Err(copy_failure(&label, 0, "starting COPY", &e, None));
        }
    };
    // Boxed so the sink can be dropped (aborting the COPY) before ROLLBACK.
    let mut sink = Box::pin(sink);
    debug!("{}", copy_sql);

    let mut buf = BytesMut::with_capacity(CHUNK_BYTES * 2);
    let mut count = 0u64;
    let mut last_row: Option<String> = None;

    while let Some(next) = stream.next_row().await {
        let row = match next {
            Ok(row) => row,
            Err(e) => {
                drop(sink);
                rollback(client, table).await;
                return Err(SlingError::transaction(&label, count, e, None));
            }
        };

        encode_copy_row(&row, &mut buf);
        count += 1;

        if buf.len() >= CHUNK_BYTES {
            if let Err(e) = sink.send(buf.split().freeze()).await {
                drop(sink);
                rollback(client, table).await;
                return Err(copy_failure(
                    &label,
                    count,
                    "sending COPY data",
                    &e,
                    Some(display_row(&row)),
                ));
            }
        }
        last_row = Some(display_row(&row));
    }

    if !buf.is_empty() {
        if let Err(e) = sink.send(buf.split().freeze()).await {
            drop(sink);
            rollback(client, table).await;
            return Err(copy_failure(&label, count, "sending COPY data", &e, last_row));
        }
    }

    if let Err(e) = sink.as_mut().finish().await {
        rollback(client, table).await;
        return Err(copy_failure(&label, count, "finishing COPY", &e, None));
    }

    if let Err(e) = client.batch_execute("COMMIT").await {
        rollback(client, table).await;
        return Err(copy_failure(&label, count, "commit", &e, None));
    }

    info!("Loaded {} rows into {} via COPY", count, table);
    Ok(count)
}
