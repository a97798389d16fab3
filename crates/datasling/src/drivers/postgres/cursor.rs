//! Cursor-based row streaming, the fallback export path.
//!
//! The query runs inside a read-only transaction through a server-side
//! cursor; a background task fetches one page at a time with the simple-query
//! protocol, so every value arrives as text exactly as the server renders it.

use std::sync::Arc;

use tokio_postgres::Client;
use tracing::{debug, warn};

use crate::core::catalog::DbKind;
use crate::core::datastream::{validate_fields, Datastream, RowSender};
use crate::error::Result;

use super::text_rows;

const CURSOR_NAME: &str = "datasling_cursor";

/// Open a cursor for `sql` and stream its rows.
///
/// Resolves once the cursor is declared, so query errors surface here rather
/// than through the stream.
pub(super) async fn stream_rows(
    client: Arc<Client>,
    kind: DbKind,
    sql: &str,
    fetch_size: usize,
    capacity: usize,
) -> Result<Datastream> {
    let sql = trim_statement(sql);
    let statement = client.prepare(sql).await?;
    let fields: Vec<String> = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    validate_fields(&fields)?;

    if let Err(e) = client.batch_execute(&declare_statement(kind, sql)).await {
        let _ = client.batch_execute("ROLLBACK").await;
        return Err(e.into());
    }
    debug!("Declared cursor for {} fields, fetch size {}", fields.len(), fetch_size);

    let (tx, stream) = Datastream::channel(fields, capacity);
    tokio::spawn(fetch_pages(client, tx, fetch_size));
    Ok(stream)
}

fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

fn declare_statement(kind: DbKind, sql: &str) -> String {
    let scroll = if kind.capabilities().no_scroll_cursor {
        "NO SCROLL "
    } else {
        ""
    };
    format!(
        "BEGIN READ ONLY; DECLARE {} {}CURSOR FOR {}",
        CURSOR_NAME, scroll, sql
    )
}

enum PageEnd {
    Exhausted,
    ConsumerGone,
}

async fn fetch_pages(client: Arc<Client>, tx: RowSender, fetch_size: usize) {
    let fetch = format!("FETCH {} FROM {}", fetch_size, CURSOR_NAME);
    let cancel = tx.cancel_token();

    let outcome: Result<PageEnd> = async {
        loop {
            let messages = tokio::select! {
                _ = cancel.cancelled() => return Ok(PageEnd::ConsumerGone),
                m = client.simple_query(&fetch) => m?,
            };
            let rows = text_rows(messages);
            if rows.is_empty() {
                return Ok(PageEnd::Exhausted);
            }
            for row in rows {
                if tx.send(row).await.is_err() {
                    return Ok(PageEnd::ConsumerGone);
                }
            }
        }
    }
    .await;

    match outcome {
        Ok(PageEnd::Exhausted) => {
            let close = format!("CLOSE {}; COMMIT", CURSOR_NAME);
            if let Err(e) = client.batch_execute(&close).await {
                let _ = client.batch_execute("ROLLBACK").await;
                tx.fail(e.into()).await;
            }
        }
        Ok(PageEnd::ConsumerGone) => {
            debug!("Cursor consumer went away; rolling back");
            let _ = client.batch_execute("ROLLBACK").await;
        }
        Err(e) => {
            warn!("Cursor fetch failed: {}", e);
            let _ = client.batch_execute("ROLLBACK").await;
            tx.fail(e).await;
        }
    }
}
