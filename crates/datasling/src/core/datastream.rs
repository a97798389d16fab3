//! Bounded, single-pass row streams.
//!
//! A [`Datastream`] is the only channel between a source adapter and a sink
//! adapter. The producer side ([`RowSender`]) runs on its own task (or
//! blocking worker) and pushes rows into a bounded tokio channel, so a slow
//! sink applies backpressure all the way to the source. Errors raised while
//! producing are delivered as the next item of the stream.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{Result, SlingError};

use super::value::Row;

/// Default number of rows buffered between producer and consumer.
pub const DEFAULT_BUFFER_ROWS: usize = 1000;

/// Upper bound on the rows buffered between producer and consumer.
pub const MAX_BUFFER_ROWS: usize = 1_000_000;

/// Counters shared by both ends of a stream.
#[derive(Debug, Default)]
pub struct StreamStats {
    rows_sent: AtomicU64,
    high_water: AtomicUsize,
}

impl StreamStats {
    /// Rows accepted by the producer side so far.
    pub fn rows_sent(&self) -> u64 {
        self.rows_sent.load(Ordering::Relaxed)
    }

    /// Largest number of rows observed waiting in the buffer.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    fn record_send(&self, buffered: usize) {
        self.rows_sent.fetch_add(1, Ordering::Relaxed);
        self.high_water.fetch_max(buffered, Ordering::Relaxed);
    }
}

/// Check that every field name is non-empty and unique.
pub fn validate_fields(fields: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(fields.len());
    for (i, name) in fields.iter().enumerate() {
        if name.is_empty() {
            return Err(SlingError::parse(1, format!("field {} has an empty name", i + 1)));
        }
        if !seen.insert(name.as_str()) {
            return Err(SlingError::parse(1, format!("duplicate field name '{}'", name)));
        }
    }
    Ok(())
}

/// Producer half of a [`Datastream`].
///
/// Cloning is cheap; all clones feed the same stream.
#[derive(Clone)]
pub struct RowSender {
    tx: mpsc::Sender<Result<Row>>,
    width: usize,
    stats: Arc<StreamStats>,
    cancel: CancellationToken,
}

impl RowSender {
    /// Number of values every row must carry.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Token cancelled when the consuming [`Datastream`] is dropped.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.cancel.is_cancelled()
    }

    fn check_width(&self, row: &Row) -> Result<()> {
        if row.len() != self.width {
            return Err(SlingError::parse(
                self.stats.rows_sent() + 1,
                format!("row has {} values, expected {}", row.len(), self.width),
            ));
        }
        Ok(())
    }

    fn after_send(&self) {
        let buffered = self.tx.max_capacity() - self.tx.capacity();
        self.stats.record_send(buffered);
    }

    /// Push one row, waiting while the buffer is full.
    ///
    /// Returns `Cancelled` once the consumer has dropped the stream.
    pub async fn send(&self, row: Row) -> Result<()> {
        self.check_width(&row)?;
        self.tx
            .send(Ok(row))
            .await
            .map_err(|_| SlingError::Cancelled)?;
        self.after_send();
        Ok(())
    }

    /// Blocking variant of [`send`](Self::send) for producers on blocking threads.
    pub fn blocking_send(&self, row: Row) -> Result<()> {
        self.check_width(&row)?;
        self.tx
            .blocking_send(Ok(row))
            .map_err(|_| SlingError::Cancelled)?;
        self.after_send();
        Ok(())
    }

    /// Deliver a production error to the consumer as the next item.
    pub async fn fail(&self, err: SlingError) {
        // A closed channel means nobody is left to report to.
        let _ = self.tx.send(Err(err)).await;
    }

    /// Blocking variant of [`fail`](Self::fail).
    pub fn blocking_fail(&self, err: SlingError) {
        let _ = self.tx.blocking_send(Err(err));
    }
}

/// A lazily produced, ordered sequence of rows with a fixed field list.
pub struct Datastream {
    fields: Vec<String>,
    rx: mpsc::Receiver<Result<Row>>,
    stats: Arc<StreamStats>,
    cancel: CancellationToken,
    ended: bool,
    _guard: DropGuard,
}

impl Datastream {
    /// Create a producer handle and its stream.
    ///
    /// `capacity` is clamped to `1..=MAX_BUFFER_ROWS`.
    pub fn channel(fields: Vec<String>, capacity: usize) -> (RowSender, Datastream) {
        let (tx, rx) = mpsc::channel(capacity.clamp(1, MAX_BUFFER_ROWS));
        let stats = Arc::new(StreamStats::default());
        let cancel = CancellationToken::new();
        let sender = RowSender {
            tx,
            width: fields.len(),
            stats: Arc::clone(&stats),
            cancel: cancel.clone(),
        };
        let stream = Datastream {
            fields,
            rx,
            stats,
            ended: false,
            _guard: cancel.clone().drop_guard(),
            cancel,
        };
        (sender, stream)
    }

    /// Build a finished stream over in-memory rows.
    pub fn from_rows(fields: Vec<String>, rows: Vec<Row>) -> Result<Datastream> {
        let (sender, stream) = Datastream::channel(fields, rows.len());
        for row in rows {
            sender.check_width(&row)?;
            sender
                .tx
                .try_send(Ok(row))
                .map_err(|e| SlingError::BulkPath(format!("in-memory stream: {}", e)))?;
            sender.after_send();
        }
        Ok(stream)
    }

    /// Ordered field names, fixed for the life of the stream.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Shared counters for this stream.
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Token that is cancelled when this stream is dropped.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the stream was cancelled while still being consumed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel this stream once `parent` is cancelled.
    ///
    /// The producer stops and the consumer reads `Cancelled` instead of a
    /// normal end of stream. Must be called from within a tokio runtime.
    pub fn cancel_on(&self, parent: &CancellationToken) {
        if parent.is_cancelled() {
            self.cancel.cancel();
            return;
        }
        let parent = parent.clone();
        let token = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => token.cancel(),
                _ = token.cancelled() => {}
            }
        });
    }

    /// Receive the next row, or `None` once the producer has finished.
    ///
    /// After cancellation the next item is `Err(Cancelled)`, then `None`.
    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        if self.ended {
            return None;
        }
        if self.cancel.is_cancelled() {
            return self.end_cancelled();
        }
        let item = self.rx.recv().await;
        self.settle(item)
    }

    /// Blocking receive. Must not be called from inside an async context.
    pub fn blocking_next_row(&mut self) -> Option<Result<Row>> {
        if self.ended {
            return None;
        }
        if self.cancel.is_cancelled() {
            return self.end_cancelled();
        }
        let item = self.rx.blocking_recv();
        self.settle(item)
    }

    fn settle(&mut self, item: Option<Result<Row>>) -> Option<Result<Row>> {
        match item {
            None if self.cancel.is_cancelled() => self.end_cancelled(),
            None => {
                self.ended = true;
                None
            }
            item => item,
        }
    }

    fn end_cancelled(&mut self) -> Option<Result<Row>> {
        self.ended = true;
        self.rx.close();
        Some(Err(SlingError::Cancelled))
    }

    /// Drain the stream into memory, stopping at the first error.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await {
            rows.push(row?);
        }
        Ok(rows)
    }
}

impl Stream for Datastream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.ended {
            return Poll::Ready(None);
        }
        if self.cancel.is_cancelled() {
            return Poll::Ready(self.end_cancelled());
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(item) => Poll::Ready(self.settle(item)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for Datastream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastream")
            .field("fields", &self.fields)
            .field("rows_sent", &self.stats.rows_sent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use futures::StreamExt;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_backpressure_bounds_buffer() {
        let (tx, mut stream) = Datastream::channel(fields(&["n"]), 16);
        let producer = tokio::spawn(async move {
            for i in 0..10_000 {
                tx.send(vec![Value::from(i.to_string())]).await?;
            }
            Ok::<_, SlingError>(())
        });

        let mut count = 0u64;
        while let Some(row) = stream.next_row().await {
            let row = row.unwrap();
            assert_eq!(row[0], Value::from(count.to_string()));
            count += 1;
            if count % 100 == 0 {
                tokio::task::yield_now().await;
            }
        }

        producer.await.unwrap().unwrap();
        assert_eq!(count, 10_000);
        assert_eq!(stream.stats().rows_sent(), 10_000);
        assert!(stream.stats().high_water() <= 16);
        assert!(stream.stats().high_water() >= 1);
    }

    #[tokio::test]
    async fn test_rejects_wrong_width() {
        let (tx, _stream) = Datastream::channel(fields(&["a", "b"]), 4);
        let err = tx.send(vec![Value::from("only one")]).await.unwrap_err();
        assert!(matches!(err, SlingError::Parse { line: 1, .. }));
        assert!(tx.send(vec![Value::Null, Value::from("x")]).await.is_ok());
    }

    #[tokio::test]
    async fn test_error_is_delivered_in_order() {
        let (tx, stream) = Datastream::channel(fields(&["a"]), 4);
        tokio::spawn(async move {
            tx.send(vec![Value::from("1")]).await.unwrap();
            tx.fail(SlingError::parse(3, "bad quote")).await;
        });

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(SlingError::Parse { line: 3, .. })));
    }

    #[tokio::test]
    async fn test_drop_cancels_producer() {
        let (tx, stream) = Datastream::channel(fields(&["a"]), 1);
        let token = tx.cancel_token();
        assert!(!token.is_cancelled());
        drop(stream);
        assert!(token.is_cancelled());
        assert!(tx.is_closed());
        let err = tx.send(vec![Value::from("late")]).await.unwrap_err();
        assert!(matches!(err, SlingError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_on_parent_ends_stream_with_cancelled() {
        let parent = CancellationToken::new();
        let (tx, mut stream) = Datastream::channel(fields(&["a"]), 4);
        stream.cancel_on(&parent);
        tx.send(vec![Value::from("1")]).await.unwrap();
        assert!(stream.next_row().await.unwrap().is_ok());

        let producer = tx.cancel_token();
        parent.cancel();
        producer.cancelled().await;
        assert!(stream.is_cancelled());
        assert!(tx.is_closed());

        assert!(matches!(stream.next_row().await, Some(Err(SlingError::Cancelled))));
        assert!(stream.next_row().await.is_none());
    }

    #[tokio::test]
    async fn test_producer_exit_after_cancel_is_not_a_clean_end() {
        let parent = CancellationToken::new();
        parent.cancel();
        let (tx, mut stream) = Datastream::channel(fields(&["a"]), 4);
        stream.cancel_on(&parent);
        drop(tx);
        assert!(matches!(stream.next_row().await, Some(Err(SlingError::Cancelled))));
    }

    #[test]
    fn test_capacity_is_bounded() {
        let (tx, _stream) = Datastream::channel(fields(&["a"]), usize::MAX);
        assert_eq!(tx.tx.max_capacity(), MAX_BUFFER_ROWS);
        let (tx, _stream) = Datastream::channel(fields(&["a"]), 0);
        assert_eq!(tx.tx.max_capacity(), 1);
    }

    #[tokio::test]
    async fn test_from_rows() {
        let rows = vec![
            vec![Value::from("1"), Value::from("a")],
            vec![Value::from("2"), Value::Null],
        ];
        let stream = Datastream::from_rows(fields(&["id", "name"]), rows.clone()).unwrap();
        assert_eq!(stream.fields(), &["id".to_string(), "name".to_string()]);
        assert_eq!(stream.collect_rows().await.unwrap(), rows);

        let bad = Datastream::from_rows(fields(&["id"]), vec![vec![]]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_validate_fields() {
        assert!(validate_fields(&fields(&["a", "b"])).is_ok());
        assert!(validate_fields(&fields(&["a", "a"])).is_err());
        assert!(validate_fields(&fields(&["a", ""])).is_err());
    }
}
