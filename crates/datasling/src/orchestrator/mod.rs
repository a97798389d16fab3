//! Transfer orchestrator - resolves endpoints and wires source to sink.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{open_file_stream, write_file_stream};
use crate::config::{Config, Endpoint};
use crate::core::datastream::Datastream;
use crate::core::identifier::TableRef;
use crate::core::props::{Properties, BUFFER_ROWS};
use crate::core::traits::Connection;
use crate::drivers::connection_for;
use crate::error::{Result, SlingError};
use crate::staging::StagingArea;

/// How long a cancelled transfer may take to stop its producer and remove
/// partial output.
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Transfer orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Endpoint,
    target: Endpoint,
}

/// Result of a transfer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    /// Rows delivered to the target.
    pub rows: u64,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the transfer started.
    pub started_at: DateTime<Utc>,

    /// When the transfer completed.
    pub completed_at: DateTime<Utc>,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Source endpoint description.
    pub source: String,

    /// Target endpoint description.
    pub target: String,

    /// Whether the rows went through the staging area.
    pub staged: bool,
}

impl TransferResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Connections owned by one run.
struct Sessions {
    source: Option<Box<dyn Connection>>,
    target: Option<Box<dyn Connection>>,
}

impl Orchestrator {
    /// Validate the configuration and resolve both endpoints.
    ///
    /// No connection is opened here.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let source = config.source_endpoint()?;
        let target = config.target_endpoint()?;
        Ok(Self {
            config,
            source,
            target,
        })
    }

    /// Resolved source endpoint.
    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    /// Resolved target endpoint.
    pub fn target(&self) -> &Endpoint {
        &self.target
    }

    fn buffer_rows(&self) -> usize {
        self.config.options.buffer_rows
    }

    fn connection_for(&self, endpoint: &Endpoint) -> Result<Option<Box<dyn Connection>>> {
        match endpoint {
            Endpoint::File(_) => Ok(None),
            Endpoint::Table { address, props, .. } => {
                let mut overrides = Properties::new();
                overrides.set_prop(BUFFER_ROWS, self.buffer_rows().to_string());
                overrides.extend(props);
                Ok(Some(connection_for(address.clone(), &overrides)))
            }
        }
    }

    /// Run the transfer.
    ///
    /// Each connection is opened once and closed once, on every exit path.
    /// On cancellation every open stream is cancelled and the sink is given
    /// a grace period to unwind before the connections are closed.
    pub async fn run(self, cancel: Option<CancellationToken>) -> Result<TransferResult> {
        let cancel = cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(SlingError::Cancelled);
        }
        let started_at = Utc::now();
        let timer = Instant::now();

        info!("Starting transfer: {} -> {}", self.source, self.target);

        let mut sessions = Sessions {
            source: self.connection_for(&self.source)?,
            target: self.connection_for(&self.target)?,
        };

        let outcome = {
            let transfer = self.transfer(&mut sessions, &cancel);
            tokio::pin!(transfer);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Transfer cancelled");
                    if tokio::time::timeout(CANCEL_GRACE, &mut transfer).await.is_err() {
                        warn!("Transfer did not stop within {:?}", CANCEL_GRACE);
                    }
                    Err(SlingError::Cancelled)
                }
                r = &mut transfer => r,
            }
        };

        let closed = close_all(&mut sessions).await;
        let (rows, staged) = match (outcome, closed) {
            (Ok(v), Ok(())) => v,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), _) => {
                error!("Transfer failed: {}", e);
                return Err(e);
            }
        };

        let duration = timer.elapsed().as_secs_f64();
        let rows_per_second = if duration > 0.0 {
            (rows as f64 / duration) as u64
        } else {
            rows
        };
        info!(
            "Transfer complete: {} rows in {:.2}s ({} rows/s)",
            rows, duration, rows_per_second
        );

        Ok(TransferResult {
            rows,
            duration_seconds: duration,
            started_at,
            completed_at: Utc::now(),
            rows_per_second,
            source: self.source.to_string(),
            target: self.target.to_string(),
            staged,
        })
    }

    async fn transfer(
        &self,
        sessions: &mut Sessions,
        cancel: &CancellationToken,
    ) -> Result<(u64, bool)> {
        if let Some(conn) = sessions.source.as_mut() {
            conn.connect().await?;
        }
        if let Some(conn) = sessions.target.as_mut() {
            conn.connect().await?;
        }

        let stream = self.open_source(sessions.source.as_deref()).await?;
        stream.cancel_on(cancel);
        debug!("Source fields: {:?}", stream.fields());

        if let (Endpoint::Table { table, .. }, Some(conn)) =
            (&self.target, sessions.target.as_deref())
        {
            self.prepare_target(conn, table, stream.fields()).await?;
        }

        let staging = match (&self.config.options.staging, &self.source, &self.target) {
            (Some(dir), Endpoint::Table { .. }, Endpoint::Table { table, .. }) => {
                Some((StagingArea::new(dir.clone()), table.clone()))
            }
            _ => None,
        };

        let Some((area, table)) = staging else {
            let rows = self.sink(sessions.target.as_deref(), stream).await?;
            return Ok((rows, false));
        };

        let staged = area.spool(&table, stream).await?;
        let result = match staged.open(self.buffer_rows()).await {
            Ok(stream) => {
                stream.cancel_on(cancel);
                self.sink(sessions.target.as_deref(), stream).await
            }
            Err(e) => Err(e),
        };
        staged.remove().await;
        Ok((result?, true))
    }

    async fn open_source(&self, conn: Option<&dyn Connection>) -> Result<Datastream> {
        match (&self.source, conn) {
            (Endpoint::File(path), _) => open_file_stream(path, self.buffer_rows()).await,
            (Endpoint::Table { table, .. }, Some(conn)) => {
                let sql = format!("SELECT * FROM {}", table.qualified());
                conn.bulk_export_stream(&sql).await
            }
            (Endpoint::Table { .. }, None) => Err(SlingError::Config(
                "source connection was not opened".into(),
            )),
        }
    }

    async fn prepare_target(
        &self,
        conn: &dyn Connection,
        table: &TableRef,
        fields: &[String],
    ) -> Result<()> {
        if self.config.options.drop_target {
            conn.drop_table(table).await?;
        }
        if !conn.table_exists(table).await? {
            info!("Creating {} with {} text columns", table, fields.len());
            conn.create_table(table, fields).await?;
        }
        Ok(())
    }

    async fn sink(&self, conn: Option<&dyn Connection>, stream: Datastream) -> Result<u64> {
        match (&self.target, conn) {
            (Endpoint::File(path), _) => write_file_stream(stream, path).await,
            (Endpoint::Table { table, .. }, Some(conn)) => {
                conn.bulk_import_stream(table, stream).await
            }
            (Endpoint::Table { .. }, None) => Err(SlingError::Config(
                "target connection was not opened".into(),
            )),
        }
    }
}

async fn close_all(sessions: &mut Sessions) -> Result<()> {
    let mut first_err = None;
    for conn in [sessions.source.as_mut(), sessions.target.as_mut()]
        .into_iter()
        .flatten()
    {
        if let Err(e) = conn.close().await {
            warn!("Error closing {}: {}", conn.describe(), e);
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, TransferOptions};

    fn file_config(input: &std::path::Path, output: &std::path::Path) -> Config {
        Config::new(
            EndpointConfig::file(input),
            EndpointConfig::file(output),
            TransferOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_file_to_file_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out.csv");
        let data = "id,name\n1,alice\n2,\"b,ob\"\n3,\n";
        std::fs::write(&input, data).unwrap();

        let result = Orchestrator::new(file_config(&input, &output))
            .unwrap()
            .run(None)
            .await
            .unwrap();

        assert_eq!(result.rows, 3);
        assert!(!result.staged);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), data);
        assert!(result.to_json().unwrap().contains("\"rows\": 3"));
    }

    #[tokio::test]
    async fn test_parse_error_aborts_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.csv");
        let output = dir.path().join("out.csv");
        std::fs::write(&input, "a,b\n1,2\n3\n").unwrap();

        let err = Orchestrator::new(file_config(&input, &output))
            .unwrap()
            .run(None)
            .await
            .unwrap_err();
        assert!(matches!(err, SlingError::Parse { line: 3, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        std::fs::write(&input, "a\n1\n").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Orchestrator::new(file_config(&input, &dir.path().join("out.csv")))
            .unwrap()
            .run(Some(cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, SlingError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_mid_transfer_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("big.csv");
        let output = dir.path().join("out.csv");
        let mut data = String::from("id,payload\n");
        for i in 0..500_000 {
            data.push_str(&format!("{},row number {}\n", i, i));
        }
        std::fs::write(&input, data).unwrap();

        let config = Config::new(
            EndpointConfig::file(&input),
            EndpointConfig::file(&output),
            TransferOptions {
                buffer_rows: 1,
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = Orchestrator::new(config)
            .unwrap()
            .run(Some(cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, SlingError::Cancelled));
        assert!(started.elapsed() < CANCEL_GRACE);
        assert!(!output.exists());
    }

    #[test]
    fn test_invalid_config_rejected_before_connecting() {
        let config = Config::new(
            EndpointConfig::table("postgres://nowhere.invalid/db", "no_schema"),
            EndpointConfig::file("-"),
            TransferOptions::default(),
        );
        assert!(matches!(Orchestrator::new(config), Err(SlingError::Config(_))));
    }
}
