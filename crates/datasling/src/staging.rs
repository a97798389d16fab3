//! Local staging area for connection-to-connection transfers.
//!
//! A stream is spooled to a gzip CSV object in the staging directory and
//! re-read from there, decoupling the source session from the target load.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::codec::{open_file_stream, write_file_stream};
use crate::core::datastream::Datastream;
use crate::core::identifier::TableRef;
use crate::error::Result;

/// A directory holding staged objects.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

/// One spooled stream.
#[derive(Debug)]
pub struct StagedObject {
    path: PathBuf,
    rows: u64,
}

impl StagingArea {
    /// Use `dir` as the staging location; it is created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Staging directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `stream` into a new staged object named after `table`.
    pub async fn spool(&self, table: &TableRef, stream: Datastream) -> Result<StagedObject> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!(
            "{}.{}-{}.csv.gz",
            table.schema,
            table.table,
            Utc::now().format("%Y%m%dT%H%M%S%.6f")
        );
        let path = self.dir.join(name);
        debug!("Staging to {}", path.display());

        match write_file_stream(stream, &path).await {
            Ok(rows) => {
                info!("Staged {} rows in {}", rows, path.display());
                Ok(StagedObject { path, rows })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }
}

impl StagedObject {
    /// Location of the object.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written to the object.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Re-read the object as a stream.
    pub async fn open(&self, capacity: usize) -> Result<Datastream> {
        open_file_stream(&self.path, capacity).await
    }

    /// Delete the object.
    pub async fn remove(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!("Could not remove staged object {}: {}", self.path.display(), e);
        }
    }
}
