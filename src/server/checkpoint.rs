//! Durable lag checkpoint file: one `"<last>|<sync>"` line padded with
//! spaces, rewritten in place.

use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::server::{GlobalStatus, LagCheckpoint};
use crate::utils::CacheSyncError;

/// File name of the checkpoint under the data path.
pub const CHECKPOINT_FILE: &str = "sync_time.data";

/// Number of trailing spaces appended to every record, so that a slightly
/// shorter record overwrites the tail of a longer previous one.
pub const RECORD_PADDING: usize = 10;

/// Formats a checkpoint into its on-disk record.
pub fn format_record(checkpoint: &LagCheckpoint) -> String {
    format!(
        "{}|{}{}",
        checkpoint.last_binlog_time,
        checkpoint.last_sync_time,
        " ".repeat(RECORD_PADDING)
    )
}

/// Parses an on-disk record line. Exactly two `|`-separated unsigned fields
/// are accepted; whitespace around each field is ignored.
pub fn parse_record(line: &str) -> Result<LagCheckpoint, CacheSyncError> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() != 2 {
        return Err(CacheSyncError::msg(format!(
            "checkpoint record '{}' has {} fields",
            line.trim_end(),
            fields.len()
        )));
    }
    Ok(LagCheckpoint {
        last_binlog_time: fields[0].trim().parse()?,
        last_sync_time: fields[1].trim().parse()?,
    })
}

/// The checkpoint file of one server.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    /// Checkpoint file living under given data path.
    pub fn new(data_path: &Path) -> Self {
        CheckpointFile {
            path: data_path.join(CHECKPOINT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the status's current checkpoint pair over the start of the
    /// file, creating it world read-writable if missing. Returns the saved
    /// checkpoint.
    pub async fn save(
        &self,
        status: &GlobalStatus,
    ) -> Result<LagCheckpoint, CacheSyncError> {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        #[cfg(unix)]
        options.mode(0o666);
        let mut file = options.open(&self.path).await.map_err(|e| {
            CacheSyncError::msg(format!(
                "open '{}' failed: {}",
                self.path.display(),
                e
            ))
        })?;

        // snapshot both fields under the status's checkpoint lock
        let checkpoint = status.checkpoint();
        let record = format_record(&checkpoint);

        file.write_all(record.as_bytes()).await?;
        file.sync_data().await?;
        pf_trace!("checkpoint saved {:?}", checkpoint);
        Ok(checkpoint)
    }

    /// Reads the first record line of the file and seeds the status with it.
    /// On any error the status is left untouched.
    pub async fn load(
        &self,
        status: &GlobalStatus,
    ) -> Result<LagCheckpoint, CacheSyncError> {
        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            CacheSyncError::msg(format!(
                "open file '{}' failed: {}",
                self.path.display(),
                e
            ))
        })?;
        let Some(line) = content.lines().next() else {
            return Err(CacheSyncError::msg(format!(
                "{} is empty",
                CHECKPOINT_FILE
            )));
        };
        let checkpoint = parse_record(line).map_err(|e| {
            CacheSyncError::msg(format!("{} is malformed: {}", CHECKPOINT_FILE, e))
        })?;

        status.set_binlog_time(
            checkpoint.last_sync_time,
            checkpoint.last_binlog_time,
        );
        Ok(checkpoint)
    }
}
