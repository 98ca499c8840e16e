//! Write-back sinks receiving dirty entries during a synchronization pass.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::utils::CacheSyncError;

/// Destination of dirty cache entries.
pub trait WriteBack: Send + Sync {
    fn write_back(&self, key: &str, value: &str) -> Result<(), CacheSyncError>;
}

/// Appends written-back entries to a dump file as length-prefixed
/// MessagePack `(key, value)` records.
#[derive(Debug)]
pub struct FileWriteBack {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileWriteBack {
    /// Opens (creating if needed) the dump file at given path for appending.
    pub fn new_and_setup(path: &Path) -> Result<Self, CacheSyncError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        pf_info!("write-back dump file '{}' opened", path.display());
        Ok(FileWriteBack {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back all records of a dump file, in append order.
    pub fn read_all(
        path: &Path,
    ) -> Result<Vec<(String, String)>, CacheSyncError> {
        let mut buf = vec![];
        File::open(path)?.read_to_end(&mut buf)?;

        let mut records = vec![];
        let mut offset = 0;
        while offset + 8 <= buf.len() {
            let mut len_bytes = [0u8; 8];
            len_bytes.copy_from_slice(&buf[offset..offset + 8]);
            let end = offset + 8 + u64::from_be_bytes(len_bytes) as usize;
            if end > buf.len() {
                pf_warn!("dump file truncated at offset {}", offset);
                break;
            }
            records.push(rmp_serde::decode::from_slice(&buf[offset + 8..end])?);
            offset = end;
        }
        Ok(records)
    }
}

impl WriteBack for FileWriteBack {
    fn write_back(&self, key: &str, value: &str) -> Result<(), CacheSyncError> {
        let record = rmp_serde::encode::to_vec(&(key, value))?;
        let mut bytes = Vec::with_capacity(8 + record.len());
        bytes.extend_from_slice(&(record.len() as u64).to_be_bytes());
        bytes.extend_from_slice(&record);

        let mut file = self
            .file
            .lock()
            .map_err(|e| CacheSyncError::msg(e.to_string()))?;
        file.write_all(&bytes)?;
        Ok(())
    }
}
