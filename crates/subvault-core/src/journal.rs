use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, VaultError};

/// One attempted backup.
///
/// `completed` and `finished_at` are only set once every byte of the dump
/// has been moved into the backup's container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub completed: bool,
    pub path: String,
    #[serde(rename = "started_creation_at")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finished_creation_at", default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl BackupRecord {
    /// Name of the backup's container, the last component of `path`.
    ///
    /// Records are matched to containers by name: `path` keeps whatever data
    /// directory was in use when the backup ran, which may have moved since.
    pub fn name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalDocument {
    #[serde(default)]
    btrfs: BackupsNode,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BackupsNode {
    #[serde(default)]
    backups: Vec<BackupRecord>,
}

/// The durable record of backup attempts.
///
/// Every mutation rewrites the whole document through a temp file and an
/// atomic rename, so a crash mid-write leaves the previous version intact.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    records: Vec<BackupRecord>,
}

impl Journal {
    /// Load the journal at `path`, creating an empty one if it is missing.
    pub fn open(path: &Path) -> Result<Self> {
        let records = match std::fs::read(path) {
            Ok(data) => parse_document(path, &data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "creating empty journal");
                persist(path, &[])?;
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = records.len(), "journal loaded");
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the start of a backup at `path`.
    pub fn start_backup(&mut self, path: &str) -> Result<()> {
        if self.find(path).is_some() {
            return Err(VaultError::DuplicateBackup(path.to_string()));
        }
        let mut records = self.records.clone();
        records.push(BackupRecord {
            completed: false,
            path: path.to_string(),
            started_at: Utc::now(),
            finished_at: None,
        });
        self.commit(records)
    }

    /// Mark the backup at `path` as completed.
    pub fn finish_backup(&mut self, path: &str) -> Result<()> {
        let mut records = self.records.clone();
        let record = records
            .iter_mut()
            .find(|r| r.path == path)
            .ok_or_else(|| VaultError::UnknownBackup(path.to_string()))?;
        // Never record a finish before the start, even if the clock stepped back.
        let now = Utc::now().max(record.started_at);
        record.completed = true;
        record.finished_at = Some(now);
        self.commit(records)
    }

    /// All records, in the order they were started.
    pub fn list_backups(&self) -> &[BackupRecord] {
        &self.records
    }

    pub fn list_completed_backups(&self) -> Vec<&BackupRecord> {
        self.records.iter().filter(|r| r.completed).collect()
    }

    /// Container names of completed backups.
    pub fn completed_names(&self) -> HashSet<&str> {
        self.records
            .iter()
            .filter(|r| r.completed)
            .map(BackupRecord::name)
            .collect()
    }

    pub fn find(&self, path: &str) -> Option<&BackupRecord> {
        self.records.iter().find(|r| r.path == path)
    }

    /// Drop records that never completed. Returns how many were removed.
    pub fn prune_incomplete(&mut self) -> Result<usize> {
        let before = self.records.len();
        let records: Vec<BackupRecord> =
            self.records.iter().filter(|r| r.completed).cloned().collect();
        let removed = before - records.len();
        if removed > 0 {
            self.commit(records)?;
        }
        Ok(removed)
    }

    fn commit(&mut self, records: Vec<BackupRecord>) -> Result<()> {
        persist(&self.path, &records)?;
        self.records = records;
        Ok(())
    }
}

fn parse_document(path: &Path, data: &[u8]) -> Result<Vec<BackupRecord>> {
    let doc: JournalDocument =
        serde_json::from_slice(data).map_err(|e| VaultError::DataIntegrity {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
    let records = doc.btrfs.backups;

    let mut seen = HashSet::new();
    for record in &records {
        if !seen.insert(record.path.as_str()) {
            return Err(VaultError::DataIntegrity {
                path: path.display().to_string(),
                detail: format!("duplicate record for '{}'", record.path),
            });
        }
    }
    Ok(records)
}

/// Write the document to a temp file next to `path`, fsync, then rename.
fn persist(path: &Path, records: &[BackupRecord]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let doc = JournalDocument {
        btrfs: BackupsNode {
            backups: records.to_vec(),
        },
    };
    let data = serde_json::to_vec_pretty(&doc)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".meta.json.")
        .tempfile_in(dir)?;
    tmp.write_all(&data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    // Make the rename itself durable.
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}
