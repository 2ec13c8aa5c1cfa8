//! Narrow interfaces to the external collaborators the orchestrator drives.
//!
//! Each trait has one production implementation that shells out to the
//! matching OS tool, and test doubles in `testutil`.

/// Build an argument list for [`ToolRunner`](crate::platform::shell::ToolRunner)
/// from a mix of strings and paths.
macro_rules! tool_args {
    ($($arg:expr),* $(,)?) => {
        [$(std::ffi::OsString::from($arg)),*]
    };
}

pub mod btrfs;
pub mod command;
pub mod duperemove;
pub mod loopdev;
pub mod ydb;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::capacity::round_up_to_mib;
use crate::compress::Compression;
use crate::error::{Result, VaultError};

/// File backing the loop device. Grows monotonically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingStore {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl BackingStore {
    /// Size after extending by `bytes`, rounded up to a whole MiB of growth.
    pub fn grown_size(&self, bytes: i64) -> Result<u64> {
        if bytes < 0 {
            return Err(VaultError::NegativeGrowth {
                path: self.path.display().to_string(),
                bytes,
            });
        }
        self.size_bytes
            .checked_add(round_up_to_mib(bytes as u64))
            .ok_or_else(|| VaultError::Other(format!("backing store size overflow: {bytes}")))
    }
}

/// An attached loop device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub id: String,
    pub backing_store_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub path: PathBuf,
    pub device: BlockDevice,
    pub compression: Option<Compression>,
}

/// A btrfs subvolume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub path: PathBuf,
    pub name: String,
    pub is_backup_root: bool,
}

impl Container {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            is_backup_root: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMeta {
    pub container: Container,
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub size_exclusive: u64,
    pub size_referenced: u64,
}

/// Aggregate space figures for a mounted volume, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilesystemUsage {
    pub device_size: u64,
    pub allocated: u64,
    pub unallocated: u64,
    pub used: u64,
    pub free: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpResult {
    pub path: PathBuf,
}

pub trait StorageGateway {
    fn create_container(&self, path: &Path) -> Result<Container>;
    fn delete_container(&self, container: &Container) -> Result<()>;
    /// `None` when `path` does not exist or is not a container.
    fn find_container(&self, path: &Path) -> Result<Option<Container>>;
    /// Containers directly below `root`.
    fn list_containers(&self, root: &Path) -> Result<Vec<Container>>;
    fn containers_meta(&self, root: &Path) -> Result<Vec<ContainerMeta>>;
    fn filesystem_usage(&self, mount: &Path) -> Result<FilesystemUsage>;
    /// Resize the live filesystem; `size` is a tool argument such as `"max"`.
    fn resize(&self, mount: &Path, size: &str) -> Result<()>;
    fn set_property(&self, path: &Path, key: &str, value: &str) -> Result<()>;
    /// Flush pending writes so usage figures are current.
    fn sync(&self, mount: &Path) -> Result<()>;
}

pub trait BlockDeviceGateway {
    /// Returns the store and whether it was created by this call.
    fn get_or_create_backing_file(
        &self,
        path: &Path,
        initial_size: u64,
    ) -> Result<(BackingStore, bool)>;
    /// Put a fresh filesystem on a newly created store.
    fn format(&self, store: &BackingStore) -> Result<()>;
    fn extend_by(&self, store: &mut BackingStore, bytes: i64) -> Result<()>;
    /// A loop device already attached to `store`, left over from an earlier run.
    fn find_attached(&self, store: &BackingStore) -> Result<Option<BlockDevice>>;
    fn attach(&self, store: &BackingStore) -> Result<BlockDevice>;
    fn detach(&self, device: &BlockDevice) -> Result<()>;
    fn mount(
        &self,
        device: &BlockDevice,
        target: &Path,
        compression: Option<Compression>,
    ) -> Result<MountPoint>;
    fn unmount(&self, mount: &MountPoint) -> Result<()>;
}

/// Moves data between the source database and a directory.
///
/// Connection parameters and dump/restore options are bound at construction.
pub trait DataTransferGateway {
    fn dump(&self, target_dir: &Path) -> Result<DumpResult>;
    fn restore(&self, source_dir: &Path) -> Result<()>;
}

pub trait DedupGateway {
    /// Collapse duplicate extents below `root`. Finding nothing to
    /// deduplicate is success.
    fn deduplicate(&self, root: &Path, block_size: u64) -> Result<()>;
}

/// Split `key: value` lines into lowercase keys, keeping the first occurrence.
pub(crate) fn parse_key_values(text: &str) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    for line in text.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                continue;
            }
            map.entry(key).or_insert_with(|| value.trim().to_string());
        }
    }
    map
}
