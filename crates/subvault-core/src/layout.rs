use std::path::{Path, PathBuf};

/// Well-known paths under the data directory.
///
/// ```text
/// <data_dir>/data.img        backing store for the loop device
/// <data_dir>/mnt             btrfs mount point
/// <data_dir>/mnt/meta.json   metadata journal (inside the managed volume)
/// <data_dir>/mnt/backups     backups root subvolume
/// <data_dir>/tmp             scratch directories for in-flight dumps
/// <data_dir>/hashfile        duperemove hash database
/// <data_dir>/lock.json       advisory lock
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    data_dir: PathBuf,
}

pub const BACKUPS_DIR: &str = "backups";
pub const BACKUP_PREFIX: &str = "backup_";
pub const SCRATCH_PREFIX: &str = "temp_backup_";

impl Layout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn backing_file(&self) -> PathBuf {
        self.data_dir.join("data.img")
    }

    pub fn mount_dir(&self) -> PathBuf {
        self.data_dir.join("mnt")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.mount_dir().join("meta.json")
    }

    pub fn backups_root(&self) -> PathBuf {
        self.mount_dir().join(BACKUPS_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    pub fn hashfile(&self) -> PathBuf {
        self.data_dir.join("hashfile")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("lock.json")
    }

    /// Container path for a backup started at the given unix timestamp.
    pub fn backup_path(&self, unix_secs: i64) -> PathBuf {
        self.backups_root()
            .join(format!("{BACKUP_PREFIX}{unix_secs}"))
    }

    pub fn scratch_dir(&self, unix_secs: i64) -> PathBuf {
        self.tmp_dir().join(format!("{SCRATCH_PREFIX}{unix_secs}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_lives_inside_the_mounted_volume() {
        let layout = Layout::new("/var/lib/subvault");
        assert!(layout.journal_path().starts_with(layout.mount_dir()));
        assert!(!layout.lock_path().starts_with(layout.mount_dir()));
    }

    #[test]
    fn backup_paths_are_rooted_under_backups() {
        let layout = Layout::new("/srv/vault");
        assert_eq!(
            layout.backup_path(1_700_000_000),
            PathBuf::from("/srv/vault/mnt/backups/backup_1700000000")
        );
        assert_eq!(
            layout.scratch_dir(42),
            PathBuf::from("/srv/vault/tmp/temp_backup_42")
        );
    }
}
