use std::ffi::OsString;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{parse_key_values, Container, ContainerMeta, FilesystemUsage, StorageGateway};
use crate::error::{Result, VaultError};
use crate::platform::shell::ToolRunner;

const BTRFS: &str = "btrfs";

/// Format of `Creation time` in `btrfs subvolume show`.
const CREATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Storage gateway backed by the `btrfs` command line tool.
#[derive(Debug, Clone)]
pub struct BtrfsCli {
    runner: ToolRunner,
}

impl BtrfsCli {
    pub fn new(runner: ToolRunner) -> Self {
        Self { runner }
    }

    fn btrfs(&self, args: &[OsString], operation: &str, path: &Path) -> Result<String> {
        let output = self.runner.run(BTRFS, args, operation, path)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn show(&self, container: Container) -> Result<ContainerMeta> {
        let text = self.btrfs(
            &tool_args!["subvolume", "show", "-b", &container.path],
            "btrfs subvolume show",
            &container.path,
        )?;
        parse_subvolume_show(&text, container)
    }
}

impl StorageGateway for BtrfsCli {
    fn create_container(&self, path: &Path) -> Result<Container> {
        self.btrfs(
            &tool_args!["subvolume", "create", path],
            "btrfs subvolume create",
            path,
        )?;
        debug!(path = %path.display(), "subvolume created");
        Ok(Container::new(path))
    }

    fn delete_container(&self, container: &Container) -> Result<()> {
        self.btrfs(
            &tool_args!["subvolume", "delete", &container.path],
            "btrfs subvolume delete",
            &container.path,
        )?;
        debug!(path = %container.path.display(), "subvolume deleted");
        Ok(())
    }

    fn find_container(&self, path: &Path) -> Result<Option<Container>> {
        let Some(parent) = path.parent() else {
            return Ok(None);
        };
        if !path.exists() || !parent.is_dir() {
            return Ok(None);
        }
        Ok(self
            .list_containers(parent)?
            .into_iter()
            .find(|c| c.path == path))
    }

    fn list_containers(&self, root: &Path) -> Result<Vec<Container>> {
        let text = self.btrfs(
            &tool_args!["subvolume", "list", "-o", root],
            "btrfs subvolume list",
            root,
        )?;
        Ok(parse_subvolume_list(&text)
            .into_iter()
            .map(|name| Container::new(root.join(name)))
            .collect())
    }

    fn containers_meta(&self, root: &Path) -> Result<Vec<ContainerMeta>> {
        // Exclusive/referenced sizes are only tracked with quota groups on.
        self.btrfs(
            &tool_args!["quota", "enable", root],
            "btrfs quota enable",
            root,
        )?;
        let rescan = self.runner.output(
            BTRFS,
            &tool_args!["quota", "rescan", "-w", root],
            "btrfs quota rescan",
        )?;
        if !rescan.status.success() {
            warn!(
                root = %root.display(),
                stderr = %String::from_utf8_lossy(&rescan.stderr).trim(),
                "quota rescan failed, sizes may be stale"
            );
        }

        self.list_containers(root)?
            .into_iter()
            .map(|c| self.show(c))
            .collect()
    }

    fn filesystem_usage(&self, mount: &Path) -> Result<FilesystemUsage> {
        let text = self.btrfs(
            &tool_args!["filesystem", "usage", "-b", mount],
            "btrfs filesystem usage",
            mount,
        )?;
        parse_filesystem_usage(&text, mount)
    }

    fn resize(&self, mount: &Path, size: &str) -> Result<()> {
        self.btrfs(
            &tool_args!["filesystem", "resize", size, mount],
            "btrfs filesystem resize",
            mount,
        )?;
        Ok(())
    }

    fn set_property(&self, path: &Path, key: &str, value: &str) -> Result<()> {
        self.btrfs(
            &tool_args!["property", "set", path, key, value],
            "btrfs property set",
            path,
        )?;
        Ok(())
    }

    fn sync(&self, mount: &Path) -> Result<()> {
        self.btrfs(
            &tool_args!["filesystem", "sync", mount],
            "btrfs filesystem sync",
            mount,
        )?;
        Ok(())
    }
}

/// Names of the subvolumes in `btrfs subvolume list -o` output.
///
/// Lines look like `ID 258 gen 12 top level 257 path backups/backup_1700000000`;
/// the path is relative to the filesystem root, so only its last component is kept.
fn parse_subvolume_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.split_once(" path "))
        .filter_map(|(_, path)| path.trim_end().rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_subvolume_show(text: &str, container: Container) -> Result<ContainerMeta> {
    let map = parse_key_values(text);
    let field = |key: &str| {
        map.get(key).map(String::as_str).ok_or_else(|| {
            VaultError::gateway_failed(
                "btrfs subvolume show",
                &container.path,
                format!("missing '{key}' in output"),
            )
        })
    };
    let number = |key: &str| -> Result<u64> {
        let raw = field(key)?;
        raw.parse().map_err(|_| {
            VaultError::gateway_failed(
                "btrfs subvolume show",
                &container.path,
                format!("cannot parse '{key}' value '{raw}'"),
            )
        })
    };

    let id = number("subvolume id")?;
    let raw_time = field("creation time")?;
    let created_at = DateTime::parse_from_str(raw_time, CREATION_TIME_FORMAT)
        .map_err(|e| {
            VaultError::gateway_failed(
                "btrfs subvolume show",
                &container.path,
                format!("cannot parse creation time '{raw_time}': {e}"),
            )
        })?
        .with_timezone(&Utc);
    let size_exclusive = number("usage exclusive")?;
    let size_referenced = number("usage referenced")?;

    Ok(ContainerMeta {
        container,
        id,
        created_at,
        size_exclusive,
        size_referenced,
    })
}

fn parse_filesystem_usage(text: &str, mount: &Path) -> Result<FilesystemUsage> {
    let map = parse_key_values(text);
    let number = |key: &str| -> Result<u64> {
        map.get(key)
            .and_then(|v| v.split_whitespace().next())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                VaultError::gateway_failed(
                    "btrfs filesystem usage",
                    mount,
                    format!("missing or malformed '{key}' in output"),
                )
            })
    };

    Ok(FilesystemUsage {
        device_size: number("device size")?,
        allocated: number("device allocated")?,
        unallocated: number("device unallocated")?,
        used: number("used")?,
        free: number("free (estimated)")?,
    })
}
