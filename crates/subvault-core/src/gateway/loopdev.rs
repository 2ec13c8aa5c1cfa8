use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{BackingStore, BlockDevice, BlockDeviceGateway, MountPoint};
use crate::compress::Compression;
use crate::error::{Result, VaultError};
use crate::platform::mounts;
use crate::platform::shell::ToolRunner;

/// Block device gateway: a sparse image file behind a loop device.
#[derive(Debug, Clone)]
pub struct LoopDevices {
    runner: ToolRunner,
}

#[derive(Debug, Default, Deserialize)]
struct LoopDeviceList {
    #[serde(default)]
    loopdevices: Vec<LoopDeviceEntry>,
}

#[derive(Debug, Deserialize)]
struct LoopDeviceEntry {
    name: String,
    #[serde(rename = "back-file", default)]
    back_file: Option<String>,
}

impl LoopDevices {
    pub fn new(runner: ToolRunner) -> Self {
        Self { runner }
    }

    fn tool(&self, binary: &str, args: &[OsString], operation: &str, path: &Path) -> Result<String> {
        let output = self.runner.run(binary, args, operation, path)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl BlockDeviceGateway for LoopDevices {
    fn get_or_create_backing_file(
        &self,
        path: &Path,
        initial_size: u64,
    ) -> Result<(BackingStore, bool)> {
        match std::fs::metadata(path) {
            Ok(meta) => {
                return Ok((
                    BackingStore {
                        path: path.to_path_buf(),
                        size_bytes: meta.len(),
                    },
                    false,
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        // Sparse: blocks are only allocated as the filesystem writes them.
        file.set_len(initial_size)?;
        file.sync_all()?;
        info!(path = %path.display(), size = initial_size, "created backing file");

        Ok((
            BackingStore {
                path: path.to_path_buf(),
                size_bytes: initial_size,
            },
            true,
        ))
    }

    fn format(&self, store: &BackingStore) -> Result<()> {
        self.tool("mkfs.btrfs", &tool_args![&store.path], "mkfs.btrfs", &store.path)?;
        info!(path = %store.path.display(), "formatted backing file");
        Ok(())
    }

    fn extend_by(&self, store: &mut BackingStore, bytes: i64) -> Result<()> {
        let new_size = store.grown_size(bytes)?;
        let file = OpenOptions::new().write(true).open(&store.path)?;
        file.set_len(new_size)?;
        file.sync_all()?;
        debug!(
            path = %store.path.display(),
            old_size = store.size_bytes,
            new_size,
            "backing file extended"
        );
        store.size_bytes = new_size;
        Ok(())
    }

    fn find_attached(&self, store: &BackingStore) -> Result<Option<BlockDevice>> {
        let text = self.tool(
            "losetup",
            &tool_args!["--json", "--list"],
            "losetup --list",
            &store.path,
        )?;
        let devices = parse_loop_devices(&text).map_err(|e| {
            VaultError::gateway_failed("losetup --list", &store.path, format!("invalid JSON: {e}"))
        })?;

        let wanted = std::fs::canonicalize(&store.path).unwrap_or_else(|_| store.path.clone());
        Ok(devices
            .into_iter()
            .find(|d| d.back_file.as_deref().map(Path::new) == Some(wanted.as_path()))
            .map(|d| BlockDevice {
                id: d.name,
                backing_store_path: store.path.clone(),
            }))
    }

    fn attach(&self, store: &BackingStore) -> Result<BlockDevice> {
        let text = self.tool(
            "losetup",
            &tool_args!["-fP", "--show", &store.path],
            "losetup attach",
            &store.path,
        )?;
        let id = text.trim();
        if id.is_empty() {
            return Err(VaultError::gateway_failed(
                "losetup attach",
                &store.path,
                "no device name in output",
            ));
        }
        debug!(device = id, path = %store.path.display(), "loop device attached");
        Ok(BlockDevice {
            id: id.to_string(),
            backing_store_path: store.path.clone(),
        })
    }

    fn detach(&self, device: &BlockDevice) -> Result<()> {
        self.tool(
            "losetup",
            &tool_args!["-d", &device.id],
            "losetup detach",
            Path::new(&device.id),
        )?;
        debug!(device = %device.id, "loop device detached");
        Ok(())
    }

    fn mount(
        &self,
        device: &BlockDevice,
        target: &Path,
        compression: Option<Compression>,
    ) -> Result<MountPoint> {
        std::fs::create_dir_all(target)?;

        match mounts::find_mount(target)? {
            Some(entry) if entry.source == device.id => {
                debug!(device = %device.id, target = %target.display(), "already mounted");
            }
            Some(entry) => {
                return Err(VaultError::gateway_failed(
                    "mount",
                    target,
                    format!("'{}' is already mounted there", entry.source),
                ));
            }
            None => {
                let mut args = Vec::new();
                if let Some(c) = compression {
                    args.push(OsString::from("-o"));
                    args.push(OsString::from(c.mount_option()));
                }
                args.extend(tool_args![&device.id, target]);
                self.tool("mount", &args, "mount", target)?;
                debug!(device = %device.id, target = %target.display(), "mounted");
            }
        }

        Ok(MountPoint {
            path: target.to_path_buf(),
            device: device.clone(),
            compression,
        })
    }

    fn unmount(&self, mount: &MountPoint) -> Result<()> {
        if mounts::find_mount(&mount.path)?.is_none() {
            warn!(target = %mount.path.display(), "not mounted, nothing to unmount");
            return Ok(());
        }
        self.tool("umount", &tool_args![&mount.path], "umount", &mount.path)?;
        debug!(target = %mount.path.display(), "unmounted");
        Ok(())
    }
}

/// `losetup --json --list` prints nothing at all when no device is attached.
fn parse_loop_devices(text: &str) -> serde_json::Result<Vec<LoopDeviceEntry>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let list: LoopDeviceList = serde_json::from_str(text)?;
    Ok(list.loopdevices)
}
