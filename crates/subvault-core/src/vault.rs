use tracing::{debug, info, warn};

use crate::capacity::{CapacityManager, CapacityPolicy};
use crate::compress::Compression;
use crate::config::{SourceConfig, VaultConfig};
use crate::error::{Result, VaultError};
use crate::gateway::btrfs::BtrfsCli;
use crate::gateway::command::CommandTransfer;
use crate::gateway::duperemove::Duperemove;
use crate::gateway::loopdev::LoopDevices;
use crate::gateway::ydb::YdbCli;
use crate::gateway::{
    BackingStore, BlockDeviceGateway, Container, DataTransferGateway, DedupGateway, MountPoint,
    StorageGateway,
};
use crate::journal::Journal;
use crate::layout::Layout;
use crate::lock::{self, LockGuard};
use crate::platform::shell::ToolRunner;

/// The external collaborators a [`Vault`] drives.
pub struct Gateways {
    pub storage: Box<dyn StorageGateway>,
    pub devices: Box<dyn BlockDeviceGateway>,
    pub transfer: Box<dyn DataTransferGateway>,
    pub dedup: Box<dyn DedupGateway>,
}

impl Gateways {
    /// Production gateways shelling out to the OS tools, each with the
    /// timeout configured for its class.
    pub fn from_config(config: &VaultConfig, forward_stderr: bool) -> Result<Self> {
        let runner = |timeout| ToolRunner::new(timeout, forward_stderr);
        let layout = Layout::new(&config.data_dir);

        let transfer: Box<dyn DataTransferGateway> = match &config.source {
            SourceConfig::Ydb(ydb) => Box::new(YdbCli::new(
                ydb.clone(),
                runner(config.timeouts.transfer()),
            )?),
            SourceConfig::Command(cmd) => Box::new(CommandTransfer::new(
                cmd.clone(),
                runner(config.timeouts.transfer()),
            )),
        };

        Ok(Self {
            storage: Box::new(BtrfsCli::new(runner(config.timeouts.storage()))),
            devices: Box::new(LoopDevices::new(runner(config.timeouts.device()))),
            transfer,
            dedup: Box::new(Duperemove::new(
                runner(config.timeouts.dedup()),
                layout.hashfile(),
            )),
        })
    }
}

/// Settings a [`Vault`] needs beyond its gateways.
#[derive(Debug, Clone)]
pub struct VaultOptions {
    pub initial_size: u64,
    pub compression: Option<Compression>,
    pub capacity: CapacityPolicy,
    pub dedup_by_default: bool,
    pub dedup_block_size: u64,
    pub prune_incomplete: bool,
}

impl VaultOptions {
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        Ok(Self {
            initial_size: config.storage.initial_size,
            compression: config.storage.compression()?,
            capacity: config.capacity.policy(),
            dedup_by_default: config.dedup.enabled,
            dedup_block_size: config.dedup.block_size,
            prune_incomplete: config.journal.prune_incomplete,
        })
    }
}

/// An opened, locked and mounted backup volume.
///
/// Holds the advisory lock, the backing store, the current mount point and
/// the journal for the duration of one operation. [`Vault::close`] unmounts
/// and detaches; dropping an unclosed vault does the same on a best-effort
/// basis.
pub struct Vault {
    layout: Layout,
    options: VaultOptions,
    gateways: Gateways,
    store: BackingStore,
    mount: Option<MountPoint>,
    journal: Journal,
    lock: Option<LockGuard>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("layout", &self.layout)
            .field("store", &self.store)
            .field("mount", &self.mount)
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Open the vault described by `config` with the production gateways.
    pub fn open(config: &VaultConfig, forward_stderr: bool) -> Result<Self> {
        let gateways = Gateways::from_config(config, forward_stderr)?;
        Self::open_with(
            Layout::new(&config.data_dir),
            VaultOptions::from_config(config)?,
            gateways,
        )
    }

    /// Lock the data directory, bring up the backing store and mount it,
    /// then load the journal.
    pub fn open_with(layout: Layout, options: VaultOptions, gateways: Gateways) -> Result<Self> {
        std::fs::create_dir_all(layout.data_dir())?;
        std::fs::create_dir_all(layout.tmp_dir())?;

        let guard = lock::acquire_lock(&layout.lock_path())?;
        match bring_up(&layout, &options, &gateways) {
            Ok((store, mount, journal)) => {
                info!(
                    mount = %mount.path.display(),
                    device = %mount.device.id,
                    size = store.size_bytes,
                    "volume ready"
                );
                Ok(Self {
                    layout,
                    options,
                    gateways,
                    store,
                    mount: Some(mount),
                    journal,
                    lock: Some(guard),
                })
            }
            Err(e) => {
                if let Err(release) = lock::release_lock(guard) {
                    warn!("failed to release lock: {release}");
                }
                Err(e)
            }
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn options(&self) -> &VaultOptions {
        &self.options
    }

    pub fn gateways(&self) -> &Gateways {
        &self.gateways
    }

    pub fn store(&self) -> &BackingStore {
        &self.store
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    /// The current mount point. Only valid until the next grow cycle.
    pub fn mount(&self) -> Result<&MountPoint> {
        self.mount
            .as_ref()
            .ok_or_else(|| VaultError::Other("volume is not mounted".into()))
    }

    /// Find the backups root container, creating it on first use.
    pub fn backups_root(&self) -> Result<Container> {
        let path = self.layout.backups_root();
        let mut root = match self.gateways.storage.find_container(&path)? {
            Some(root) => root,
            None => {
                info!(path = %path.display(), "creating backups root");
                self.gateways.storage.create_container(&path)?
            }
        };
        root.is_backup_root = true;
        Ok(root)
    }

    /// Make sure `required` bytes fit, growing the volume if needed.
    /// Returns the number of grow cycles performed.
    ///
    /// On failure the volume is left as the failing step found it and the
    /// vault has no usable mount point.
    pub fn ensure_capacity(&mut self, required: u64) -> Result<usize> {
        let mount = self
            .mount
            .take()
            .ok_or_else(|| VaultError::Other("volume is not mounted".into()))?;
        let manager = CapacityManager::new(
            self.gateways.storage.as_ref(),
            self.gateways.devices.as_ref(),
            self.options.capacity,
        );
        let capacity = manager.ensure_capacity(&mut self.store, mount, required)?;
        self.mount = Some(capacity.mount);
        Ok(capacity.grow_cycles)
    }

    /// Flush pending writes on the volume.
    pub fn sync(&self) -> Result<()> {
        self.gateways.storage.sync(&self.mount()?.path)
    }

    /// Unmount, detach and release the lock.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let mut first_error = None;
        if let Some(mount) = self.mount.take() {
            if let Err(e) = self.gateways.devices.unmount(&mount) {
                warn!(mount = %mount.path.display(), "failed to unmount: {e}");
                first_error.get_or_insert(e);
            } else if let Err(e) = self.gateways.devices.detach(&mount.device) {
                warn!(device = %mount.device.id, "failed to detach: {e}");
                first_error.get_or_insert(e);
            }
        }
        if let Some(guard) = self.lock.take() {
            if let Err(e) = lock::release_lock(guard) {
                warn!("failed to release lock: {e}");
                first_error.get_or_insert(e);
            }
        }
        debug!("vault closed");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        if self.lock.is_some() {
            let _ = self.teardown();
        }
    }
}

fn bring_up(
    layout: &Layout,
    options: &VaultOptions,
    gateways: &Gateways,
) -> Result<(BackingStore, MountPoint, Journal)> {
    let devices = gateways.devices.as_ref();
    let (store, created) =
        devices.get_or_create_backing_file(&layout.backing_file(), options.initial_size)?;

    let device = if created {
        devices.format(&store)?;
        devices.attach(&store)?
    } else {
        match devices.find_attached(&store)? {
            Some(device) => {
                debug!(device = %device.id, "reusing attached loop device");
                device
            }
            None => devices.attach(&store)?,
        }
    };

    let mount = match devices.mount(&device, &layout.mount_dir(), options.compression) {
        Ok(mount) => mount,
        Err(e) => {
            if let Err(detach) = devices.detach(&device) {
                warn!(device = %device.id, "failed to detach: {detach}");
            }
            return Err(e);
        }
    };
    finish_interrupted_grow(gateways.storage.as_ref(), &store, &mount);

    let journal = match Journal::open(&layout.journal_path()) {
        Ok(journal) => journal,
        Err(e) => {
            release_mount(devices, &mount);
            return Err(e);
        }
    };
    Ok((store, mount, journal))
}

/// A grow cut short between extending the backing file and resizing the
/// filesystem leaves space the filesystem cannot use. Claim it now so the
/// next grow does not extend the file a second time.
fn finish_interrupted_grow(
    storage: &dyn StorageGateway,
    store: &BackingStore,
    mount: &MountPoint,
) {
    let usage = match storage.filesystem_usage(&mount.path) {
        Ok(usage) => usage,
        Err(e) => {
            warn!(mount = %mount.path.display(), "failed to read filesystem usage: {e}");
            return;
        }
    };
    if store.size_bytes <= usage.device_size {
        return;
    }
    info!(
        backing_size = store.size_bytes,
        filesystem_size = usage.device_size,
        "filesystem smaller than its backing file, resizing"
    );
    if let Err(e) = storage.resize(&mount.path, "max") {
        warn!(mount = %mount.path.display(), "failed to resize filesystem: {e}");
    }
}

fn release_mount(devices: &dyn BlockDeviceGateway, mount: &MountPoint) {
    if let Err(e) = devices.unmount(mount) {
        warn!(mount = %mount.path.display(), "failed to unmount: {e}");
        return;
    }
    if let Err(e) = devices.detach(&mount.device) {
        warn!(device = %mount.device.id, "failed to detach: {e}");
    }
}
