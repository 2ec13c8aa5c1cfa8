//! Test doubles for the gateways: a fake volume backed by plain directories,
//! a fake data source and a recording deduplicator.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::capacity::{CapacityPolicy, MIB};
use crate::compress::Compression;
use crate::error::{Result, VaultError};
use crate::gateway::{
    BackingStore, BlockDevice, BlockDeviceGateway, Container, ContainerMeta, DataTransferGateway,
    DedupGateway, DumpResult, FilesystemUsage, MountPoint, StorageGateway,
};
use crate::layout::Layout;
use crate::platform::fs::directory_size;
use crate::vault::{Gateways, Vault, VaultOptions};

#[derive(Debug, Default)]
struct VolumeState {
    store_size: Option<u64>,
    /// Size the filesystem knows about; catches up with the store on resize.
    fs_size: Option<u64>,
    attached: Option<String>,
    mounted: Option<PathBuf>,
    next_loop: u32,
    next_id: u64,
    containers: BTreeMap<PathBuf, (u64, DateTime<Utc>)>,
    properties: Vec<(PathBuf, String, String)>,
    failing: HashSet<String>,
    extends: usize,
    resizes: usize,
    formats: usize,
}

/// Storage and block device gateways over ordinary directories.
///
/// Containers are directories the fake remembers creating. Free space is
/// the backing store size minus the bytes under the mount point, so data
/// moved into a container consumes space the way it would on btrfs.
#[derive(Debug, Clone, Default)]
pub struct FakeVolume {
    state: Rc<RefCell<VolumeState>>,
}

impl FakeVolume {
    pub fn new() -> Self {
        let volume = Self::default();
        volume.state.borrow_mut().next_id = 256;
        volume
    }

    /// Make every call of `operation` fail from now on. Operation names
    /// are the trait method names, e.g. `"resize"` or `"create_container"`.
    pub fn fail(&self, operation: &str) {
        self.state.borrow_mut().failing.insert(operation.to_string());
    }

    pub fn heal(&self, operation: &str) {
        self.state.borrow_mut().failing.remove(operation);
    }

    /// Number of times the backing store was extended.
    pub fn grow_count(&self) -> usize {
        self.state.borrow().extends
    }

    pub fn resize_count(&self) -> usize {
        self.state.borrow().resizes
    }

    pub fn format_count(&self) -> usize {
        self.state.borrow().formats
    }

    pub fn store_size(&self) -> Option<u64> {
        self.state.borrow().store_size
    }

    pub fn is_mounted(&self) -> bool {
        self.state.borrow().mounted.is_some()
    }

    pub fn is_attached(&self) -> bool {
        self.state.borrow().attached.is_some()
    }

    pub fn container_paths(&self) -> Vec<PathBuf> {
        self.state.borrow().containers.keys().cloned().collect()
    }

    /// Properties set on `path`, as `(key, value)` pairs.
    pub fn properties(&self, path: &Path) -> Vec<(String, String)> {
        self.state
            .borrow()
            .properties
            .iter()
            .filter(|(p, _, _)| p == path)
            .map(|(_, k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Register a container directly, bypassing the journal, as a crashed
    /// run would leave it behind.
    pub fn plant_container(&self, path: &Path) -> Result<Container> {
        self.create_container(path)
    }

    /// Delete a container behind the journal's back, as an operator running
    /// `btrfs subvolume delete` by hand would.
    pub fn remove_container_externally(&self, path: &Path) -> Result<()> {
        self.state.borrow_mut().containers.remove(path);
        std::fs::remove_dir_all(path)?;
        Ok(())
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.state.borrow().failing.contains(operation) {
            return Err(VaultError::gateway_failed(operation, "fake", "injected failure"));
        }
        Ok(())
    }

    fn require_mounted(&self, operation: &str, mount: &Path) -> Result<()> {
        match &self.state.borrow().mounted {
            Some(m) if m == mount => Ok(()),
            _ => Err(VaultError::gateway_failed(operation, mount, "not mounted")),
        }
    }
}

impl StorageGateway for FakeVolume {
    fn create_container(&self, path: &Path) -> Result<Container> {
        self.check("create_container")?;
        if self.state.borrow().containers.contains_key(path) {
            return Err(VaultError::gateway_failed(
                "create_container",
                path,
                "already exists",
            ));
        }
        std::fs::create_dir(path)?;
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        state.containers.insert(path.to_path_buf(), (id, Utc::now()));
        Ok(Container::new(path))
    }

    fn delete_container(&self, container: &Container) -> Result<()> {
        self.check("delete_container")?;
        if self.state.borrow_mut().containers.remove(&container.path).is_none() {
            return Err(VaultError::gateway_failed(
                "delete_container",
                &container.path,
                "no such container",
            ));
        }
        std::fs::remove_dir_all(&container.path)?;
        Ok(())
    }

    fn find_container(&self, path: &Path) -> Result<Option<Container>> {
        self.check("find_container")?;
        let known = self.state.borrow().containers.contains_key(path);
        Ok((known && path.is_dir()).then(|| Container::new(path)))
    }

    fn list_containers(&self, root: &Path) -> Result<Vec<Container>> {
        self.check("list_containers")?;
        Ok(self
            .state
            .borrow()
            .containers
            .keys()
            .filter(|p| p.parent() == Some(root))
            .map(Container::new)
            .collect())
    }

    fn containers_meta(&self, root: &Path) -> Result<Vec<ContainerMeta>> {
        self.check("containers_meta")?;
        let containers = self.list_containers(root)?;
        let state = self.state.borrow();
        containers
            .into_iter()
            .map(|container| {
                let (id, created_at) = state.containers[&container.path];
                let size = directory_size(&container.path)?;
                Ok(ContainerMeta {
                    container,
                    id,
                    created_at,
                    size_exclusive: size,
                    size_referenced: size,
                })
            })
            .collect()
    }

    fn filesystem_usage(&self, mount: &Path) -> Result<FilesystemUsage> {
        self.check("filesystem_usage")?;
        self.require_mounted("filesystem_usage", mount)?;
        let device_size = {
            let state = self.state.borrow();
            state.fs_size.or(state.store_size).unwrap_or(0)
        };
        let used = directory_size(mount)?;
        let free = device_size.saturating_sub(used);
        Ok(FilesystemUsage {
            device_size,
            allocated: used,
            unallocated: free,
            used,
            free,
        })
    }

    fn resize(&self, mount: &Path, _size: &str) -> Result<()> {
        self.check("resize")?;
        self.require_mounted("resize", mount)?;
        let mut state = self.state.borrow_mut();
        state.fs_size = state.store_size;
        state.resizes += 1;
        Ok(())
    }

    fn set_property(&self, path: &Path, key: &str, value: &str) -> Result<()> {
        self.check("set_property")?;
        self.state
            .borrow_mut()
            .properties
            .push((path.to_path_buf(), key.to_string(), value.to_string()));
        Ok(())
    }

    fn sync(&self, mount: &Path) -> Result<()> {
        self.check("sync")?;
        self.require_mounted("sync", mount)
    }
}

impl BlockDeviceGateway for FakeVolume {
    fn get_or_create_backing_file(
        &self,
        path: &Path,
        initial_size: u64,
    ) -> Result<(BackingStore, bool)> {
        self.check("get_or_create_backing_file")?;
        let mut state = self.state.borrow_mut();
        let created = state.store_size.is_none();
        let size = *state.store_size.get_or_insert(initial_size);
        Ok((
            BackingStore {
                path: path.to_path_buf(),
                size_bytes: size,
            },
            created,
        ))
    }

    fn format(&self, _store: &BackingStore) -> Result<()> {
        self.check("format")?;
        let mut state = self.state.borrow_mut();
        state.fs_size = state.store_size;
        state.formats += 1;
        Ok(())
    }

    fn extend_by(&self, store: &mut BackingStore, bytes: i64) -> Result<()> {
        self.check("extend_by")?;
        let new_size = store.grown_size(bytes)?;
        let mut state = self.state.borrow_mut();
        state.store_size = Some(new_size);
        state.extends += 1;
        store.size_bytes = new_size;
        Ok(())
    }

    fn find_attached(&self, store: &BackingStore) -> Result<Option<BlockDevice>> {
        self.check("find_attached")?;
        Ok(self.state.borrow().attached.clone().map(|id| BlockDevice {
            id,
            backing_store_path: store.path.clone(),
        }))
    }

    fn attach(&self, store: &BackingStore) -> Result<BlockDevice> {
        self.check("attach")?;
        let mut state = self.state.borrow_mut();
        if state.attached.is_some() {
            return Err(VaultError::gateway_failed("attach", &store.path, "already attached"));
        }
        let id = format!("/dev/loop{}", state.next_loop);
        state.next_loop += 1;
        state.attached = Some(id.clone());
        Ok(BlockDevice {
            id,
            backing_store_path: store.path.clone(),
        })
    }

    fn detach(&self, device: &BlockDevice) -> Result<()> {
        self.check("detach")?;
        let mut state = self.state.borrow_mut();
        if state.mounted.is_some() {
            return Err(VaultError::gateway_failed("detach", &device.id, "device is busy"));
        }
        state.attached = None;
        Ok(())
    }

    fn mount(
        &self,
        device: &BlockDevice,
        target: &Path,
        compression: Option<Compression>,
    ) -> Result<MountPoint> {
        self.check("mount")?;
        std::fs::create_dir_all(target)?;
        self.state.borrow_mut().mounted = Some(target.to_path_buf());
        Ok(MountPoint {
            path: target.to_path_buf(),
            device: device.clone(),
            compression,
        })
    }

    fn unmount(&self, _mount: &MountPoint) -> Result<()> {
        self.check("unmount")?;
        self.state.borrow_mut().mounted = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TransferState {
    dump_bytes: u64,
    fail_dump: bool,
    fail_restore: bool,
    dumps: Vec<PathBuf>,
    restores: Vec<PathBuf>,
}

/// Data source whose dump is a single sparse file of a chosen size.
#[derive(Debug, Clone, Default)]
pub struct FakeTransfer {
    state: Rc<RefCell<TransferState>>,
}

impl FakeTransfer {
    pub fn new(dump_bytes: u64) -> Self {
        let transfer = Self::default();
        transfer.state.borrow_mut().dump_bytes = dump_bytes;
        transfer
    }

    pub fn set_dump_bytes(&self, bytes: u64) {
        self.state.borrow_mut().dump_bytes = bytes;
    }

    pub fn fail_dump(&self, fail: bool) {
        self.state.borrow_mut().fail_dump = fail;
    }

    pub fn fail_restore(&self, fail: bool) {
        self.state.borrow_mut().fail_restore = fail;
    }

    pub fn dumps(&self) -> Vec<PathBuf> {
        self.state.borrow().dumps.clone()
    }

    pub fn restores(&self) -> Vec<PathBuf> {
        self.state.borrow().restores.clone()
    }
}

impl DataTransferGateway for FakeTransfer {
    fn dump(&self, target_dir: &Path) -> Result<DumpResult> {
        let mut state = self.state.borrow_mut();
        state.dumps.push(target_dir.to_path_buf());
        if state.fail_dump {
            return Err(VaultError::gateway_failed("dump", target_dir, "injected failure"));
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target_dir.join("data.bin"))?;
        file.set_len(state.dump_bytes)?;
        Ok(DumpResult {
            path: target_dir.to_path_buf(),
        })
    }

    fn restore(&self, source_dir: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_restore {
            return Err(VaultError::gateway_failed("restore", source_dir, "injected failure"));
        }
        state.restores.push(source_dir.to_path_buf());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DedupState {
    calls: Vec<(PathBuf, u64)>,
    fail: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDedup {
    state: Rc<RefCell<DedupState>>,
}

impl FakeDedup {
    pub fn fail(&self, fail: bool) {
        self.state.borrow_mut().fail = fail;
    }

    pub fn calls(&self) -> Vec<(PathBuf, u64)> {
        self.state.borrow().calls.clone()
    }
}

impl DedupGateway for FakeDedup {
    fn deduplicate(&self, root: &Path, block_size: u64) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push((root.to_path_buf(), block_size));
        if state.fail {
            return Err(VaultError::gateway_failed("duperemove", root, "injected failure"));
        }
        Ok(())
    }
}

/// A data directory in a temp dir wired to fake gateways. The fakes are
/// shared, so state survives closing and reopening the vault.
pub struct TestVault {
    pub dir: tempfile::TempDir,
    pub volume: FakeVolume,
    pub transfer: FakeTransfer,
    pub dedup: FakeDedup,
    pub options: VaultOptions,
}

impl TestVault {
    /// A 64 MiB volume with a 1 MiB dump.
    pub fn new() -> Self {
        Self::with_sizes(64 * MIB, MIB)
    }

    pub fn with_sizes(initial_size: u64, dump_bytes: u64) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}")),
            volume: FakeVolume::new(),
            transfer: FakeTransfer::new(dump_bytes),
            dedup: FakeDedup::default(),
            options: VaultOptions {
                initial_size,
                compression: None,
                capacity: CapacityPolicy::default(),
                dedup_by_default: false,
                dedup_block_size: 128 * 1024,
                prune_incomplete: false,
            },
        }
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.dir.path().join("data"))
    }

    pub fn gateways(&self) -> Gateways {
        Gateways {
            storage: Box::new(self.volume.clone()),
            devices: Box::new(self.volume.clone()),
            transfer: Box::new(self.transfer.clone()),
            dedup: Box::new(self.dedup.clone()),
        }
    }

    pub fn open(&self) -> Result<Vault> {
        Vault::open_with(self.layout(), self.options.clone(), self.gateways())
    }
}

impl Default for TestVault {
    fn default() -> Self {
        Self::new()
    }
}
