use std::fmt;

use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};
use crate::gateway::{BackingStore, BlockDeviceGateway, FilesystemUsage, MountPoint, StorageGateway};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// Free space held back for subvolume metadata when sizing a backup.
pub const DEFAULT_METADATA_RESERVE: u64 = 16 * KIB;

/// Growth applied on top of the shortfall to amortize future grow cycles.
pub const DEFAULT_GROWTH_MULTIPLIER: u64 = 2;

/// Grow cycles attempted before giving up on a single request.
const MAX_GROW_ROUNDS: usize = 3;

pub fn round_up_to_mib(bytes: u64) -> u64 {
    bytes.div_ceil(MIB).saturating_mul(MIB)
}

/// Steps of the grow protocol, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowStep {
    Unmount,
    Detach,
    Extend,
    Attach,
    Mount,
    Resize,
    Verify,
}

impl fmt::Display for GrowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GrowStep::Unmount => "unmount",
            GrowStep::Detach => "detach loop device",
            GrowStep::Extend => "extend backing store",
            GrowStep::Attach => "attach loop device",
            GrowStep::Mount => "mount",
            GrowStep::Resize => "resize filesystem",
            GrowStep::Verify => "verify free space",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPolicy {
    pub metadata_reserve: u64,
    pub growth_multiplier: u64,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            metadata_reserve: DEFAULT_METADATA_RESERVE,
            growth_multiplier: DEFAULT_GROWTH_MULTIPLIER,
        }
    }
}

impl CapacityPolicy {
    /// Bytes missing for `required` to fit, or `None` if it already fits.
    pub fn shortfall(&self, usage: &FilesystemUsage, required: u64) -> Option<u64> {
        let available = usage.free.saturating_sub(self.metadata_reserve);
        (available < required).then(|| required - available)
    }

    /// How much to extend the backing store to cover `shortfall`.
    pub fn extension_for(&self, shortfall: u64) -> u64 {
        round_up_to_mib(shortfall.saturating_mul(self.growth_multiplier.max(1)))
    }
}

/// Outcome of [`CapacityManager::ensure_capacity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capacity {
    /// The mount point to use from now on. Differs from the input after a grow.
    pub mount: MountPoint,
    pub grow_cycles: usize,
}

/// Checks whether data fits on the volume and grows the volume when it does not.
pub struct CapacityManager<'a> {
    storage: &'a dyn StorageGateway,
    devices: &'a dyn BlockDeviceGateway,
    policy: CapacityPolicy,
}

impl<'a> CapacityManager<'a> {
    pub fn new(
        storage: &'a dyn StorageGateway,
        devices: &'a dyn BlockDeviceGateway,
        policy: CapacityPolicy,
    ) -> Self {
        Self {
            storage,
            devices,
            policy,
        }
    }

    /// Make sure `required` bytes fit on the volume mounted at `mount`.
    ///
    /// Consumes the mount point: after a grow cycle the device and mount are
    /// recreated and only the returned value is valid.
    pub fn ensure_capacity(
        &self,
        store: &mut BackingStore,
        mount: MountPoint,
        required: u64,
    ) -> Result<Capacity> {
        let mut mount = mount;
        let mut grow_cycles = 0;

        loop {
            let usage = self.storage.filesystem_usage(&mount.path)?;
            let Some(shortfall) = self.policy.shortfall(&usage, required) else {
                debug!(
                    required,
                    free = usage.free,
                    device_size = usage.device_size,
                    "enough free space"
                );
                return Ok(Capacity { mount, grow_cycles });
            };

            if grow_cycles == MAX_GROW_ROUNDS {
                return Err(VaultError::CapacityGrowth {
                    step: GrowStep::Verify,
                    source: Box::new(VaultError::Other(format!(
                        "still {shortfall} bytes short after {grow_cycles} grow cycles"
                    ))),
                });
            }
            if grow_cycles > 0 {
                warn!(shortfall, "volume still too small after growing, growing again");
            }

            mount = self.grow(store, mount, shortfall)?;
            grow_cycles += 1;
        }
    }

    /// Unmount, detach, extend, attach, mount, resize. Any failing step
    /// aborts the sequence as-is.
    fn grow(&self, store: &mut BackingStore, mount: MountPoint, shortfall: u64) -> Result<MountPoint> {
        let extension = self.policy.extension_for(shortfall);
        info!(
            shortfall,
            extension,
            backing_file = %store.path.display(),
            current_size = store.size_bytes,
            "growing volume"
        );
        let extension = i64::try_from(extension).map_err(|_| VaultError::CapacityGrowth {
            step: GrowStep::Extend,
            source: Box::new(VaultError::Other(format!(
                "extension of {extension} bytes is out of range"
            ))),
        })?;

        let target = mount.path.clone();
        let compression = mount.compression;

        step(GrowStep::Unmount, self.devices.unmount(&mount))?;
        step(GrowStep::Detach, self.devices.detach(&mount.device))?;
        step(GrowStep::Extend, self.devices.extend_by(store, extension))?;
        let device = step(GrowStep::Attach, self.devices.attach(store))?;
        let remounted = step(
            GrowStep::Mount,
            self.devices.mount(&device, &target, compression),
        )?;
        step(GrowStep::Resize, self.storage.resize(&remounted.path, "max"))?;

        info!(
            device = %remounted.device.id,
            new_size = store.size_bytes,
            "volume grown"
        );
        Ok(remounted)
    }
}

fn step<T>(step: GrowStep, result: Result<T>) -> Result<T> {
    result.map_err(|e| VaultError::CapacityGrowth {
        step,
        source: Box::new(e),
    })
}
