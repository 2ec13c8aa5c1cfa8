use std::path::PathBuf;

use crate::capacity::{DEFAULT_GROWTH_MULTIPLIER, DEFAULT_METADATA_RESERVE, KIB, MIB};

pub(super) const MIN_INITIAL_SIZE: u64 = 128 * MIB;
pub(super) const MIN_DEDUP_BLOCK_SIZE: u64 = 4 * KIB;
pub(super) const MAX_DEDUP_BLOCK_SIZE: u64 = MIB;

pub(super) fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/subvault")
}

pub(super) fn default_initial_size() -> u64 {
    1024 * MIB
}

pub(super) fn default_metadata_reserve() -> u64 {
    DEFAULT_METADATA_RESERVE
}

pub(super) fn default_growth_multiplier() -> u64 {
    DEFAULT_GROWTH_MULTIPLIER
}

pub(super) fn default_dedup_block_size() -> u64 {
    128 * KIB
}

pub(super) fn default_storage_timeout_secs() -> u64 {
    600
}

pub(super) fn default_device_timeout_secs() -> u64 {
    120
}

// Dumps and restores of large databases routinely take hours.
pub(super) fn default_transfer_timeout_secs() -> u64 {
    6 * 60 * 60
}

pub(super) fn default_dedup_timeout_secs() -> u64 {
    6 * 60 * 60
}

pub(super) fn default_true() -> bool {
    true
}
