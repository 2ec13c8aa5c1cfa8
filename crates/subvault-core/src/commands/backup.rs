use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info};

use super::reconcile;
use crate::compress::{Compression, NO_COMPRESSION_PROPERTY};
use crate::error::Result;
use crate::platform::fs::{directory_size, move_dir_contents, remove_dir_best_effort};
use crate::vault::Vault;

/// How a single backup should be made.
#[derive(Debug, Clone, Default)]
pub struct BackupRequest {
    /// `None` uses the volume's configured compression, `Some(None)` marks
    /// the container uncompressed so the mount option does not apply.
    pub compression: Option<Option<Compression>>,
    /// Deduplicate the backups root after moving the data in. Always done
    /// when dedup is enabled in the configuration.
    pub deduplicate: bool,
    /// Unix timestamp naming the backup. Defaults to now.
    pub timestamp: Option<i64>,
}

/// Progress of one backup attempt. A failure before `Completed` leaves the
/// journal record incomplete for the next reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    NotStarted,
    Dumping,
    SizingAndMaybeGrowing,
    ContainerCreated,
    DataMoved,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub path: PathBuf,
    pub name: String,
    /// Bytes produced by the dump.
    pub size_bytes: u64,
    pub grow_cycles: usize,
    pub deduplicated: bool,
}

pub fn run(vault: &mut Vault, request: &BackupRequest) -> Result<BackupOutcome> {
    run_with_progress(vault, request, &mut |_| {})
}

/// Dump the source into a new container, growing the volume first if the
/// dump does not fit.
pub fn run_with_progress(
    vault: &mut Vault,
    request: &BackupRequest,
    progress: &mut dyn FnMut(BackupPhase),
) -> Result<BackupOutcome> {
    progress(BackupPhase::NotStarted);
    reconcile::run(vault)?;

    let root = vault.backups_root()?;
    let timestamp = request.timestamp.unwrap_or_else(|| Utc::now().timestamp());
    let target = vault.layout().backup_path(timestamp);
    let target_str = target.to_string_lossy().into_owned();
    vault.journal_mut().start_backup(&target_str)?;
    info!(backup = %target.display(), "backup started");

    progress(BackupPhase::Dumping);
    let scratch = vault.layout().scratch_dir(timestamp);
    std::fs::create_dir_all(&scratch)?;
    let dump = vault.gateways().transfer.dump(&scratch)?;

    progress(BackupPhase::SizingAndMaybeGrowing);
    let size_bytes = directory_size(&dump.path)?;
    debug!(size = size_bytes, scratch = %dump.path.display(), "dump finished");
    let grow_cycles = vault.ensure_capacity(size_bytes)?;

    let container = vault.gateways().storage.create_container(&target)?;
    // An explicit "none" has to be recorded on the container, otherwise the
    // volume's mount-level compression still applies to the data moved in.
    let property = match request.compression {
        Some(Some(compression)) => Some(compression.property_value()),
        Some(None) => Some(NO_COMPRESSION_PROPERTY),
        None => vault.options().compression.map(|c| c.property_value()),
    };
    if let Some(value) = property {
        vault
            .gateways()
            .storage
            .set_property(&container.path, "compression", value)?;
    }
    progress(BackupPhase::ContainerCreated);

    move_dir_contents(&dump.path, &container.path)?;
    progress(BackupPhase::DataMoved);

    let deduplicated = request.deduplicate || vault.options().dedup_by_default;
    if deduplicated {
        info!(root = %root.path.display(), "deduplicating backups");
        vault
            .gateways()
            .dedup
            .deduplicate(&root.path, vault.options().dedup_block_size)?;
    }

    vault.journal_mut().finish_backup(&target_str)?;
    progress(BackupPhase::Completed);
    info!(
        backup = %target.display(),
        size = size_bytes,
        grow_cycles,
        deduplicated,
        "backup completed"
    );

    remove_dir_best_effort(&scratch);

    Ok(BackupOutcome {
        name: container.name,
        path: target,
        size_bytes,
        grow_cycles,
        deduplicated,
    })
}
