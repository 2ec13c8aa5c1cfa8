use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::Result;
use crate::gateway::Container;
use crate::layout::SCRATCH_PREFIX;
use crate::platform::fs::remove_dir_best_effort;
use crate::vault::Vault;

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Orphaned containers that were deleted.
    pub deleted: Vec<PathBuf>,
    /// Incomplete journal records dropped, when pruning is enabled.
    pub pruned_records: usize,
    /// Leftover scratch directories removed.
    pub scratch_removed: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.deleted.is_empty() && self.pruned_records == 0 && self.scratch_removed == 0
    }
}

/// Delete every container under the backups root that no completed journal
/// record refers to. Running it twice in a row changes nothing the second time.
pub fn run(vault: &mut Vault) -> Result<ReconcileReport> {
    let root = vault.backups_root()?;
    let containers = vault.gateways().storage.list_containers(&root.path)?;

    let orphans: Vec<Container> = {
        let completed = vault.journal().completed_names();
        containers
            .into_iter()
            .filter(|c| !completed.contains(c.name.as_str()))
            .collect()
    };

    let mut report = ReconcileReport::default();
    for orphan in orphans {
        info!(path = %orphan.path.display(), "deleting orphaned backup");
        vault.gateways().storage.delete_container(&orphan)?;
        report.deleted.push(orphan.path);
    }

    if vault.options().prune_incomplete {
        report.pruned_records = vault.journal_mut().prune_incomplete()?;
        if report.pruned_records > 0 {
            info!(count = report.pruned_records, "pruned incomplete journal records");
        }
    }

    report.scratch_removed = remove_scratch_dirs(vault)?;
    debug!(?report, "reconciliation finished");
    Ok(report)
}

fn remove_scratch_dirs(vault: &Vault) -> Result<usize> {
    let tmp = vault.layout().tmp_dir();
    let entries = match std::fs::read_dir(&tmp) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX) {
            info!(path = %entry.path().display(), "removing leftover scratch directory");
            remove_dir_best_effort(&entry.path());
            removed += 1;
        }
    }
    Ok(removed)
}
