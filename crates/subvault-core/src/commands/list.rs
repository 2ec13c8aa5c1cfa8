use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::reconcile;
use crate::error::Result;
use crate::gateway::ContainerMeta;
use crate::vault::Vault;

/// A completed backup that is present on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Completed backups, in the order they were started.
pub fn list_backups(vault: &mut Vault) -> Result<Vec<BackupEntry>> {
    reconcile::run(vault)?;
    vault.sync()?;

    let root = vault.backups_root()?;
    let on_disk: HashSet<String> = vault
        .gateways()
        .storage
        .list_containers(&root.path)?
        .into_iter()
        .map(|c| c.name)
        .collect();

    Ok(vault
        .journal()
        .list_completed_backups()
        .into_iter()
        .filter(|r| on_disk.contains(r.name()))
        .map(|r| BackupEntry {
            name: r.name().to_string(),
            path: root.path.join(r.name()),
            started_at: r.started_at,
            finished_at: r.finished_at,
        })
        .collect())
}

/// Space used by each completed backup, sorted by container id.
pub fn list_backup_sizes(vault: &mut Vault) -> Result<Vec<ContainerMeta>> {
    reconcile::run(vault)?;
    vault.sync()?;

    let root = vault.backups_root()?;
    let mut metas = vault.gateways().storage.containers_meta(&root.path)?;
    let completed = vault.journal().completed_names();
    metas.retain(|m| completed.contains(m.container.name.as_str()));
    metas.sort_by_key(|m| m.id);
    Ok(metas)
}
