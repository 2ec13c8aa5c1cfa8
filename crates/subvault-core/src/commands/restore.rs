use std::path::{Component, Path, PathBuf};

use tracing::info;

use super::reconcile;
use crate::error::{Result, VaultError};
use crate::layout::Layout;
use crate::vault::Vault;

/// Resolve user input to a backup path directly under the backups root.
///
/// Accepts a bare name (`backup_1700000000`), a path relative to the
/// backups root, or an absolute path inside it.
pub fn normalize_backup_path(layout: &Layout, input: &str) -> Result<PathBuf> {
    let not_found = || VaultError::BackupNotFound(input.to_string());
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(not_found());
    }

    let root = layout.backups_root();
    let candidate = Path::new(trimmed);
    let relative = match candidate.strip_prefix(&root) {
        Ok(rest) => rest,
        Err(_) => Path::new(trimmed.trim_start_matches('/')),
    };

    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Ok(root.join(name)),
        _ => Err(not_found()),
    }
}

/// Restore the database from a completed backup.
pub fn run(vault: &mut Vault, backup: &str) -> Result<PathBuf> {
    let path = normalize_backup_path(vault.layout(), backup)?;
    reconcile::run(vault)?;

    if vault.gateways().storage.find_container(&path)?.is_none() {
        return Err(VaultError::BackupNotFound(backup.to_string()));
    }

    info!(backup = %path.display(), "restoring");
    vault.gateways().transfer.restore(&path)?;
    info!(backup = %path.display(), "restore finished");
    Ok(path)
}
