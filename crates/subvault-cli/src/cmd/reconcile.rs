use subvault_core::commands::reconcile;
use subvault_core::config::VaultConfig;
use subvault_core::Result;

use super::with_vault;

pub(crate) fn run_reconcile(cfg: &VaultConfig, forward_stderr: bool) -> Result<()> {
    let report = with_vault(cfg, forward_stderr, reconcile::run)?;
    if report.is_clean() {
        println!("Nothing to clean up.");
        return Ok(());
    }

    for path in &report.deleted {
        println!("Deleted incomplete backup {}", path.display());
    }
    if report.pruned_records > 0 {
        println!("Pruned {} incomplete journal record(s).", report.pruned_records);
    }
    if report.scratch_removed > 0 {
        println!("Removed leftover scratch directories: {}", report.scratch_removed);
    }
    Ok(())
}
