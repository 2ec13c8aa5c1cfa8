use subvault_core::commands::restore;
use subvault_core::config::VaultConfig;
use subvault_core::Result;

use super::with_vault;

pub(crate) fn run_restore(cfg: &VaultConfig, backup: &str, forward_stderr: bool) -> Result<()> {
    let path = with_vault(cfg, forward_stderr, |vault| restore::run(vault, backup))?;
    println!("Restored from {}", path.display());
    Ok(())
}
