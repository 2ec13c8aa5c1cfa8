use subvault_core::config::VaultConfig;
use subvault_core::layout::Layout;
use subvault_core::lock;
use subvault_core::Result;

pub(crate) fn run_break_lock(cfg: &VaultConfig) -> Result<()> {
    let path = Layout::new(&cfg.data_dir).lock_path();
    if lock::break_lock(&path)? {
        println!("Removed lock {}.", path.display());
    } else {
        println!("No lock found.");
    }
    Ok(())
}
