pub(crate) mod backup;
pub(crate) mod break_lock;
pub(crate) mod list;
pub(crate) mod reconcile;
pub(crate) mod restore;

use subvault_core::config::VaultConfig;
use subvault_core::{Result, Vault};
use tracing::warn;

/// Open the vault, run `action`, then unmount and unlock.
///
/// A failure to close is only reported when the action itself succeeded;
/// otherwise it is logged so the original error is the one shown.
pub(crate) fn with_vault<T>(
    cfg: &VaultConfig,
    forward_stderr: bool,
    action: impl FnOnce(&mut Vault) -> Result<T>,
) -> Result<T> {
    let mut vault = Vault::open(cfg, forward_stderr)?;
    let result = action(&mut vault);
    match (result, vault.close()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close)) => Err(close),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close)) => {
            warn!("failed to close volume: {close}");
            Err(e)
        }
    }
}
