use tracing::debug;

use subvault_core::commands::backup::{self, BackupRequest};
use subvault_core::compress::Compression;
use subvault_core::config::{parse_size, VaultConfig};
use subvault_core::hooks::HookContext;
use subvault_core::{Result, VaultError};

use super::with_vault;
use crate::format::format_bytes;
use crate::table::{add_kv_row, CliTableTheme};

/// Validated per-invocation overrides for `subvault backup`.
#[derive(Debug, Clone, Default)]
pub(crate) struct BackupArgs {
    pub incremental: bool,
    pub compression: Option<Option<Compression>>,
    pub dedup_block_size: Option<u64>,
}

impl BackupArgs {
    pub(crate) fn parse(
        incremental: bool,
        compression: Option<&str>,
        dedup_block_size: Option<&str>,
    ) -> Result<Self> {
        let compression = compression.map(Compression::parse).transpose()?;
        let dedup_block_size = dedup_block_size
            .map(|s| {
                parse_size(s).map_err(|e| VaultError::Config(format!("--dedup-block-size: {e}")))
            })
            .transpose()?;
        Ok(Self {
            incremental,
            compression,
            dedup_block_size,
        })
    }
}

pub(crate) fn run_backup(
    cfg: &VaultConfig,
    args: &BackupArgs,
    ctx: &mut HookContext,
    forward_stderr: bool,
) -> Result<()> {
    let cfg = match args.dedup_block_size {
        Some(block_size) => {
            let mut cfg = cfg.clone();
            cfg.dedup.block_size = block_size;
            cfg.validate()?;
            cfg
        }
        None => cfg.clone(),
    };

    let request = BackupRequest {
        compression: args.compression,
        deduplicate: args.incremental,
        timestamp: None,
    };

    let outcome = with_vault(&cfg, forward_stderr, |vault| {
        backup::run_with_progress(vault, &request, &mut |phase| {
            debug!(?phase, "backup progress");
        })
    })?;
    ctx.backup = Some(outcome.name.clone());

    let theme = CliTableTheme::detect();
    let mut table = theme.new_kv_table();
    add_kv_row(&mut table, theme, "Backup", &outcome.name);
    add_kv_row(&mut table, theme, "Path", outcome.path.display());
    add_kv_row(&mut table, theme, "Dump size", format_bytes(outcome.size_bytes));
    if outcome.grow_cycles > 0 {
        add_kv_row(&mut table, theme, "Volume grown", format!("{} time(s)", outcome.grow_cycles));
    }
    add_kv_row(
        &mut table,
        theme,
        "Deduplicated",
        if outcome.deduplicated { "yes" } else { "no" },
    );
    println!("{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_are_validated() {
        let args = BackupArgs::parse(true, Some("zlib:4"), Some("64K")).unwrap();
        assert!(args.incremental);
        assert_eq!(args.compression.unwrap().unwrap().to_string(), "zlib:4");
        assert_eq!(args.dedup_block_size, Some(64 * 1024));

        let args = BackupArgs::parse(false, Some("none"), None).unwrap();
        assert_eq!(args.compression, Some(None));

        assert!(BackupArgs::parse(false, Some("zstd:99"), None).is_err());
        assert!(BackupArgs::parse(false, None, Some("lots")).is_err());
    }

    #[test]
    fn no_overrides_keep_config_defaults() {
        let args = BackupArgs::parse(false, None, None).unwrap();
        assert!(args.compression.is_none());
        assert!(args.dedup_block_size.is_none());
    }
}
