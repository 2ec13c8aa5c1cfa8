use subvault_core::config::VaultConfig;
use subvault_core::hooks::{self, HookContext};

use crate::cli::Commands;
use crate::cmd;

pub(crate) fn dispatch_command(
    command: &Commands,
    cfg: &VaultConfig,
    forward_stderr: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = HookContext::new(command.name(), &cfg.data_dir.to_string_lossy());
    match command {
        Commands::Backup {
            incremental,
            compression,
            dedup_block_size,
        } => {
            let args = cmd::backup::BackupArgs::parse(
                *incremental,
                compression.as_deref(),
                dedup_block_size.as_deref(),
            )?;
            hooks::run_with_hooks(&cfg.hooks, &mut ctx, |ctx| {
                cmd::backup::run_backup(cfg, &args, ctx, forward_stderr)
            })?;
        }
        Commands::List => {
            hooks::run_with_hooks(&cfg.hooks, &mut ctx, |_| {
                cmd::list::run_list(cfg, forward_stderr)
            })?;
        }
        Commands::Sizes => {
            hooks::run_with_hooks(&cfg.hooks, &mut ctx, |_| {
                cmd::list::run_sizes(cfg, forward_stderr)
            })?;
        }
        Commands::Restore { backup } => {
            hooks::run_with_hooks(&cfg.hooks, &mut ctx, |ctx| {
                ctx.backup = Some(backup.trim().to_string());
                cmd::restore::run_restore(cfg, backup, forward_stderr)
            })?;
        }
        Commands::Reconcile => {
            hooks::run_with_hooks(&cfg.hooks, &mut ctx, |_| {
                cmd::reconcile::run_reconcile(cfg, forward_stderr)
            })?;
        }
        Commands::Journal => cmd::list::run_journal(cfg, forward_stderr)?,
        Commands::BreakLock => cmd::break_lock::run_break_lock(cfg)?,
        // Handled in main before any config is loaded.
        Commands::Config { .. } => {}
    }
    Ok(())
}
