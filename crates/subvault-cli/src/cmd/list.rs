use comfy_table::Cell;

use subvault_core::commands::list;
use subvault_core::config::VaultConfig;
use subvault_core::Result;

use super::with_vault;
use crate::format::{format_bytes, format_optional_time, format_time};
use crate::table::CliTableTheme;

pub(crate) fn run_list(cfg: &VaultConfig, forward_stderr: bool) -> Result<()> {
    let backups = with_vault(cfg, forward_stderr, list::list_backups)?;
    if backups.is_empty() {
        println!("No backups found.");
        return Ok(());
    }

    let theme = CliTableTheme::detect();
    let mut table = theme.new_data_table(&["#", "Backup", "Started", "Finished"]);
    for (index, entry) in backups.iter().enumerate() {
        table.add_row(vec![
            Cell::new(index),
            Cell::new(&entry.name),
            Cell::new(format_time(&entry.started_at)),
            Cell::new(format_optional_time(entry.finished_at.as_ref())),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub(crate) fn run_sizes(cfg: &VaultConfig, forward_stderr: bool) -> Result<()> {
    let sizes = with_vault(cfg, forward_stderr, list::list_backup_sizes)?;
    if sizes.is_empty() {
        println!("No backups found.");
        return Ok(());
    }

    let theme = CliTableTheme::detect();
    let mut table = theme.new_data_table(&[
        "Id",
        "Backup Name",
        "Usage referenced",
        "Usage exclusive",
    ]);
    for meta in &sizes {
        table.add_row(vec![
            Cell::new(meta.id),
            Cell::new(&meta.container.name),
            Cell::new(format_bytes(meta.size_referenced)),
            Cell::new(format_bytes(meta.size_exclusive)),
        ]);
    }
    println!("{table}");

    let exclusive: u64 = sizes.iter().map(|m| m.size_exclusive).sum();
    println!("Total exclusive: {}", format_bytes(exclusive));
    Ok(())
}

/// Every journal record, completed or not, without reconciling first.
pub(crate) fn run_journal(cfg: &VaultConfig, forward_stderr: bool) -> Result<()> {
    let records = with_vault(cfg, forward_stderr, |vault| {
        Ok(vault.journal().list_backups().to_vec())
    })?;
    if records.is_empty() {
        println!("Journal is empty.");
        return Ok(());
    }

    let theme = CliTableTheme::detect();
    let mut table = theme.new_data_table(&["#", "Path", "Completed", "Started", "Finished"]);
    for (index, record) in records.iter().enumerate() {
        table.add_row(vec![
            Cell::new(index),
            Cell::new(&record.path),
            Cell::new(if record.completed { "yes" } else { "no" }),
            Cell::new(format_time(&record.started_at)),
            Cell::new(format_optional_time(record.finished_at.as_ref())),
        ]);
    }
    println!("{table}");
    Ok(())
}
