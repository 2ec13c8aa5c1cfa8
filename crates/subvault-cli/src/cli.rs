use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "subvault",
    version,
    about = "Database dumps kept as btrfs subvolumes on a self-growing loop volume",
    after_help = "\
Configuration file lookup order:
  1. --config <path>                          (explicit flag)
  2. $SUBVAULT_CONFIG                         (environment variable)
  3. ./subvault.yaml                          (project)
  4. $XDG_CONFIG_HOME/subvault/config.yaml    (user, defaults to ~/.config)
  5. /etc/subvault/config.yaml                (system)

Most commands need root: they attach loop devices and mount filesystems."
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides SUBVAULT_CONFIG and default search)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv). From -vv on, output of the external
    /// tools is shown as well.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Dump the database into a new backup
    Backup {
        /// Deduplicate the backups after this one is written
        #[arg(short, long)]
        incremental: bool,

        /// Compression override: zlib[:1-9], lzo, zstd[:1-15] or none
        #[arg(long)]
        compression: Option<String>,

        /// Deduplication block size override, e.g. 64K
        #[arg(long)]
        dedup_block_size: Option<String>,
    },

    /// List completed backups
    List,

    /// Show disk usage of each backup
    Sizes,

    /// Restore the database from a backup
    Restore {
        /// Backup name (backup_<timestamp>) or its full path
        backup: String,
    },

    /// Delete backups that never completed
    Reconcile,

    /// Show every journal record, including incomplete attempts
    Journal,

    /// Remove a lock left behind by a killed process
    BreakLock,

    /// Generate a minimal configuration file
    Config {
        /// Destination path (skips interactive prompt)
        #[arg(short, long)]
        dest: Option<String>,
    },
}

impl Commands {
    /// Name used for hook lookup (`before_<name>`, ...).
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Commands::Backup { .. } => "backup",
            Commands::List => "list",
            Commands::Sizes => "sizes",
            Commands::Restore { .. } => "restore",
            Commands::Reconcile => "reconcile",
            Commands::Journal => "journal",
            Commands::BreakLock => "break-lock",
            Commands::Config { .. } => "config",
        }
    }
}
