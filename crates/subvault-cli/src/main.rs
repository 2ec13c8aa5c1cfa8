mod cli;
mod cmd;
mod config_gen;
mod dispatch;
mod format;
mod table;

use clap::Parser;

use subvault_core::config;

use cli::{Cli, Commands};
use config_gen::run_config_generate;
use dispatch::dispatch_command;

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // No config file needed to write one.
    if let Commands::Config { dest } = &cli.command {
        if let Err(e) = run_config_generate(dest.as_deref()) {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let Some(source) = config::resolve_config_path(cli.config.as_deref()) else {
        eprintln!("Error: no configuration file found.");
        eprintln!("Searched:");
        for (path, level) in config::default_config_search_paths() {
            eprintln!("  {} ({})", path.display(), level);
        }
        eprintln!();
        eprintln!("Run `subvault config` to generate a starter config file.");
        std::process::exit(1);
    };

    tracing::info!("Using config: {source}");

    let cfg = match config::load_config(source.path()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let forward_stderr = cli.verbose >= 2;
    if let Err(e) = dispatch_command(&cli.command, &cfg, forward_stderr) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
