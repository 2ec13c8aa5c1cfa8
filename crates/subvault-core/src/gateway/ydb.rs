use std::ffi::OsString;
use std::path::Path;

use tracing::info;

use super::{DataTransferGateway, DumpResult};
use crate::config::{YdbAuth, YdbSource};
use crate::error::Result;
use crate::platform::shell::ToolRunner;

const YDB: &str = "ydb";

/// Dumps and restores a YDB database with `ydb tools dump|restore`.
#[derive(Debug, Clone)]
pub struct YdbCli {
    runner: ToolRunner,
    source: YdbSource,
    auth: YdbAuth,
}

impl YdbCli {
    /// Fails if the source configures more than one auth method.
    pub fn new(source: YdbSource, runner: ToolRunner) -> Result<Self> {
        let auth = source.auth()?;
        Ok(Self {
            runner,
            source,
            auth,
        })
    }

    fn connection_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> =
            tool_args!["-e", &self.source.endpoint, "-d", &self.source.database].into();
        match &self.auth {
            YdbAuth::Default => {}
            YdbAuth::YcTokenFile(p) => args.extend(tool_args!["--yc-token-file", p]),
            YdbAuth::IamTokenFile(p) => args.extend(tool_args!["--iam-token-file", p]),
            YdbAuth::SaKeyFile(p) => args.extend(tool_args!["--sa-key-file", p]),
            YdbAuth::Profile(name) => args.extend(tool_args!["-p", name]),
            YdbAuth::MetadataCredentials => args.push("--use-metadata-credentials".into()),
        }
        args
    }

    fn dump_args(&self, target_dir: &Path) -> Vec<OsString> {
        let opts = &self.source.dump;
        let mut args = self.connection_args();
        args.extend(tool_args!["tools", "dump", "-o", target_dir]);
        if let Some(path) = &opts.path {
            args.extend(tool_args!["-p", path]);
        }
        for pattern in &opts.exclude {
            args.extend(tool_args!["--exclude", pattern]);
        }
        if opts.scheme_only {
            args.push("--scheme-only".into());
        }
        if let Some(level) = opts.consistency_level {
            args.extend(tool_args!["--consistency-level", level.as_str()]);
        }
        if opts.avoid_copy {
            args.push("--avoid-copy".into());
        }
        args
    }

    fn restore_args(&self, source_dir: &Path) -> Vec<OsString> {
        let opts = &self.source.restore;
        let mut args = self.connection_args();
        args.extend(tool_args![
            "tools",
            "restore",
            "-i",
            source_dir,
            "-p",
            opts.path.as_deref().unwrap_or("."),
            "--restore-data",
            flag(opts.data),
            "--restore-indexes",
            flag(opts.indexes),
        ]);
        if opts.dry_run {
            args.push("--dry-run".into());
        }
        args
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

impl DataTransferGateway for YdbCli {
    fn dump(&self, target_dir: &Path) -> Result<DumpResult> {
        info!(
            endpoint = %self.source.endpoint,
            database = %self.source.database,
            target = %target_dir.display(),
            "dumping database"
        );
        self.runner
            .run(YDB, &self.dump_args(target_dir), "ydb tools dump", target_dir)?;
        Ok(DumpResult {
            path: target_dir.to_path_buf(),
        })
    }

    fn restore(&self, source_dir: &Path) -> Result<()> {
        info!(
            endpoint = %self.source.endpoint,
            database = %self.source.database,
            source = %source_dir.display(),
            "restoring database"
        );
        self.runner
            .run(YDB, &self.restore_args(source_dir), "ydb tools restore", source_dir)?;
        Ok(())
    }
}
