use std::path::Path;

use tracing::info;

use super::{DataTransferGateway, DumpResult};
use crate::config::CommandSource;
use crate::error::Result;
use crate::platform::shell::{shell_escape, ToolRunner};

/// Data transfer through user-supplied shell commands.
///
/// `{dir}` in either command is replaced with the shell-quoted directory.
#[derive(Debug, Clone)]
pub struct CommandTransfer {
    runner: ToolRunner,
    source: CommandSource,
}

impl CommandTransfer {
    pub fn new(source: CommandSource, runner: ToolRunner) -> Self {
        Self { runner, source }
    }
}

fn substitute_dir(template: &str, dir: &Path) -> String {
    template.replace("{dir}", &shell_escape(&dir.to_string_lossy()))
}

impl DataTransferGateway for CommandTransfer {
    fn dump(&self, target_dir: &Path) -> Result<DumpResult> {
        let script = substitute_dir(&self.source.dump, target_dir);
        info!(command = %script, "running dump command");
        self.runner.run_script(&script, "dump command", target_dir)?;
        Ok(DumpResult {
            path: target_dir.to_path_buf(),
        })
    }

    fn restore(&self, source_dir: &Path) -> Result<()> {
        let script = substitute_dir(&self.source.restore, source_dir);
        info!(command = %script, "running restore command");
        self.runner.run_script(&script, "restore command", source_dir)?;
        Ok(())
    }
}
