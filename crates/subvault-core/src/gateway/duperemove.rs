use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::DedupGateway;
use crate::error::{Result, VaultError};
use crate::platform::shell::ToolRunner;

/// Printed by duperemove, with a non-zero exit, when nothing can be deduplicated.
const NO_CANDIDATES: &str = "No dedupe candidates found";

/// Extent-level deduplication with `duperemove`.
#[derive(Debug, Clone)]
pub struct Duperemove {
    runner: ToolRunner,
    hashfile: PathBuf,
}

impl Duperemove {
    /// `hashfile` persists block hashes between runs so only new data is read.
    pub fn new(runner: ToolRunner, hashfile: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            hashfile: hashfile.into(),
        }
    }

    fn args(&self, root: &Path, block_size: u64) -> Vec<OsString> {
        let mut hashfile = OsString::from("--hashfile=");
        hashfile.push(&self.hashfile);
        vec![
            "-dr".into(),
            "-b".into(),
            block_size.to_string().into(),
            "--lookup-extents=yes".into(),
            hashfile,
            root.into(),
        ]
    }
}

impl DedupGateway for Duperemove {
    fn deduplicate(&self, root: &Path, block_size: u64) -> Result<()> {
        info!(root = %root.display(), block_size, "deduplicating");
        let output = self
            .runner
            .output("duperemove", &self.args(root, block_size), "duperemove")?;
        check_outcome(output.status.success(), &output.stderr, root)
    }
}

fn check_outcome(success: bool, stderr: &[u8], root: &Path) -> Result<()> {
    if success {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(stderr);
    if stderr.contains(NO_CANDIDATES) {
        debug!(root = %root.display(), "nothing to deduplicate");
        return Ok(());
    }
    Err(VaultError::gateway_failed(
        "duperemove",
        root,
        stderr.trim().to_string(),
    ))
}
