use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Result, VaultError};

/// Build a shell command for a script.
pub fn command_for_script(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

/// Quote a value for interpolation into a `sh -c` script.
pub fn shell_escape(input: &str) -> String {
    if input.is_empty() {
        return "''".to_string();
    }
    let escaped = input.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}

/// Run an already-configured `Command` with a timeout. The command is spawned
/// with piped stdout/stderr, drained on background threads so a chatty child
/// cannot block on a full pipe. Returns `TimedOut` if it does not complete in
/// time; the child is killed in that case.
pub fn run_command_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<Output> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let poll_interval = Duration::from_millis(50);

    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("command timed out after {} seconds", timeout.as_secs()),
                    ));
                }
                std::thread::sleep(poll_interval);
            }
        }
    };

    Ok(Output {
        status,
        stdout: stdout.map(join_drain).unwrap_or_default(),
        stderr: stderr.map(join_drain).unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).ok();
        buf
    })
}

fn join_drain(handle: std::thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

/// Locate a binary in `PATH`.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Runs external tools on behalf of a gateway.
///
/// Every invocation is bounded by `timeout`. When `forward_stderr` is set the
/// tool's stderr is echoed to our own stderr after it exits.
#[derive(Debug, Clone, Copy)]
pub struct ToolRunner {
    timeout: Duration,
    forward_stderr: bool,
}

impl ToolRunner {
    pub fn new(timeout: Duration, forward_stderr: bool) -> Self {
        Self {
            timeout,
            forward_stderr,
        }
    }

    /// Run `binary args...` and return its output whatever the exit status.
    ///
    /// Fails only if the tool is missing or times out.
    pub fn output<S: AsRef<OsStr>>(
        &self,
        binary: &str,
        args: &[S],
        operation: &str,
    ) -> Result<Output> {
        let program =
            find_binary(binary).ok_or_else(|| VaultError::GatewayUnavailable(binary.to_string()))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.execute(&mut cmd, operation)
    }

    /// Run `binary args...` and fail with `GatewayFailed` on a non-zero exit.
    pub fn run<S: AsRef<OsStr>>(
        &self,
        binary: &str,
        args: &[S],
        operation: &str,
        path: &Path,
    ) -> Result<Output> {
        let output = self.output(binary, args, operation)?;
        check_status(&output, operation, path)?;
        Ok(output)
    }

    /// Run a shell script through `sh -c` under the same timeout policy.
    pub fn run_script(&self, script: &str, operation: &str, path: &Path) -> Result<Output> {
        let mut cmd = command_for_script(script);
        let output = self.execute(&mut cmd, operation)?;
        check_status(&output, operation, path)?;
        Ok(output)
    }

    fn execute(&self, cmd: &mut Command, operation: &str) -> Result<Output> {
        debug!(operation, command = ?cmd, "running external tool");
        let output = run_command_with_timeout(cmd, self.timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                VaultError::GatewayTimeout {
                    operation: operation.to_string(),
                    secs: self.timeout.as_secs(),
                }
            } else {
                VaultError::Io(e)
            }
        })?;
        if self.forward_stderr && !output.stderr.is_empty() {
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(output)
    }
}

fn check_status(output: &Output, operation: &str, path: &Path) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let code = output
        .status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(VaultError::gateway_failed(
        operation,
        path,
        format!("exit code {code}: {}", stderr.trim()),
    ))
}
