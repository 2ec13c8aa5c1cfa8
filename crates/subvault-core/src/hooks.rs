use std::process::Command;

use tracing::{info, warn};

use crate::config::{HooksConfig, HOOK_COMMANDS};
use crate::error::{Result, VaultError};
use crate::platform::shell::shell_escape;

/// Context passed to hook commands via environment variables and variable substitution.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub command: String,
    pub data_dir: String,
    /// Backup the command is working on, once known.
    pub backup: Option<String>,
    pub error: Option<String>,
}

impl HookContext {
    pub fn new(command: &str, data_dir: &str) -> Self {
        Self {
            command: command.to_string(),
            data_dir: data_dir.to_string(),
            backup: None,
            error: None,
        }
    }
}

/// Run the full hook lifecycle around an action:
///
/// 1. `before` then `before_<cmd>`
/// 2. The action itself
/// 3. On success `after_<cmd>` then `after`; on failure `failed_<cmd>` then `failed`
/// 4. Always `finally_<cmd>` then `finally`
///
/// A failing `before` hook aborts the action and triggers `failed` + `finally`.
/// Failures of the other hooks are logged and do not change the result.
pub fn run_with_hooks<F, T>(hooks: &HooksConfig, ctx: &mut HookContext, action: F) -> Result<T>
where
    F: FnOnce(&mut HookContext) -> Result<T>,
{
    if hooks.is_empty() || !HOOK_COMMANDS.contains(&ctx.command.as_str()) {
        return action(ctx);
    }

    let cmd = ctx.command.clone();
    let before_key = format!("before_{cmd}");
    let after_key = format!("after_{cmd}");
    let failed_key = format!("failed_{cmd}");
    let finally_key = format!("finally_{cmd}");

    let before_result = run_hook_list(hooks.get_hooks("before"), ctx)
        .and_then(|()| run_hook_list(hooks.get_hooks(&before_key), ctx));

    let action_result = match before_result {
        Ok(()) => action(ctx),
        Err(e) => {
            ctx.error = Some(e.to_string());
            Err(e)
        }
    };

    match &action_result {
        Ok(_) => {
            log_hook_errors(run_hook_list(hooks.get_hooks(&after_key), ctx));
            log_hook_errors(run_hook_list(hooks.get_hooks("after"), ctx));
        }
        Err(e) => {
            if ctx.error.is_none() {
                ctx.error = Some(e.to_string());
            }
            log_hook_errors(run_hook_list(hooks.get_hooks(&failed_key), ctx));
            log_hook_errors(run_hook_list(hooks.get_hooks("failed"), ctx));
        }
    }

    log_hook_errors(run_hook_list(hooks.get_hooks(&finally_key), ctx));
    log_hook_errors(run_hook_list(hooks.get_hooks("finally"), ctx));

    action_result
}

fn run_hook_list(cmds: &[String], ctx: &HookContext) -> Result<()> {
    for cmd in cmds {
        execute_hook_command(cmd, ctx)?;
    }
    Ok(())
}

fn execute_hook_command(cmd: &str, ctx: &HookContext) -> Result<()> {
    let expanded = substitute_variables(cmd, ctx);
    info!("Running hook: {expanded}");

    let mut child = Command::new("sh");
    child.arg("-c").arg(&expanded);
    child.env("SUBVAULT_COMMAND", &ctx.command);
    child.env("SUBVAULT_DATA_DIR", &ctx.data_dir);
    if let Some(ref backup) = ctx.backup {
        child.env("SUBVAULT_BACKUP", backup);
    }
    if let Some(ref error) = ctx.error {
        child.env("SUBVAULT_ERROR", error);
    }

    let output = child
        .output()
        .map_err(|e| VaultError::Hook(format!("failed to execute '{expanded}': {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(VaultError::Hook(format!(
            "hook '{expanded}' exited with {code}: {}",
            stderr.trim()
        )));
    }

    Ok(())
}

fn substitute_variables(cmd: &str, ctx: &HookContext) -> String {
    cmd.replace("{command}", &shell_escape(&ctx.command))
        .replace("{data_dir}", &shell_escape(&ctx.data_dir))
        .replace("{backup}", &shell_escape(ctx.backup.as_deref().unwrap_or("")))
        .replace("{error}", &shell_escape(ctx.error.as_deref().unwrap_or("")))
}

fn log_hook_errors(result: Result<()>) {
    if let Err(e) = result {
        warn!("hook failed: {e}");
    }
}
