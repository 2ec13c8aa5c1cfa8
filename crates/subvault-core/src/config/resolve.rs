use std::fmt;
use std::path::{Path, PathBuf};

use super::types::VaultConfig;
use crate::error::{Result, VaultError};

const CONFIG_ENV_VAR: &str = "SUBVAULT_CONFIG";

/// Expand `${VAR}` and `${VAR:-default}` placeholders in raw config text.
fn expand_env_placeholders(input: &str, path: &Path) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0usize;

    while let Some(offset) = input[cursor..].find("${") {
        let start = cursor + offset;
        out.push_str(&input[cursor..start]);

        let token_start = start + 2;
        let Some(token_end_rel) = input[token_start..].find('}') else {
            return Err(config_expand_error(
                path,
                input,
                start,
                "unterminated environment placeholder",
            ));
        };
        let token_end = token_start + token_end_rel;
        let token = &input[token_start..token_end];
        out.push_str(&resolve_env_token(token, path, input, start)?);
        cursor = token_end + 1;
    }

    out.push_str(&input[cursor..]);
    Ok(out)
}

fn resolve_env_token(token: &str, path: &Path, input: &str, start: usize) -> Result<String> {
    let (name, default) = match token.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (token, None),
    };
    if !is_valid_env_var_name(name) {
        return Err(config_expand_error(
            path,
            input,
            start,
            format!("invalid environment placeholder '{token}'"),
        ));
    }

    match (std::env::var(name), default) {
        (Ok(value), Some(default)) if value.is_empty() => Ok(default.to_string()),
        (Ok(value), _) => Ok(value),
        (Err(std::env::VarError::NotPresent), Some(default)) => Ok(default.to_string()),
        (Err(std::env::VarError::NotPresent), None) => Err(config_expand_error(
            path,
            input,
            start,
            format!("environment variable '{name}' is not set"),
        )),
        (Err(std::env::VarError::NotUnicode(_)), _) => Err(config_expand_error(
            path,
            input,
            start,
            format!("environment variable '{name}' is not valid UTF-8"),
        )),
    }
}

fn is_valid_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first == '_' || first.is_ascii_alphabetic()) && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn config_expand_error(path: &Path, input: &str, start: usize, message: impl fmt::Display) -> VaultError {
    let (line, column) = byte_offset_to_line_col(input, start);
    VaultError::Config(format!(
        "invalid config '{}': {message} at line {line}, column {column}",
        path.display()
    ))
}

fn byte_offset_to_line_col(input: &str, byte_offset: usize) -> (usize, usize) {
    let mut line = 1usize;
    let mut column = 1usize;
    for ch in input[..byte_offset].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Tracks where the config file was found.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Explicitly passed via `--config`.
    CliArg(PathBuf),
    /// Set via the `SUBVAULT_CONFIG` env var.
    EnvVar(PathBuf),
    /// Found by searching standard locations.
    SearchOrder { path: PathBuf, level: &'static str },
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::CliArg(p) => p,
            ConfigSource::EnvVar(p) => p,
            ConfigSource::SearchOrder { path, .. } => path,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::CliArg(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::EnvVar(p) => write!(f, "{} ({CONFIG_ENV_VAR})", p.display()),
            ConfigSource::SearchOrder { path, level } => {
                write!(f, "{} ({})", path.display(), level)
            }
        }
    }
}

/// Returns search locations in priority order: project, user, system.
pub fn default_config_search_paths() -> Vec<(PathBuf, &'static str)> {
    let mut paths = vec![(PathBuf::from("subvault.yaml"), "project")];

    let user_config = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|base| base.join("subvault").join("config.yaml"));
    if let Some(p) = user_config {
        paths.push((p, "user"));
    }

    paths.push((PathBuf::from("/etc/subvault/config.yaml"), "system"));
    paths
}

/// Resolve which config file to use.
///
/// Priority: CLI arg > `SUBVAULT_CONFIG` env var > first existing file from
/// search paths. Returns `None` if nothing is found.
pub fn resolve_config_path(cli_config: Option<&str>) -> Option<ConfigSource> {
    if let Some(path) = cli_config {
        return Some(ConfigSource::CliArg(PathBuf::from(path)));
    }

    if let Ok(val) = std::env::var(CONFIG_ENV_VAR) {
        if !val.is_empty() {
            return Some(ConfigSource::EnvVar(PathBuf::from(val)));
        }
    }

    default_config_search_paths()
        .into_iter()
        .find(|(path, _)| path.exists())
        .map(|(path, level)| ConfigSource::SearchOrder { path, level })
}

/// Read, expand, parse and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<VaultConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| VaultError::Config(format!("cannot read '{}': {e}", path.display())))?;
    parse_config(&contents, path)
}

/// Parse config text; `path` is only used in error messages.
pub fn parse_config(contents: &str, path: &Path) -> Result<VaultConfig> {
    let expanded = expand_env_placeholders(contents, path)?;
    let config: VaultConfig = serde_yaml::from_str(&expanded)
        .map_err(|e| VaultError::Config(format!("invalid config '{}': {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Returns a minimal YAML config template suitable for bootstrapping.
pub fn minimal_config_template() -> &'static str {
    r#"# subvault configuration file
# Minimal required configuration.

source:
  type: ydb
  endpoint: grpcs://ydb.example.net:2135
  database: /ru-central1/b1g0000000000000000/etn0000000000000000
  # One authentication method at most:
  # sa_key_file: /etc/subvault/sa-key.json
  # iam_token_file: /etc/subvault/iam-token
  # yc_token_file: /etc/subvault/yc-token
  # profile: backup
  # use_metadata_credentials: true

# --- Common optional settings (uncomment as needed) ---

# data_dir: /var/lib/subvault
#
# storage:
#   initial_size: 1G
#   compression:
#     algorithm: zstd
#     level: 3
#
# dedup:
#   enabled: true
#   block_size: 128K
#
# journal:
#   prune_incomplete: false
#
# hooks:
#   before_backup: "systemctl stop app-writer"
#   finally_backup: "systemctl start app-writer"
"#
}
