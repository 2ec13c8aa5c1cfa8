use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::deserialize::deserialize_hooks_map;
use crate::error::{Result, VaultError};

/// Valid hook prefixes.
const HOOK_PREFIXES: &[&str] = &["before", "after", "failed", "finally"];

/// Commands that accept command-specific hooks.
pub const HOOK_COMMANDS: &[&str] = &["backup", "restore", "list", "sizes", "reconcile"];

/// Hook configuration: flat map of hook keys to lists of shell commands.
///
/// Valid keys are bare prefixes (`before`, `after`, `failed`, `finally`) and
/// command-specific variants (`before_backup`, `finally_restore`, etc.).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(flatten, deserialize_with = "deserialize_hooks_map")]
    pub hooks: HashMap<String, Vec<String>>,
}

impl HooksConfig {
    /// Validate that all keys match valid hook patterns.
    pub fn validate(&self) -> Result<()> {
        for key in self.hooks.keys() {
            if HOOK_PREFIXES.contains(&key.as_str()) {
                continue;
            }
            let valid = HOOK_PREFIXES.iter().any(|prefix| {
                key.strip_prefix(prefix)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .is_some_and(|cmd| HOOK_COMMANDS.contains(&cmd))
            });
            if !valid {
                return Err(VaultError::Config(format!("invalid hook key: '{key}'")));
            }
        }
        Ok(())
    }

    /// Look up commands for a hook key, returning an empty slice if absent.
    pub fn get_hooks(&self, key: &str) -> &[String] {
        self.hooks.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
