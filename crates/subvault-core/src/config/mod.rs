mod defaults;
mod deserialize;
mod hooks;
mod resolve;
mod types;

pub(crate) use self::hooks::HOOK_COMMANDS;
pub use self::hooks::HooksConfig;

pub use self::deserialize::parse_size;
pub use self::resolve::{
    default_config_search_paths, load_config, minimal_config_template, parse_config,
    resolve_config_path, ConfigSource,
};
pub use self::types::*;
