pub mod capacity;
pub mod commands;
pub mod compress;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hooks;
pub mod journal;
pub mod layout;
pub mod lock;
pub mod platform;
pub mod vault;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;

pub use error::{Result, VaultError};
pub use vault::{Gateways, Vault, VaultOptions};
