use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::*;
use super::deserialize::*;
use super::hooks::HooksConfig;
use crate::capacity::CapacityPolicy;
use crate::compress::{Compression, CompressionAlgorithm};
use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// Root of the managed state: backing image, mount point, scratch space.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
}

impl VaultConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.data_dir.is_absolute() {
            return Err(VaultError::Config(format!(
                "data_dir must be an absolute path, got '{}'",
                self.data_dir.display()
            )));
        }
        self.storage.compression()?;
        if self.storage.initial_size < MIN_INITIAL_SIZE {
            return Err(VaultError::Config(format!(
                "storage.initial_size must be at least {MIN_INITIAL_SIZE} bytes"
            )));
        }
        if self.capacity.growth_multiplier == 0 {
            return Err(VaultError::Config(
                "capacity.growth_multiplier must be at least 1".into(),
            ));
        }
        if !(MIN_DEDUP_BLOCK_SIZE..=MAX_DEDUP_BLOCK_SIZE).contains(&self.dedup.block_size) {
            return Err(VaultError::Config(format!(
                "dedup.block_size must be between {MIN_DEDUP_BLOCK_SIZE} and {MAX_DEDUP_BLOCK_SIZE} bytes"
            )));
        }
        self.timeouts.validate()?;
        self.source.validate()?;
        self.hooks.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Size of the backing image created on first use.
    #[serde(default = "default_initial_size", deserialize_with = "deserialize_size")]
    pub initial_size: u64,
    /// Default compression for new backups and the volume mount.
    #[serde(default)]
    pub compression: Option<CompressionConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            initial_size: default_initial_size(),
            compression: None,
        }
    }
}

impl StorageConfig {
    pub fn compression(&self) -> Result<Option<Compression>> {
        self.compression
            .as_ref()
            .map(CompressionConfig::to_compression)
            .transpose()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompressionConfig {
    pub algorithm: CompressionAlgorithm,
    /// Omitted means the algorithm's default level.
    #[serde(default)]
    pub level: Option<u32>,
}

impl CompressionConfig {
    pub fn to_compression(&self) -> Result<Compression> {
        Compression::new(
            self.algorithm,
            self.level.unwrap_or_else(|| self.algorithm.default_level()),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapacityConfig {
    #[serde(
        default = "default_metadata_reserve",
        deserialize_with = "deserialize_size"
    )]
    pub metadata_reserve: u64,
    #[serde(default = "default_growth_multiplier")]
    pub growth_multiplier: u64,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            metadata_reserve: default_metadata_reserve(),
            growth_multiplier: default_growth_multiplier(),
        }
    }
}

impl CapacityConfig {
    pub fn policy(&self) -> CapacityPolicy {
        CapacityPolicy {
            metadata_reserve: self.metadata_reserve,
            growth_multiplier: self.growth_multiplier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupConfig {
    /// Deduplicate after every backup, not only `--incremental` ones.
    #[serde(default)]
    pub enabled: bool,
    #[serde(
        default = "default_dedup_block_size",
        deserialize_with = "deserialize_size"
    )]
    pub block_size: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            block_size: default_dedup_block_size(),
        }
    }
}

/// Upper bounds for external tool invocations, per gateway class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_secs: u64,
    #[serde(default = "default_device_timeout_secs")]
    pub device_secs: u64,
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_secs: u64,
    #[serde(default = "default_dedup_timeout_secs")]
    pub dedup_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            storage_secs: default_storage_timeout_secs(),
            device_secs: default_device_timeout_secs(),
            transfer_secs: default_transfer_timeout_secs(),
            dedup_secs: default_dedup_timeout_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn storage(&self) -> Duration {
        Duration::from_secs(self.storage_secs)
    }

    pub fn device(&self) -> Duration {
        Duration::from_secs(self.device_secs)
    }

    pub fn transfer(&self) -> Duration {
        Duration::from_secs(self.transfer_secs)
    }

    pub fn dedup(&self) -> Duration {
        Duration::from_secs(self.dedup_secs)
    }

    fn validate(&self) -> Result<()> {
        let all = [
            ("storage_secs", self.storage_secs),
            ("device_secs", self.device_secs),
            ("transfer_secs", self.transfer_secs),
            ("dedup_secs", self.dedup_secs),
        ];
        match all.iter().find(|(_, secs)| *secs == 0) {
            Some((name, _)) => Err(VaultError::Config(format!(
                "timeouts.{name} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JournalConfig {
    /// Drop never-completed records during reconciliation.
    #[serde(default)]
    pub prune_incomplete: bool,
}

/// Where dumps come from and where restores go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Ydb(YdbSource),
    Command(CommandSource),
}

impl SourceConfig {
    fn validate(&self) -> Result<()> {
        match self {
            SourceConfig::Ydb(ydb) => ydb.validate(),
            SourceConfig::Command(cmd) => cmd.validate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YdbSource {
    pub endpoint: String,
    pub database: String,
    #[serde(default)]
    pub yc_token_file: Option<PathBuf>,
    #[serde(default)]
    pub iam_token_file: Option<PathBuf>,
    #[serde(default)]
    pub sa_key_file: Option<PathBuf>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub use_metadata_credentials: bool,
    #[serde(default)]
    pub dump: YdbDumpOptions,
    #[serde(default)]
    pub restore: YdbRestoreOptions,
}

/// The single authentication method configured for a YDB source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YdbAuth {
    /// Rely on the CLI's own defaults (env vars, anonymous).
    Default,
    YcTokenFile(PathBuf),
    IamTokenFile(PathBuf),
    SaKeyFile(PathBuf),
    Profile(String),
    MetadataCredentials,
}

impl YdbSource {
    pub fn auth(&self) -> Result<YdbAuth> {
        let mut methods = Vec::new();
        if let Some(p) = &self.yc_token_file {
            methods.push(YdbAuth::YcTokenFile(p.clone()));
        }
        if let Some(p) = &self.iam_token_file {
            methods.push(YdbAuth::IamTokenFile(p.clone()));
        }
        if let Some(p) = &self.sa_key_file {
            methods.push(YdbAuth::SaKeyFile(p.clone()));
        }
        if let Some(p) = &self.profile {
            methods.push(YdbAuth::Profile(p.clone()));
        }
        if self.use_metadata_credentials {
            methods.push(YdbAuth::MetadataCredentials);
        }
        if methods.len() > 1 {
            return Err(VaultError::Config(
                "source: at most one YDB authentication method may be configured".into(),
            ));
        }
        Ok(methods.pop().unwrap_or(YdbAuth::Default))
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(VaultError::Config("source.endpoint must not be empty".into()));
        }
        if self.database.trim().is_empty() {
            return Err(VaultError::Config("source.database must not be empty".into()));
        }
        self.auth().map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    Database,
    Table,
}

impl ConsistencyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsistencyLevel::Database => "database",
            ConsistencyLevel::Table => "table",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YdbDumpOptions {
    /// Database path to dump; the whole database when omitted.
    #[serde(default)]
    pub path: Option<String>,
    /// Regular expressions of object paths to skip.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub scheme_only: bool,
    #[serde(default)]
    pub consistency_level: Option<ConsistencyLevel>,
    #[serde(default)]
    pub avoid_copy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YdbRestoreOptions {
    /// Database path to restore into; the database root when omitted.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_true")]
    pub data: bool,
    #[serde(default = "default_true")]
    pub indexes: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for YdbRestoreOptions {
    fn default() -> Self {
        Self {
            path: None,
            data: true,
            indexes: true,
            dry_run: false,
        }
    }
}

/// Arbitrary shell commands; `{dir}` is replaced by the quoted directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSource {
    pub dump: String,
    pub restore: String,
}

impl CommandSource {
    fn validate(&self) -> Result<()> {
        for (name, cmd) in [("dump", &self.dump), ("restore", &self.restore)] {
            if cmd.trim().is_empty() {
                return Err(VaultError::Config(format!(
                    "source.{name} must not be empty"
                )));
            }
        }
        Ok(())
    }
}
