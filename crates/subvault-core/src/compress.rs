use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// `compression` property value that disables compression for a subvolume,
/// overriding the `compress=` mount option.
pub const NO_COMPRESSION_PROPERTY: &str = "none";

/// Transparent compression algorithms supported by btrfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Zlib,
    Lzo,
    Zstd,
}

impl CompressionAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionAlgorithm::Zlib => "zlib",
            CompressionAlgorithm::Lzo => "lzo",
            CompressionAlgorithm::Zstd => "zstd",
        }
    }

    pub fn max_level(self) -> u32 {
        match self {
            CompressionAlgorithm::Zlib => 9,
            CompressionAlgorithm::Lzo => 1,
            CompressionAlgorithm::Zstd => 15,
        }
    }

    /// Level btrfs picks when none is given.
    pub fn default_level(self) -> u32 {
        match self {
            CompressionAlgorithm::Zlib => 3,
            CompressionAlgorithm::Lzo => 1,
            CompressionAlgorithm::Zstd => 3,
        }
    }

    fn parse(name: &str) -> Result<Self> {
        match name {
            "zlib" => Ok(CompressionAlgorithm::Zlib),
            "lzo" => Ok(CompressionAlgorithm::Lzo),
            "zstd" => Ok(CompressionAlgorithm::Zstd),
            other => Err(VaultError::Config(format!(
                "unknown compression algorithm '{other}' (expected zlib, lzo, zstd or none)"
            ))),
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated algorithm/level pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    algorithm: CompressionAlgorithm,
    level: u32,
}

impl Compression {
    pub fn new(algorithm: CompressionAlgorithm, level: u32) -> Result<Self> {
        let max = algorithm.max_level();
        if level == 0 || level > max {
            return Err(VaultError::Config(format!(
                "invalid {algorithm} compression level {level}: supported values are 1 to {max}"
            )));
        }
        Ok(Self { algorithm, level })
    }

    /// Parse `"zstd"`, `"zstd:7"` or `"none"`.
    pub fn parse(spec: &str) -> Result<Option<Self>> {
        let spec = spec.trim();
        if spec.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        let (name, level) = match spec.split_once(':') {
            Some((name, level)) => {
                let level: u32 = level.parse().map_err(|_| {
                    VaultError::Config(format!("invalid compression level in '{spec}'"))
                })?;
                (name, Some(level))
            }
            None => (spec, None),
        };
        let algorithm = CompressionAlgorithm::parse(&name.to_ascii_lowercase())?;
        let level = level.unwrap_or_else(|| algorithm.default_level());
        Self::new(algorithm, level).map(Some)
    }

    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Mount option, e.g. `compress=zstd:3`. lzo takes no level.
    pub fn mount_option(&self) -> String {
        match self.algorithm {
            CompressionAlgorithm::Lzo => "compress=lzo".to_string(),
            algo => format!("compress={algo}:{}", self.level),
        }
    }

    /// Value for the per-subvolume `compression` property.
    pub fn property_value(&self) -> &'static str {
        self.algorithm.as_str()
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.level)
    }
}
