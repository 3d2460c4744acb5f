use std::path::PathBuf;

use metavault_store::compression::DEFAULT_ZSTD_LEVEL;
use metavault_store::record::DEFAULT_MAX_RECORD_BYTES;
use metavault_store::ObjectStores;
use metavault_types::compression::CompressionCodec;
use metavault_types::pfs::SPEC_REPO;
use serde::{Deserialize, Serialize};

/// Config schema version understood by this build.
pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Name of the internal repository holding frozen pipeline specs.
    #[serde(default = "default_spec_repo")]
    pub spec_repo: String,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}
fn default_spec_repo() -> String {
    SPEC_REPO.to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            object_store: ObjectStoreConfig::default(),
            compression: CompressionConfig::default(),
            limits: LimitsConfig::default(),
            transport: TransportConfig::default(),
            spec_repo: default_spec_repo(),
        }
    }
}

impl AdminConfig {
    /// Object stores reachable from this configuration.
    #[must_use]
    pub fn object_stores(&self) -> ObjectStores {
        ObjectStores::local(&self.object_store.local_root)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Directory serving `local://<bucket>/<object>` URLs.
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
}

fn default_local_root() -> PathBuf {
    PathBuf::from("/var/lib/metavault/objects")
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            local_root: default_local_root(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Codec used when writing dumps. Reads detect the codec themselves.
    #[serde(default)]
    pub codec: CompressionCodec,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

fn default_zstd_level() -> i32 {
    DEFAULT_ZSTD_LEVEL
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: CompressionCodec::default(),
            zstd_level: default_zstd_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest record accepted when reading a dump.
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: u64,
}

fn default_max_record_bytes() -> u64 {
    DEFAULT_MAX_RECORD_BYTES
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_record_bytes: default_max_record_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Buffered messages per in-process stream.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}
