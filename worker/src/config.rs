//! Worker configuration.
//!
//! Configuration is read from a TOML document where every section and key is optional:
//!
//! ```toml
//! [worker]
//! hostname = "worker-1"
//! rpc_port = 29998
//! data_dir = "/mnt/ramdisk"
//!
//! [master]
//! hostname = "master"
//! rpc_port = 19998
//!
//! [client]
//! pool_size = 16
//! exhausted = "fail_fast"
//! read_buffer_size = 1048576
//!
//! [lineage]
//! heartbeat_interval_ms = 1000
//! heartbeat_threads = 3
//! under_storage_dir = "/mnt/ufs"
//! ```

use std::num::NonZeroU8;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::client::{Endpoint, ExhaustedPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: `{key}` {reason}")]
    Invalid { key: &'static str, reason: &'static str },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConf {
    pub worker: WorkerSection,
    pub master: MasterSection,
    pub client: ClientSection,
    pub lineage: LineageSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSection {
    pub hostname: String,
    pub rpc_port: u16,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterSection {
    pub hostname: String,
    pub rpc_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSection {
    /// Maximum number of outstanding connections per endpoint.
    pub pool_size: usize,
    /// What `acquire` does once `pool_size` connections are outstanding.
    pub exhausted: ExhaustedPolicy,
    /// Size of the region mapped by buffered reads.
    pub read_buffer_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LineageSection {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_threads: u8,
    pub under_storage_dir: PathBuf,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_owned(),
            rpc_port: 29998,
            data_dir: PathBuf::from("/mnt/ramdisk"),
        }
    }
}

impl Default for MasterSection {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_owned(),
            rpc_port: 19998,
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            pool_size: 16,
            exhausted: ExhaustedPolicy::Block,
            read_buffer_size: 1024 * 1024,
        }
    }
}

impl Default for LineageSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            heartbeat_threads: 3,
            under_storage_dir: PathBuf::from("/mnt/ufs"),
        }
    }
}

impl WorkerConf {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let conf: Self = toml::from_str(s)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Read, parse and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        tracing::debug!("Loading worker configuration: `{}`", path.display());

        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lineage.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "lineage.heartbeat_interval_ms",
                reason: "must be greater than 0",
            });
        }
        if self.lineage.heartbeat_threads == 0 {
            return Err(ConfigError::Invalid {
                key: "lineage.heartbeat_threads",
                reason: "must be greater than 0",
            });
        }
        if self.client.pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "client.pool_size",
                reason: "must be greater than 0",
            });
        }
        if self.client.read_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                key: "client.read_buffer_size",
                reason: "must be greater than 0",
            });
        }
        Ok(())
    }

    /// Address of the worker running on this host.
    #[inline]
    pub fn local_endpoint(&self) -> Endpoint {
        Endpoint::new(&self.worker.hostname, self.worker.rpc_port)
    }

    #[inline]
    pub fn master_endpoint(&self) -> Endpoint {
        Endpoint::new(&self.master.hostname, self.master.rpc_port)
    }

    #[inline]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.lineage.heartbeat_interval_ms)
    }

    #[inline]
    pub fn heartbeat_threads(&self) -> Result<NonZeroU8, ConfigError> {
        NonZeroU8::new(self.lineage.heartbeat_threads).ok_or(ConfigError::Invalid {
            key: "lineage.heartbeat_threads",
            reason: "must be greater than 0",
        })
    }
}
