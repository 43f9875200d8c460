//! The validated configuration record consumed by [`crate::engine::Engine`].
//!
//! Loading and layering of configuration files is an external concern (see
//! spec §1); this module only defines the record shape and the validation
//! rules the engine relies on at `init()`. Embedders that want file/env
//! layering can still reach for the `config` crate the way [`Config::from_file`]
//! does, but nothing here requires that path.

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub dstore: DstoreConfig,
    #[serde(default = "default_election_timeout_s")]
    pub election_timeout_s: u64,
    #[serde(default = "default_heartbeat_interval_s")]
    pub heartbeat_interval_s: u64,
    #[serde(default)]
    pub log_directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    pub ip: String,
    pub consensus_port: u16,
    pub store_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DstoreConfig {
    #[serde(default = "default_keep_alive_interval_s")]
    pub keep_alive_interval_s: u64,
    #[serde(default = "default_keep_alive_timeout_s")]
    pub keep_alive_timeout_s: u64,
}

impl Default for DstoreConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_s: default_keep_alive_interval_s(),
            keep_alive_timeout_s: default_keep_alive_timeout_s(),
        }
    }
}

fn default_election_timeout_s() -> u64 {
    5
}
fn default_heartbeat_interval_s() -> u64 {
    1
}
fn default_keep_alive_interval_s() -> u64 {
    5
}
fn default_keep_alive_timeout_s() -> u64 {
    10
}

impl Config {
    /// Loads a config record from a file path plus an environment overlay,
    /// mirroring the corpus's `Config::new` convention.
    pub fn from_file(path: &str) -> Result<Self> {
        let c = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("RALE").separator("__"))
            .build()
            .map_err(|e| Error::ConfigInvalid(e.to_string()))?;
        let cfg: Config = c
            .try_deserialize()
            .map_err(|e| Error::ConfigInvalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=1000).contains(&self.node.id) {
            return Err(Error::ConfigInvalid(format!(
                "node.id {} out of range [1, 1000]",
                self.node.id
            )));
        }
        if self.node.name.len() > 254 {
            return Err(Error::ConfigInvalid("node.name too long".into()));
        }
        if self.node.ip.len() > 63 {
            return Err(Error::ConfigInvalid("node.ip too long".into()));
        }
        if self.node.consensus_port == 0 || self.node.store_port == 0 {
            return Err(Error::ConfigInvalid(
                "node.consensus_port/store_port must be in [1, 65535]".into(),
            ));
        }
        if self.election_timeout_s == 0 {
            return Err(Error::ConfigInvalid("election_timeout_s must be > 0".into()));
        }
        if self.heartbeat_interval_s * 2 >= self.election_timeout_s {
            return Err(Error::ConfigInvalid(
                "heartbeat_interval_s must be < election_timeout_s / 2".into(),
            ));
        }
        if !(1..=3600).contains(&self.dstore.keep_alive_interval_s) {
            return Err(Error::ConfigInvalid(
                "dstore.keep_alive_interval_s out of range [1, 3600]".into(),
            ));
        }
        if self.dstore.keep_alive_timeout_s <= self.dstore.keep_alive_interval_s
            || self.dstore.keep_alive_timeout_s > 3600
        {
            return Err(Error::ConfigInvalid(
                "dstore.keep_alive_timeout_s must be > keep_alive_interval_s and <= 3600".into(),
            ));
        }
        Ok(())
    }
}
