use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::network::{ConnectionOptions, Framing};
use crate::ofp::Version;
use crate::rpc::BridgeOptions;
use crate::utils::{ControllerError, Result};

/// Controller configuration. Every field has a default, so a TOML file only
/// needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub listen_addr: String,
    pub port: u16,
    pub versions: Vec<Version>,
    pub rpc_enabled: bool,
    pub rpc_addr: String,
    pub framing: Framing,
    pub inbound_capacity: usize,
    pub default_timeout_ms: u64,
    pub min_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "localhost".into(),
            port: 6653,
            versions: Version::ALL.to_vec(),
            rpc_enabled: true,
            rpc_addr: "127.0.0.1:8080".into(),
            framing: Framing::SingleRead,
            inbound_capacity: 1024,
            default_timeout_ms: 2000,
            min_timeout_ms: 50,
        }
    }
}

impl ControllerConfig {
    /// Load config from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| ControllerError::Config(format!("{}: {}", path.display(), e)))?;
        let cfg: ControllerConfig =
            toml::from_str(&data).map_err(|e| ControllerError::Config(e.to_string()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.versions.is_empty() {
            return Err(ControllerError::Config("at least one OpenFlow version is required".into()));
        }
        if self.inbound_capacity == 0 {
            return Err(ControllerError::Config("inbound_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.port)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            versions: self.versions.clone(),
            framing: self.framing,
            ..ConnectionOptions::default()
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            default_timeout: self.default_timeout(),
            min_timeout: Duration::from_millis(self.min_timeout_ms),
        }
    }
}

/// Parse a CSV list of versions, e.g. `4,6` or `1.3, 1.5`. Duplicates are dropped.
pub fn parse_versions_csv(s: &str) -> Result<Vec<Version>> {
    let mut out = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let v: Version = part.parse().map_err(ControllerError::Config)?;
        if !out.contains(&v) {
            out.push(v);
        }
    }
    Ok(out)
}
