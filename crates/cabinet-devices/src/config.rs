use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cabinet_jvs::packet::LAST_ADDR;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid JVS port COM{0}; ports are numbered from 1")]
    InvalidPort(u8),

    #[error("JVS chain must have between 1 and {max} nodes, got {got}")]
    NodeCount { got: u8, max: u8 },

    #[error("JVS chain has {nodes} nodes but {backends} backends were supplied")]
    BackendCount { nodes: usize, backends: usize },
}

/// Settings for the whole cabinet. Values arrive already deserialized; nothing here reads files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CabinetConfig {
    pub jvs: JvsConfig,
}

impl CabinetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jvs.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JvsConfig {
    pub enable: bool,
    /// `n` in `COMn`.
    pub port: u8,
    pub nodes: u8,
    /// Complete overlapped reads on a worker thread instead of inline.
    pub async_reads: bool,
    pub poll_delay_ms: u64,
}

impl Default for JvsConfig {
    fn default() -> Self {
        Self {
            enable: true,
            port: 4,
            nodes: 1,
            async_reads: true,
            poll_delay_ms: 0,
        }
    }
}

impl JvsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.nodes == 0 || self.nodes > LAST_ADDR {
            return Err(ConfigError::NodeCount {
                got: self.nodes,
                max: LAST_ADDR,
            });
        }
        Ok(())
    }

    pub fn port_name(&self) -> String {
        format!("COM{}", self.port)
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CabinetConfig::default();
        assert!(config.jvs.enable);
        assert_eq!(config.jvs.port_name(), "COM4");
        assert_eq!(config.jvs.nodes, 1);
        assert!(config.jvs.async_reads);
        assert_eq!(config.jvs.poll_delay(), Duration::ZERO);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: CabinetConfig =
            serde_json::from_str(r#"{ "jvs": { "port": 3, "nodes": 2 } }"#).unwrap();
        assert_eq!(config.jvs.port, 3);
        assert_eq!(config.jvs.nodes, 2);
        assert!(config.jvs.enable);

        let empty: CabinetConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, CabinetConfig::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<CabinetConfig>(r#"{ "jvs": { "baud": 115200 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown field"), "{err}");
    }

    #[test]
    fn validation() {
        let mut config = CabinetConfig::default();
        config.jvs.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort(0)));

        config.jvs.port = 1;
        config.jvs.nodes = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NodeCount { got: 0, max: 31 })
        );
        config.jvs.nodes = 32;
        assert!(config.validate().is_err());
        config.jvs.nodes = 31;
        config.validate().unwrap();
    }
}
