//! Emulator configuration.
//!
//! Loaded once at startup from an optional JSON file. Anything that goes wrong
//! while loading falls back to the defaults: the emulator must always be able
//! to start with default signal values and every subsystem enabled.

use crate::gate::{GroupSet, SubsystemGroup};
use crate::signals::{SignalId, SignalValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5;
/// Polling must be faster than the fastest transmission interval.
pub const MAX_POLL_INTERVAL_MS: u64 = 49;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("poll interval {0} ms outside 1..=49 ms")]
    PollInterval(u64),
}

fn enabled() -> bool {
    true
}

/// Initial state of every subsystem switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFlags {
    #[serde(default = "enabled")]
    pub general: bool,
    #[serde(default = "enabled")]
    pub dashboard: bool,
    #[serde(default = "enabled")]
    pub lighting: bool,
    #[serde(default = "enabled")]
    pub multimedia: bool,
    #[serde(default = "enabled")]
    pub climate: bool,
    #[serde(default = "enabled")]
    pub doors: bool,
}

impl GroupFlags {
    pub fn get(&self, group: SubsystemGroup) -> bool {
        match group {
            SubsystemGroup::General => self.general,
            SubsystemGroup::Dashboard => self.dashboard,
            SubsystemGroup::Lighting => self.lighting,
            SubsystemGroup::Multimedia => self.multimedia,
            SubsystemGroup::Climate => self.climate,
            SubsystemGroup::Doors => self.doors,
        }
    }

    pub fn to_group_set(self) -> GroupSet {
        SubsystemGroup::ALL
            .into_iter()
            .filter(|group| self.get(*group))
            .collect()
    }
}

impl Default for GroupFlags {
    fn default() -> Self {
        Self {
            general: true,
            dashboard: true,
            lighting: true,
            multimedia: true,
            climate: true,
            doors: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub listen_addr: String,
    pub poll_interval_ms: u64,
    pub groups: GroupFlags,
    /// Starting values applied on top of the built-in defaults.
    pub signals: BTreeMap<SignalId, SignalValue>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            groups: GroupFlags::default(),
            signals: BTreeMap::new(),
        }
    }
}

impl EmulatorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EmulatorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load `path` if given; any failure is logged and replaced by defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "using default configuration");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::PollInterval(self.poll_interval_ms));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = EmulatorConfig::from_json(
            r#"{"groups":{"dashboard":false},"signals":{"ignition":true,"rpm":850}}"#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert!(!config.groups.dashboard);
        assert!(config.groups.doors);
        assert_eq!(config.signals.get(&SignalId::Ignition), Some(&SignalValue::Bool(true)));
        assert_eq!(config.signals.get(&SignalId::Rpm), Some(&SignalValue::Int(850)));
    }

    #[test]
    fn test_group_flags_to_set() {
        let flags = GroupFlags {
            general: false,
            lighting: false,
            ..GroupFlags::default()
        };
        let set = flags.to_group_set();
        assert!(!set.contains(SubsystemGroup::General));
        assert!(set.contains(SubsystemGroup::Doors));
    }

    #[test]
    fn test_invalid_poll_interval() {
        assert!(matches!(
            EmulatorConfig::from_json(r#"{"poll_interval_ms":50}"#),
            Err(ConfigError::PollInterval(50))
        ));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = EmulatorConfig::load_or_default(Some(Path::new("/nonexistent/carbus.json")));
        assert_eq!(config, EmulatorConfig::default());
    }
}
