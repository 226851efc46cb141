//! Daemon configuration: session defaults and the configured target list.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML file,
//! then `FANOUT_TARGETS` (comma-separated addresses) for the target list.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use fanout_core::{DEFAULT_HISTORY_CAPACITY, TargetDescriptor};
use fanout_daemon::{DEFAULT_EXPIRY, DEFAULT_INTERVAL};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Defaults {
    pub interval_secs: f64,
    pub expiry_secs: u64,
    pub history_capacity: usize,
    pub probe_timeout_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL.as_secs_f64(),
            expiry_secs: DEFAULT_EXPIRY.as_secs(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            probe_timeout_ms: 5_000,
        }
    }
}

impl Defaults {
    pub fn interval(&self) -> anyhow::Result<Duration> {
        positive_secs(self.interval_secs).context("defaults.interval_secs must be positive")
    }

    pub fn expiry(&self) -> anyhow::Result<Duration> {
        anyhow::ensure!(self.expiry_secs > 0, "defaults.expiry_secs must be positive");
        Ok(Duration::from_secs(self.expiry_secs))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetEntry {
    pub address: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl TargetEntry {
    pub fn descriptor(&self) -> TargetDescriptor {
        match &self.label {
            Some(label) => TargetDescriptor::with_label(&self.address, label),
            None => TargetDescriptor::new(&self.address),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub defaults: Defaults,
    pub targets: Vec<TargetEntry>,
}

impl DaemonConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load the file (if any), apply `FANOUT_TARGETS`, and validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(list) = std::env::var("FANOUT_TARGETS") {
            config.targets = parse_target_list(&list);
        }

        config.defaults.interval()?;
        config.defaults.expiry()?;
        Ok(config)
    }

    pub fn target_descriptors(&self) -> Vec<TargetDescriptor> {
        self.targets.iter().map(TargetEntry::descriptor).collect()
    }
}

/// Split a comma-separated address list, dropping blanks.
pub fn parse_target_list(list: &str) -> Vec<TargetEntry> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|address| TargetEntry {
            address: address.to_owned(),
            label: None,
        })
        .collect()
}

/// Seconds as a positive, finite duration.
pub fn positive_secs(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
