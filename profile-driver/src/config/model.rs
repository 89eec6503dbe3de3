// src/config/model.rs

use log::LevelFilter;
use serde::Deserialize;
use shared::{AddrParseError, BthAddr, Psm};
use std::{
    collections::{BTreeMap, BTreeSet},
    net::SocketAddr,
    time::Duration,
};
use thiserror::Error;

use crate::connection::AdmissionPolicy;

/// Top-level runtime config
#[derive(Debug, Clone)]
pub struct Config {
    pub logging:   LoggingConfig,
    pub queue:     QueueConfig,
    pub admission: AdmissionPolicy,
    pub metrics:   MetricsConfig,
    pub devices:   Vec<KnownDevice>,
}

/// Mirror of the `[logging]` table. `levels` maps a component (the
/// `profile_log!` target, e.g. `queue`) to its own filter.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]                   pub enable: bool,
    #[serde(default)]                   pub file:   Option<String>,
    #[serde(default = "default_level")] pub level:  String,
    #[serde(default)]                   pub levels: BTreeMap<String, String>,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level(), levels: BTreeMap::new() }
    }
}

impl LoggingConfig {
    /// Global filter. Validated at load time; falls back to INFO.
    pub fn level_filter(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::Info)
    }

    /// Per-component overrides, in name order.
    pub fn component_filters(&self) -> impl Iterator<Item = (&str, LevelFilter)> + '_ {
        self.levels
            .iter()
            .map(|(component, level)| (component.as_str(), level.parse().unwrap_or(LevelFilter::Info)))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let check = |key: String, value: &str| {
            value
                .parse::<LevelFilter>()
                .map(drop)
                .map_err(|_| ConfigError::InvalidLogLevel { key, value: value.to_string() })
        };
        check("logging.level".into(), &self.level)?;
        for (component, level) in &self.levels {
            check(format!("logging.levels.{component}"), level)?;
        }
        Ok(())
    }
}

/// Fully-typed `[queue]` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub workers:       usize,
    pub capacity:      usize,
    pub drain_timeout: Duration,
}

/// Mirror of the `[metrics]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)] pub enable: bool,
    #[serde(default)] pub listen: Option<SocketAddr>,
}

/// Seed entry for the remote-name cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownDevice {
    pub address: BthAddr,
    pub name:    String,
}

/*──────────────────────────── raw TOML ──────────────────────────────────*/

#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)] pub logging:   LoggingConfig,
    #[serde(default)] pub queue:     RawQueue,
    #[serde(default)] pub admission: RawAdmission,
    #[serde(default)] pub metrics:   MetricsConfig,
    #[serde(default)] pub devices:   Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
pub struct RawQueue {
    #[serde(default = "default_workers")]  pub workers:       usize,
    #[serde(default = "default_capacity")] pub capacity:      usize,
    #[serde(default = "default_drain")]    pub drain_timeout: String,
}
fn default_workers() -> usize { 2 }
fn default_capacity() -> usize { 64 }
fn default_drain() -> String { "5s".into() }

impl Default for RawQueue {
    fn default() -> Self {
        Self { workers: default_workers(), capacity: default_capacity(), drain_timeout: default_drain() }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawAdmission {
    #[serde(default = "default_services")] pub services: Vec<u16>,
    #[serde(default)]                      pub allow:    Vec<String>,
    #[serde(default)]                      pub deny:     Vec<String>,
    #[serde(default = "yes")]              pub sixaxis:    bool,
    #[serde(default = "yes")]              pub navigation: bool,
    #[serde(default = "yes")]              pub motion:     bool,
    #[serde(default = "yes")]              pub wireless:   bool,
    #[serde(default = "yes")]              pub allow_unknown_devices: bool,
}
fn default_services() -> Vec<u16> { vec![Psm::HID_CONTROL.0, Psm::HID_INTERRUPT.0] }
fn yes() -> bool { true }

impl Default for RawAdmission {
    fn default() -> Self {
        Self {
            services: default_services(),
            allow: Vec::new(),
            deny: Vec::new(),
            sixaxis: true,
            navigation: true,
            motion: true,
            wireless: true,
            allow_unknown_devices: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawDevice {
    pub address: String,
    pub name:    String,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid address in {section}: {source}")]
    InvalidAddress {
        section: &'static str,
        #[source]
        source: AddrParseError,
    },

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("invalid log level '{value}' for {key}")]
    InvalidLogLevel { key: String, value: String },

    #[error("queue.{0} must be at least 1")]
    ZeroQueueSetting(&'static str),

    #[error("admission.services must list at least one PSM")]
    NoServices,

    #[error("metrics enabled without metrics.listen")]
    MissingMetricsListen,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

fn parse_addrs(section: &'static str, raw: &[String]) -> Result<BTreeSet<BthAddr>, ConfigError> {
    raw.iter()
        .map(|s| s.parse::<BthAddr>().map_err(|source| ConfigError::InvalidAddress { section, source }))
        .collect()
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let RawConfig { logging, queue, admission, metrics, devices } = raw;
        logging.validate()?;

        if queue.workers == 0 {
            return Err(ConfigError::ZeroQueueSetting("workers"));
        }
        if queue.capacity == 0 {
            return Err(ConfigError::ZeroQueueSetting("capacity"));
        }
        let drain_timeout = humantime::parse_duration(&queue.drain_timeout)
            .map_err(|e| ConfigError::InvalidDuration(queue.drain_timeout.clone(), e))?;

        if admission.services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        if metrics.enable && metrics.listen.is_none() {
            return Err(ConfigError::MissingMetricsListen);
        }

        let policy = AdmissionPolicy {
            services: admission.services.iter().copied().map(Psm).collect(),
            allow: parse_addrs("admission.allow", &admission.allow)?,
            deny: parse_addrs("admission.deny", &admission.deny)?,
            sixaxis_enabled: admission.sixaxis,
            navigation_enabled: admission.navigation,
            motion_enabled: admission.motion,
            wireless_enabled: admission.wireless,
            allow_unknown_devices: admission.allow_unknown_devices,
        };

        let devices = devices
            .into_iter()
            .map(|d| {
                let address = d
                    .address
                    .parse::<BthAddr>()
                    .map_err(|source| ConfigError::InvalidAddress { section: "devices", source })?;
                Ok(KnownDevice { address, name: d.name })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Config {
            logging,
            queue: QueueConfig { workers: queue.workers, capacity: queue.capacity, drain_timeout },
            admission: policy,
            metrics,
            devices,
        })
    }
}
