// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads the host's TOML file, deserializes it into `RawConfig` and
//! validates it into the typed `Config`.

use log::Level;
use std::{fs, path::Path};

use super::model::{Config, ConfigError, RawConfig};

/// Load and validate the configuration at `path`.
/// Logs at DEBUG before reading and INFO on success.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    profile_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = parse(&txt)?;
    profile_log!(
        Level::Info,
        "config",
        "Loaded config from {:?}: {} worker(s), {} advertised PSM(s), {} known device(s)",
        path,
        cfg.queue.workers,
        cfg.admission.services.len(),
        cfg.devices.len()
    );
    Ok(cfg)
}

/// Validate configuration text.
pub fn parse(txt: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(txt)?;
    Config::try_from(raw)
}
