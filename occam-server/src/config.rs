//! Ini configuration for the runtime. Sections: `redis`, `api`, `outputs`,
//! `rate`, plus sink credential maps under `pagerduty` and `hipchat`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use config::{File, FileFormat};
use serde::Deserialize;

use crate::runtime::RuntimeConfig;

/// Locations probed when no `--config` path is given. A missing default is
/// fine (built-in defaults apply); a missing explicit path is fatal.
const DEFAULT_LOCATIONS: [&str; 2] = ["occam.ini", "config/occam.ini"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub redis: RedisSection,
    pub api: ApiSection,
    pub outputs: OutputsSection,
    pub rate: RateSection,
    pub pagerduty: HashMap<String, String>,
    pub hipchat: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSection {
    pub host: String,
    pub port: u16,
    /// Seconds between connection attempts while the store is unreachable.
    pub retry: u64,
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            retry: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub listen: String,
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputsSection {
    /// Size of the alert dispatcher pool.
    pub dispatchers: usize,
}

impl Default for OutputsSection {
    fn default() -> Self {
        Self { dispatchers: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateSection {
    /// Delete a rate window when its threshold trips, so each check fires
    /// once per burst. Disable to fire on every arrival above threshold.
    pub reset_on_trip: bool,
}

impl Default for RateSection {
    fn default() -> Self {
        Self { reset_on_trip: true }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(
                    File::from(path.to_path_buf())
                        .format(FileFormat::Ini)
                        .required(true),
                );
            }
            None => {
                for candidate in DEFAULT_LOCATIONS {
                    builder = builder
                        .add_source(File::new(candidate, FileFormat::Ini).required(false));
                }
            }
        }

        let raw = builder
            .build()
            .with_context(|| match path {
                Some(path) => format!("failed to read config at {}", path.display()),
                None => "failed to read config".to_string(),
            })?;
        raw.try_deserialize()
            .context("failed to parse config")
    }

    /// Flatten the file layout into the runtime's own knobs.
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            listen: self.api.listen.clone(),
            port: self.api.port,
            dispatchers: self.outputs.dispatchers,
            retry: Duration::from_secs(self.redis.retry),
            reset_on_trip: self.rate.reset_on_trip,
            pagerduty: self.pagerduty.clone(),
            hipchat: self.hipchat.clone(),
            ..RuntimeConfig::default()
        }
    }
}
