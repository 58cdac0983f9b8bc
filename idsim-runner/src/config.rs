//! TOML run configuration: simulation parameters, data sources, output.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use idsim_core::params::{ParamError, SimulationParameters};

/// Errors from loading or adjusting a run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error(transparent)]
    Params(#[from] ParamError),

    #[error("override `{0}` is not of the form name=value")]
    Override(String),

    #[error("data.orderbook_dir and data.orders_csv are mutually exclusive")]
    ConflictingSources,
}

/// Where a run reads its inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory of daily `orderbook_YYYY-MM-DD.bin` files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orderbook_dir: Option<PathBuf>,
    /// A single order CSV in exchange export format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders_csv: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast_csv: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Also write every log collection as CSV.
    pub csv: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
            csv: true,
        }
    }
}

/// Everything needed to reproduce a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub simulation: SimulationParameters,
    pub data: DataConfig,
    pub output: OutputConfig,
}

impl RunConfig {
    /// Load from a file. Relative data and output paths resolve against the
    /// file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.orderbook_dir.is_some() && self.data.orders_csv.is_some() {
            return Err(ConfigError::ConflictingSources);
        }
        self.simulation.validate()?;
        Ok(())
    }

    /// Apply `name=value` overrides to the simulation parameters, then
    /// re-validate.
    pub fn apply_overrides<S: AsRef<str>>(&mut self, overrides: &[S]) -> Result<(), ConfigError> {
        for raw in overrides {
            let raw = raw.as_ref();
            let (name, value) = raw
                .split_once('=')
                .ok_or_else(|| ConfigError::Override(raw.to_string()))?;
            self.simulation.set(name.trim(), value)?;
        }
        self.validate()
    }

    /// Content hash of the whole configuration (BLAKE3 of canonical JSON).
    pub fn run_id(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(p) = self.data.orderbook_dir.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.data.orders_csv.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.data.forecast_csv.as_mut() {
            resolve(p);
        }
        resolve(&mut self.output.dir);
    }
}
