use crate::budget::DEFAULT_FULL_CACHE_FRACTION;
use crate::error::ValidationError;
use crate::weights::load_weight_file;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that sets the worker count when nothing else does.
pub const THREADS_ENV_VAR: &str = "ROWCORR_THREADS";

/// Everything the engine needs to know besides the matrix itself.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationOptions {
    /// Emit `atanh(r)` instead of `r`.
    pub fisher_z: bool,
    /// Memory ceiling in GiB. `None` means unlimited.
    pub memory_limit_gb: Option<f64>,
    /// One non-negative weight per column.
    pub weights: Option<Vec<f32>>,
    /// Worker count. `None` defers to `ROWCORR_THREADS`, then to the number of CPUs.
    pub threads: Option<usize>,
    pub full_cache_fraction: f64,
}

impl Default for CorrelationOptions {
    fn default() -> Self {
        Self {
            fisher_z: false,
            memory_limit_gb: None,
            weights: None,
            threads: None,
            full_cache_fraction: DEFAULT_FULL_CACHE_FRACTION,
        }
    }
}

impl CorrelationOptions {
    /// The number of workers the engine will run with.
    pub fn worker_count(&self) -> Result<usize, ValidationError> {
        let threads = self.threads.unwrap_or_else(default_thread_count);
        if threads == 0 {
            return Err(ValidationError::InvalidThreadCount);
        }
        Ok(threads)
    }
}

fn default_thread_count() -> usize {
    match std::env::var(THREADS_ENV_VAR) {
        Ok(value) => match value.trim().parse::<usize>() {
            Ok(parsed) if parsed > 0 => parsed,
            _ => num_cpus::get().max(1),
        },
        Err(_) => num_cpus::get().max(1),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// The on-disk (TOML) form of [`CorrelationOptions`]. Weights are referenced by file.
///
/// ```toml
/// fisher_z = true
/// memory_limit_gb = 4.0
/// weights_file = "weights.txt"
/// threads = 8
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub fisher_z: bool,
    pub memory_limit_gb: Option<f64>,
    pub weights_file: Option<PathBuf>,
    pub threads: Option<usize>,
    pub full_cache_fraction: Option<f64>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolves the weight file and range-checks the numeric knobs. Weight values
    /// themselves are checked against the matrix width by the engine.
    pub fn into_options(self) -> Result<CorrelationOptions, ValidationError> {
        if let Some(limit) = self.memory_limit_gb {
            if !limit.is_finite() || limit < 0.0 {
                return Err(ValidationError::InvalidMemoryLimit(limit));
            }
        }
        if self.threads == Some(0) {
            return Err(ValidationError::InvalidThreadCount);
        }
        let full_cache_fraction = self
            .full_cache_fraction
            .unwrap_or(DEFAULT_FULL_CACHE_FRACTION);
        if !(full_cache_fraction > 0.0 && full_cache_fraction <= 1.0) {
            return Err(ValidationError::InvalidCacheFraction(full_cache_fraction));
        }
        let weights = self
            .weights_file
            .as_deref()
            .map(load_weight_file)
            .transpose()?;
        Ok(CorrelationOptions {
            fisher_z: self.fisher_z,
            memory_limit_gb: self.memory_limit_gb,
            weights,
            threads: self.threads,
            full_cache_fraction,
        })
    }
}
