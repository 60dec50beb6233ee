//! Project configuration from `kiln.toml`

use kiln_runner::DEFAULT_CONCURRENCY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "kiln.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_types() -> Vec<String> {
    ["js", "css", "html"].map(String::from).to_vec()
}

fn default_output() -> PathBuf {
    PathBuf::from("build")
}

fn default_cache() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Entry files, relative to the project root
    #[serde(default)]
    pub entries: Vec<PathBuf>,
    /// File types the built-in plugins handle
    #[serde(default = "default_types")]
    pub types: Vec<String>,
    /// Directory written files land in, relative to the project root
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Persist the graph between runs
    #[serde(default = "default_cache")]
    pub cache: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            entries: Vec::new(),
            types: default_types(),
            output: default_output(),
            concurrency: DEFAULT_CONCURRENCY,
            cache: true,
        }
    }
}

/// Command line values that win over the config file
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub entries: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub no_cache: bool,
}

impl Config {
    /// Load `kiln.toml` from the project root, falling back to defaults when
    /// the file does not exist.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn apply(mut self, overrides: CliOverrides) -> Result<Self, ConfigError> {
        if !overrides.entries.is_empty() {
            self.entries = overrides.entries;
        }
        if let Some(output) = overrides.output {
            self.output = output;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.concurrency = concurrency;
        }
        if overrides.no_cache {
            self.cache = false;
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(self)
    }
}
