use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Names the config file when `--config` is not given.
pub const CONFIG_ENV_VAR: &str = "OPEREND_CONFIG";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Connection settings for an Operend server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OperendConfig {
    pub api_base_url: String,
    pub api_token_secret: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl OperendConfig {
    /// Parse config YAML.
    ///
    /// # Errors
    /// Returns an error when the YAML is malformed, a required key is missing,
    /// or a required value is empty.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|err| anyhow!("invalid Operend config YAML: {err}"))?;
        if config.api_base_url.trim().is_empty() {
            return Err(anyhow!("api_base_url must be non-empty"));
        }
        if config.api_token_secret.trim().is_empty() {
            return Err(anyhow!("api_token_secret must be non-empty"));
        }
        if config.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms must be greater than zero"));
        }
        Ok(config)
    }

    /// Load config YAML from disk.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading Operend config {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("failed loading Operend config {}", path.display()))
    }

    /// Load from `explicit` when given, else from the file named by
    /// [`CONFIG_ENV_VAR`].
    ///
    /// # Errors
    /// Returns an error when neither source names a file, or loading fails.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => std::env::var_os(CONFIG_ENV_VAR)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| {
                    anyhow!(
                        "no Operend config given: pass --config or set {CONFIG_ENV_VAR}"
                    )
                })?,
        };
        tracing::debug!(path = %path.display(), "loading Operend config");
        Self::load_from_path(&path)
    }
}
