//! Runtime configuration, read from `lineage.toml` and `LINEAGE_*`
//! environment variables.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use lineage_engine::EngineConfig;
use serde::Deserialize;

/// Everything the binary needs; `engine` is handed to the service as is.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:               String,
  #[serde(default = "default_port")]
  pub port:               u16,
  pub store_path:         PathBuf,
  /// Trained classifier JSON. The heuristic scorer is used when unset.
  pub model_path:         Option<PathBuf>,
  pub auth_username:      Option<String>,
  /// PHC string produced by `lineage hash-password`.
  pub auth_password_hash: Option<String>,
  #[serde(default)]
  pub engine:             EngineConfig,
}

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 8080 }

impl ServerConfig {
  /// Layer an optional TOML file under `LINEAGE_*` environment variables.
  /// Nested keys use `__`, e.g. `LINEAGE_ENGINE__MATCHING__THRESHOLD`.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    Config::builder()
      .add_source(File::from(path).required(false))
      .add_source(Environment::with_prefix("LINEAGE").separator("__"))
      .build()?
      .try_deserialize()
  }

  pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
    Config::builder()
      .add_source(File::from_str(toml, FileFormat::Toml))
      .build()?
      .try_deserialize()
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
