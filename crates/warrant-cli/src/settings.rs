//! Layered configuration: defaults, then the config file, then `WARRANT_*`
//! environment variables. Command-line flags are applied by the caller.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use indexmap::IndexMap;
use serde::Deserialize;
use warrant_core::Value;
use warrant_sql::DEFAULT_PREFIX;
use warrant_store_sqlite::Limits;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Table, index and procedure name prefix.
  pub prefix:                  String,
  pub allow_cycles:            bool,
  pub allow_indistinct_cycles: bool,
  pub allow_regexp:            bool,
  /// Parameter overrides; `-D` flags take precedence.
  pub parameters:              IndexMap<String, Value>,
  pub max_cascade_steps:       u64,
  /// Database file for `run`; in memory when unset.
  pub database:                Option<PathBuf>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      prefix:                  DEFAULT_PREFIX.to_string(),
      allow_cycles:            false,
      allow_indistinct_cycles: false,
      allow_regexp:            false,
      parameters:              IndexMap::new(),
      max_cascade_steps:       Limits::default().max_cascade_steps,
      database:                None,
    }
  }
}

impl Settings {
  /// Read `path` if it exists, then the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("WARRANT").try_parsing(true))
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?
      .try_deserialize()
      .context("failed to deserialise settings")
  }

  pub fn limits(&self) -> Limits {
    Limits {
      max_cascade_steps: self.max_cascade_steps,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_gives_defaults() {
    let settings = Settings::load(Path::new("does-not-exist.toml")).unwrap();
    assert_eq!(settings.prefix, "warrant");
    assert_eq!(settings.max_cascade_steps, 1_000_000);
    assert!(settings.database.is_none());
  }

  #[test]
  fn partial_file_keeps_other_defaults() {
    let path = std::env::temp_dir().join(format!("warrant-settings-{}.toml", std::process::id()));
    std::fs::write(
      &path,
      "prefix = \"rules\"\nallow_cycles = true\n\n[parameters]\nthreshold = 20\n",
    )
    .unwrap();
    let settings = Settings::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(settings.prefix, "rules");
    assert!(settings.allow_cycles);
    assert!(!settings.allow_regexp);
    assert_eq!(settings.parameters["threshold"], Value::Integer(20));
    assert_eq!(settings.max_cascade_steps, 1_000_000);
  }
}
