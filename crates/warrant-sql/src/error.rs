//! Error types for the warrant-sql generator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid table prefix {0:?}: expected [A-Za-z][A-Za-z0-9_]*")]
  InvalidPrefix(String),

  #[error(transparent)]
  Core(#[from] warrant_core::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
