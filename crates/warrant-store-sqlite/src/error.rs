//! Error type for `warrant-store-sqlite`.

use thiserror::Error;
use warrant_core::fact::FactId;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] warrant_core::Error),

  #[error("code generation error: {0}")]
  Generate(#[from] warrant_sql::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("unknown fact schema {0:?}")]
  UnknownSchema(String),

  /// Derived facts are written only by rules.
  #[error("fact schema {0:?} is derived and accepts no external writes")]
  DerivedSchema(String),

  #[error("fields of {schema}: {detail}")]
  FieldMismatch { schema: String, detail: String },

  #[error("fact not found: {0}")]
  FactNotFound(FactId),

  #[error("fact {0} is already retracted")]
  AlreadyRetracted(FactId),

  /// The cascade did not reach a fixpoint within the configured number of
  /// events; the write was rolled back.
  #[error("cascade exceeded {0} steps")]
  CascadeLimit(u64),

  #[error("store is inconsistent with the artifact: {0}")]
  Corrupt(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
