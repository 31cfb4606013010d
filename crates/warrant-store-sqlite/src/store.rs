//! [`SqliteEngine`]: the SQLite implementation of [`InferenceStore`].

use std::{panic::UnwindSafe, path::Path, sync::Arc};

use regex::Regex;
use rusqlite::{
  ToSql,
  functions::{Context, FunctionFlags},
};
use warrant_core::{
  fact::{Explanation, FactId, FactInstance, Justification, NewFact},
  lifecycle::{Activation, Retraction},
  store::InferenceStore,
};
use warrant_sql::Artifact;

use crate::{Result, cascade::Cascade, read};

/// Bounds on the work a single write may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
  /// Events processed per write before it is rolled back.
  pub max_cascade_steps: u64,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      max_cascade_steps: 1_000_000,
    }
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// An inference engine executing one compiled [`Artifact`] against a single
/// SQLite database.
///
/// Cloning is cheap: the connection and the artifact are reference-counted.
#[derive(Clone)]
pub struct SqliteEngine {
  conn:     tokio_rusqlite::Connection,
  artifact: Arc<Artifact>,
  limits:   Limits,
}

impl SqliteEngine {
  /// Open (or create) a database at `path` and install the artifact's
  /// schema.
  pub async fn open(path: impl AsRef<Path>, artifact: Artifact) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, artifact).await
  }

  /// Open an engine over a private in-memory database.
  pub async fn open_in_memory(artifact: Artifact) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, artifact).await
  }

  async fn init(conn: tokio_rusqlite::Connection, artifact: Artifact) -> Result<Self> {
    let script = artifact.schema_script();
    let statements = artifact.procedures.len() + 4 * artifact.tables.len() + 16;
    conn
      .call(move |conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        register_regexp(conn)?;
        conn.execute_batch(&script)?;
        conn.set_prepared_statement_cache_capacity(statements);
        Ok(())
      })
      .await?;

    tracing::debug!(
      prefix = %artifact.prefix,
      tables = artifact.tables.len(),
      procedures = artifact.procedures.len(),
      "engine schema installed"
    );

    Ok(Self {
      conn,
      artifact: Arc::new(artifact),
      limits: Limits::default(),
    })
  }

  pub fn with_limits(mut self, limits: Limits) -> Self {
    self.limits = limits;
    self
  }

  pub fn artifact(&self) -> &Artifact { &self.artifact }

  /// Register a scalar SQL function, typically the `External` name of a
  /// declared function. Rules calling it fail to run until it exists.
  pub async fn define_function<F, T>(&self, name: &str, arity: i32, f: F) -> Result<()>
  where
    F: FnMut(&Context<'_>) -> rusqlite::Result<T> + Send + UnwindSafe + 'static,
    T: ToSql,
  {
    let owned = name.to_string();
    self
      .conn
      .call(move |conn| {
        conn.create_scalar_function(
          owned.as_str(),
          arity,
          FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
          f,
        )?;
        Ok(())
      })
      .await?;
    tracing::debug!(function = %name, arity, "sql function defined");
    Ok(())
  }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `text REGEXP pattern` calls `regexp(pattern, text)`. Compiled patterns are
/// cached per statement.
pub(crate) fn register_regexp(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
  conn.create_scalar_function(
    "regexp",
    2,
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
    |ctx| {
      let regex = ctx.get_or_create_aux(0, |pattern| -> Result<Regex, BoxError> {
        Ok(Regex::new(pattern.as_str()?)?)
      })?;
      let text = ctx.get::<String>(1)?;
      Ok(warrant_core::expr::regexp_match(&regex, &text))
    },
  )
}

// ─── InferenceStore impl ─────────────────────────────────────────────────────

impl InferenceStore for SqliteEngine {
  type Error = crate::Error;

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn assert_fact(&self, fact: NewFact) -> Result<Activation> {
    let artifact = Arc::clone(&self.artifact);
    let limits = self.limits;

    let activation = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let outcome = Cascade::new(&tx, &artifact, limits).assert(fact);
        if outcome.is_ok() {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await??;

    tracing::debug!(
      fact = %activation.fact.id,
      schema = %activation.fact.schema,
      activated = activation.changes.activated.len(),
      "fact asserted"
    );
    Ok(activation)
  }

  async fn retract_fact(&self, id: FactId) -> Result<Retraction> {
    let artifact = Arc::clone(&self.artifact);
    let limits = self.limits;

    let retraction = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let outcome = Cascade::new(&tx, &artifact, limits).retract(id);
        if outcome.is_ok() {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await??;

    tracing::debug!(
      fact = %id,
      deactivated = retraction.changes.deactivated.len(),
      "fact retracted"
    );
    Ok(retraction)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_fact(&self, id: FactId) -> Result<Option<FactInstance>> {
    let artifact = Arc::clone(&self.artifact);
    self
      .conn
      .call(move |conn| Ok(read::fact(conn, &artifact, id)))
      .await?
  }

  async fn facts<'a>(
    &'a self,
    schema: &'a str,
    include_inactive: bool,
  ) -> Result<Vec<FactInstance>> {
    let artifact = Arc::clone(&self.artifact);
    let schema = schema.to_string();
    self
      .conn
      .call(move |conn| Ok(read::facts(conn, &artifact, &schema, include_inactive)))
      .await?
  }

  async fn justifications(&self, id: FactId) -> Result<Vec<Justification>> {
    let artifact = Arc::clone(&self.artifact);
    self
      .conn
      .call(move |conn| Ok(read::justifications(conn, &artifact, id)))
      .await?
  }

  async fn explain(&self, id: FactId) -> Result<Option<Explanation>> {
    let artifact = Arc::clone(&self.artifact);
    self
      .conn
      .call(move |conn| Ok(read::explain(conn, &artifact, id)))
      .await?
  }
}
