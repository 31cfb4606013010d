//! Table, index and procedure names, and SQL quoting.

use warrant_core::plan::Pivot;

use crate::{
  artifact::Trigger,
  error::{Error, Result},
};

/// Every name the generated artifact uses, derived from one table prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Names {
  prefix: String,
}

impl Names {
  /// `prefix` must match `[A-Za-z][A-Za-z0-9_]*`.
  pub fn new(prefix: &str) -> Result<Self> {
    let mut chars = prefix.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
      && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
      return Err(Error::InvalidPrefix(prefix.to_string()));
    }
    Ok(Self {
      prefix: prefix.to_string(),
    })
  }

  pub fn prefix(&self) -> &str { &self.prefix }

  /// Identity registry shared by all fact tables.
  pub fn registry(&self) -> String { format!("{}_facts", self.prefix) }

  pub fn fact_table(&self, schema: &str) -> String {
    format!("{}_fact_{schema}", self.prefix)
  }

  pub fn justifications(&self) -> String { format!("{}_justifications", self.prefix) }

  pub fn justification_sources(&self) -> String {
    format!("{}_justification_sources", self.prefix)
  }

  pub fn index(&self, table: &str, columns: &[&str]) -> String {
    format!("{table}_by_{}", columns.join("_"))
  }

  pub fn procedure(&self, rule: &str, pivot: Pivot, trigger: Trigger) -> String {
    let position = match pivot {
      Pivot::Match(k) => format!("match{k}"),
      Pivot::Exclusion(m) => format!("exclude{m}"),
    };
    format!("{}_{rule}_{position}_{}", self.prefix, trigger.as_str())
  }

  pub fn entry_point(&self, schema: &str, action: &str) -> String {
    format!("{}_{schema}_{action}", self.prefix)
  }
}

/// A double-quoted SQL identifier.
pub fn ident(name: &str) -> String { format!("\"{}\"", name.replace('"', "\"\"")) }

/// A single-quoted SQL string literal.
pub fn string(text: &str) -> String { format!("'{}'", text.replace('\'', "''")) }

/// `alias."column"`
pub fn column(alias: &str, name: &str) -> String { format!("{alias}.{}", ident(name)) }
