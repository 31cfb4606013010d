//! Runtime fact and justification records.
//!
//! These are the shapes the generated tables hold; the compiler dictates
//! them and every engine returns them.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

// ─── Identity ────────────────────────────────────────────────────────────────

/// Surrogate identity of a fact, unique across all schemas.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FactId(pub i64);

impl fmt::Display for FactId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

// ─── Input ───────────────────────────────────────────────────────────────────

/// A base fact to assert. Field values are checked against the schema by the
/// engine; integers are accepted for `REAL` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFact {
  pub schema: String,
  pub values: IndexMap<String, Value>,
}

impl NewFact {
  pub fn new(schema: impl Into<String>) -> Self {
    Self {
      schema: schema.into(),
      values: IndexMap::new(),
    }
  }

  pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.values.insert(field.into(), value.into());
    self
  }
}

// ─── Stored records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactInstance {
  pub id:     FactId,
  pub schema: String,
  /// Insertion sequence; monotonic across all schemas.
  pub seq:    i64,
  pub active: bool,
  /// Field values in schema order.
  pub values: IndexMap<String, Value>,
}

/// One recorded derivation of `derived` by `rule`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justification {
  pub id:      i64,
  pub derived: FactId,
  pub rule:    String,
  /// One source per `MatchAll` clause, in clause order.
  pub sources: Vec<FactId>,
  /// Whether every source is active and no exclusion applies.
  pub valid:   bool,
}

// ─── Explanation ─────────────────────────────────────────────────────────────

/// A fact with its supports resolved recursively down to base facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
  pub fact:     FactInstance,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub supports: Vec<Support>,
  /// The fact already appears on the path above and is not expanded again.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub elided:   bool,
}

/// One valid justification, its sources explained in turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Support {
  pub rule:    String,
  pub sources: Vec<Explanation>,
}

impl Explanation {
  /// Leaves of the explanation (base facts), deduplicated, in first-visit
  /// order.
  pub fn base_facts(&self) -> Vec<FactId> {
    fn walk(node: &Explanation, out: &mut Vec<FactId>) {
      if node.supports.is_empty() && !node.elided {
        if !out.contains(&node.fact.id) {
          out.push(node.fact.id);
        }
        return;
      }
      for support in &node.supports {
        for source in &support.sources {
          walk(source, out);
        }
      }
    }

    let mut out = Vec::new();
    walk(self, &mut out);
    out
  }
}
