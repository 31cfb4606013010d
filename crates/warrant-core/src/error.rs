//! Error types for `warrant-core`.

use std::{fmt, path::PathBuf};

use thiserror::Error;

// ─── Location ────────────────────────────────────────────────────────────────

/// Where in a specification a defect was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
  pub rule:   Option<String>,
  /// Index into the rule's `MatchAll` (or `MatchNone`) sequence.
  pub clause: Option<usize>,
  /// The part being checked, e.g. `When`, `Assign Person`, `fact Inhabits`.
  pub part:   Option<String>,
}

impl Location {
  pub fn document() -> Self { Self::default() }

  pub fn rule(name: impl Into<String>) -> Self {
    Self {
      rule: Some(name.into()),
      ..Self::default()
    }
  }

  pub fn clause(mut self, index: usize) -> Self {
    self.clause = Some(index);
    self
  }

  pub fn part(mut self, part: impl Into<String>) -> Self {
    self.part = Some(part.into());
    self
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut pieces = Vec::new();
    if let Some(rule) = &self.rule {
      pieces.push(format!("rule {rule:?}"));
    }
    if let Some(clause) = self.clause {
      pieces.push(format!("clause {clause}"));
    }
    if let Some(part) = &self.part {
      pieces.push(part.clone());
    }
    if pieces.is_empty() {
      f.write_str("document")
    } else {
      f.write_str(&pieces.join(", "))
    }
  }
}

// ─── Specification errors ────────────────────────────────────────────────────

/// What is wrong with a specification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecErrorKind {
  #[error("malformed document: {0}")]
  Malformed(String),

  #[error("invalid name {0:?}")]
  InvalidName(String),

  #[error("duplicate fact schema {0:?}")]
  DuplicateSchema(String),

  #[error("duplicate field {0:?}")]
  DuplicateField(String),

  #[error("field name {0:?} is reserved")]
  ReservedField(String),

  #[error("duplicate rule {0:?}")]
  DuplicateRule(String),

  #[error("duplicate constant {0:?}")]
  DuplicateConstant(String),

  #[error("duplicate parameter {0:?}")]
  DuplicateParameter(String),

  #[error("duplicate function {0:?}")]
  DuplicateFunction(String),

  #[error("duplicate assignment to local {0:?}")]
  DuplicateLocal(String),

  #[error("unknown field type {0:?}")]
  UnknownType(String),

  #[error("unknown fact {0:?}")]
  UnknownFact(String),

  #[error("unknown field {0:?}")]
  UnknownField(String),

  #[error("unbound reference {0}")]
  UnboundReference(String),

  #[error("type mismatch in {context}: expected {expected}, found {found}")]
  TypeMismatch {
    context:  String,
    expected: String,
    found:    String,
  },

  #[error("syntax error: {0}")]
  Syntax(String),

  #[error("regular expressions are disabled (allow them with allow_regexp)")]
  RegexpDisabled,

  #[error("invalid regular expression {pattern:?}: {reason}")]
  InvalidRegexp { pattern: String, reason: String },

  #[error("parameter {name:?}: {reason}")]
  InvalidParameter { name: String, reason: String },

  #[error("no parameter named {0:?} to override")]
  UnknownParameter(String),

  #[error("function {name:?}: {reason}")]
  InvalidFunction { name: String, reason: String },

  #[error("field {0:?} is not assigned")]
  UnassignedField(String),

  #[error("fact {0:?} has no fields and cannot be asserted distinctly")]
  EmptyDistinct(String),

  #[error("no enabled rules")]
  NoRules,

  #[error("rule cycle through {}", .0.join(", "))]
  RuleCycle(Vec<String>),

  #[error("rule {0:?} is on a cycle but does not assert distinctly")]
  IndistinctCycle(String),

  #[error("cycle through a MatchNone clause of rule {0:?}")]
  NegatedCycle(String),
}

/// One located defect in a specification.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{location}: {kind}")]
pub struct SpecificationError {
  pub location: Location,
  pub kind:     SpecErrorKind,
}

impl SpecificationError {
  pub fn new(location: Location, kind: SpecErrorKind) -> Self {
    Self { location, kind }
  }
}

fn list(errors: &[SpecificationError]) -> String {
  match errors {
    [one] => one.to_string(),
    many => {
      let mut out = format!("{} specification errors:", many.len());
      for error in many {
        out.push_str("\n  - ");
        out.push_str(&error.to_string());
      }
      out
    }
  }
}

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
  /// Every defect found while building the specification model.
  #[error("{}", list(.0))]
  Specification(Vec<SpecificationError>),

  #[error("rule {rule:?}: unsatisfiable local dependency: {detail}")]
  UnsatisfiableDependency { rule: String, detail: String },

  /// A plan could record a justification whose sources are not strictly
  /// older than the fact it derives.
  #[error("rule {rule:?}: plan cannot guarantee an acyclic cascade: {detail}")]
  CascadeCycle { rule: String, detail: String },

  #[error("YAML error: {0}")]
  Yaml(#[from] serde_yaml_ng::Error),

  #[error("failed to read {path}: {source}")]
  Io {
    path:   PathBuf,
    source: std::io::Error,
  },
}

impl Error {
  pub fn specification(location: Location, kind: SpecErrorKind) -> Self {
    Self::Specification(vec![SpecificationError::new(location, kind)])
  }

  /// The located defects, if this is a specification error.
  pub fn specification_errors(&self) -> &[SpecificationError] {
    match self {
      Self::Specification(errors) => errors,
      _ => &[],
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
