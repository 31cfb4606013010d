//! Field types and scalar values.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── FieldType ───────────────────────────────────────────────────────────────

/// The closed set of types a fact field (or expression) may have.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
  Boolean,
  Integer,
  Real,
  String,
}

impl FieldType {
  /// Parse a type name as written in a `Facts` section (case-insensitive).
  pub fn parse(name: &str) -> Option<Self> {
    match name.to_ascii_uppercase().as_str() {
      "BOOLEAN" => Some(Self::Boolean),
      "INTEGER" => Some(Self::Integer),
      "REAL" => Some(Self::Real),
      "STRING" => Some(Self::String),
      _ => None,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Self::Boolean => "BOOLEAN",
      Self::Integer => "INTEGER",
      Self::Real => "REAL",
      Self::String => "STRING",
    }
  }

  pub fn is_numeric(self) -> bool { matches!(self, Self::Integer | Self::Real) }
}

impl fmt::Display for FieldType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

// ─── Value ───────────────────────────────────────────────────────────────────

/// A scalar held by a fact field or produced by a constant expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Boolean(bool),
  Integer(i64),
  Real(f64),
  String(String),
}

impl Value {
  pub fn field_type(&self) -> FieldType {
    match self {
      Self::Boolean(_) => FieldType::Boolean,
      Self::Integer(_) => FieldType::Integer,
      Self::Real(_) => FieldType::Real,
      Self::String(_) => FieldType::String,
    }
  }

  /// Convert to `ty`, widening integers to reals. Any other mismatch is
  /// returned unchanged as `Err`.
  pub fn coerce(self, ty: FieldType) -> Result<Self, Self> {
    match (self, ty) {
      (Self::Integer(i), FieldType::Real) => Ok(Self::Real(i as f64)),
      (value, ty) if value.field_type() == ty => Ok(value),
      (value, _) => Err(value),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Boolean(b) => write!(f, "{b}"),
      Self::Integer(i) => write!(f, "{i}"),
      Self::Real(r) => write!(f, "{r:?}"),
      Self::String(s) => write!(f, "{s:?}"),
    }
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self { Self::Boolean(value) }
}

impl From<i64> for Value {
  fn from(value: i64) -> Self { Self::Integer(value) }
}

impl From<f64> for Value {
  fn from(value: f64) -> Self { Self::Real(value) }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self { Self::String(value.to_string()) }
}

impl From<String> for Value {
  fn from(value: String) -> Self { Self::String(value) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn type_names_are_case_insensitive() {
    assert_eq!(FieldType::parse("string"), Some(FieldType::String));
    assert_eq!(FieldType::parse("Integer"), Some(FieldType::Integer));
    assert_eq!(FieldType::parse("text"), None);
  }

  #[test]
  fn integers_widen_to_reals() {
    assert_eq!(Value::Integer(2).coerce(FieldType::Real), Ok(Value::Real(2.0)));
    assert_eq!(
      Value::Real(2.5).coerce(FieldType::Integer),
      Err(Value::Real(2.5))
    );
  }

  #[test]
  fn untagged_json_keeps_number_kinds() {
    let values: Vec<Value> = serde_json::from_str(r#"[true, 3, 1.5, "x"]"#).unwrap();
    assert_eq!(
      values,
      vec![
        Value::Boolean(true),
        Value::Integer(3),
        Value::Real(1.5),
        Value::String("x".into()),
      ]
    );
  }
}
