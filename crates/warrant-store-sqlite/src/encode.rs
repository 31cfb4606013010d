//! Conversions between warrant values and SQLite column values.
//!
//! Booleans are stored as `0`/`1`, integers as `INTEGER`, reals as `REAL`,
//! strings as `TEXT`. Justification source tuples are keyed by their ids
//! joined with commas.

use indexmap::IndexMap;
use rusqlite::types::Value as SqlValue;
use warrant_core::{
  fact::{FactId, FactInstance},
  value::{FieldType, Value},
};
use warrant_sql::FactTable;

use crate::{Error, Result};

// ─── Values ──────────────────────────────────────────────────────────────────

pub fn encode_value(value: &Value) -> SqlValue {
  match value {
    Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
    Value::Integer(i) => SqlValue::Integer(*i),
    Value::Real(r) => SqlValue::Real(*r),
    Value::String(s) => SqlValue::Text(s.clone()),
  }
}

pub fn decode_value(ty: FieldType, raw: SqlValue) -> Result<Value> {
  Ok(match (ty, raw) {
    (FieldType::Boolean, SqlValue::Integer(i)) => Value::Boolean(i != 0),
    (FieldType::Integer, SqlValue::Integer(i)) => Value::Integer(i),
    (FieldType::Real, SqlValue::Real(r)) => Value::Real(r),
    (FieldType::Real, SqlValue::Integer(i)) => Value::Real(i as f64),
    (FieldType::String, SqlValue::Text(s)) => Value::String(s),
    (ty, raw) => {
      return Err(Error::Corrupt(format!(
        "{:?} stored where {ty} was expected",
        raw.data_type()
      )));
    }
  })
}

/// Check a base fact's values against its table and order them by field.
pub fn encode_fields(
  table: &FactTable,
  mut values: IndexMap<String, Value>,
) -> Result<Vec<SqlValue>> {
  let mismatch = |detail: String| Error::FieldMismatch {
    schema: table.schema.clone(),
    detail,
  };

  let mut out = Vec::with_capacity(table.fields.len());
  for (field, ty) in &table.fields {
    let Some(value) = values.shift_remove(field) else {
      return Err(mismatch(format!("missing field {field}")));
    };
    let value = value.coerce(*ty).map_err(|value| {
      mismatch(format!(
        "field {field} is {}, got {} {value}",
        ty,
        value.field_type()
      ))
    })?;
    out.push(encode_value(&value));
  }
  if let Some(extra) = values.keys().next() {
    return Err(mismatch(format!("unknown field {extra}")));
  }
  Ok(out)
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// A fact row as read by `select_one` / `select_all`.
pub struct RawFact {
  pub id:     i64,
  pub seq:    i64,
  pub active: bool,
  pub fields: Vec<SqlValue>,
}

impl RawFact {
  pub fn from_row(row: &rusqlite::Row<'_>, fields: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      id:     row.get(0)?,
      seq:    row.get(1)?,
      active: row.get(2)?,
      fields: (0..fields)
        .map(|i| row.get(3 + i))
        .collect::<rusqlite::Result<_>>()?,
    })
  }

  pub fn decode(self, table: &FactTable) -> Result<FactInstance> {
    let mut values = IndexMap::with_capacity(table.fields.len());
    for ((field, ty), raw) in table.fields.iter().zip(self.fields) {
      values.insert(field.clone(), decode_value(*ty, raw)?);
    }
    Ok(FactInstance {
      id: FactId(self.id),
      schema: table.schema.clone(),
      seq: self.seq,
      active: self.active,
      values,
    })
  }
}

// ─── Justification keys ──────────────────────────────────────────────────────

pub fn source_key(sources: &[FactId]) -> String {
  sources
    .iter()
    .map(|id| id.0.to_string())
    .collect::<Vec<_>>()
    .join(",")
}
