//! The generated artifact.
//!
//! An [`Artifact`] is the complete output of compilation: schema statements
//! in dependency order, the prepared statements every fact table and the
//! justification catalog need, and one procedure per (rule, clause position,
//! trigger). Engines execute it; [`Artifact::render`] turns it into a single
//! text document.

use std::fmt::Write as _;

use indexmap::IndexMap;
use serde::Serialize;
use warrant_core::{
  model::DedupMode,
  plan::{Effect, Pivot},
  value::FieldType,
};

use crate::error::Result;

// ─── Statements ──────────────────────────────────────────────────────────────

/// A named SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
  pub name: String,
  pub sql:  String,
}

impl Statement {
  pub(crate) fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      sql:  sql.into(),
    }
  }
}

/// Statements over one fact schema's table. Positional parameters; the
/// field order is the schema's.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactTable {
  pub schema:       String,
  pub table:        String,
  pub fields:       IndexMap<String, FieldType>,
  /// Targets of some rule; no external entry points.
  pub derived:      bool,
  /// `?1` = id (also the sequence number), `?2..` = field values.
  pub insert:       String,
  /// `?1..` = field values → id of the oldest active fact holding them.
  pub find_active:  String,
  /// `?1` = id, `?2` = active flag.
  pub set_active:   String,
  /// `?1` = id → `id, seq, active, fields...`.
  pub select_one:   String,
  /// `?1` = minimum active flag (`0` includes inactive facts).
  pub select_all:   String,
  /// Named copies of `insert` and `set_active` for callers outside the
  /// engine. Empty for derived schemas.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub entry_points: Vec<Statement>,
}

/// Statements over the identity registry and the justification tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Catalog {
  /// `?1` = schema → new id via `last_insert_rowid()`.
  pub register:             String,
  /// `?1` = id → schema.
  pub schema_of:            String,
  /// `?1` = rule, `?2` = source key → `id, derived_id, valid`.
  pub find_justification:   String,
  /// `?1` = derived id, `?2` = rule, `?3` = source key.
  pub insert_justification: String,
  /// `?1` = justification id, `?2` = position, `?3` = source id.
  pub insert_source:        String,
  /// `?1` = justification id, `?2` = valid flag.
  pub set_valid:            String,
  /// `?1` = justification id → rule.
  pub rule_of:              String,
  /// `?1` = derived id → `id, rule, valid` in id order.
  pub justifications_of:    String,
  /// `?1` = justification id → `source_id` in position order.
  pub sources_of:           String,
  /// `?1` = old derived id, `?2` = new derived id.
  pub retarget:             String,
}

// ─── Rules and procedures ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleInfo {
  pub name:        String,
  pub description: String,
  pub target:      String,
  pub mode:        DedupMode,
  /// Number of `MatchAll` clauses, i.e. sources per justification.
  pub sources:     usize,
  /// Target fields, in the order derive rows return them.
  pub fields:      Vec<String>,
  /// `:justification` → `1` when every source is active and no exclusion
  /// applies, else `0`.
  pub revalidate:  String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
  Activate,
  Deactivate,
}

impl Trigger {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Activate => "activate",
      Self::Deactivate => "deactivate",
    }
  }
}

/// One incremental procedure. All take the changed fact's id as `:pivot`.
///
/// Rows returned by effect:
/// - `Derive`, `Unblock`: one source id per `MatchAll` clause, then the
///   target field values;
/// - `Invalidate`, `Block`: `justification id, derived id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Procedure {
  pub name:             String,
  pub rule:             String,
  pub pivot:            Pivot,
  /// Schema whose status change fires the procedure.
  pub fact:             String,
  pub trigger:          Trigger,
  pub effect:           Effect,
  pub sql:              String,
  /// `Derive` only: the same join without sequence bounds, for a fact that
  /// becomes active again after a retraction cascade.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reactivation_sql: Option<String>,
}

// ─── Artifact ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
  pub prefix:      String,
  pub description: Option<String>,
  /// DDL in dependency order.
  pub schema:      Vec<Statement>,
  pub tables:      IndexMap<String, FactTable>,
  pub catalog:     Catalog,
  pub rules:       IndexMap<String, RuleInfo>,
  pub procedures:  Vec<Procedure>,
}

impl Artifact {
  /// The DDL as one script.
  pub fn schema_script(&self) -> String {
    self
      .schema
      .iter()
      .map(|s| format!("{};\n", s.sql))
      .collect()
  }

  pub fn procedures_for<'a>(
    &'a self,
    fact: &'a str,
    trigger: Trigger,
  ) -> impl Iterator<Item = &'a Procedure> + 'a {
    self
      .procedures
      .iter()
      .filter(move |p| p.fact == fact && p.trigger == trigger)
  }

  pub fn table(&self, schema: &str) -> Option<&FactTable> { self.tables.get(schema) }

  pub fn to_json(&self) -> Result<String> { Ok(serde_json::to_string_pretty(self)?) }

  /// The whole artifact as text: schema first, then the entry points of base
  /// schemas, then every procedure. Named statements carry a
  /// `-- name: <name>` header.
  pub fn render(&self) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "-- warrant rule artifact (prefix {})", self.prefix);
    if let Some(description) = &self.description {
      for line in description.lines() {
        let _ = writeln!(out, "-- {line}");
      }
    }

    section(&mut out, "Schema");
    for statement in &self.schema {
      named(&mut out, &statement.name, &statement.sql);
    }

    section(&mut out, "Entry points");
    for statement in self.tables.values().flat_map(|t| &t.entry_points) {
      named(&mut out, &statement.name, &statement.sql);
    }

    section(&mut out, "Procedures");
    for procedure in &self.procedures {
      let _ = writeln!(
        out,
        "-- rule {}: on {} of {}, {:?}",
        procedure.rule,
        procedure.trigger.as_str(),
        procedure.fact,
        procedure.effect
      );
      named(&mut out, &procedure.name, &procedure.sql);
      if let Some(sql) = &procedure.reactivation_sql {
        named(&mut out, &format!("{}_again", procedure.name), sql);
      }
    }

    section(&mut out, "Revalidation");
    for rule in self.rules.values() {
      named(&mut out, &format!("{}_{}_revalidate", self.prefix, rule.name), &rule.revalidate);
    }

    out
  }
}

fn section(out: &mut String, title: &str) {
  let _ = writeln!(out, "\n-- ─── {title} {}", "─".repeat(72usize.saturating_sub(title.len())));
}

fn named(out: &mut String, name: &str, sql: &str) {
  let _ = writeln!(out, "\n-- name: {name}\n{sql};");
}
