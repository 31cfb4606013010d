//! SQLite code generation for warrant rule specifications.
//!
//! Turns a validated [`Specification`] and its evaluation plans into an
//! [`Artifact`]: fact tables, the justification tables, and one procedure
//! per rule, clause position and trigger direction. Pure and synchronous;
//! no database dependency.
//!
//! # Quick start
//!
//! ```no_run
//! use warrant_core::{CompileOptions, Specification};
//! use warrant_sql::{GenerateOptions, compile};
//!
//! let yaml = std::fs::read_to_string("pets.yaml").unwrap();
//! let spec = Specification::from_yaml(&yaml, &CompileOptions::default()).unwrap();
//! let artifact = compile(&spec, &GenerateOptions::default()).unwrap();
//! println!("{}", artifact.render());
//! ```

pub mod artifact;
pub mod error;
pub mod naming;
mod procedure;
pub mod render;
mod schema;

pub use artifact::{
  Artifact, Catalog, FactTable, Procedure, RuleInfo, Statement, Trigger,
};
pub use error::{Error, Result};
use indexmap::IndexMap;
pub use naming::Names;
use serde::{Deserialize, Serialize};
use warrant_core::{
  Specification,
  plan::{self, Effect, RulePlans},
};

use crate::procedure::JoinWriter;

pub const DEFAULT_PREFIX: &str = "warrant";

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateOptions {
  /// Prepended to every table, index and procedure name.
  pub prefix: String,
}

impl Default for GenerateOptions {
  fn default() -> Self {
    Self {
      prefix: DEFAULT_PREFIX.to_string(),
    }
  }
}

// ─── Public API ──────────────────────────────────────────────────────────────

/// Plan every rule of `spec` and generate its artifact.
pub fn compile(spec: &Specification, options: &GenerateOptions) -> Result<Artifact> {
  let plans = plan::compile(spec)?;
  generate(spec, &plans, options)
}

/// Generate the artifact for already compiled plans.
pub fn generate(
  spec: &Specification,
  plans: &IndexMap<String, RulePlans>,
  options: &GenerateOptions,
) -> Result<Artifact> {
  let names = Names::new(&options.prefix)?;

  let tables = spec
    .facts
    .values()
    .map(|schema| {
      let table = schema::fact_table(&names, schema, spec.is_derived(&schema.name));
      (schema.name.clone(), table)
    })
    .collect();

  let mut rules = IndexMap::new();
  let mut procedures = Vec::new();

  for rule_plans in plans.values() {
    let Some(rule) = spec.rules.get(&rule_plans.rule) else {
      continue;
    };
    let Some(first) = rule_plans.plans.first() else {
      continue;
    };

    rules.insert(rule.name.clone(), RuleInfo {
      name:        rule.name.clone(),
      description: rule.description.clone(),
      target:      rule.target().to_string(),
      mode:        rule.assertion.mode,
      sources:     rule.clauses.len(),
      fields:      rule.assertion.fields.keys().cloned().collect(),
      revalidate:  JoinWriter::new(&names, first).revalidate(),
    });

    for plan in &rule_plans.plans {
      let writer = JoinWriter::new(&names, plan);
      for (trigger, effect) in [
        (Trigger::Activate, plan.triggers.on_activate),
        (Trigger::Deactivate, plan.triggers.on_deactivate),
      ] {
        let (sql, reactivation_sql) = match effect {
          Effect::Derive => (writer.derive(true), Some(writer.derive(false))),
          Effect::Invalidate => (writer.invalidate(), None),
          Effect::Block => (writer.block(), None),
          Effect::Unblock => (writer.unblock(), None),
        };
        let name = names.procedure(&rule.name, plan.pivot, trigger);
        tracing::debug!(procedure = %name, ?effect, fact = %plan.fact, "procedure generated");
        procedures.push(Procedure {
          name,
          rule: rule.name.clone(),
          pivot: plan.pivot,
          fact: plan.fact.clone(),
          trigger,
          effect,
          sql,
          reactivation_sql,
        });
      }
    }
  }

  Ok(Artifact {
    prefix: names.prefix().to_string(),
    description: spec.description.clone(),
    schema: schema::statements(&names, spec, plans),
    tables,
    catalog: schema::catalog(&names),
    rules,
    procedures,
  })
}
