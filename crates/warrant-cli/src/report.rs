//! Human-readable summaries for `warrant check` and `warrant plan`.

use std::fmt::Write as _;

use indexmap::IndexMap;
use warrant_core::{
  Specification,
  plan::{Access, EvaluationPlan, Pivot, RulePlans, SeqBound},
};

pub fn check(spec: &Specification, plans: &IndexMap<String, RulePlans>) -> String {
  let mut out = String::new();
  if let Some(description) = &spec.description {
    let _ = writeln!(out, "{description}\n");
  }

  let base = spec.base_schemas().count();
  let _ = writeln!(
    out,
    "{} schemas ({base} base, {} derived), {} rules, {} plans",
    spec.facts.len(),
    spec.facts.len() - base,
    spec.rules.len(),
    plans.values().map(|p| p.plans.len()).sum::<usize>(),
  );

  let _ = writeln!(out, "\nschemas:");
  for schema in spec.facts.values() {
    let fields: Vec<String> = schema
      .fields
      .iter()
      .map(|(name, ty)| format!("{name}: {ty}"))
      .collect();
    let kind = if spec.is_derived(&schema.name) { "derived" } else { "base" };
    let _ = writeln!(out, "  {} ({kind}) {{ {} }}", schema.name, fields.join(", "));
  }

  let _ = writeln!(out, "\nrules:");
  for rule in spec.rules.values() {
    let matches: Vec<&str> = rule.clauses.iter().map(|c| c.fact.as_str()).collect();
    let _ = write!(out, "  {} -> {}", rule.name, rule.target());
    if rule.is_distinct() {
      out.push_str(" (distinct)");
    }
    let _ = write!(out, " from {}", matches.join(", "));
    if !rule.exclusions.is_empty() {
      let none: Vec<&str> = rule.exclusions.iter().map(|e| e.fact.as_str()).collect();
      let _ = write!(out, " unless {}", none.join(", "));
    }
    out.push('\n');
    if !rule.description.is_empty() {
      let _ = writeln!(out, "    {}", rule.description);
    }
  }
  out
}

pub fn plans(plans: &IndexMap<String, RulePlans>) -> String {
  let mut out = String::new();
  for rule in plans.values() {
    let order: Vec<String> = rule.order.iter().map(usize::to_string).collect();
    let _ = writeln!(out, "{} (clause order {})", rule.rule, order.join(", "));
    for plan in &rule.plans {
      write_plan(&mut out, plan);
    }
    out.push('\n');
  }
  out
}

fn write_plan(out: &mut String, plan: &EvaluationPlan) {
  let pivot = match plan.pivot {
    Pivot::Match(k) => format!("match {k}"),
    Pivot::Exclusion(m) => format!("exclusion {m}"),
  };
  let _ = writeln!(
    out,
    "  on {} {pivot}: activate => {:?}, deactivate => {:?}",
    plan.fact, plan.triggers.on_activate, plan.triggers.on_deactivate
  );

  for step in &plan.steps {
    let access = match step.access {
      Access::Pinned => "pinned".to_string(),
      Access::Scan { bound: None } => "scan".to_string(),
      Access::Scan {
        bound: Some(SeqBound::Before),
      } => "scan seq < pivot".to_string(),
      Access::Scan {
        bound: Some(SeqBound::AtOrBefore),
      } => "scan seq <= pivot".to_string(),
    };
    let _ = write!(out, "    [{}] {} {access}", step.position, step.fact);
    if !step.keys.is_empty() {
      let _ = write!(out, " keys ({})", step.keys.join(", "));
    }
    if let Some(filter) = &step.filter {
      let _ = write!(out, " where {filter}");
    }
    out.push('\n');
  }
  for exclusion in &plan.exclusions {
    let verb = if exclusion.pinned { "pinned" } else { "none of" };
    let _ = write!(out, "    [!{}] {verb} {}", exclusion.position, exclusion.fact);
    if let Some(filter) = &exclusion.filter {
      let _ = write!(out, " where {filter}");
    }
    out.push('\n');
  }
  if let Some(condition) = &plan.condition {
    let _ = writeln!(out, "    when {condition}");
  }
}

#[cfg(test)]
mod tests {
  use warrant_core::CompileOptions;

  use super::*;

  const SPEC: &str = r#"
Facts:
  Person: { Name: STRING }
  Banned: { Name: STRING }
  Greeting: { Text: STRING }
Rules:
  Greet:
    Description: Say hello
    MatchAll:
      - Fact: Person
        Assign: { Who: !expr This.Name }
    MatchNone:
      - Fact: Banned
        When: !expr This.Name == Locals.Who
    Assert: !distinct { Greeting: { Text: !expr "'hello ' . Locals.Who" } }
"#;

  fn compiled() -> (Specification, IndexMap<String, RulePlans>) {
    let spec = Specification::from_yaml(SPEC, &CompileOptions::default()).unwrap();
    let plans = warrant_core::plan::compile(&spec).unwrap();
    (spec, plans)
  }

  #[test]
  fn check_summarizes_schemas_and_rules() {
    let (spec, plans) = compiled();
    let text = check(&spec, &plans);
    assert!(text.starts_with("3 schemas (2 base, 1 derived), 1 rules, 2 plans"));
    assert!(text.contains("Greeting (derived) { Text: STRING }"));
    assert!(text.contains("Greet -> Greeting (distinct) from Person unless Banned"));
    assert!(text.contains("Say hello"));
  }

  #[test]
  fn plans_list_every_pivot() {
    let (_, compiled) = compiled();
    let text = plans(&compiled);
    assert!(text.contains("on Person match 0: activate => Derive, deactivate => Invalidate"));
    assert!(text.contains("on Banned exclusion 0: activate => Block, deactivate => Unblock"));
    assert!(text.contains("[0] Person pinned"));
  }
}
