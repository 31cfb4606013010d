//! Evaluation plans → procedure SQL.
//!
//! Every join is written as a comma join with all conditions in `WHERE`, so
//! SQLite's planner is free to pick the nested-loop order; the plan's step
//! order decides only how locals are inlined. Aliases: `c{k}` for `MatchAll`
//! position `k`, `x{m}` for a pinned `MatchNone` position, `n{m}` inside
//! `NOT EXISTS` subqueries, `j` and `s{k}` for justification rows.

use indexmap::IndexMap;
use warrant_core::{
  expr::Expr,
  plan::{Access, EvaluationPlan, Pivot, SeqBound},
};

use crate::{
  naming::{Names, column, ident, string},
  render::{self, Context},
};

pub struct JoinWriter<'a> {
  names:  &'a Names,
  plan:   &'a EvaluationPlan,
  locals: IndexMap<String, String>,
}

fn alias(position: usize) -> String { format!("c{position}") }

impl<'a> JoinWriter<'a> {
  pub fn new(names: &'a Names, plan: &'a EvaluationPlan) -> Self {
    let mut locals = IndexMap::new();
    for step in &plan.steps {
      let alias = alias(step.position);
      for (name, expr) in &step.assign {
        let sql = render::expression(expr, Context {
          this:   Some(&alias),
          locals: &locals,
        });
        locals.insert(name.clone(), format!("({sql})"));
      }
    }
    Self { names, plan, locals }
  }

  fn clause_count(&self) -> usize { self.plan.steps.len() }

  fn render(&self, expr: &Expr, this: Option<&str>) -> String {
    render::expression(expr, Context {
      this,
      locals: &self.locals,
    })
  }

  /// `c0."id", c1."id", ..., <assertion values>`
  fn derive_columns(&self) -> Vec<String> {
    let mut columns: Vec<String> =
      (0..self.clause_count()).map(|k| column(&alias(k), "id")).collect();
    columns.extend(
      self
        .plan
        .assertion
        .fields
        .values()
        .map(|expr| self.render(expr, None)),
    );
    columns
  }

  fn fact_tables(&self) -> Vec<String> {
    self
      .plan
      .steps
      .iter()
      .map(|step| {
        format!(
          "{} AS {}",
          ident(&self.names.fact_table(&step.fact)),
          alias(step.position)
        )
      })
      .collect()
  }

  /// Liveness, filters, the rule condition, and exclusions; sequence bounds
  /// only when `bounded`.
  fn match_conditions(&self, bounded: bool) -> Vec<String> {
    let mut conditions = Vec::new();
    let pivot = match self.plan.pivot {
      Pivot::Match(k) => Some(alias(k)),
      Pivot::Exclusion(_) => None,
    };

    for step in &self.plan.steps {
      let a = alias(step.position);
      match (step.access, &pivot) {
        (Access::Pinned, _) => conditions.push(format!("{} = :pivot", column(&a, "id"))),
        (Access::Scan { bound: Some(bound) }, Some(pivot)) if bounded => {
          let op = match bound {
            SeqBound::Before => "<",
            SeqBound::AtOrBefore => "<=",
          };
          conditions.push(format!("{} {op} {}", column(&a, "seq"), column(pivot, "seq")));
        }
        _ => {}
      }
      conditions.push(format!("{} = 1", column(&a, "active")));
    }

    for step in &self.plan.steps {
      if let Some(filter) = &step.filter {
        conditions.push(self.render(filter, Some(&alias(step.position))));
      }
    }
    if let Some(condition) = &self.plan.condition {
      conditions.push(self.render(condition, None));
    }
    conditions.extend(self.not_exists());
    conditions
  }

  fn not_exists(&self) -> Vec<String> {
    self
      .plan
      .exclusions
      .iter()
      .map(|exclusion| {
        let a = format!("n{}", exclusion.position);
        let mut inner = vec![format!("{} = 1", column(&a, "active"))];
        if let Some(filter) = &exclusion.filter {
          inner.push(self.render(filter, Some(&a)));
        }
        format!(
          "NOT EXISTS (SELECT 1 FROM {} AS {a} WHERE {})",
          ident(&self.names.fact_table(&exclusion.fact)),
          inner.join(" AND ")
        )
      })
      .collect()
  }

  fn order_by(&self) -> String {
    (0..self.clause_count())
      .map(|k| column(&alias(k), "seq"))
      .collect::<Vec<_>>()
      .join(", ")
  }

  /// Rows for a `Derive` procedure. `bounded` selects the sequence-bounded
  /// form used for freshly inserted pivots.
  pub fn derive(&self, bounded: bool) -> String {
    select(
      &self.derive_columns(),
      &self.fact_tables(),
      &self.match_conditions(bounded),
      Some(&self.order_by()),
    )
  }

  /// Valid justifications of this rule that name the pivot at this position.
  pub fn invalidate(&self) -> String {
    let Pivot::Match(k) = self.plan.pivot else {
      return String::new();
    };
    let j = ident(&self.names.justifications());
    let s = ident(&self.names.justification_sources());
    select(
      &["j.\"id\"".to_string(), "j.\"derived_id\"".to_string()],
      &[format!("{j} AS j"), format!("{s} AS s")],
      &[
        "s.\"source_id\" = :pivot".to_string(),
        format!("s.\"position\" = {k}"),
        "s.\"justification_id\" = j.\"id\"".to_string(),
        format!("j.\"rule\" = {}", string(&self.plan.rule)),
        "j.\"valid\" = 1".to_string(),
      ],
      Some("j.\"id\""),
    )
  }

  /// Valid justifications whose sources the (newly active) pinned excluded
  /// fact now blocks.
  pub fn block(&self) -> String {
    let Some(exclusion) = self.plan.exclusions.iter().find(|e| e.pinned) else {
      return String::new();
    };
    let x = format!("x{}", exclusion.position);
    let (mut tables, mut conditions) = self.justified_join(true);
    tables.push(format!(
      "{} AS {x}",
      ident(&self.names.fact_table(&exclusion.fact))
    ));
    conditions.push(format!("{} = :pivot", column(&x, "id")));
    conditions.push(format!("{} = 1", column(&x, "active")));
    if let Some(filter) = &exclusion.filter {
      conditions.push(self.render(filter, Some(&x)));
    }
    select(
      &["j.\"id\"".to_string(), "j.\"derived_id\"".to_string()],
      &tables,
      &conditions,
      Some("j.\"id\""),
    )
  }

  /// Combinations the (newly inactive) pinned excluded fact was blocking.
  pub fn unblock(&self) -> String {
    let Some(exclusion) = self.plan.exclusions.iter().find(|e| e.pinned) else {
      return String::new();
    };
    let x = format!("x{}", exclusion.position);
    let mut tables = self.fact_tables();
    tables.push(format!(
      "{} AS {x}",
      ident(&self.names.fact_table(&exclusion.fact))
    ));
    let mut conditions = vec![format!("{} = :pivot", column(&x, "id"))];
    if let Some(filter) = &exclusion.filter {
      conditions.push(self.render(filter, Some(&x)));
    }
    conditions.extend(self.match_conditions(false));
    select(&self.derive_columns(), &tables, &conditions, Some(&self.order_by()))
  }

  /// `1` when the justification `:justification` has every source active and
  /// no exclusion applies.
  pub fn revalidate(&self) -> String {
    let (tables, mut conditions) = self.justified_join(false);
    conditions.insert(0, "j.\"id\" = :justification".to_string());
    for step in &self.plan.steps {
      conditions.push(format!("{} = 1", column(&alias(step.position), "active")));
    }
    conditions.extend(self.not_exists());
    format!(
      "SELECT EXISTS (\n  {}\n)",
      select(&["1".to_string()], &tables, &conditions, None).replace('\n', "\n  ")
    )
  }

  /// Justification rows of this rule joined back to their source facts.
  fn justified_join(&self, only_valid: bool) -> (Vec<String>, Vec<String>) {
    let j = ident(&self.names.justifications());
    let s = ident(&self.names.justification_sources());
    let mut tables = vec![format!("{j} AS j")];
    let mut conditions = vec![format!("j.\"rule\" = {}", string(&self.plan.rule))];
    if only_valid {
      conditions.push("j.\"valid\" = 1".to_string());
    }
    for step in &self.plan.steps {
      let k = step.position;
      let a = alias(k);
      tables.push(format!("{s} AS s{k}"));
      tables.push(format!("{} AS {a}", ident(&self.names.fact_table(&step.fact))));
      conditions.push(format!("s{k}.\"justification_id\" = j.\"id\""));
      conditions.push(format!("s{k}.\"position\" = {k}"));
      conditions.push(format!("{} = s{k}.\"source_id\"", column(&a, "id")));
    }
    (tables, conditions)
  }
}

fn select(
  columns: &[String],
  tables: &[String],
  conditions: &[String],
  order: Option<&str>,
) -> String {
  let mut sql = format!(
    "SELECT {}\nFROM {}",
    columns.join(", "),
    tables.join(",\n     ")
  );
  if !conditions.is_empty() {
    sql.push_str("\nWHERE ");
    sql.push_str(&conditions.join("\n  AND "));
  }
  if let Some(order) = order {
    sql.push_str("\nORDER BY ");
    sql.push_str(order);
  }
  sql
}
