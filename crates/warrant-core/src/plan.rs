//! Incremental evaluation plans.
//!
//! Every rule gets one [`EvaluationPlan`] per clause position, positive or
//! negated. A plan describes what follows when a fact of that position's
//! schema changes status: the join that re-evaluates the rest of the rule
//! with that fact pinned, and which effect each trigger direction has.
//!
//! For a `MatchAll` position `k` the join visits clauses in dependency order
//! (which for a valid rule is the declared order) with `k` pinned to the
//! changed fact. Every other position is bounded by insertion sequence:
//! positions before `k` must be strictly older than the pivot and positions
//! after `k` no newer. A combination therefore fires exactly once, at the
//! first position holding its newest fact.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::{
  error::{Error, Result},
  expr::{BinaryOp, Expr},
  model::{Assertion, Rule, Specification},
};

// ─── Plan types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "position", rename_all = "snake_case")]
pub enum Pivot {
  /// A `MatchAll` clause.
  Match(usize),
  /// A `MatchNone` clause.
  Exclusion(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqBound {
  /// `seq < pivot.seq`
  Before,
  /// `seq <= pivot.seq`
  AtOrBefore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "access", rename_all = "snake_case")]
pub enum Access {
  /// Bound to the changed fact.
  Pinned,
  /// Scanned over active facts, optionally bounded by the pivot's sequence.
  Scan { bound: Option<SeqBound> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinStep {
  pub position: usize,
  pub fact:     String,
  pub access:   Access,
  pub filter:   Option<Expr>,
  pub assign:   IndexMap<String, Expr>,
  /// Fields compared for equality against values already bound when this
  /// step runs. Candidates for an index on the fact table.
  pub keys:     Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExclusionStep {
  pub position: usize,
  pub fact:     String,
  pub pinned:   bool,
  pub filter:   Option<Expr>,
}

/// What a procedure does with the rows its join returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
  /// Assert the target for each new combination.
  Derive,
  /// Invalidate every justification naming the deactivated source.
  Invalidate,
  /// Invalidate every justification the activated fact now excludes.
  Block,
  /// Re-join the combinations the deactivated fact was excluding.
  Unblock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Triggers {
  pub on_activate:   Effect,
  pub on_deactivate: Effect,
}

impl Triggers {
  fn for_pivot(pivot: Pivot) -> Self {
    match pivot {
      Pivot::Match(_) => Self {
        on_activate:   Effect::Derive,
        on_deactivate: Effect::Invalidate,
      },
      Pivot::Exclusion(_) => Self {
        on_activate:   Effect::Block,
        on_deactivate: Effect::Unblock,
      },
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationPlan {
  pub rule:       String,
  pub pivot:      Pivot,
  /// Schema whose status changes trigger this plan.
  pub fact:       String,
  pub steps:      Vec<JoinStep>,
  pub exclusions: Vec<ExclusionStep>,
  pub condition:  Option<Expr>,
  pub assertion:  Assertion,
  pub triggers:   Triggers,
}

impl EvaluationPlan {
  pub fn pinned_step(&self) -> Option<&JoinStep> {
    self.steps.iter().find(|s| s.access == Access::Pinned)
  }
}

/// All plans of one rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulePlans {
  pub rule:  String,
  /// Clause positions in dependency order.
  pub order: Vec<usize>,
  pub plans: Vec<EvaluationPlan>,
}

// ─── Compilation ─────────────────────────────────────────────────────────────

/// Compile every enabled rule of `spec`.
pub fn compile(spec: &Specification) -> Result<IndexMap<String, RulePlans>> {
  spec
    .rules
    .values()
    .map(|rule| Ok((rule.name.clone(), compile_rule(rule)?)))
    .collect()
}

pub fn compile_rule(rule: &Rule) -> Result<RulePlans> {
  let order = dependency_order(rule)?;

  let mut plans = Vec::with_capacity(rule.clauses.len() + rule.exclusions.len());
  for k in 0..rule.clauses.len() {
    plans.push(plan(rule, &order, Pivot::Match(k)));
  }
  for m in 0..rule.exclusions.len() {
    plans.push(plan(rule, &order, Pivot::Exclusion(m)));
  }

  for plan in &plans {
    check_cascade(plan)?;
  }

  tracing::debug!(rule = %rule.name, plans = plans.len(), ?order, "rule planned");

  Ok(RulePlans {
    rule: rule.name.clone(),
    order,
    plans,
  })
}

fn plan(rule: &Rule, order: &[usize], pivot: Pivot) -> EvaluationPlan {
  let mut bound: BTreeSet<&str> = BTreeSet::new();
  let mut steps = Vec::with_capacity(order.len());

  for &position in order {
    let clause = &rule.clauses[position];
    let access = match pivot {
      Pivot::Match(k) if k == position => Access::Pinned,
      Pivot::Match(k) if position < k => Access::Scan {
        bound: Some(SeqBound::Before),
      },
      Pivot::Match(_) => Access::Scan {
        bound: Some(SeqBound::AtOrBefore),
      },
      Pivot::Exclusion(_) => Access::Scan { bound: None },
    };

    let keys = match (&access, &clause.when) {
      (Access::Scan { .. }, Some(when)) => equality_keys(when, &bound),
      _ => Vec::new(),
    };

    steps.push(JoinStep {
      position,
      fact: clause.fact.clone(),
      access,
      filter: clause.when.clone(),
      assign: clause.assign.clone(),
      keys,
    });
    bound.extend(clause.assign.keys().map(String::as_str));
  }

  let exclusions = rule
    .exclusions
    .iter()
    .enumerate()
    .map(|(m, exclusion)| ExclusionStep {
      position: m,
      fact:     exclusion.fact.clone(),
      pinned:   pivot == Pivot::Exclusion(m),
      filter:   exclusion.when.clone(),
    })
    .collect();

  let fact = match pivot {
    Pivot::Match(k) => rule.clauses[k].fact.clone(),
    Pivot::Exclusion(m) => rule.exclusions[m].fact.clone(),
  };

  EvaluationPlan {
    rule: rule.name.clone(),
    pivot,
    fact,
    steps,
    exclusions,
    condition: rule.condition.clone(),
    assertion: rule.assertion.clone(),
    triggers: Triggers::for_pivot(pivot),
  }
}

/// `This.f == e` conjuncts where `e` reads no field of `This` and only
/// locals in `bound`.
fn equality_keys(when: &Expr, bound: &BTreeSet<&str>) -> Vec<String> {
  let mut keys = Vec::new();
  for conjunct in when.conjuncts() {
    let Expr::Binary {
      op: BinaryOp::Eq,
      lhs,
      rhs,
      ..
    } = conjunct
    else {
      continue;
    };
    for (field, other) in [(lhs, rhs), (rhs, lhs)] {
      let Expr::Field { name, .. } = field.as_ref() else {
        continue;
      };
      if other.fields().is_empty() && other.locals().is_subset(bound) {
        if !keys.contains(name) {
          keys.push(name.clone());
        }
        break;
      }
    }
  }
  keys
}

/// Kahn's algorithm over clause positions, edges running from the clause
/// that assigns a local to every clause that reads it. Ties go to the lower
/// position so a valid rule keeps its declared order.
fn dependency_order(rule: &Rule) -> Result<Vec<usize>> {
  let n = rule.clauses.len();
  let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
  let mut indegree = vec![0usize; n];

  for (reader, clause) in rule.clauses.iter().enumerate() {
    let reads = clause
      .when
      .iter()
      .chain(clause.assign.values())
      .flat_map(Expr::locals);
    for name in reads {
      let Some(local) = rule.locals.get(name) else {
        return Err(Error::UnsatisfiableDependency {
          rule:   rule.name.clone(),
          detail: format!("clause {reader} reads Locals.{name}, which no clause assigns"),
        });
      };
      if local.clause >= reader {
        return Err(Error::UnsatisfiableDependency {
          rule:   rule.name.clone(),
          detail: format!(
            "clause {reader} reads Locals.{name}, assigned by clause {}",
            local.clause
          ),
        });
      }
      if dependents[local.clause].insert(reader) {
        indegree[reader] += 1;
      }
    }
  }

  let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
  let mut order = Vec::with_capacity(n);
  while let Some(next) = ready.pop_first() {
    order.push(next);
    for &dependent in &dependents[next] {
      indegree[dependent] -= 1;
      if indegree[dependent] == 0 {
        ready.insert(dependent);
      }
    }
  }

  if order.len() != n {
    return Err(Error::UnsatisfiableDependency {
      rule:   rule.name.clone(),
      detail: "local assignments form a cycle".to_string(),
    });
  }

  // Any topological order is a valid join order, but the sequence bounds
  // assume the declared one.
  if order.iter().enumerate().any(|(i, &p)| i != p) {
    return Err(Error::UnsatisfiableDependency {
      rule:   rule.name.clone(),
      detail: format!("clauses cannot be visited in declared order: {order:?}"),
    });
  }

  Ok(order)
}

/// Positions other than the pivot must be sequence-bounded so that every
/// justification recorded by a `Derive` plan names sources no newer than the
/// pivot; exclusion plans pin exactly one negated clause and no positive one.
fn check_cascade(plan: &EvaluationPlan) -> Result<()> {
  let fail = |detail: String| -> Result<()> {
    Err(Error::CascadeCycle {
      rule: plan.rule.clone(),
      detail,
    })
  };

  let pinned = plan.steps.iter().filter(|s| s.access == Access::Pinned).count();
  let pinned_exclusions = plan.exclusions.iter().filter(|e| e.pinned).count();

  match plan.pivot {
    Pivot::Match(k) => {
      if pinned != 1 || pinned_exclusions != 0 {
        return fail(format!("plan for position {k} pins {pinned} clauses"));
      }
      if let Some(step) = plan
        .steps
        .iter()
        .find(|s| s.access == (Access::Scan { bound: None }))
      {
        return fail(format!(
          "plan for position {k} scans position {} without a sequence bound",
          step.position
        ));
      }
    }
    Pivot::Exclusion(m) => {
      if pinned != 0 || pinned_exclusions != 1 {
        return fail(format!("plan for exclusion {m} pins the wrong clauses"));
      }
    }
  }
  Ok(())
}
