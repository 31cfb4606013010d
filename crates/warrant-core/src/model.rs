//! The validated Specification Model.
//!
//! [`Specification::from_document`] turns a parsed [`Document`] into typed
//! fact schemas and rules, checking every invariant along the way. Defects
//! are collected per schema and per rule so that one run reports as many of
//! them as possible; any defect aborts the build.

use std::{cmp::Ordering, collections::BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Location, Result, SpecErrorKind, SpecificationError},
  expr::{Conversion, Expr, Function},
  grammar::{self, Globals, Scope},
  source::{ClauseNode, Document, ParameterNode, RuleNode, Term},
  value::{FieldType, Value},
};

/// Column names every fact table carries in addition to its fields.
pub const SYSTEM_ATTRIBUTES: &[&str] = &["id", "seq", "active"];

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
  /// Accept rules that (transitively) match their own output. Every rule on
  /// such a cycle must assert `!distinct`.
  pub allow_cycles:            bool,
  /// Accept cycles through rules that do not assert `!distinct` as well.
  /// Implies `allow_cycles`.
  pub allow_indistinct_cycles: bool,
  /// Accept the `~` and `!~` operators.
  pub allow_regexp:            bool,
  /// Parameter overrides by name, matched case-insensitively.
  pub parameters:              IndexMap<String, Value>,
}

// ─── Model types ─────────────────────────────────────────────────────────────

/// A declared parameter and the value this build uses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
  pub name:    String,
  pub ty:      FieldType,
  pub default: Value,
  /// Inclusive bounds; numeric parameters only.
  pub lower:   Option<Value>,
  pub upper:   Option<Value>,
  /// The default, or the override given in [`CompileOptions::parameters`].
  pub value:   Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactSchema {
  pub name:   String,
  /// Declared fields in declaration order.
  pub fields: IndexMap<String, FieldType>,
}

/// One positive pattern of a rule's `MatchAll` sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchClause {
  pub fact:    String,
  /// Documentation only.
  pub meaning: Option<String>,
  pub when:    Option<Expr>,
  pub assign:  IndexMap<String, Expr>,
}

/// One `MatchNone` pattern: the rule only holds while no active fact
/// satisfies it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
  pub fact:    String,
  pub meaning: Option<String>,
  pub when:    Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
  /// Merge into an active fact with identical field values.
  Distinct,
  /// Every new source combination inserts its own fact.
  Always,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assertion {
  pub fact:   String,
  /// One expression per target field, in the schema's field order.
  pub fields: IndexMap<String, Expr>,
  pub mode:   DedupMode,
}

/// A local binding and the clause position that assigns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Local {
  pub ty:     FieldType,
  pub clause: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
  pub name:        String,
  pub description: String,
  pub clauses:     Vec<MatchClause>,
  pub exclusions:  Vec<Exclusion>,
  /// Rule-level `When`, over locals only.
  pub condition:   Option<Expr>,
  pub assertion:   Assertion,
  pub locals:      IndexMap<String, Local>,
}

impl Rule {
  pub fn target(&self) -> &str { &self.assertion.fact }

  pub fn is_distinct(&self) -> bool { self.assertion.mode == DedupMode::Distinct }

  /// Whether any clause, positive or negated, matches `schema`.
  pub fn reads(&self, schema: &str) -> bool {
    self.clauses.iter().any(|c| c.fact == schema)
      || self.exclusions.iter().any(|e| e.fact == schema)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Specification {
  pub description: Option<String>,
  pub constants:   IndexMap<String, Value>,
  pub parameters:  IndexMap<String, Parameter>,
  pub functions:   IndexMap<String, Function>,
  pub facts:       IndexMap<String, FactSchema>,
  /// Enabled rules only.
  pub rules:       IndexMap<String, Rule>,
}

impl Specification {
  pub fn from_yaml(text: &str, options: &CompileOptions) -> Result<Self> {
    Self::from_document(&Document::from_yaml(text)?, options)
  }

  pub fn from_document(doc: &Document, options: &CompileOptions) -> Result<Self> {
    let mut errors = Vec::new();

    let mut globals = Globals {
      allow_regexp: options.allow_regexp,
      ..Globals::default()
    };
    globals.functions = functions(doc, &mut errors);
    constants(doc, &mut globals, &mut errors);
    let parameters = parameters(doc, options, &mut globals, &mut errors);
    let facts = schemas(doc, &mut errors);

    let mut rules: IndexMap<String, Rule> = IndexMap::new();
    for (name, node) in &doc.rules {
      if !node.enabled {
        tracing::warn!(rule = %name, "rule disabled; skipping");
        continue;
      }
      if !valid_name(name) {
        errors.push(SpecificationError::new(
          Location::rule(name),
          SpecErrorKind::InvalidName(name.clone()),
        ));
        continue;
      }
      if rules.keys().any(|k| k.eq_ignore_ascii_case(name)) {
        errors.push(SpecificationError::new(
          Location::rule(name),
          SpecErrorKind::DuplicateRule(name.clone()),
        ));
        continue;
      }
      match build_rule(name, node, &facts, &globals) {
        Ok(rule) => {
          tracing::debug!(
            rule = %name,
            clauses = rule.clauses.len(),
            exclusions = rule.exclusions.len(),
            target = %rule.target(),
            "rule validated"
          );
          rules.insert(name.clone(), rule);
        }
        Err(error) => errors.push(error),
      }
    }

    if doc.rules.values().all(|r| !r.enabled) {
      errors.push(SpecificationError::new(
        Location::document(),
        SpecErrorKind::NoRules,
      ));
    }

    if errors.is_empty() {
      errors.extend(rule_graph_errors(&rules, options));
    }

    if !errors.is_empty() {
      return Err(Error::Specification(errors));
    }

    Ok(Self {
      description: doc.description.clone(),
      constants: globals.constants,
      parameters,
      functions: globals.functions,
      facts,
      rules,
    })
  }

  pub fn schema(&self, name: &str) -> Option<&FactSchema> { self.facts.get(name) }

  /// A schema is derived when some enabled rule asserts into it. Derived
  /// schemas accept no external writes.
  pub fn is_derived(&self, schema: &str) -> bool {
    self.rules.values().any(|r| r.target() == schema)
  }

  pub fn base_schemas(&self) -> impl Iterator<Item = &FactSchema> {
    self.facts.values().filter(|s| !self.is_derived(&s.name))
  }
}

// ─── Names ───────────────────────────────────────────────────────────────────

/// `[A-Za-z][A-Za-z0-9]*`
pub fn valid_name(name: &str) -> bool {
  let mut chars = name.chars();
  chars.next().is_some_and(|c| c.is_ascii_alphabetic())
    && chars.all(|c| c.is_ascii_alphanumeric())
}

// ─── Sections ────────────────────────────────────────────────────────────────

fn constants(doc: &Document, globals: &mut Globals, errors: &mut Vec<SpecificationError>) {
  let no_locals = IndexMap::new();

  for (name, term) in &doc.constants {
    let at = Location::document().part(format!("constant {name}"));
    if !valid_name(name) {
      errors.push(SpecificationError::new(at, SpecErrorKind::InvalidName(name.clone())));
      continue;
    }
    if globals.constants.keys().any(|k| k.eq_ignore_ascii_case(name)) {
      errors.push(SpecificationError::new(
        at,
        SpecErrorKind::DuplicateConstant(name.clone()),
      ));
      continue;
    }
    let scope = Scope {
      this:    None,
      locals:  &no_locals,
      globals: &*globals,
    };
    let value = match expression(term, &scope, &at) {
      Ok(expr) => match expr.evaluate() {
        Some(value) => value,
        None => {
          errors.push(SpecificationError::new(
            at,
            SpecErrorKind::Malformed(format!("constant {name} has no value")),
          ));
          continue;
        }
      },
      Err(error) => {
        errors.push(error);
        continue;
      }
    };
    globals.constants.insert(name.clone(), value);
  }
}

fn functions(
  doc: &Document,
  errors: &mut Vec<SpecificationError>,
) -> IndexMap<String, Function> {
  let mut functions: IndexMap<String, Function> = IndexMap::new();

  for (name, node) in &doc.functions {
    let at = Location::document().part(format!("function {name}"));
    let invalid = |reason: &str| {
      SpecificationError::new(at.clone(), SpecErrorKind::InvalidFunction {
        name:   name.clone(),
        reason: reason.to_string(),
      })
    };
    if !valid_name(name) {
      errors.push(SpecificationError::new(at, SpecErrorKind::InvalidName(name.clone())));
      continue;
    }
    if functions.keys().any(|k| k.eq_ignore_ascii_case(name)) {
      errors.push(SpecificationError::new(
        at,
        SpecErrorKind::DuplicateFunction(name.clone()),
      ));
      continue;
    }
    if name.eq_ignore_ascii_case("if") || Conversion::from_name(name).is_some() {
      errors.push(invalid("shadows a built-in function"));
      continue;
    }
    let external_ok = !node.external.is_empty()
      && node
        .external
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !external_ok {
      errors.push(invalid("External must match [A-Za-z0-9_]+"));
      continue;
    }

    let mut types = node.parameters.iter().chain(std::iter::once(&node.returns));
    let unknown = types.find(|ty| FieldType::parse(ty).is_none());
    if let Some(ty) = unknown {
      errors.push(SpecificationError::new(at, SpecErrorKind::UnknownType(ty.clone())));
      continue;
    }
    let parameters = node.parameters.iter().filter_map(|ty| FieldType::parse(ty)).collect();
    let Some(returns) = FieldType::parse(&node.returns) else {
      continue;
    };

    functions.insert(name.clone(), Function {
      name: name.clone(),
      external: node.external.clone(),
      parameters,
      returns,
    });
  }

  functions
}

/// Validate every parameter, apply overrides and publish the resulting
/// values to `globals`.
fn parameters(
  doc: &Document,
  options: &CompileOptions,
  globals: &mut Globals,
  errors: &mut Vec<SpecificationError>,
) -> IndexMap<String, Parameter> {
  let mut parameters: IndexMap<String, Parameter> = IndexMap::new();

  for (name, node) in &doc.parameters {
    let at = Location::document().part(format!("parameter {name}"));
    if !valid_name(name) {
      errors.push(SpecificationError::new(at, SpecErrorKind::InvalidName(name.clone())));
      continue;
    }
    if parameters.keys().any(|k| k.eq_ignore_ascii_case(name)) {
      errors.push(SpecificationError::new(
        at,
        SpecErrorKind::DuplicateParameter(name.clone()),
      ));
      continue;
    }
    let overridden = options
      .parameters
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v);
    match parameter(name, node, overridden, globals, &at) {
      Ok(parameter) => {
        globals
          .parameters
          .insert(name.clone(), parameter.value.clone());
        parameters.insert(name.clone(), parameter);
      }
      Err(error) => errors.push(error),
    }
  }

  for name in options.parameters.keys() {
    if !doc.parameters.keys().any(|k| k.eq_ignore_ascii_case(name)) {
      errors.push(SpecificationError::new(
        Location::document(),
        SpecErrorKind::UnknownParameter(name.clone()),
      ));
    }
  }

  parameters
}

fn parameter(
  name: &str,
  node: &ParameterNode,
  overridden: Option<&Value>,
  globals: &Globals,
  at: &Location,
) -> Result<Parameter, SpecificationError> {
  let invalid = |reason: String| {
    SpecificationError::new(at.clone(), SpecErrorKind::InvalidParameter {
      name: name.to_string(),
      reason,
    })
  };
  let no_locals = IndexMap::new();
  let scope = Scope {
    this:    None,
    locals:  &no_locals,
    globals,
  };
  let fold = |term: &Term, part: &str| -> Result<Value, SpecificationError> {
    let expr = expression(term, &scope, &at.clone().part(part))?;
    expr
      .evaluate()
      .ok_or_else(|| invalid(format!("{part} is not a constant initializer")))
  };

  let default = fold(&node.default, "Default")?;
  let ty = default.field_type();

  let (lower, upper) = if ty.is_numeric() {
    let (Some(lower), Some(upper)) = (&node.lower, &node.upper) else {
      return Err(invalid("numeric parameters need Lower and Upper limits".to_string()));
    };
    let (lower, upper) = (fold(lower, "Lower")?, fold(upper, "Upper")?);
    if lower.field_type() != ty || upper.field_type() != ty {
      return Err(invalid("types of default and limits do not agree".to_string()));
    }
    if order(&upper, &lower) == Some(Ordering::Less) {
      return Err(invalid("limits out of order".to_string()));
    }
    if !within(&default, &lower, &upper) {
      return Err(invalid(format!("default {default} is outside [{lower}, {upper}]")));
    }
    (Some(lower), Some(upper))
  } else {
    if node.lower.is_some() || node.upper.is_some() {
      return Err(invalid(format!("limits apply to numeric parameters, not {ty}")));
    }
    (None, None)
  };

  let value = match overridden {
    None => default.clone(),
    Some(given) => {
      let given = match (ty, given) {
        (FieldType::Real, Value::Integer(i)) => Value::Real(*i as f64),
        (_, given) => given.clone(),
      };
      if given.field_type() != ty {
        return Err(invalid(format!(
          "override {given} has type {}, expected {ty}",
          given.field_type()
        )));
      }
      if let (Some(lower), Some(upper)) = (&lower, &upper) {
        if !within(&given, lower, upper) {
          return Err(invalid(format!("override {given} is outside [{lower}, {upper}]")));
        }
      }
      given
    }
  };

  if overridden.is_some() {
    tracing::debug!(parameter = %name, %value, "parameter overridden");
  }
  Ok(Parameter {
    name: name.to_string(),
    ty,
    default,
    lower,
    upper,
    value,
  })
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
    (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
    _ => None,
  }
}

fn within(value: &Value, lower: &Value, upper: &Value) -> bool {
  order(value, lower).is_some_and(Ordering::is_ge) && order(value, upper).is_some_and(Ordering::is_le)
}

fn schemas(
  doc: &Document,
  errors: &mut Vec<SpecificationError>,
) -> IndexMap<String, FactSchema> {
  let mut facts: IndexMap<String, FactSchema> = IndexMap::new();

  'schema: for (name, fields) in &doc.facts {
    let at = Location::document().part(format!("fact {name}"));
    if !valid_name(name) {
      errors.push(SpecificationError::new(at, SpecErrorKind::InvalidName(name.clone())));
      continue;
    }
    if facts.keys().any(|k| k.eq_ignore_ascii_case(name)) {
      errors.push(SpecificationError::new(
        at,
        SpecErrorKind::DuplicateSchema(name.clone()),
      ));
      continue;
    }

    let mut typed: IndexMap<String, FieldType> = IndexMap::new();
    for (field, ty) in fields {
      let kind = if !valid_name(field) {
        Some(SpecErrorKind::InvalidName(field.clone()))
      } else if SYSTEM_ATTRIBUTES.iter().any(|s| s.eq_ignore_ascii_case(field)) {
        Some(SpecErrorKind::ReservedField(field.clone()))
      } else if typed.keys().any(|k| k.eq_ignore_ascii_case(field)) {
        Some(SpecErrorKind::DuplicateField(field.clone()))
      } else {
        None
      };
      if let Some(kind) = kind {
        errors.push(SpecificationError::new(at.clone(), kind));
        continue 'schema;
      }
      let Some(ty) = FieldType::parse(ty) else {
        errors.push(SpecificationError::new(
          at.clone(),
          SpecErrorKind::UnknownType(ty.clone()),
        ));
        continue 'schema;
      };
      typed.insert(field.clone(), ty);
    }

    facts.insert(name.clone(), FactSchema {
      name:   name.clone(),
      fields: typed,
    });
  }

  facts
}

// ─── Rules ───────────────────────────────────────────────────────────────────

fn build_rule(
  name: &str,
  node: &RuleNode,
  facts: &IndexMap<String, FactSchema>,
  globals: &Globals,
) -> Result<Rule, SpecificationError> {
  let rule_at = Location::rule(name);

  // Locals visible to the clause being checked: everything assigned by
  // strictly earlier clauses.
  let mut visible: IndexMap<String, FieldType> = IndexMap::new();
  let mut locals: IndexMap<String, Local> = IndexMap::new();
  let mut clauses = Vec::with_capacity(node.match_all.len());

  for (i, clause) in node.match_all.iter().enumerate() {
    let at = rule_at.clone().clause(i);
    let schema = lookup(facts, clause, &at)?;
    let scope = Scope {
      this:    Some(&schema.fields),
      locals:  &visible,
      globals,
    };

    let when = clause
      .when
      .as_ref()
      .map(|term| condition(term, &scope, &at.clone().part("When")))
      .transpose()?;

    let mut assign: IndexMap<String, Expr> = IndexMap::new();
    for (local, term) in &clause.assign {
      let at = at.clone().part(format!("Assign {local}"));
      if !valid_name(local) {
        return Err(SpecificationError::new(at, SpecErrorKind::InvalidName(local.clone())));
      }
      if locals.contains_key(local) || assign.contains_key(local) {
        return Err(SpecificationError::new(
          at,
          SpecErrorKind::DuplicateLocal(local.clone()),
        ));
      }
      assign.insert(local.clone(), expression(term, &scope, &at)?);
    }

    for (local, expr) in &assign {
      locals.insert(local.clone(), Local {
        ty:     expr.ty(),
        clause: i,
      });
      visible.insert(local.clone(), expr.ty());
    }

    clauses.push(MatchClause {
      fact: schema.name.clone(),
      meaning: clause.meaning.clone(),
      when,
      assign,
    });
  }

  let mut exclusions = Vec::with_capacity(node.match_none.len());
  for (i, clause) in node.match_none.iter().enumerate() {
    let at = rule_at.clone().clause(i).part("MatchNone");
    let schema = lookup(facts, clause, &at)?;
    let scope = Scope {
      this:    Some(&schema.fields),
      locals:  &visible,
      globals,
    };
    let when = clause
      .when
      .as_ref()
      .map(|term| condition(term, &scope, &at.clone().part("When")))
      .transpose()?;
    exclusions.push(Exclusion {
      fact: schema.name.clone(),
      meaning: clause.meaning.clone(),
      when,
    });
  }

  let closed = Scope {
    this:    None,
    locals:  &visible,
    globals,
  };

  let rule_condition = node
    .when
    .as_ref()
    .map(|term| condition(term, &closed, &rule_at.clone().part("When")))
    .transpose()?;

  let assertion = assertion(node, facts, &closed, &rule_at)?;

  Ok(Rule {
    name: name.to_string(),
    description: node.description.clone(),
    clauses,
    exclusions,
    condition: rule_condition,
    assertion,
    locals,
  })
}

fn lookup<'f>(
  facts: &'f IndexMap<String, FactSchema>,
  clause: &ClauseNode,
  at: &Location,
) -> Result<&'f FactSchema, SpecificationError> {
  facts.get(&clause.fact).ok_or_else(|| {
    SpecificationError::new(
      at.clone().part("Fact"),
      SpecErrorKind::UnknownFact(clause.fact.clone()),
    )
  })
}

fn assertion(
  node: &RuleNode,
  facts: &IndexMap<String, FactSchema>,
  scope: &Scope<'_>,
  rule_at: &Location,
) -> Result<Assertion, SpecificationError> {
  let at = rule_at.clone().part("Assert");
  let target = &node.assert;
  let schema = facts.get(&target.fact).ok_or_else(|| {
    SpecificationError::new(at.clone(), SpecErrorKind::UnknownFact(target.fact.clone()))
  })?;

  let mut given: IndexMap<&str, Expr> = IndexMap::new();
  for (field, term) in &target.fields {
    let field_at = rule_at.clone().part(format!("Assert {field}"));
    let Some(want) = schema.fields.get(field) else {
      return Err(SpecificationError::new(
        field_at,
        SpecErrorKind::UnknownField(field.clone()),
      ));
    };
    let expr = expression(term, scope, &field_at)?;
    if expr.ty() != *want {
      return Err(SpecificationError::new(field_at, SpecErrorKind::TypeMismatch {
        context:  format!("assertion of {}.{field}", schema.name),
        expected: want.to_string(),
        found:    expr.ty().to_string(),
      }));
    }
    given.insert(field.as_str(), expr);
  }

  let mut fields = IndexMap::with_capacity(schema.fields.len());
  for field in schema.fields.keys() {
    let Some(expr) = given.shift_remove(field.as_str()) else {
      return Err(SpecificationError::new(
        at,
        SpecErrorKind::UnassignedField(field.clone()),
      ));
    };
    fields.insert(field.clone(), expr);
  }

  if target.distinct && schema.fields.is_empty() {
    return Err(SpecificationError::new(
      at,
      SpecErrorKind::EmptyDistinct(schema.name.clone()),
    ));
  }

  Ok(Assertion {
    fact: schema.name.clone(),
    fields,
    mode: if target.distinct {
      DedupMode::Distinct
    } else {
      DedupMode::Always
    },
  })
}

fn expression(
  term: &Term,
  scope: &Scope<'_>,
  at: &Location,
) -> Result<Expr, SpecificationError> {
  match term {
    Term::Literal(value) => Ok(Expr::literal(value.clone())),
    Term::Expression(text) => grammar::parse(text, scope)
      .map_err(|kind| SpecificationError::new(at.clone(), kind)),
  }
}

fn condition(
  term: &Term,
  scope: &Scope<'_>,
  at: &Location,
) -> Result<Expr, SpecificationError> {
  let expr = expression(term, scope, at)?;
  if expr.ty() != FieldType::Boolean {
    return Err(SpecificationError::new(at.clone(), SpecErrorKind::TypeMismatch {
      context:  "condition".to_string(),
      expected: FieldType::Boolean.to_string(),
      found:    expr.ty().to_string(),
    }));
  }
  Ok(expr)
}

// ─── Rule graph ──────────────────────────────────────────────────────────────

/// Rule `a` feeds rule `b` when `b` matches `a`'s target. Cycles in that
/// graph are refused unless allowed. Allowed cycles must be distinct unless
/// indistinct cycles are allowed too, and may never pass through a negated
/// clause.
fn rule_graph_errors(
  rules: &IndexMap<String, Rule>,
  options: &CompileOptions,
) -> Vec<SpecificationError> {
  let list: Vec<&Rule> = rules.values().collect();

  // feeds[a] = rules matching a's target, positively or negatively
  let feeds: Vec<Vec<usize>> = list
    .iter()
    .map(|a| {
      list
        .iter()
        .enumerate()
        .filter(|(_, b)| b.reads(a.target()))
        .map(|(j, _)| j)
        .collect()
    })
    .collect();

  let reach: Vec<BTreeSet<usize>> = (0..list.len())
    .map(|start| {
      let mut seen = BTreeSet::new();
      let mut stack: Vec<usize> = feeds[start].clone();
      while let Some(n) = stack.pop() {
        if seen.insert(n) {
          stack.extend(feeds[n].iter().copied());
        }
      }
      seen
    })
    .collect();

  let on_cycle: Vec<usize> = (0..list.len()).filter(|&i| reach[i].contains(&i)).collect();
  if on_cycle.is_empty() {
    return Vec::new();
  }

  if !options.allow_cycles && !options.allow_indistinct_cycles {
    let names = on_cycle.iter().map(|&i| list[i].name.clone()).collect();
    return vec![SpecificationError::new(
      Location::document(),
      SpecErrorKind::RuleCycle(names),
    )];
  }

  let mut errors = Vec::new();
  for (a, edges) in feeds.iter().enumerate() {
    for &b in edges {
      let excluded = list[b].exclusions.iter().any(|e| e.fact == list[a].target());
      if excluded && (a == b || reach[b].contains(&a)) {
        errors.push(SpecificationError::new(
          Location::rule(&list[b].name).part("MatchNone"),
          SpecErrorKind::NegatedCycle(list[b].name.clone()),
        ));
      }
    }
  }
  for &i in &on_cycle {
    if !options.allow_indistinct_cycles && !list[i].is_distinct() {
      errors.push(SpecificationError::new(
        Location::rule(&list[i].name),
        SpecErrorKind::IndistinctCycle(list[i].name.clone()),
      ));
    }
  }
  errors.dedup();
  errors
}
