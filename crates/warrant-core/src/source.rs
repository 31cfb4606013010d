//! The parsed document tree and its YAML loader.
//!
//! A [`Document`] mirrors the specification format one-to-one and carries no
//! semantic checks beyond shape: names are resolved, types checked and
//! expressions parsed later, in [`crate::model`]. Section and property keys
//! are matched case-insensitively; user-chosen names keep their spelling.
//!
//! ```yaml
//! Facts:
//!   PersonExists: { Name: STRING }
//! Rules:
//!   Greet:
//!     Description: Everybody gets a greeting
//!     MatchAll:
//!       - Fact: PersonExists
//!         Assign: { Who: !expr This.Name }
//!     Assert: !distinct
//!       Greeting: { Text: !expr "'hello ' . Locals.Who" }
//! ```
//!
//! `Parameters` declare bounded, overridable constants and `Functions`
//! declare external SQL functions:
//!
//! ```yaml
//! Parameters:
//!   MinLevel: { Default: 2, Lower: 0, Upper: 5 }
//! Functions:
//!   Shout: { External: upper, Parameters: [STRING], Returns: STRING }
//! ```

use std::path::Path;

use indexmap::IndexMap;
use serde_yaml_ng::Value as Yaml;

use crate::{
  error::{Error, Location, Result, SpecErrorKind},
  value::Value,
};

// ─── Tree ────────────────────────────────────────────────────────────────────

/// A literal scalar or the source text of an `!expr` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
  Literal(Value),
  Expression(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
  pub description: Option<String>,
  pub constants:   IndexMap<String, Term>,
  pub parameters:  IndexMap<String, ParameterNode>,
  pub functions:   IndexMap<String, FunctionNode>,
  /// Schema name → field name → type name (checked later).
  pub facts:       IndexMap<String, IndexMap<String, String>>,
  pub rules:       IndexMap<String, RuleNode>,
}

/// A constant that may be overridden when compiling, within bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterNode {
  pub default: Term,
  pub lower:   Option<Term>,
  pub upper:   Option<Term>,
}

/// An external SQL function the generated code may call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionNode {
  pub external:   String,
  /// Type names (checked later).
  pub parameters: Vec<String>,
  pub returns:    String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleNode {
  pub description: String,
  pub enabled:     bool,
  pub match_all:   Vec<ClauseNode>,
  pub match_none:  Vec<ClauseNode>,
  pub when:        Option<Term>,
  pub assert:      AssertNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClauseNode {
  pub fact:    String,
  pub meaning: Option<String>,
  pub when:    Option<Term>,
  pub assign:  IndexMap<String, Term>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssertNode {
  pub fact:     String,
  pub fields:   IndexMap<String, Term>,
  /// Set by the `!distinct` tag.
  pub distinct: bool,
}

// ─── Loading ─────────────────────────────────────────────────────────────────

impl Document {
  /// Parse one YAML document.
  pub fn from_yaml(text: &str) -> Result<Self> {
    let root: Yaml = serde_yaml_ng::from_str(text)?;
    document(&root).map_err(|(location, kind)| Error::specification(location, kind))
  }

  /// Read and parse one file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
      path: path.to_path_buf(),
      source,
    })?;
    tracing::debug!(path = %path.display(), "loading specification");
    Self::from_yaml(&text)
  }

  /// Read every file and merge them in order.
  pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
    let mut merged = Self::default();
    for path in paths {
      merged.merge(Self::load(path)?)?;
    }
    Ok(merged)
  }

  /// Fold `other` into `self`. A name defined in both is an error;
  /// descriptions are joined line by line in merge order.
  pub fn merge(&mut self, other: Document) -> Result<()> {
    let mut errors = Vec::new();
    self.description = match (self.description.take(), other.description) {
      (Some(mine), Some(theirs)) => Some(format!("{mine}\n{theirs}")),
      (mine, theirs) => mine.or(theirs),
    };
    for (name, term) in other.constants {
      if self.constants.contains_key(&name) {
        errors.push((Location::document(), SpecErrorKind::DuplicateConstant(name)));
      } else {
        self.constants.insert(name, term);
      }
    }
    for (name, parameter) in other.parameters {
      if self.parameters.contains_key(&name) {
        errors.push((Location::document(), SpecErrorKind::DuplicateParameter(name)));
      } else {
        self.parameters.insert(name, parameter);
      }
    }
    for (name, function) in other.functions {
      if self.functions.contains_key(&name) {
        errors.push((Location::document(), SpecErrorKind::DuplicateFunction(name)));
      } else {
        self.functions.insert(name, function);
      }
    }
    for (name, fields) in other.facts {
      if self.facts.contains_key(&name) {
        errors.push((Location::document(), SpecErrorKind::DuplicateSchema(name)));
      } else {
        self.facts.insert(name, fields);
      }
    }
    for (name, rule) in other.rules {
      if self.rules.contains_key(&name) {
        errors.push((Location::rule(&name), SpecErrorKind::DuplicateRule(name)));
      } else {
        self.rules.insert(name, rule);
      }
    }
    if errors.is_empty() {
      Ok(())
    } else {
      Err(Error::Specification(
        errors
          .into_iter()
          .map(|(location, kind)| crate::SpecificationError::new(location, kind))
          .collect(),
      ))
    }
  }
}

type Shape<T> = std::result::Result<T, (Location, SpecErrorKind)>;

fn malformed<T>(location: &Location, message: impl Into<String>) -> Shape<T> {
  Err((location.clone(), SpecErrorKind::Malformed(message.into())))
}

/// Entries of a mapping whose keys are all strings.
fn entries<'a>(node: &'a Yaml, location: &Location, what: &str) -> Shape<Vec<(String, &'a Yaml)>> {
  let Yaml::Mapping(mapping) = node else {
    return malformed(location, format!("{what} must be a mapping"));
  };
  mapping
    .iter()
    .map(|(key, value)| match key {
      Yaml::String(key) => Ok((key.clone(), value)),
      other => malformed(location, format!("{what} has a non-string key {other:?}")),
    })
    .collect()
}

/// A mapping of known, case-insensitive property names.
struct Properties<'a> {
  entries:  Vec<(String, &'a Yaml)>,
  location: Location,
}

impl<'a> Properties<'a> {
  fn new(node: &'a Yaml, location: Location, what: &str, known: &[&str]) -> Shape<Self> {
    let entries = entries(node, &location, what)?;
    for (key, _) in &entries {
      if !known.iter().any(|k| k.eq_ignore_ascii_case(key)) {
        return malformed(&location, format!("unknown key {key:?} in {what}"));
      }
    }
    Ok(Self { entries, location })
  }

  fn get(&self, key: &str) -> Option<&'a Yaml> {
    self
      .entries
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(key))
      .map(|(_, v)| *v)
  }

  fn require(&self, key: &str) -> Shape<&'a Yaml> {
    match self.get(key) {
      Some(value) => Ok(value),
      None => malformed(&self.location, format!("missing {key:?}")),
    }
  }

  fn string(&self, key: &str) -> Shape<Option<String>> {
    match self.get(key) {
      None => Ok(None),
      Some(Yaml::String(s)) => Ok(Some(s.clone())),
      Some(_) => malformed(&self.location, format!("{key:?} must be a string")),
    }
  }
}

fn document(root: &Yaml) -> Shape<Document> {
  let location = Location::document();
  let top = Properties::new(
    root,
    location.clone(),
    "the document",
    &["Description", "Constants", "Parameters", "Functions", "Facts", "Rules"],
  )?;

  let mut doc = Document {
    description: top.string("Description")?,
    ..Document::default()
  };

  if let Some(node) = top.get("Constants") {
    for (name, value) in entries(node, &location, "Constants")? {
      let term = term(value, &location.clone().part(format!("constant {name}")))?;
      doc.constants.insert(name, term);
    }
  }

  if let Some(node) = top.get("Parameters") {
    for (name, body) in entries(node, &location, "Parameters")? {
      let at = location.clone().part(format!("parameter {name}"));
      doc.parameters.insert(name, parameter(body, at)?);
    }
  }

  if let Some(node) = top.get("Functions") {
    for (name, body) in entries(node, &location, "Functions")? {
      let at = location.clone().part(format!("function {name}"));
      doc.functions.insert(name, function(body, at)?);
    }
  }

  if let Some(node) = top.get("Facts") {
    for (name, fields) in entries(node, &location, "Facts")? {
      let at = location.clone().part(format!("fact {name}"));
      let mut typed = IndexMap::new();
      if !matches!(fields, Yaml::Null) {
        for (field, ty) in entries(fields, &at, "a fact schema")? {
          let Yaml::String(ty) = ty else {
            return malformed(&at, format!("type of field {field:?} must be a name"));
          };
          typed.insert(field, ty.clone());
        }
      }
      doc.facts.insert(name, typed);
    }
  }

  if let Some(node) = top.get("Rules") {
    for (name, body) in entries(node, &location, "Rules")? {
      let rule = rule(body, Location::rule(&name))?;
      doc.rules.insert(name, rule);
    }
  }

  Ok(doc)
}

fn parameter(node: &Yaml, location: Location) -> Shape<ParameterNode> {
  let props = Properties::new(
    node,
    location.clone(),
    "a parameter",
    &["Default", "Lower", "Upper"],
  )?;
  let bound = |key: &str| {
    props
      .get(key)
      .map(|node| term(node, &location.clone().part(key)))
      .transpose()
  };
  Ok(ParameterNode {
    default: term(props.require("Default")?, &location.clone().part("Default"))?,
    lower:   bound("Lower")?,
    upper:   bound("Upper")?,
  })
}

fn function(node: &Yaml, location: Location) -> Shape<FunctionNode> {
  let props = Properties::new(
    node,
    location.clone(),
    "a function",
    &["External", "Parameters", "Returns"],
  )?;
  let Some(external) = props.string("External")? else {
    return malformed(&location, "missing \"External\"");
  };
  let Some(returns) = props.string("Returns")? else {
    return malformed(&location, "missing \"Returns\"");
  };
  let parameters = match props.require("Parameters")? {
    Yaml::Sequence(items) => items
      .iter()
      .map(|item| match item {
        Yaml::String(ty) => Ok(ty.clone()),
        _ => malformed(&location, "Parameters must list type names"),
      })
      .collect::<Shape<Vec<_>>>()?,
    Yaml::Null => Vec::new(),
    _ => return malformed(&location, "Parameters must be a list"),
  };
  Ok(FunctionNode {
    external,
    parameters,
    returns,
  })
}

fn rule(node: &Yaml, location: Location) -> Shape<RuleNode> {
  let props = Properties::new(
    node,
    location.clone(),
    "a rule",
    &["Description", "Enabled", "MatchAll", "MatchNone", "When", "Assert"],
  )?;

  let enabled = match props.get("Enabled") {
    None => true,
    Some(Yaml::Bool(b)) => *b,
    Some(_) => return malformed(&location, "Enabled must be a boolean"),
  };

  let clauses = |key: &str, inverted: bool| -> Shape<Vec<ClauseNode>> {
    let Some(node) = props.get(key) else {
      return Ok(Vec::new());
    };
    let Yaml::Sequence(items) = node else {
      return malformed(&location, format!("{key} must be a list"));
    };
    items
      .iter()
      .enumerate()
      .map(|(i, item)| clause(item, location.clone().clause(i), inverted))
      .collect()
  };

  let match_all = clauses("MatchAll", false)?;
  if match_all.is_empty() {
    return malformed(&location, "MatchAll must list at least one clause");
  }
  let match_none = clauses("MatchNone", true)?;

  let when = props
    .get("When")
    .map(|node| term(node, &location.clone().part("When")))
    .transpose()?;

  Ok(RuleNode {
    description: props.string("Description")?.unwrap_or_default(),
    enabled,
    match_all,
    match_none,
    when,
    assert: assertion(props.require("Assert")?, &location.clone().part("Assert"))?,
  })
}

fn clause(node: &Yaml, location: Location, inverted: bool) -> Shape<ClauseNode> {
  let known: &[&str] = if inverted {
    &["Fact", "Meaning", "When"]
  } else {
    &["Fact", "Meaning", "When", "Assign"]
  };
  let props = Properties::new(node, location.clone(), "a match clause", known)?;

  let Some(fact) = props.string("Fact")? else {
    return malformed(&location, "missing \"Fact\"");
  };

  let mut assign = IndexMap::new();
  if let Some(node) = props.get("Assign") {
    for (name, value) in entries(node, &location, "Assign")? {
      let value = term(value, &location.clone().part(format!("Assign {name}")))?;
      assign.insert(name, value);
    }
  }

  Ok(ClauseNode {
    fact,
    meaning: props.string("Meaning")?,
    when: props
      .get("When")
      .map(|node| term(node, &location.clone().part("When")))
      .transpose()?,
    assign,
  })
}

fn assertion(node: &Yaml, location: &Location) -> Shape<AssertNode> {
  let (node, distinct) = match node {
    Yaml::Tagged(tagged) if tagged.tag == "distinct" => (&tagged.value, true),
    Yaml::Tagged(tagged) => {
      return malformed(location, format!("unknown tag {} on Assert", tagged.tag));
    }
    other => (other, false),
  };
  let targets = entries(node, location, "Assert")?;
  let [(fact, fields)] = targets.as_slice() else {
    return malformed(location, "Assert must name exactly one fact");
  };

  let mut terms = IndexMap::new();
  if !matches!(fields, Yaml::Null) {
    for (field, value) in entries(fields, location, "an assertion")? {
      let value = term(value, &location.clone().part(format!("Assert {field}")))?;
      terms.insert(field, value);
    }
  }

  Ok(AssertNode {
    fact: fact.clone(),
    fields: terms,
    distinct,
  })
}

fn term(node: &Yaml, location: &Location) -> Shape<Term> {
  match node {
    Yaml::Tagged(tagged) if tagged.tag == "expr" => match &tagged.value {
      Yaml::String(text) => Ok(Term::Expression(text.clone())),
      Yaml::Bool(b) => Ok(Term::Expression(b.to_string())),
      Yaml::Number(n) => Ok(Term::Expression(n.to_string())),
      _ => malformed(location, "!expr must tag a string"),
    },
    Yaml::Tagged(tagged) => malformed(location, format!("unknown tag {}", tagged.tag)),
    Yaml::Bool(b) => Ok(Term::Literal(Value::Boolean(*b))),
    Yaml::Number(n) => match n.as_i64() {
      Some(i) => Ok(Term::Literal(Value::Integer(i))),
      None => match n.as_f64() {
        Some(r) => Ok(Term::Literal(Value::Real(r))),
        None => malformed(location, format!("number {n} is out of range")),
      },
    },
    Yaml::String(s) => Ok(Term::Literal(Value::String(s.clone()))),
    _ => malformed(location, "expected a scalar or an !expr expression"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const PETS: &str = r#"
Description: Who owns which pet
Facts:
  PersonExists: { Name: STRING }
  Inhabits: { Thing: STRING, Place: STRING }
  IsAPet: { Person: STRING, Pet: STRING }
Rules:
  PetsLiveWithPeople:
    Description: An animal living with a person is a pet
    MatchAll:
      - Fact: PersonExists
        Meaning: some person exists
        Assign: { Person: !expr This.Name }
      - Fact: Inhabits
        When: !expr This.Thing == Locals.Person
        Assign: { Place: !expr This.Place }
    Assert: !distinct
      IsAPet: { Person: !expr Locals.Person, Pet: "unknown" }
"#;

  #[test]
  fn parses_sections() {
    let doc = Document::from_yaml(PETS).unwrap();
    assert_eq!(doc.description.as_deref(), Some("Who owns which pet"));
    assert_eq!(doc.facts.len(), 3);
    assert_eq!(doc.facts["Inhabits"]["Place"], "STRING");

    let rule = &doc.rules["PetsLiveWithPeople"];
    assert!(rule.enabled);
    assert_eq!(rule.match_all.len(), 2);
    assert_eq!(rule.match_all[0].meaning.as_deref(), Some("some person exists"));
    assert_eq!(
      rule.match_all[1].when,
      Some(Term::Expression("This.Thing == Locals.Person".into()))
    );
    assert!(rule.assert.distinct);
    assert_eq!(rule.assert.fact, "IsAPet");
    assert_eq!(
      rule.assert.fields["Pet"],
      Term::Literal(Value::String("unknown".into()))
    );
  }

  #[test]
  fn keys_are_case_insensitive() {
    let doc = Document::from_yaml(
      "facts:\n  A: {}\nrules:\n  R:\n    matchall: [{fact: A}]\n    assert: {A: {}}\n",
    )
    .unwrap();
    assert!(doc.facts["A"].is_empty());
    assert_eq!(doc.rules["R"].match_all[0].fact, "A");
  }

  #[test]
  fn rejects_unknown_keys_and_tags() {
    let err = Document::from_yaml("Factz: {}\n").unwrap_err();
    assert!(matches!(
      err.specification_errors()[0].kind,
      SpecErrorKind::Malformed(_)
    ));

    let err = Document::from_yaml(
      "Facts: {A: {}}\nRules:\n  R:\n    MatchAll: [{Fact: A}]\n    Assert: !unique {A: {}}\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("unknown tag"));
  }

  #[test]
  fn exclusion_clauses_cannot_assign() {
    let err = Document::from_yaml(
      "Facts: {A: {X: STRING}}\nRules:\n  R:\n    MatchAll: [{Fact: A}]\n    MatchNone: [{Fact: A, Assign: {Y: 1}}]\n    Assert: {A: {X: a}}\n",
    )
    .unwrap_err();
    assert_eq!(
      err.specification_errors()[0].location,
      Location::rule("R").clause(0)
    );
  }

  #[test]
  fn parses_parameters_and_functions() {
    let doc = Document::from_yaml(
      r#"
Parameters:
  Threshold: { Default: 3, Lower: 1, Upper: !expr Constants.Max }
  Label: { Default: prod }
Functions:
  Distance:
    External: geo_distance
    Parameters: [REAL, REAL]
    Returns: REAL
"#,
    )
    .unwrap();
    let threshold = &doc.parameters["Threshold"];
    assert_eq!(threshold.default, Term::Literal(Value::Integer(3)));
    assert_eq!(threshold.upper, Some(Term::Expression("Constants.Max".into())));
    assert!(doc.parameters["Label"].lower.is_none());

    let distance = &doc.functions["Distance"];
    assert_eq!(distance.external, "geo_distance");
    assert_eq!(distance.parameters, vec!["REAL", "REAL"]);
    assert_eq!(distance.returns, "REAL");

    let err = Document::from_yaml("Parameters: { P: { Default: 1, Dictionary: true } }\n")
      .unwrap_err();
    assert!(err.to_string().contains("unknown key"));
  }

  #[test]
  fn merge_joins_descriptions() {
    let mut merged = Document::default();
    for text in [
      "Description: Network policy\nFacts: {A: {}}\n",
      "Facts: {B: {}}\n",
      "Description: Alerting rules\nFacts: {C: {}}\n",
    ] {
      merged.merge(Document::from_yaml(text).unwrap()).unwrap();
    }
    assert_eq!(merged.description.as_deref(), Some("Network policy\nAlerting rules"));
    assert_eq!(merged.facts.len(), 3);
  }

  #[test]
  fn merge_rejects_duplicates() {
    let mut a = Document::from_yaml("Facts: {A: {}}\n").unwrap();
    let b = Document::from_yaml("Facts: {A: {}}\n").unwrap();
    let err = a.merge(b).unwrap_err();
    assert!(matches!(
      err.specification_errors()[0].kind,
      SpecErrorKind::DuplicateSchema(_)
    ));
  }
}
