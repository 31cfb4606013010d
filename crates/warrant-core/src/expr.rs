//! Typed expression trees.
//!
//! Every node is type-checked as it is built; the smart constructors on
//! [`Expr`] refuse operand combinations the expression language does not
//! define and fold subtrees whose operands are all literals.

use std::{cmp::Ordering, collections::BTreeSet, fmt};

use regex::Regex;
use serde::Serialize;

use crate::{
  error::SpecErrorKind,
  value::{FieldType, Value},
};

// ─── Operators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
  Negate,
  Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
  Or,
  And,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  Like,
  Unlike,
  /// `~`: the regular expression on the right matches at the start of the
  /// string on the left.
  Matches,
  NotMatches,
  Add,
  Sub,
  Concat,
  Mul,
  Div,
  Rem,
}

impl BinaryOp {
  /// Surface syntax of the operator.
  pub fn symbol(self) -> &'static str {
    match self {
      Self::Or => "||",
      Self::And => "&&",
      Self::Eq => "==",
      Self::Ne => "!=",
      Self::Lt => "<",
      Self::Le => "<=",
      Self::Gt => ">",
      Self::Ge => ">=",
      Self::Like => "like",
      Self::Unlike => "unlike",
      Self::Matches => "~",
      Self::NotMatches => "!~",
      Self::Add => "+",
      Self::Sub => "-",
      Self::Concat => ".",
      Self::Mul => "*",
      Self::Div => "/",
      Self::Rem => "%",
    }
  }

  pub fn is_comparison(self) -> bool {
    matches!(
      self,
      Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
    )
  }

  fn result_type(self, lhs: FieldType, rhs: FieldType) -> Option<FieldType> {
    match self {
      Self::Or | Self::And => (lhs == FieldType::Boolean && rhs == FieldType::Boolean)
        .then_some(FieldType::Boolean),
      Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge => {
        (lhs == rhs).then_some(FieldType::Boolean)
      }
      Self::Like | Self::Unlike | Self::Matches | Self::NotMatches => {
        (lhs == FieldType::String && rhs == FieldType::String)
          .then_some(FieldType::Boolean)
      }
      Self::Concat => (lhs == FieldType::String && rhs == FieldType::String)
        .then_some(FieldType::String),
      Self::Add | Self::Sub | Self::Mul | Self::Div => {
        (lhs == rhs && lhs.is_numeric()).then_some(lhs)
      }
      Self::Rem => (lhs == FieldType::Integer && rhs == FieldType::Integer)
        .then_some(FieldType::Integer),
    }
  }

  fn expected(self) -> &'static str {
    match self {
      Self::Or | Self::And => "BOOLEAN operands",
      Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge => {
        "operands of the same type"
      }
      Self::Like | Self::Unlike | Self::Matches | Self::NotMatches | Self::Concat => {
        "STRING operands"
      }
      Self::Add | Self::Sub | Self::Mul | Self::Div => {
        "two INTEGER or two REAL operands"
      }
      Self::Rem => "INTEGER operands",
    }
  }
}

/// The built-in conversion functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
  StringOfBool,
  StringOfInt,
  StringOfReal,
  RealOfInt,
  IntOfReal,
  IntOfString,
}

impl Conversion {
  pub fn from_name(name: &str) -> Option<Self> {
    match name.to_ascii_lowercase().as_str() {
      "string_of_bool" => Some(Self::StringOfBool),
      "string_of_int" => Some(Self::StringOfInt),
      "string_of_real" => Some(Self::StringOfReal),
      "real_of_int" => Some(Self::RealOfInt),
      "int_of_real" => Some(Self::IntOfReal),
      "int_of_string" => Some(Self::IntOfString),
      _ => None,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Self::StringOfBool => "string_of_bool",
      Self::StringOfInt => "string_of_int",
      Self::StringOfReal => "string_of_real",
      Self::RealOfInt => "real_of_int",
      Self::IntOfReal => "int_of_real",
      Self::IntOfString => "int_of_string",
    }
  }

  pub fn input(self) -> FieldType {
    match self {
      Self::StringOfBool => FieldType::Boolean,
      Self::StringOfInt | Self::RealOfInt => FieldType::Integer,
      Self::StringOfReal | Self::IntOfReal => FieldType::Real,
      Self::IntOfString => FieldType::String,
    }
  }

  pub fn output(self) -> FieldType {
    match self {
      Self::StringOfBool | Self::StringOfInt | Self::StringOfReal => {
        FieldType::String
      }
      Self::RealOfInt => FieldType::Real,
      Self::IntOfReal | Self::IntOfString => FieldType::Integer,
    }
  }

  fn apply(self, value: &Value) -> Option<Value> {
    Some(match (self, value) {
      (Self::StringOfBool, Value::Boolean(b)) => Value::String(b.to_string()),
      (Self::StringOfInt, Value::Integer(i)) => Value::String(i.to_string()),
      (Self::StringOfReal, Value::Real(r)) => Value::String(real_text(*r)?),
      (Self::RealOfInt, Value::Integer(i)) => Value::Real(*i as f64),
      (Self::IntOfReal, Value::Real(r)) => Value::Integer(r.trunc() as i64),
      (Self::IntOfString, Value::String(s)) => Value::Integer(leading_integer(s)),
      _ => return None,
    })
  }
}

/// A declared external function: called by `name` in expressions, by
/// `external` in the generated SQL. Never evaluated at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Function {
  pub name:       String,
  pub external:   String,
  pub parameters: Vec<FieldType>,
  pub returns:    FieldType,
}

/// Whether `regex` matches at the start of `text`.
pub fn regexp_match(regex: &Regex, text: &str) -> bool {
  regex.find(text).is_some_and(|m| m.start() == 0)
}

/// A real as SQLite's `CAST(r AS TEXT)` spells it: `%!.15g`, so fifteen
/// significant digits, exponent form outside `1e-4..1e15`, and always a
/// fractional part (`2.0`, `1.0e+20`). `None` for values SQLite has no text
/// for.
pub fn real_text(r: f64) -> Option<String> {
  if !r.is_finite() {
    return None;
  }
  if r == 0.0 {
    return Some("0.0".to_string());
  }
  let scientific = format!("{r:.14e}");
  let (mantissa, exponent) = scientific.split_once('e')?;
  let exponent: i32 = exponent.parse().ok()?;

  let with_fraction = |digits: &str| {
    let digits = if digits.contains('.') {
      digits.trim_end_matches('0').trim_end_matches('.')
    } else {
      digits
    };
    if digits.contains('.') {
      digits.to_string()
    } else {
      format!("{digits}.0")
    }
  };

  if !(-4..15).contains(&exponent) {
    let sign = if exponent < 0 { '-' } else { '+' };
    Some(format!("{}e{sign}{:02}", with_fraction(mantissa), exponent.abs()))
  } else {
    let decimals = usize::try_from(14 - exponent).ok()?;
    Some(with_fraction(&format!("{r:.decimals$}")))
  }
}

/// Integer prefix of `s`, `0` when there is none (the backing store's
/// string-to-integer cast).
fn leading_integer(s: &str) -> i64 {
  let s = s.trim_start();
  let (sign, digits) = match s.strip_prefix('-') {
    Some(rest) => (-1, rest),
    None => (1, s.strip_prefix('+').unwrap_or(s)),
  };
  let end = digits
    .find(|c: char| !c.is_ascii_digit())
    .unwrap_or(digits.len());
  digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

// ─── Expr ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
  Literal {
    value: Value,
  },
  /// `This.<name>`: a field of the clause's own fact.
  Field {
    name: String,
    ty:   FieldType,
  },
  /// `Locals.<name>`: a value bound by an earlier clause.
  Local {
    name: String,
    ty:   FieldType,
  },
  Unary {
    op:      UnaryOp,
    operand: Box<Expr>,
  },
  Binary {
    op:  BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
    ty:  FieldType,
  },
  If {
    condition: Box<Expr>,
    then:      Box<Expr>,
    otherwise: Box<Expr>,
  },
  Convert {
    conversion: Conversion,
    operand:    Box<Expr>,
  },
  /// A call to a declared external function.
  Call {
    function: String,
    external: String,
    args:     Vec<Expr>,
    ty:       FieldType,
  },
}

impl Expr {
  pub fn literal(value: impl Into<Value>) -> Self {
    Self::Literal {
      value: value.into(),
    }
  }

  pub fn unary(op: UnaryOp, operand: Expr) -> Result<Self, SpecErrorKind> {
    let ty = operand.ty();
    let accepted = match op {
      UnaryOp::Negate => ty.is_numeric(),
      UnaryOp::Not => ty == FieldType::Boolean,
    };
    if !accepted {
      return Err(SpecErrorKind::TypeMismatch {
        context:  match op {
          UnaryOp::Negate => "unary -".to_string(),
          UnaryOp::Not => "not".to_string(),
        },
        expected: match op {
          UnaryOp::Negate => "INTEGER or REAL".to_string(),
          UnaryOp::Not => "BOOLEAN".to_string(),
        },
        found:    ty.to_string(),
      });
    }
    Ok(
      Self::Unary {
        op,
        operand: Box::new(operand),
      }
      .folded(),
    )
  }

  pub fn binary(
    op: BinaryOp,
    lhs: Expr,
    rhs: Expr,
  ) -> Result<Self, SpecErrorKind> {
    let (l, r) = (lhs.ty(), rhs.ty());
    let ty =
      op.result_type(l, r)
        .ok_or_else(|| SpecErrorKind::TypeMismatch {
          context:  format!("operator {}", op.symbol()),
          expected: op.expected().to_string(),
          found:    format!("{l} and {r}"),
        })?;
    Ok(
      Self::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        ty,
      }
      .folded(),
    )
  }

  pub fn branch(
    condition: Expr,
    then: Expr,
    otherwise: Expr,
  ) -> Result<Self, SpecErrorKind> {
    if condition.ty() != FieldType::Boolean {
      return Err(SpecErrorKind::TypeMismatch {
        context:  "if condition".to_string(),
        expected: "BOOLEAN".to_string(),
        found:    condition.ty().to_string(),
      });
    }
    if then.ty() != otherwise.ty() {
      return Err(SpecErrorKind::TypeMismatch {
        context:  "if branches".to_string(),
        expected: then.ty().to_string(),
        found:    otherwise.ty().to_string(),
      });
    }
    Ok(match condition {
      Self::Literal {
        value: Value::Boolean(true),
      } => then,
      Self::Literal {
        value: Value::Boolean(false),
      } => otherwise,
      condition => Self::If {
        condition: Box::new(condition),
        then:      Box::new(then),
        otherwise: Box::new(otherwise),
      },
    })
  }

  pub fn convert(
    conversion: Conversion,
    operand: Expr,
  ) -> Result<Self, SpecErrorKind> {
    if operand.ty() != conversion.input() {
      return Err(SpecErrorKind::TypeMismatch {
        context:  format!("{}()", conversion.name()),
        expected: conversion.input().to_string(),
        found:    operand.ty().to_string(),
      });
    }
    Ok(
      Self::Convert {
        conversion,
        operand: Box::new(operand),
      }
      .folded(),
    )
  }

  pub fn call(function: &Function, args: Vec<Expr>) -> Result<Self, SpecErrorKind> {
    let found: Vec<FieldType> = args.iter().map(Expr::ty).collect();
    if found != function.parameters {
      let names = |types: &[FieldType]| {
        types.iter().map(FieldType::to_string).collect::<Vec<_>>().join(", ")
      };
      return Err(SpecErrorKind::TypeMismatch {
        context:  format!("{}()", function.name),
        expected: format!("({})", names(&function.parameters)),
        found:    format!("({})", names(&found)),
      });
    }
    Ok(Self::Call {
      function: function.name.clone(),
      external: function.external.clone(),
      args,
      ty: function.returns,
    })
  }

  pub fn ty(&self) -> FieldType {
    match self {
      Self::Literal { value } => value.field_type(),
      Self::Field { ty, .. }
      | Self::Local { ty, .. }
      | Self::Binary { ty, .. }
      | Self::Call { ty, .. } => *ty,
      Self::Unary { operand, .. } => operand.ty(),
      Self::If { then, .. } => then.ty(),
      Self::Convert { conversion, .. } => conversion.output(),
    }
  }

  pub fn as_literal(&self) -> Option<&Value> {
    match self {
      Self::Literal { value } => Some(value),
      _ => None,
    }
  }

  /// Names of every `Locals.*` reference in the tree.
  pub fn locals(&self) -> BTreeSet<&str> {
    let mut names = BTreeSet::new();
    self.visit(&mut |node| {
      if let Self::Local { name, .. } = node {
        names.insert(name.as_str());
      }
    });
    names
  }

  /// Names of every `This.*` reference in the tree.
  pub fn fields(&self) -> BTreeSet<&str> {
    let mut names = BTreeSet::new();
    self.visit(&mut |node| {
      if let Self::Field { name, .. } = node {
        names.insert(name.as_str());
      }
    });
    names
  }

  /// Split a chain of `&&` into its operands.
  pub fn conjuncts(&self) -> Vec<&Expr> {
    match self {
      Self::Binary {
        op: BinaryOp::And,
        lhs,
        rhs,
        ..
      } => {
        let mut out = lhs.conjuncts();
        out.extend(rhs.conjuncts());
        out
      }
      other => vec![other],
    }
  }

  fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
    f(self);
    match self {
      Self::Literal { .. } | Self::Field { .. } | Self::Local { .. } => {}
      Self::Unary { operand, .. } | Self::Convert { operand, .. } => {
        operand.visit(f)
      }
      Self::Binary { lhs, rhs, .. } => {
        lhs.visit(f);
        rhs.visit(f);
      }
      Self::If {
        condition,
        then,
        otherwise,
      } => {
        condition.visit(f);
        then.visit(f);
        otherwise.visit(f);
      }
      Self::Call { args, .. } => {
        for arg in args {
          arg.visit(f);
        }
      }
    }
  }

  /// Evaluate a tree whose leaves are all literals. `None` for references,
  /// external calls and operations without a defined result (division by
  /// zero, overflow, a malformed pattern).
  pub fn evaluate(&self) -> Option<Value> {
    match self {
      Self::Literal { value } => Some(value.clone()),
      Self::Field { .. } | Self::Local { .. } => None,
      Self::Unary { op, operand } => match (op, operand.evaluate()?) {
        (UnaryOp::Negate, Value::Integer(i)) => i.checked_neg().map(Value::Integer),
        (UnaryOp::Negate, Value::Real(r)) => Some(Value::Real(-r)),
        (UnaryOp::Not, Value::Boolean(b)) => Some(Value::Boolean(!b)),
        _ => None,
      },
      Self::Binary { op, lhs, rhs, .. } => {
        apply_binary(*op, &lhs.evaluate()?, &rhs.evaluate()?)
      }
      Self::If {
        condition,
        then,
        otherwise,
      } => match condition.evaluate()? {
        Value::Boolean(true) => then.evaluate(),
        Value::Boolean(false) => otherwise.evaluate(),
        _ => None,
      },
      Self::Convert {
        conversion,
        operand,
      } => conversion.apply(&operand.evaluate()?),
      Self::Call { .. } => None,
    }
  }

  fn folded(self) -> Self {
    match self.evaluate() {
      Some(value) => Self::Literal { value },
      None => self,
    }
  }
}

fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<Value> {
  use Value as V;

  Some(match (op, lhs, rhs) {
    (BinaryOp::Or, V::Boolean(a), V::Boolean(b)) => V::Boolean(*a || *b),
    (BinaryOp::And, V::Boolean(a), V::Boolean(b)) => V::Boolean(*a && *b),
    (BinaryOp::Eq, a, b) => V::Boolean(a == b),
    (BinaryOp::Ne, a, b) => V::Boolean(a != b),
    (BinaryOp::Lt, a, b) => V::Boolean(compare(a, b)?.is_lt()),
    (BinaryOp::Le, a, b) => V::Boolean(compare(a, b)?.is_le()),
    (BinaryOp::Gt, a, b) => V::Boolean(compare(a, b)?.is_gt()),
    (BinaryOp::Ge, a, b) => V::Boolean(compare(a, b)?.is_ge()),
    (BinaryOp::Like, V::String(a), V::String(p)) => V::Boolean(like(a, p)),
    (BinaryOp::Unlike, V::String(a), V::String(p)) => V::Boolean(!like(a, p)),
    (BinaryOp::Matches, V::String(a), V::String(p)) => {
      V::Boolean(regexp_match(&Regex::new(p).ok()?, a))
    }
    (BinaryOp::NotMatches, V::String(a), V::String(p)) => {
      V::Boolean(!regexp_match(&Regex::new(p).ok()?, a))
    }
    (BinaryOp::Concat, V::String(a), V::String(b)) => V::String(format!("{a}{b}")),
    (BinaryOp::Add, V::Integer(a), V::Integer(b)) => V::Integer(a.checked_add(*b)?),
    (BinaryOp::Sub, V::Integer(a), V::Integer(b)) => V::Integer(a.checked_sub(*b)?),
    (BinaryOp::Mul, V::Integer(a), V::Integer(b)) => V::Integer(a.checked_mul(*b)?),
    (BinaryOp::Div, V::Integer(a), V::Integer(b)) => V::Integer(a.checked_div(*b)?),
    (BinaryOp::Rem, V::Integer(a), V::Integer(b)) => V::Integer(a.checked_rem(*b)?),
    (BinaryOp::Add, V::Real(a), V::Real(b)) => V::Real(a + b),
    (BinaryOp::Sub, V::Real(a), V::Real(b)) => V::Real(a - b),
    (BinaryOp::Mul, V::Real(a), V::Real(b)) => V::Real(a * b),
    (BinaryOp::Div, V::Real(_), V::Real(b)) if *b == 0.0 => return None,
    (BinaryOp::Div, V::Real(a), V::Real(b)) => V::Real(a / b),
    _ => return None,
  })
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
    (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
    (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
    _ => None,
  }
}

/// SQL `LIKE`: `%` matches any run, `_` any single character, ASCII letters
/// compare case-insensitively.
pub fn like(text: &str, pattern: &str) -> bool {
  fn matches(text: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
      None => text.is_empty(),
      Some(('%', rest)) => (0..=text.len()).any(|i| matches(&text[i..], rest)),
      Some(('_', rest)) => !text.is_empty() && matches(&text[1..], rest),
      Some((c, rest)) => text.first() == Some(c) && matches(&text[1..], rest),
    }
  }

  let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
  let pattern: Vec<char> =
    pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
  matches(&text, &pattern)
}

// ─── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Literal {
        value: Value::String(s),
      } => write!(f, "'{s}'"),
      Self::Literal { value } => write!(f, "{value}"),
      Self::Field { name, .. } => write!(f, "This.{name}"),
      Self::Local { name, .. } => write!(f, "Locals.{name}"),
      Self::Unary {
        op: UnaryOp::Negate,
        operand,
      } => write!(f, "-{operand}"),
      Self::Unary {
        op: UnaryOp::Not,
        operand,
      } => write!(f, "not {operand}"),
      Self::Binary { op, lhs, rhs, .. } => {
        write!(f, "({lhs} {} {rhs})", op.symbol())
      }
      Self::If {
        condition,
        then,
        otherwise,
      } => write!(f, "if({condition}, {then}, {otherwise})"),
      Self::Convert {
        conversion,
        operand,
      } => write!(f, "{}({operand})", conversion.name()),
      Self::Call { function, args, .. } => {
        let args: Vec<String> = args.iter().map(Expr::to_string).collect();
        write!(f, "{function}({})", args.join(", "))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn field(name: &str, ty: FieldType) -> Expr {
    Expr::Field {
      name: name.into(),
      ty,
    }
  }

  #[test]
  fn arithmetic_requires_matching_numeric_types() {
    let err = Expr::binary(
      BinaryOp::Add,
      field("Count", FieldType::Integer),
      field("Weight", FieldType::Real),
    )
    .unwrap_err();
    assert!(matches!(err, SpecErrorKind::TypeMismatch { .. }));

    let ok = Expr::binary(
      BinaryOp::Mul,
      field("Weight", FieldType::Real),
      Expr::literal(2.0),
    )
    .unwrap();
    assert_eq!(ok.ty(), FieldType::Real);
  }

  #[test]
  fn literal_subtrees_fold() {
    let sum =
      Expr::binary(BinaryOp::Add, Expr::literal(2i64), Expr::literal(3i64)).unwrap();
    assert_eq!(sum.as_literal(), Some(&Value::Integer(5)));

    let text = Expr::binary(BinaryOp::Concat, Expr::literal("a"), Expr::literal("b"))
      .unwrap();
    assert_eq!(text.as_literal(), Some(&Value::String("ab".into())));
  }

  #[test]
  fn division_by_zero_is_left_unfolded() {
    let div =
      Expr::binary(BinaryOp::Div, Expr::literal(1i64), Expr::literal(0i64)).unwrap();
    assert!(div.as_literal().is_none());
  }

  #[test]
  fn conversions_check_their_input() {
    assert!(Expr::convert(Conversion::RealOfInt, Expr::literal(1.5)).is_err());
    let s = Expr::convert(Conversion::StringOfBool, Expr::literal(true)).unwrap();
    assert_eq!(s.as_literal(), Some(&Value::String("true".into())));
    let n = Expr::convert(Conversion::IntOfString, Expr::literal("42 apples")).unwrap();
    assert_eq!(n.as_literal(), Some(&Value::Integer(42)));
  }

  #[test]
  fn reals_print_like_sqlite() {
    let text = |r: f64| real_text(r).unwrap();
    assert_eq!(text(1e20), "1.0e+20");
    assert_eq!(text(2.0), "2.0");
    assert_eq!(text(-1.5), "-1.5");
    assert_eq!(text(0.1), "0.1");
    assert_eq!(text(1e-5), "1.0e-05");
    assert_eq!(text(123456.789), "123456.789");
    assert_eq!(text(1.0 / 3.0), "0.333333333333333");
    assert_eq!(text(0.0), "0.0");
    assert!(real_text(f64::NAN).is_none());

    let folded = Expr::convert(Conversion::StringOfReal, Expr::literal(1e20)).unwrap();
    assert_eq!(folded.as_literal(), Some(&Value::String("1.0e+20".into())));
  }

  #[test]
  fn branch_on_literal_condition_picks_a_side() {
    let picked = Expr::branch(
      Expr::literal(false),
      field("A", FieldType::String),
      field("B", FieldType::String),
    )
    .unwrap();
    assert_eq!(picked, field("B", FieldType::String));
  }

  #[test]
  fn regexp_matches_at_the_start() {
    let matches = |text: &str, pattern: &str| {
      Expr::binary(BinaryOp::Matches, Expr::literal(text), Expr::literal(pattern))
        .unwrap()
        .as_literal()
        .cloned()
    };
    assert_eq!(matches("db-prod-01", "db-[a-z]+"), Some(Value::Boolean(true)));
    assert_eq!(matches("old-db-prod", "db-"), Some(Value::Boolean(false)));
    assert_eq!(matches("x", "("), None);

    let negated =
      Expr::binary(BinaryOp::NotMatches, Expr::literal("web"), Expr::literal("db")).unwrap();
    assert_eq!(negated.as_literal(), Some(&Value::Boolean(true)));
  }

  #[test]
  fn calls_check_arity_and_types_and_never_fold() {
    let shout = Function {
      name:       "Shout".into(),
      external:   "upper".into(),
      parameters: vec![FieldType::String],
      returns:    FieldType::String,
    };
    let call = Expr::call(&shout, vec![Expr::literal("hi")]).unwrap();
    assert!(call.as_literal().is_none());
    assert_eq!(call.ty(), FieldType::String);
    assert_eq!(call.to_string(), "Shout('hi')");

    assert!(Expr::call(&shout, vec![Expr::literal(1i64)]).is_err());
    assert!(Expr::call(&shout, vec![]).is_err());
  }

  #[test]
  fn like_matches_sql_wildcards() {
    assert!(like("Chez Rob", "chez%"));
    assert!(like("abc", "a_c"));
    assert!(!like("abc", "a_"));
  }

  #[test]
  fn conjuncts_flatten_and_chains() {
    let a = Expr::binary(
      BinaryOp::Eq,
      field("A", FieldType::Integer),
      Expr::literal(1i64),
    )
    .unwrap();
    let b = Expr::binary(
      BinaryOp::Eq,
      field("B", FieldType::Integer),
      Expr::literal(2i64),
    )
    .unwrap();
    let both = Expr::binary(BinaryOp::And, a.clone(), b.clone()).unwrap();
    assert_eq!(both.conjuncts(), vec![&a, &b]);
  }
}
