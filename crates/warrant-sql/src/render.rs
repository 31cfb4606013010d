//! Expression trees → SQLite scalar expressions.
//!
//! `This.<field>` becomes a column of the clause's alias; `Locals.<name>` is
//! replaced by the (parenthesised) SQL of the expression that assigned it,
//! so a join needs no intermediate bindings.

use indexmap::IndexMap;
use warrant_core::{
  expr::{BinaryOp, Conversion, Expr, UnaryOp},
  value::Value,
};

use crate::naming;

/// Names an expression may reference at one point of a join.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
  /// Alias of the table bound to `This`.
  pub this:   Option<&'a str>,
  /// Local name → its SQL.
  pub locals: &'a IndexMap<String, String>,
}

pub fn expression(expr: &Expr, cx: Context<'_>) -> String {
  match expr {
    Expr::Literal { value } => literal(value),
    Expr::Field { name, .. } => match cx.this {
      Some(alias) => naming::column(alias, name),
      None => naming::ident(name),
    },
    Expr::Local { name, .. } => match cx.locals.get(name) {
      Some(sql) => sql.clone(),
      None => naming::ident(name),
    },
    Expr::Unary { op, operand } => {
      let operand = expression(operand, cx);
      match op {
        UnaryOp::Negate => format!("(- {operand})"),
        UnaryOp::Not => format!("(NOT {operand})"),
      }
    }
    Expr::Binary { op, lhs, rhs, .. } => {
      format!("({} {} {})", expression(lhs, cx), operator(*op), expression(rhs, cx))
    }
    Expr::If {
      condition,
      then,
      otherwise,
    } => format!(
      "(CASE WHEN {} THEN {} ELSE {} END)",
      expression(condition, cx),
      expression(then, cx),
      expression(otherwise, cx)
    ),
    Expr::Convert {
      conversion,
      operand,
    } => {
      let operand = expression(operand, cx);
      match conversion {
        Conversion::StringOfBool => {
          format!("(CASE WHEN {operand} THEN 'true' ELSE 'false' END)")
        }
        Conversion::StringOfInt | Conversion::StringOfReal => {
          format!("CAST({operand} AS TEXT)")
        }
        Conversion::RealOfInt => format!("CAST({operand} AS REAL)"),
        Conversion::IntOfReal | Conversion::IntOfString => {
          format!("CAST({operand} AS INTEGER)")
        }
      }
    }
    Expr::Call { external, args, .. } => {
      let args: Vec<String> = args.iter().map(|a| expression(a, cx)).collect();
      format!("{external}({})", args.join(", "))
    }
  }
}

pub fn literal(value: &Value) -> String {
  match value {
    Value::Boolean(true) => "1".to_string(),
    Value::Boolean(false) => "0".to_string(),
    Value::Integer(i) => i.to_string(),
    Value::Real(r) if r.is_nan() => "NULL".to_string(),
    Value::Real(r) if r.is_infinite() => {
      if *r > 0.0 { "9e999" } else { "-9e999" }.to_string()
    }
    Value::Real(r) => format!("{r:?}"),
    Value::String(s) => naming::string(s),
  }
}

fn operator(op: BinaryOp) -> &'static str {
  match op {
    BinaryOp::Or => "OR",
    BinaryOp::And => "AND",
    BinaryOp::Eq => "=",
    BinaryOp::Ne => "<>",
    BinaryOp::Lt => "<",
    BinaryOp::Le => "<=",
    BinaryOp::Gt => ">",
    BinaryOp::Ge => ">=",
    BinaryOp::Like => "LIKE",
    BinaryOp::Unlike => "NOT LIKE",
    // the store registers `regexp(pattern, text)`
    BinaryOp::Matches => "REGEXP",
    BinaryOp::NotMatches => "NOT REGEXP",
    BinaryOp::Add => "+",
    BinaryOp::Sub => "-",
    BinaryOp::Concat => "||",
    BinaryOp::Mul => "*",
    BinaryOp::Div => "/",
    BinaryOp::Rem => "%",
  }
}

#[cfg(test)]
mod tests {
  use warrant_core::{
    expr::Function,
    grammar::{self, Globals, Scope},
    value::FieldType,
  };

  use super::*;

  fn render(text: &str) -> String {
    let this: IndexMap<String, FieldType> = [
      ("Name".to_string(), FieldType::String),
      ("Level".to_string(), FieldType::Integer),
      ("Open".to_string(), FieldType::Boolean),
    ]
    .into_iter()
    .collect();
    let locals: IndexMap<String, FieldType> =
      [("Home".to_string(), FieldType::String)].into_iter().collect();
    let globals = Globals {
      functions: [("Distance".to_string(), Function {
        name:       "Distance".to_string(),
        external:   "geo_distance".to_string(),
        parameters: vec![FieldType::String, FieldType::Integer],
        returns:    FieldType::Real,
      })]
      .into_iter()
      .collect(),
      allow_regexp: true,
      ..Globals::default()
    };
    let expr = grammar::parse(text, &Scope {
      this:    Some(&this),
      locals:  &locals,
      globals: &globals,
    })
    .unwrap();

    let bound: IndexMap<String, String> =
      [("Home".to_string(), "(c0.\"Place\")".to_string())].into_iter().collect();
    expression(&expr, Context {
      this:   Some("c1"),
      locals: &bound,
    })
  }

  #[test]
  fn references_resolve_to_columns_and_inlined_locals() {
    assert_eq!(
      render("This.Name == Locals.Home"),
      "(c1.\"Name\" = (c0.\"Place\"))"
    );
  }

  #[test]
  fn operators_use_sql_spelling() {
    assert_eq!(
      render("This.Name != 'x' && not This.Open"),
      "((c1.\"Name\" <> 'x') AND (NOT c1.\"Open\"))"
    );
    assert_eq!(render("This.Name . '!'"), "(c1.\"Name\" || '!')");
    assert_eq!(render("This.Name unlike 'a%'"), "(c1.\"Name\" NOT LIKE 'a%')");
    assert_eq!(render("This.Name ~ 'db[0-9]'"), "(c1.\"Name\" REGEXP 'db[0-9]')");
    assert_eq!(render("This.Name !~ 'db'"), "(c1.\"Name\" NOT REGEXP 'db')");
  }

  #[test]
  fn declared_functions_call_their_external_name() {
    assert_eq!(
      render("distance(Locals.Home, This.Level + 1)"),
      "geo_distance((c0.\"Place\"), (c1.\"Level\" + 1))"
    );
  }

  #[test]
  fn functions_become_case_and_cast() {
    assert_eq!(
      render("if(This.Open, This.Level, 0)"),
      "(CASE WHEN c1.\"Open\" THEN c1.\"Level\" ELSE 0 END)"
    );
    assert_eq!(render("real_of_int(This.Level)"), "CAST(c1.\"Level\" AS REAL)");
    assert_eq!(
      render("string_of_bool(This.Open)"),
      "(CASE WHEN c1.\"Open\" THEN 'true' ELSE 'false' END)"
    );
  }

  #[test]
  fn literals() {
    assert_eq!(literal(&Value::Boolean(true)), "1");
    assert_eq!(literal(&Value::Real(2.0)), "2.0");
    assert_eq!(literal(&Value::String("it's".into())), "'it''s'");
  }
}
