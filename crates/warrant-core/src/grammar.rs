//! Expression text → typed [`Expr`].
//!
//! Pipeline:
//!   &str
//!     └─ Lexer::tokens()     → Vec<Token>
//!          └─ Parser::expression() → Expr (resolved against a [`Scope`])
//!
//! Precedence, loosest first: `||`/`or`, `&&`/`and`, comparisons,
//! `like`/`unlike` and `~`/`!~`, `+ - .`, `* / %`, unary `-`/`not`.

use indexmap::IndexMap;
use regex::Regex;

use crate::{
  error::SpecErrorKind,
  expr::{BinaryOp, Conversion, Expr, Function, UnaryOp},
  value::{FieldType, Value},
};

// ─── Scope ───────────────────────────────────────────────────────────────────

/// Names visible from every expression of a specification.
#[derive(Debug, Clone, Default)]
pub struct Globals {
  pub constants:    IndexMap<String, Value>,
  /// Parameter name → its value for this build.
  pub parameters:   IndexMap<String, Value>,
  pub functions:    IndexMap<String, Function>,
  pub allow_regexp: bool,
}

/// The names an expression may reference at one point of a rule.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
  /// Fields of the clause's own fact; `None` where `This` is not allowed.
  pub this:    Option<&'a IndexMap<String, FieldType>>,
  pub locals:  &'a IndexMap<String, FieldType>,
  pub globals: &'a Globals,
}

/// Parse `text` and resolve every reference against `scope`.
pub fn parse(text: &str, scope: &Scope<'_>) -> Result<Expr, SpecErrorKind> {
  let tokens = Lexer::new(text).tokens()?;
  let mut parser = Parser {
    tokens,
    pos: 0,
    scope,
  };
  let expr = parser.expression(0)?;
  match parser.peek() {
    Token::End => Ok(expr),
    other => Err(syntax(format!("unexpected {} after expression", other.describe()))),
  }
}

fn syntax(message: impl Into<String>) -> SpecErrorKind {
  SpecErrorKind::Syntax(message.into())
}

// ─── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Integer(i64),
  Real(f64),
  Str(String),
  /// A bare or dotted name such as `if` or `This.Person`.
  Name(String),
  Op(&'static str),
  LParen,
  RParen,
  Comma,
  End,
}

impl Token {
  fn describe(&self) -> String {
    match self {
      Self::Integer(i) => format!("number {i}"),
      Self::Real(r) => format!("number {r}"),
      Self::Str(s) => format!("string {s:?}"),
      Self::Name(n) => format!("name {n:?}"),
      Self::Op(op) => format!("operator {op:?}"),
      Self::LParen => "'('".to_string(),
      Self::RParen => "')'".to_string(),
      Self::Comma => "','".to_string(),
      Self::End => "end of expression".to_string(),
    }
  }
}

const OPERATORS: &[&str] = &[
  "==", "!=", "!~", "<=", ">=", "&&", "||", "<", ">", "~", "+", "-", "*", "/", "%", ".",
];

struct Lexer<'a> {
  src:   &'a str,
  chars: Vec<(usize, char)>,
  pos:   usize,
}

impl<'a> Lexer<'a> {
  fn new(src: &'a str) -> Self {
    Self {
      src,
      chars: src.char_indices().collect(),
      pos: 0,
    }
  }

  fn peek_char(&self, ahead: usize) -> Option<char> {
    self.chars.get(self.pos + ahead).map(|&(_, c)| c)
  }

  fn offset(&self) -> usize {
    self
      .chars
      .get(self.pos)
      .map(|&(i, _)| i)
      .unwrap_or(self.src.len())
  }

  fn tokens(mut self) -> Result<Vec<Token>, SpecErrorKind> {
    let mut out = Vec::new();
    while let Some(c) = self.peek_char(0) {
      match c {
        c if c.is_whitespace() => self.pos += 1,
        '#' => {
          while self.peek_char(0).is_some_and(|c| c != '\n') {
            self.pos += 1;
          }
        }
        '0'..='9' => out.push(self.number()?),
        c if c.is_ascii_alphabetic() => out.push(self.name()),
        '\'' | '"' | '$' => out.push(Token::Str(self.string()?)),
        '(' => {
          self.pos += 1;
          out.push(Token::LParen);
        }
        ')' => {
          self.pos += 1;
          out.push(Token::RParen);
        }
        ',' => {
          self.pos += 1;
          out.push(Token::Comma);
        }
        _ => out.push(self.operator()?),
      }
    }
    out.push(Token::End);
    Ok(out)
  }

  fn number(&mut self) -> Result<Token, SpecErrorKind> {
    let start = self.offset();
    let mut real = false;
    self.digits();
    if self.peek_char(0) == Some('.')
      && self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
    {
      real = true;
      self.pos += 1;
      self.digits();
    }
    if matches!(self.peek_char(0), Some('e' | 'E')) {
      let signed = matches!(self.peek_char(1), Some('+' | '-'));
      let first = if signed { 2 } else { 1 };
      if self.peek_char(first).is_some_and(|c| c.is_ascii_digit()) {
        real = true;
        self.pos += first;
        self.digits();
      }
    }
    let text = &self.src[start..self.offset()];
    if real {
      text
        .parse::<f64>()
        .map(Token::Real)
        .map_err(|_| syntax(format!("bad number {text:?}")))
    } else {
      text
        .parse::<i64>()
        .map(Token::Integer)
        .map_err(|_| syntax(format!("integer {text} out of range")))
    }
  }

  fn digits(&mut self) {
    while self.peek_char(0).is_some_and(|c| c.is_ascii_digit()) {
      self.pos += 1;
    }
  }

  /// A name, with `.Segment` continuations folded in (`This.Person`).
  fn name(&mut self) -> Token {
    let start = self.offset();
    loop {
      while self
        .peek_char(0)
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
      {
        self.pos += 1;
      }
      if self.peek_char(0) == Some('.')
        && self.peek_char(1).is_some_and(|c| c.is_ascii_alphabetic())
      {
        self.pos += 1;
      } else {
        break;
      }
    }
    Token::Name(self.src[start..self.offset()].to_string())
  }

  /// Quoted pieces and `$hh` character references written back to back
  /// form one string.
  fn string(&mut self) -> Result<String, SpecErrorKind> {
    let mut out = String::new();
    loop {
      match self.peek_char(0) {
        Some(quote @ ('\'' | '"')) => {
          self.pos += 1;
          loop {
            match self.peek_char(0) {
              Some(c) if c == quote => {
                self.pos += 1;
                break;
              }
              Some(c) => {
                out.push(c);
                self.pos += 1;
              }
              None => return Err(syntax("unterminated string")),
            }
          }
        }
        Some('$') => {
          let hex: String = (1..=2).filter_map(|i| self.peek_char(i)).collect();
          let code = (hex.len() == 2)
            .then(|| u8::from_str_radix(&hex, 16).ok())
            .flatten()
            .ok_or_else(|| syntax(format!("bad character reference ${hex}")))?;
          out.push(char::from(code));
          self.pos += 3;
        }
        _ => return Ok(out),
      }
    }
  }

  fn operator(&mut self) -> Result<Token, SpecErrorKind> {
    let rest = &self.src[self.offset()..];
    for op in OPERATORS {
      if rest.starts_with(op) {
        self.pos += op.chars().count();
        return Ok(Token::Op(op));
      }
    }
    match rest.chars().next() {
      Some('=') => Err(syntax("'=' is not an operator; use '=='")),
      Some(c) => Err(syntax(format!("unexpected character {c:?}"))),
      None => Err(syntax("unexpected end of expression")),
    }
  }
}

// ─── Parser ──────────────────────────────────────────────────────────────────

const UNARY_PRECEDENCE: u8 = 6;

struct Parser<'s> {
  tokens: Vec<Token>,
  pos:    usize,
  scope:  &'s Scope<'s>,
}

impl Parser<'_> {
  fn peek(&self) -> &Token { &self.tokens[self.pos.min(self.tokens.len() - 1)] }

  fn advance(&mut self) -> Token {
    let token = self.peek().clone();
    if self.pos < self.tokens.len() - 1 {
      self.pos += 1;
    }
    token
  }

  fn expect(&mut self, want: Token) -> Result<(), SpecErrorKind> {
    let got = self.advance();
    if got == want {
      Ok(())
    } else {
      Err(syntax(format!(
        "expected {}, found {}",
        want.describe(),
        got.describe()
      )))
    }
  }

  /// The binary operator at the cursor and its precedence.
  fn infix(&self) -> Option<(BinaryOp, u8)> {
    let op = match self.peek() {
      Token::Op(op) => match *op {
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "~" => BinaryOp::Matches,
        "!~" => BinaryOp::NotMatches,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "." => BinaryOp::Concat,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        _ => return None,
      },
      Token::Name(name) => match name.to_ascii_lowercase().as_str() {
        "or" => BinaryOp::Or,
        "and" => BinaryOp::And,
        "like" => BinaryOp::Like,
        "unlike" => BinaryOp::Unlike,
        _ => return None,
      },
      _ => return None,
    };
    let precedence = match op {
      BinaryOp::Or => 1,
      BinaryOp::And => 2,
      BinaryOp::Eq
      | BinaryOp::Ne
      | BinaryOp::Lt
      | BinaryOp::Le
      | BinaryOp::Gt
      | BinaryOp::Ge
      | BinaryOp::Like
      | BinaryOp::Unlike
      | BinaryOp::Matches
      | BinaryOp::NotMatches => 3,
      BinaryOp::Add | BinaryOp::Sub | BinaryOp::Concat => 4,
      BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 5,
    };
    Some((op, precedence))
  }

  fn expression(&mut self, min: u8) -> Result<Expr, SpecErrorKind> {
    let mut lhs = self.prefix()?;
    while let Some((op, precedence)) = self.infix() {
      if precedence < min {
        break;
      }
      self.advance();
      let rhs = self.expression(precedence + 1)?;
      if matches!(op, BinaryOp::Matches | BinaryOp::NotMatches) {
        self.check_regexp(&rhs)?;
      }
      lhs = Expr::binary(op, lhs, rhs)?;
    }
    Ok(lhs)
  }

  /// `~` needs permission, and a literal pattern must compile.
  fn check_regexp(&self, pattern: &Expr) -> Result<(), SpecErrorKind> {
    if !self.scope.globals.allow_regexp {
      return Err(SpecErrorKind::RegexpDisabled);
    }
    if let Some(Value::String(pattern)) = pattern.as_literal() {
      Regex::new(pattern).map_err(|err| SpecErrorKind::InvalidRegexp {
        pattern: pattern.clone(),
        reason:  err.to_string(),
      })?;
    }
    Ok(())
  }

  fn prefix(&mut self) -> Result<Expr, SpecErrorKind> {
    match self.advance() {
      Token::Integer(i) => Ok(Expr::literal(i)),
      Token::Real(r) => Ok(Expr::literal(r)),
      Token::Str(s) => Ok(Expr::literal(s)),
      Token::Op("-") => {
        let operand = self.expression(UNARY_PRECEDENCE)?;
        Expr::unary(UnaryOp::Negate, operand)
      }
      Token::LParen => {
        let inner = self.expression(0)?;
        self.expect(Token::RParen)?;
        Ok(inner)
      }
      Token::Name(name) => self.named(name),
      other => Err(syntax(format!("unexpected {}", other.describe()))),
    }
  }

  fn named(&mut self, name: String) -> Result<Expr, SpecErrorKind> {
    if let Some((head, member)) = name.split_once('.') {
      return self.reference(head, member, &name);
    }
    match name.to_ascii_lowercase().as_str() {
      "true" => return Ok(Expr::literal(true)),
      "false" => return Ok(Expr::literal(false)),
      "not" => {
        let operand = self.expression(UNARY_PRECEDENCE)?;
        return Expr::unary(UnaryOp::Not, operand);
      }
      _ => {}
    }
    if *self.peek() != Token::LParen {
      return Err(syntax(format!(
        "unexpected name {name:?}; references are written This.X, Locals.X, Constants.X or Parameters.X"
      )));
    }
    let args = self.arguments()?;
    self.call(&name, args)
  }

  fn reference(
    &self,
    head: &str,
    member: &str,
    full: &str,
  ) -> Result<Expr, SpecErrorKind> {
    let unbound = || SpecErrorKind::UnboundReference(full.to_string());
    if member.contains('.') {
      return Err(syntax(format!("malformed reference {full:?}")));
    }
    match head.to_ascii_lowercase().as_str() {
      "this" => {
        let fields = self.scope.this.ok_or_else(|| {
          SpecErrorKind::UnboundReference(format!(
            "{full} (This is only available inside a match clause)"
          ))
        })?;
        let ty = fields.get(member).ok_or_else(unbound)?;
        Ok(Expr::Field {
          name: member.to_string(),
          ty:   *ty,
        })
      }
      "locals" => {
        let ty = self.scope.locals.get(member).ok_or_else(unbound)?;
        Ok(Expr::Local {
          name: member.to_string(),
          ty:   *ty,
        })
      }
      "constants" => {
        let value = self.scope.globals.constants.get(member).ok_or_else(unbound)?;
        Ok(Expr::literal(value.clone()))
      }
      "parameters" => {
        let value = self.scope.globals.parameters.get(member).ok_or_else(unbound)?;
        Ok(Expr::literal(value.clone()))
      }
      _ => Err(unbound()),
    }
  }

  fn arguments(&mut self) -> Result<Vec<Expr>, SpecErrorKind> {
    self.expect(Token::LParen)?;
    let mut args = Vec::new();
    if *self.peek() == Token::RParen {
      self.advance();
      return Ok(args);
    }
    loop {
      args.push(self.expression(0)?);
      match self.advance() {
        Token::Comma => continue,
        Token::RParen => return Ok(args),
        other => {
          return Err(syntax(format!(
            "expected ',' or ')', found {}",
            other.describe()
          )));
        }
      }
    }
  }

  fn call(&self, name: &str, args: Vec<Expr>) -> Result<Expr, SpecErrorKind> {
    let arity = |want: usize| {
      if args.len() == want {
        Ok(())
      } else {
        Err(syntax(format!(
          "{name}() takes {want} argument(s), {} given",
          args.len()
        )))
      }
    };
    if name.eq_ignore_ascii_case("if") {
      arity(3)?;
      let mut args = args.into_iter();
      let (Some(condition), Some(then), Some(otherwise)) =
        (args.next(), args.next(), args.next())
      else {
        return Err(syntax("if() takes 3 arguments"));
      };
      return Expr::branch(condition, then, otherwise);
    }
    let declared = self
      .scope
      .globals
      .functions
      .values()
      .find(|f| f.name.eq_ignore_ascii_case(name));
    if let Some(function) = declared {
      arity(function.parameters.len())?;
      return Expr::call(function, args);
    }
    let conversion = Conversion::from_name(name)
      .ok_or_else(|| syntax(format!("unknown function {name:?}")))?;
    arity(1)?;
    let operand = args
      .into_iter()
      .next()
      .ok_or_else(|| syntax(format!("{name}() takes 1 argument")))?;
    Expr::convert(conversion, operand)
  }
}
