// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./parser_test.rs"]
mod parser_test;

use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
  #[error("missing expression")]
  MissingExpression,
  #[error("missing comma near '{0}'")]
  MissingComma(String),
  #[error("missing closing parenthesis near '{0}'")]
  MissingParen(String),
  #[error("unterminated string literal '{0}'")]
  UnterminatedString(String),
  #[error("unexpected character near '{0}'")]
  UnexpectedCharacter(String),
  #[error("unexpected trailing input '{0}'")]
  TrailingInput(String),
}

//
// Expr
//

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Name(String),
  Func(Call),
  Const(f64),
  String(String),
  Bool(bool),
}

// A function call node. `raw_args` is the unparsed text between the parentheses, which naming
// functions use verbatim when building output series names.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
  pub name: String,
  pub args: Vec<Expr>,
  pub named_args: Vec<(String, Expr)>,
  pub raw_args: String,
}

impl Call {
  // Find an argument positionally first, and by keyword otherwise.
  #[must_use]
  pub fn arg(&self, index: usize, name: &str) -> Option<&Expr> {
    self.args.get(index).or_else(|| {
      self
        .named_args
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
    })
  }
}

impl Expr {
  #[must_use]
  pub const fn is_series(&self) -> bool {
    matches!(self, Self::Name(_) | Self::Func(_))
  }

  // Every metric name referenced anywhere in the tree, in left to right order.
  #[must_use]
  pub fn metrics(&self) -> Vec<&str> {
    let mut metrics = Vec::new();
    self.collect_metrics(&mut metrics);
    metrics
  }

  fn collect_metrics<'a>(&'a self, metrics: &mut Vec<&'a str>) {
    match self {
      Self::Name(name) => metrics.push(name),
      Self::Func(call) => {
        for arg in call
          .args
          .iter()
          .chain(call.named_args.iter().map(|(_, value)| value))
        {
          arg.collect_metrics(metrics);
        }
      },
      Self::Const(_) | Self::String(_) | Self::Bool(_) => {},
    }
  }
}

impl Display for Expr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Name(name) => f.write_str(name),
      Self::Const(value) => write!(f, "{}", format_number(*value)),
      Self::String(value) => write!(f, "\"{value}\""),
      Self::Bool(value) => write!(f, "{value}"),
      Self::Func(call) => {
        write!(f, "{}(", call.name)?;
        let mut first = true;
        for arg in &call.args {
          if !first {
            f.write_str(",")?;
          }
          first = false;
          write!(f, "{arg}")?;
        }
        for (key, value) in &call.named_args {
          if !first {
            f.write_str(",")?;
          }
          first = false;
          write!(f, "{key}={value}")?;
        }
        f.write_str(")")
      },
    }
  }
}

// Format a number the way Graphite echoes constants in series names: integral values without a
// fractional part.
#[must_use]
pub fn format_number(value: f64) -> String {
  if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
    format!("{value:.0}")
  } else {
    format!("{value}")
  }
}

//
// Parser
//

// Parse a complete target expression.
pub fn parse(text: &str) -> Result<Expr, ParseError> {
  let (expr, rest) = parse_prefix(text)?;
  let rest = rest.trim_start();
  if !rest.is_empty() {
    return Err(ParseError::TrailingInput(rest.to_string()));
  }
  Ok(expr)
}

// Parse one expression from the front of the input and return it along with the unconsumed
// remainder.
pub fn parse_prefix(text: &str) -> Result<(Expr, &str), ParseError> {
  let text = text.trim_start();
  let Some(first) = text.chars().next() else {
    return Err(ParseError::MissingExpression);
  };

  if first == '\'' || first == '"' {
    let (value, rest) = parse_string(text)?;
    return Ok((Expr::String(value), rest));
  }

  if first.is_ascii_digit() || first == '-' || first == '+' || first == '.' {
    if let Some((value, rest)) = parse_const(text) {
      // Numbers that continue into a name, like 1min.load, are metric names.
      if !rest.starts_with(|c: char| is_name_char(c) || c == '(' || c == '{' || c == '[') {
        return Ok((Expr::Const(value), rest));
      }
    }
  }

  if is_name_char(first) || first == '{' || first == '[' {
    let (name, rest) = parse_name(text)?;
    if let Some(args_text) = rest.strip_prefix('(') {
      return parse_call(name, args_text);
    }
    if name.eq_ignore_ascii_case("true") {
      return Ok((Expr::Bool(true), rest));
    }
    if name.eq_ignore_ascii_case("false") {
      return Ok((Expr::Bool(false), rest));
    }
    return Ok((Expr::Name(name.to_string()), rest));
  }

  Err(ParseError::UnexpectedCharacter(text.to_string()))
}

const fn is_name_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '*' | '?' | ':' | '#' | '%')
}

// Consume a metric name. Commas and other separators inside brace and bracket groups belong to
// the name.
fn parse_name(text: &str) -> Result<(&str, &str), ParseError> {
  let mut depth = 0_usize;
  let mut end = text.len();
  for (i, c) in text.char_indices() {
    match c {
      '{' | '[' => depth += 1,
      '}' | ']' => {
        if depth == 0 {
          end = i;
          break;
        }
        depth -= 1;
      },
      _ if depth > 0 => {},
      c if is_name_char(c) => {},
      _ => {
        end = i;
        break;
      },
    }
  }
  if depth > 0 {
    return Err(ParseError::UnexpectedCharacter(text.to_string()));
  }
  if end == 0 {
    return Err(ParseError::UnexpectedCharacter(text.to_string()));
  }
  Ok((&text[.. end], &text[end ..]))
}

fn parse_const(text: &str) -> Option<(f64, &str)> {
  let bytes = text.as_bytes();
  let mut i = 0;
  if matches!(bytes.first(), Some(b'+' | b'-')) {
    i += 1;
  }
  let digits_start = i;
  while i < bytes.len() && bytes[i].is_ascii_digit() {
    i += 1;
  }
  let mut has_digits = i > digits_start;
  if i < bytes.len() && bytes[i] == b'.' {
    let fraction_start = i + 1;
    let mut j = fraction_start;
    while j < bytes.len() && bytes[j].is_ascii_digit() {
      j += 1;
    }
    if j > fraction_start {
      has_digits = true;
      i = j;
    }
  }
  if !has_digits {
    return None;
  }
  if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
    let mut j = i + 1;
    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
      j += 1;
    }
    let exponent_start = j;
    while j < bytes.len() && bytes[j].is_ascii_digit() {
      j += 1;
    }
    if j > exponent_start {
      i = j;
    }
  }
  let value = text[.. i].parse::<f64>().ok()?;
  Some((value, &text[i ..]))
}

// Parse a quoted string. A backslash escapes the quote or another backslash and is kept verbatim
// otherwise, so regex arguments survive intact.
fn parse_string(text: &str) -> Result<(String, &str), ParseError> {
  let mut chars = text.char_indices();
  let Some((_, quote)) = chars.next() else {
    return Err(ParseError::MissingExpression);
  };
  let mut value = String::new();
  let mut escaped = false;
  for (i, c) in chars {
    if escaped {
      if c != quote && c != '\\' {
        value.push('\\');
      }
      value.push(c);
      escaped = false;
    } else if c == '\\' {
      escaped = true;
    } else if c == quote {
      return Ok((value, &text[i + c.len_utf8() ..]));
    } else {
      value.push(c);
    }
  }
  Err(ParseError::UnterminatedString(text.to_string()))
}

// Parse the argument list of a call. `text` starts right after the opening parenthesis.
fn parse_call<'a>(name: &str, text: &'a str) -> Result<(Expr, &'a str), ParseError> {
  let mut call = Call {
    name: name.to_string(),
    args: Vec::new(),
    named_args: Vec::new(),
    raw_args: String::new(),
  };

  let mut rest = text.trim_start();
  if let Some(after) = rest.strip_prefix(')') {
    return Ok((Expr::Func(call), after));
  }

  loop {
    if let Some((key, after_eq)) = named_arg_prefix(rest) {
      let (value, after) = parse_prefix(after_eq)?;
      call.named_args.push((key.to_string(), value));
      rest = after;
    } else {
      let (value, after) = parse_prefix(rest)?;
      call.args.push(value);
      rest = after;
    }

    rest = rest.trim_start();
    match rest.chars().next() {
      Some(',') => rest = &rest[1 ..],
      Some(')') => {
        let consumed = text.len() - rest.len();
        call.raw_args = text[.. consumed].trim().to_string();
        return Ok((Expr::Func(call), &rest[1 ..]));
      },
      Some(_) => return Err(ParseError::MissingComma(rest.to_string())),
      None => return Err(ParseError::MissingParen(text.to_string())),
    }
  }
}

// Detect `ident=` at the front of an argument, returning the identifier and the text after '='.
fn named_arg_prefix(text: &str) -> Option<(&str, &str)> {
  let text = text.trim_start();
  let end = text
    .char_indices()
    .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
    .map_or(text.len(), |(i, _)| i);
  if end == 0 || !text.as_bytes()[0].is_ascii_alphabetic() {
    return None;
  }
  let after = text[end ..].trim_start();
  let value = after.strip_prefix('=')?;
  if value.starts_with('=') {
    return None;
  }
  Some((&text[.. end], value))
}
