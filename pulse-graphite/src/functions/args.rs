// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./args_test.rs"]
mod args_test;

use crate::evaluator::{EvalContext, EvalError};
use crate::parser::{Call, Expr};
use crate::series::{MetricData, SeriesList};
use pulse_common::LossyFloatToInt;
use std::sync::Arc;

fn missing(call: &Call, index: usize) -> EvalError {
  EvalError::MissingArgument {
    function: call.name.clone(),
    index,
  }
}

fn bad_type(call: &Call, index: usize, expected: &'static str) -> EvalError {
  EvalError::BadArgumentType {
    function: call.name.clone(),
    index,
    expected,
  }
}

pub fn invalid(call: &Call, message: impl Into<String>) -> EvalError {
  EvalError::InvalidArgument {
    function: call.name.clone(),
    message: message.into(),
  }
}

pub fn empty(call: &Call) -> EvalError {
  EvalError::EmptySeriesList {
    function: call.name.clone(),
  }
}

//
// Series arguments
//

pub fn series_arg(
  call: &Call,
  index: usize,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let expr = call.args.get(index).ok_or_else(|| missing(call, index))?;
  if !expr.is_series() {
    return Err(bad_type(call, index, "a series list"));
  }
  ctx.eval(expr, from, until)
}

// Evaluate every positional argument from `start` on as a series list, left to right, and
// concatenate the results.
pub fn series_args_from(
  call: &Call,
  start: usize,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let mut series = Vec::new();
  for (index, expr) in call.args.iter().enumerate().skip(start) {
    if !expr.is_series() {
      return Err(bad_type(call, index, "a series list"));
    }
    series.extend(ctx.eval(expr, from, until)?);
  }
  Ok(series)
}

pub fn single_series_arg(
  call: &Call,
  index: usize,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<Arc<MetricData>, EvalError> {
  let mut series = series_arg(call, index, from, until, ctx)?;
  let count = series.len();
  match series.pop() {
    Some(single) if count == 1 => Ok(single),
    Some(_) => Err(EvalError::TooManySeries {
      function: call.name.clone(),
      count,
    }),
    None => Err(empty(call)),
  }
}

//
// Literal arguments
//

pub fn number_arg(call: &Call, index: usize, name: &str) -> Result<f64, EvalError> {
  match call.arg(index, name) {
    Some(Expr::Const(value)) => Ok(*value),
    Some(_) => Err(bad_type(call, index, "a number")),
    None => Err(missing(call, index)),
  }
}

pub fn optional_number(call: &Call, index: usize, name: &str) -> Result<Option<f64>, EvalError> {
  match call.arg(index, name) {
    Some(Expr::Const(value)) => Ok(Some(*value)),
    Some(Expr::Name(none)) if none == "None" => Ok(None),
    Some(_) => Err(bad_type(call, index, "a number")),
    None => Ok(None),
  }
}

pub fn int_arg(call: &Call, index: usize, name: &str) -> Result<i64, EvalError> {
  let value = number_arg(call, index, name)?;
  if value.fract() != 0.0 {
    return Err(bad_type(call, index, "an integer"));
  }
  Ok(value.lossy_to_i64())
}

// Every positional argument from `start` on as an integer, e.g. node indexes.
pub fn int_args_from(call: &Call, start: usize) -> Result<Vec<i64>, EvalError> {
  (start .. call.args.len())
    .map(|index| int_arg(call, index, ""))
    .collect()
}

pub fn string_arg<'a>(call: &'a Call, index: usize, name: &str) -> Result<&'a str, EvalError> {
  match call.arg(index, name) {
    Some(Expr::String(value)) => Ok(value),
    Some(_) => Err(bad_type(call, index, "a string")),
    None => Err(missing(call, index)),
  }
}

pub fn optional_string<'a>(
  call: &'a Call,
  index: usize,
  name: &str,
) -> Result<Option<&'a str>, EvalError> {
  match call.arg(index, name) {
    None => Ok(None),
    Some(_) => string_arg(call, index, name).map(Some),
  }
}

pub fn bool_arg(call: &Call, index: usize, name: &str, default: bool) -> Result<bool, EvalError> {
  match call.arg(index, name) {
    None => Ok(default),
    Some(Expr::Bool(value)) => Ok(*value),
    Some(Expr::Const(value)) => Ok(*value != 0.0),
    Some(Expr::String(value)) if value.eq_ignore_ascii_case("true") => Ok(true),
    Some(Expr::String(value)) if value.eq_ignore_ascii_case("false") => Ok(false),
    Some(_) => Err(bad_type(call, index, "a boolean")),
  }
}

// The literal text of an argument as it appears in generated series names.
#[must_use]
pub fn literal(call: &Call, index: usize, name: &str) -> String {
  call
    .arg(index, name)
    .map(ToString::to_string)
    .unwrap_or_default()
}

//
// Window
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
  Points(usize),
  Seconds(i64),
}

impl Window {
  // Number of samples covered on a grid with the given step. Never zero.
  #[must_use]
  pub fn points(self, step: i64) -> usize {
    match self {
      Self::Points(points) => points.max(1),
      Self::Seconds(seconds) => usize::try_from(seconds / step.max(1)).unwrap_or(1).max(1),
    }
  }

  // Seconds of history needed before the requested range.
  #[must_use]
  pub const fn lookback(self) -> i64 {
    match self {
      Self::Points(_) => 0,
      Self::Seconds(seconds) => seconds,
    }
  }
}

// Range adjusted by checked arithmetic. Either bound being None means the adjustment overflowed.
pub fn checked_range(
  call: &Call,
  from: Option<i64>,
  until: Option<i64>,
) -> Result<(i64, i64), EvalError> {
  from
    .zip(until)
    .ok_or_else(|| invalid(call, "time range out of bounds"))
}

pub fn window_arg(call: &Call, index: usize, name: &str) -> Result<Window, EvalError> {
  match call.arg(index, name) {
    Some(Expr::Const(value)) => {
      if value.fract() != 0.0 || *value < 1.0 {
        return Err(invalid(call, format!("window must be a positive integer, got {value}")));
      }
      Ok(Window::Points(value.lossy_to_usize()))
    },
    Some(Expr::String(text)) => {
      let seconds = parse_interval(text)?.abs();
      if seconds == 0 {
        return Err(invalid(call, format!("window must be positive, got '{text}'")));
      }
      Ok(Window::Seconds(seconds))
    },
    Some(_) => Err(bad_type(call, index, "a point count or an interval")),
    None => Err(missing(call, index)),
  }
}

//
// Intervals
//

// Parse a signed Graphite interval such as "5min", "-1d" or "2w" into seconds.
pub fn parse_interval(text: &str) -> Result<i64, EvalError> {
  let error = || EvalError::Interval(text.to_string());
  let trimmed = text.trim();
  let (sign, body) = match trimmed.as_bytes().first() {
    Some(b'-') => (-1, &trimmed[1 ..]),
    Some(b'+') => (1, &trimmed[1 ..]),
    _ => (1, trimmed),
  };
  let digits = body
    .find(|c: char| !c.is_ascii_digit())
    .unwrap_or(body.len());
  if digits == 0 {
    return Err(error());
  }
  let amount: i64 = body[.. digits].parse().map_err(|_| error())?;
  let unit_seconds = match body[digits ..].trim() {
    "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
    "m" | "min" | "mins" | "minute" | "minutes" => 60,
    "h" | "hour" | "hours" => 3600,
    "d" | "day" | "days" => 86400,
    "w" | "week" | "weeks" => 7 * 86400,
    "mon" | "month" | "months" => 30 * 86400,
    "y" | "year" | "years" => 365 * 86400,
    _ => return Err(error()),
  };
  amount
    .checked_mul(unit_seconds)
    .map(|seconds| sign * seconds)
    .ok_or_else(error)
}

// Name an output series the way Graphite does, as fname(input,param,...).
#[must_use]
pub fn output_name(call: &Call, input: &str, params: &[String]) -> String {
  let mut name = format!("{}({input}", call.name);
  for param in params {
    name.push(',');
    name.push_str(param);
  }
  name.push(')');
  name
}
