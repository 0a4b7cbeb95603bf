// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./naming_test.rs"]
mod naming_test;

use super::FunctionRegistry;
use super::args::{int_args_from, invalid, series_arg, string_arg};
use crate::evaluator::{EvalContext, EvalError};
use crate::parser::Call;
use crate::series::SeriesList;
use regex::Regex;
use std::sync::Arc;

// The metric path inside a generated series name, e.g. "a.b.c" for "scale(a.b.c,2)". The
// innermost call's first argument wins.
#[must_use]
pub fn base_metric(name: &str) -> &str {
  let inner = name.rfind('(').map_or(name, |open| &name[open + 1 ..]);
  let mut depth = 0_usize;
  for (i, c) in inner.char_indices() {
    match c {
      '{' | '[' => depth += 1,
      '}' | ']' => depth = depth.saturating_sub(1),
      ',' | ')' if depth == 0 => return inner[.. i].trim(),
      _ => {},
    }
  }
  inner.trim()
}

// Select path nodes by index, negative indexes counting from the end.
pub fn select_nodes(path: &str, nodes: &[i64]) -> Option<String> {
  let parts: Vec<&str> = path.split('.').collect();
  let len = i64::try_from(parts.len()).ok()?;
  let selected: Option<Vec<&str>> = nodes
    .iter()
    .map(|node| {
      let index = if *node < 0 { len + node } else { *node };
      usize::try_from(index)
        .ok()
        .and_then(|index| parts.get(index).copied())
    })
    .collect();
  selected.map(|selected| selected.join("."))
}

fn alias(call: &Call, from: i64, until: i64, ctx: &EvalContext<'_>) -> Result<SeriesList, EvalError> {
  let name = string_arg(call, 1, "newName")?;
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| Arc::new(series.with_name(name)))
      .collect(),
  )
}

fn alias_by_node(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let nodes = int_args_from(call, 1)?;
  if nodes.is_empty() {
    return Err(invalid(call, "at least one node is required"));
  }
  series_arg(call, 0, from, until, ctx)?
    .iter()
    .map(|series| {
      let name = select_nodes(base_metric(&series.name), &nodes).ok_or_else(|| {
        invalid(
          call,
          format!("node index out of range for '{}'", series.name),
        )
      })?;
      Ok(Arc::new(series.with_name(name)))
    })
    .collect()
}

fn alias_by_metric(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let base = base_metric(&series.name);
        let metric = base.rsplit('.').next().unwrap_or(base);
        Arc::new(series.with_name(metric))
      })
      .collect(),
  )
}

// Backreferences are written \1 in Graphite and ${1} for the regex crate.
fn replacement(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut chars = text.chars().peekable();
  while let Some(c) = chars.next() {
    if c == '\\' && chars.peek().is_some_and(char::is_ascii_digit) {
      out.push_str("${");
      while let Some(digit) = chars.next_if(char::is_ascii_digit) {
        out.push(digit);
      }
      out.push('}');
    } else if c == '$' {
      out.push_str("$$");
    } else {
      out.push(c);
    }
  }
  out
}

fn alias_sub(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let search = string_arg(call, 1, "search")?;
  let regex =
    Regex::new(search).map_err(|e| invalid(call, format!("invalid pattern '{search}': {e}")))?;
  let replace = replacement(string_arg(call, 2, "replace")?);
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let name = regex.replace_all(&series.name, replace.as_str());
        Arc::new(series.with_name(name))
      })
      .collect(),
  )
}

pub fn register(registry: &mut FunctionRegistry) {
  registry.register_fn("alias", alias);
  registry.register_fn("aliasByNode", alias_by_node);
  registry.register_fn("aliasByMetric", alias_by_metric);
  registry.register_fn("aliasSub", alias_sub);
}
