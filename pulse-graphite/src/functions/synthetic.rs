// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./synthetic_test.rs"]
mod synthetic_test;

use super::FunctionRegistry;
use super::args::{number_arg, optional_string};
use crate::evaluator::{EvalContext, EvalError};
use crate::parser::{Call, format_number};
use crate::series::{SeriesList, constant_series};
use std::sync::Arc;

// constantLine(value)
fn constant_line(
  call: &Call,
  from: i64,
  until: i64,
  _ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let value = number_arg(call, 0, "value")?;
  Ok(vec![Arc::new(constant_series(
    format_number(value),
    value,
    from,
    until,
  ))])
}

// threshold(value, label=None, color=None). Colors only matter to graph rendering.
fn threshold(
  call: &Call,
  from: i64,
  until: i64,
  _ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let value = number_arg(call, 0, "value")?;
  let name = optional_string(call, 1, "label")?.map_or_else(|| format_number(value), str::to_string);
  // Only type checked.
  let _color = optional_string(call, 2, "color")?;
  Ok(vec![Arc::new(constant_series(name, value, from, until))])
}

pub fn register(registry: &mut FunctionRegistry) {
  registry.register_fn("constantLine", constant_line);
  registry.register_fn("threshold", threshold);
}
