// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./percentile_test.rs"]
mod percentile_test;

use super::FunctionRegistry;
use super::args::{bool_arg, empty, invalid, number_arg, output_name, series_arg};
use crate::evaluator::{EvalContext, EvalError};
use crate::parser::{Call, format_number};
use crate::series::{MetricData, SeriesList};
use pulse_common::{LossyFloatToInt, LossyIntToFloat};
use std::sync::Arc;

// The p-th percentile of a set of valid values. The rank is k = (n - 1) * p / 100 and the value
// at ceil(k) is found by partial selection, so `values` is reordered. With interpolation the
// result blends towards the value at floor(k) by the fractional part of k. Empty input is NaN.
#[must_use]
pub fn percentile(values: &mut [f64], p: f64, interpolate: bool) -> f64 {
  if values.is_empty() {
    return f64::NAN;
  }
  let n = values.len();
  let k = (n - 1).lossy_to_f64() * p.clamp(0.0, 100.0) / 100.0;
  let top_index = k.ceil().lossy_to_usize().min(n - 1);
  let (below, top, _) = values.select_nth_unstable_by(top_index, f64::total_cmp);
  let top = *top;
  let fraction = k - k.floor();
  if !interpolate || fraction == 0.0 {
    return top;
  }
  // Everything left of the selected element is no larger, so its maximum holds rank floor(k).
  let lower = below.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  lower + fraction * (top - lower)
}

fn series_percentile(series: &MetricData, p: f64, interpolate: bool) -> Option<f64> {
  let mut values: Vec<f64> = series.valid_values().collect();
  (!values.is_empty()).then(|| percentile(&mut values, p, interpolate))
}

fn checked_percentile(call: &Call, index: usize) -> Result<f64, EvalError> {
  let p = number_arg(call, index, "n")?;
  if !(0.0 ..= 100.0).contains(&p) {
    return Err(invalid(call, format!("percentile must be within [0, 100], got {p}")));
  }
  Ok(p)
}

// nPercentile(seriesList, n). A flat line at the series' n-th percentile.
fn n_percentile(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let p = checked_percentile(call, 1)?;
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let mut out = series.new_like(output_name(call, &series.name, &[format_number(p)]));
        let value = series_percentile(series, p, false);
        for i in 0 .. out.len() {
          out.set(i, value);
        }
        Arc::new(out)
      })
      .collect(),
  )
}

// percentileOfSeries(seriesList, n, interpolate=false). Percentile across series at each index.
fn percentile_of_series(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let p = checked_percentile(call, 1)?;
  let interpolate = bool_arg(call, 2, "interpolate", false)?;
  let series = series_arg(call, 0, from, until, ctx)?;
  let Some(first) = series.first() else {
    return Err(empty(call));
  };
  for other in &series[1 ..] {
    first.check_aligned(other)?;
  }
  let mut out = first.new_like(output_name(
    call,
    &first.path_expression,
    &[format_number(p)],
  ));
  let mut values = Vec::with_capacity(series.len());
  for i in 0 .. first.len() {
    values.clear();
    values.extend(series.iter().filter_map(|s| s.get(i)));
    out.set(
      i,
      (!values.is_empty()).then(|| percentile(&mut values, p, interpolate)),
    );
  }
  Ok(vec![Arc::new(out)])
}

// Drop samples on the wrong side of each series' own n-th percentile.
fn remove_percentile(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
  keep: fn(f64, f64) -> bool,
) -> Result<SeriesList, EvalError> {
  let p = checked_percentile(call, 1)?;
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let mut out = series.new_like(output_name(call, &series.name, &[format_number(p)]));
        let threshold = series_percentile(series, p, false);
        for (i, value) in series.iter().enumerate() {
          out.set(
            i,
            value.filter(|v| threshold.is_some_and(|threshold| keep(*v, threshold))),
          );
        }
        Arc::new(out)
      })
      .collect(),
  )
}

pub fn register(registry: &mut FunctionRegistry) {
  registry.register_fn("nPercentile", n_percentile);
  registry.register_fn("percentileOfSeries", percentile_of_series);
  registry.register_fn("removeBelowPercentile", |call, from, until, ctx| {
    remove_percentile(call, from, until, ctx, |v, threshold| v >= threshold)
  });
  registry.register_fn("removeAbovePercentile", |call, from, until, ctx| {
    remove_percentile(call, from, until, ctx, |v, threshold| v <= threshold)
  });
}
