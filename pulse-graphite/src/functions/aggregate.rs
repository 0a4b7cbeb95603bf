// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./aggregate_test.rs"]
mod aggregate_test;

use super::FunctionRegistry;
use super::args::{
  empty,
  int_args_from,
  invalid,
  literal,
  series_arg,
  series_args_from,
  single_series_arg,
  string_arg,
};
use super::percentile::percentile;
use crate::evaluator::{EvalContext, EvalError};
use crate::parser::Call;
use crate::series::{MetricData, SeriesList};
use pulse_common::LossyIntToFloat;
use std::sync::Arc;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

//
// Aggregator
//

// A reducer over the valid values found at one index, or in one time bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregator {
  Sum,
  Average,
  Min,
  Max,
  Multiply,
  Diff,
  Range,
  Count,
  Stddev,
  Median,
  First,
  Last,
  Percentile(f64),
}

impl Aggregator {
  // Resolve a Graphite aggregation name. `pNN` selects a percentile.
  #[must_use]
  pub fn from_name(name: &str) -> Option<Self> {
    Some(match name {
      "sum" | "total" => Self::Sum,
      "avg" | "average" => Self::Average,
      "min" => Self::Min,
      "max" => Self::Max,
      "multiply" => Self::Multiply,
      "diff" => Self::Diff,
      "range" | "rangeOf" => Self::Range,
      "count" => Self::Count,
      "stddev" => Self::Stddev,
      "median" => Self::Median,
      "first" => Self::First,
      "last" | "current" => Self::Last,
      _ => {
        let p: f64 = name.strip_prefix('p')?.parse().ok()?;
        if !(0.0 ..= 100.0).contains(&p) {
          return None;
        }
        Self::Percentile(p)
      },
    })
  }

  // Reduce a set of valid values. An empty set has no result.
  #[must_use]
  pub fn reduce(self, values: &mut [f64]) -> Option<f64> {
    let first = *values.first()?;
    let last = *values.last()?;
    let count = values.len().lossy_to_f64();
    Some(match self {
      Self::Sum => values.iter().sum(),
      Self::Average => values.iter().sum::<f64>() / count,
      Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
      Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
      Self::Multiply => values.iter().product(),
      Self::Diff => first - values[1 ..].iter().sum::<f64>(),
      Self::Range => {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        max - min
      },
      Self::Count => count,
      Self::Stddev => {
        let mean = values.iter().sum::<f64>() / count;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
        variance.sqrt()
      },
      Self::Median => percentile(values, 50.0, true),
      Self::First => first,
      Self::Last => last,
      Self::Percentile(p) => percentile(values, p, false),
    })
  }
}

// Reduce aligned series index by index into one output series on the grid of the first input.
// Indexes where no input is valid are absent.
pub fn aggregate_series(
  series: &[Arc<MetricData>],
  name: String,
  aggregator: Aggregator,
) -> Result<MetricData, EvalError> {
  let Some(first) = series.first() else {
    return Ok(MetricData::from_options(name, 0, 1, &[]));
  };
  for other in &series[1 ..] {
    first.check_aligned(other)?;
  }
  let mut out = first.new_like(name.clone());
  out.path_expression = name;
  let mut values = Vec::with_capacity(series.len());
  for i in 0 .. first.len() {
    values.clear();
    values.extend(series.iter().filter_map(|s| s.get(i)));
    out.set(i, aggregator.reduce(&mut values));
  }
  Ok(out)
}

fn aggregate_call(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
  aggregator: Aggregator,
) -> Result<SeriesList, EvalError> {
  let series = series_args_from(call, 0, from, until, ctx)?;
  if series.is_empty() {
    return Err(empty(call));
  }
  let name = format!("{}({})", call.name, call.raw_args);
  Ok(vec![Arc::new(aggregate_series(&series, name, aggregator)?)])
}

// aggregate(seriesList, func). Named after the reducer, e.g. sumSeries(a.*).
fn aggregate_by_name(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let func = string_arg(call, 1, "func")?;
  let aggregator =
    Aggregator::from_name(func).ok_or_else(|| invalid(call, format!("unknown aggregation '{func}'")))?;
  let series = series_arg(call, 0, from, until, ctx)?;
  if series.is_empty() {
    return Err(empty(call));
  }
  let name = format!("{func}Series({})", literal(call, 0, "seriesList"));
  Ok(vec![Arc::new(aggregate_series(&series, name, aggregator)?)])
}

fn count_series(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let series = series_args_from(call, 0, from, until, ctx)?;
  let Some(first) = series.first() else {
    return Err(empty(call));
  };
  for other in &series[1 ..] {
    first.check_aligned(other)?;
  }
  let count = series.len().lossy_to_f64();
  let mut out = first.new_like(format!("{}({})", call.name, call.raw_args));
  for i in 0 .. out.len() {
    out.set(i, Some(count));
  }
  Ok(vec![Arc::new(out)])
}

fn divide_series(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let dividends = series_arg(call, 0, from, until, ctx)?;
  let divisor = single_series_arg(call, 1, from, until, ctx)?;
  dividends
    .iter()
    .map(|dividend| -> Result<Arc<MetricData>, EvalError> {
      let mut out = dividend.new_like(format!("{}({},{})", call.name, dividend.name, divisor.name));
      for (i, a, a_absent, b, b_absent) in MetricData::for_each_aligned(dividend, &divisor)? {
        out.set(i, (!a_absent && !b_absent && b != 0.0).then(|| a / b));
      }
      Ok(Arc::new(out))
    })
    .collect()
}

fn group(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  series_args_from(call, 0, from, until, ctx)
}

// Remove the given dot separated node indexes from a metric name.
#[must_use]
pub fn strip_nodes(name: &str, positions: &[i64]) -> String {
  name
    .split('.')
    .enumerate()
    .filter(|(i, _)| !positions.contains(&i64::try_from(*i).unwrap_or(i64::MAX)))
    .map(|(_, node)| node)
    .collect::<Vec<_>>()
    .join(".")
}

// Partition series into groups keyed by `key`, preserving the order in which keys are first seen.
pub fn group_by_key(
  series: SeriesList,
  key: impl Fn(&MetricData) -> String,
) -> Vec<(String, SeriesList)> {
  let mut index: HashMap<String, usize> = HashMap::default();
  let mut groups: Vec<(String, SeriesList)> = Vec::new();
  for s in series {
    let key = key(&s);
    if let Some(&i) = index.get(&key) {
      groups[i].1.push(s);
    } else {
      index.insert(key.clone(), groups.len());
      groups.push((key, vec![s]));
    }
  }
  groups
}

fn with_wildcards(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
  aggregator: Aggregator,
) -> Result<SeriesList, EvalError> {
  let positions = int_args_from(call, 1)?;
  let series = series_arg(call, 0, from, until, ctx)?;
  group_by_key(series, |s| strip_nodes(&s.name, &positions))
    .into_iter()
    .map(|(key, members)| aggregate_series(&members, key, aggregator).map(Arc::new))
    .collect()
}

pub fn register(registry: &mut FunctionRegistry) {
  for (name, aggregator) in [
    ("sumSeries", Aggregator::Sum),
    ("sum", Aggregator::Sum),
    ("averageSeries", Aggregator::Average),
    ("avg", Aggregator::Average),
    ("minSeries", Aggregator::Min),
    ("maxSeries", Aggregator::Max),
    ("multiplySeries", Aggregator::Multiply),
    ("diffSeries", Aggregator::Diff),
    ("rangeSeries", Aggregator::Range),
    ("stddevSeries", Aggregator::Stddev),
  ] {
    registry.register_fn(name, move |call, from, until, ctx| {
      aggregate_call(call, from, until, ctx, aggregator)
    });
  }
  for (name, aggregator) in [
    ("sumSeriesWithWildcards", Aggregator::Sum),
    ("averageSeriesWithWildcards", Aggregator::Average),
    ("multiplySeriesWithWildcards", Aggregator::Multiply),
  ] {
    registry.register_fn(name, move |call, from, until, ctx| {
      with_wildcards(call, from, until, ctx, aggregator)
    });
  }
  registry.register_fn("aggregate", aggregate_by_name);
  registry.register_fn("countSeries", count_series);
  registry.register_fn("divideSeries", divide_series);
  registry.register_fn("group", group);
}
