// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./summarize_test.rs"]
mod summarize_test;

use super::FunctionRegistry;
use super::aggregate::Aggregator;
use super::args::{bool_arg, invalid, optional_string, output_name, parse_interval, series_arg, string_arg};
use crate::evaluator::{EvalContext, EvalError};
use crate::parser::Call;
use crate::series::{ConsolidationFunc, MetricData, SeriesList};
use pulse_common::LossyIntToFloat;
use std::sync::Arc;

//
// BucketLayout
//

// Fixed width time buckets laid over a series. Bucket i covers [start + i * width, start + (i + 1)
// * width). The last bucket may be partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLayout {
  pub start: i64,
  pub width: i64,
  pub count: usize,
}

impl BucketLayout {
  // Buckets start at `origin` when given, otherwise at the series start, and extend far enough to
  // cover every sample.
  #[must_use]
  pub fn new(series: &MetricData, width: i64, origin: Option<i64>) -> Self {
    let width = width.max(1);
    let start = origin.unwrap_or(series.start);
    let span = (series.grid_end() - start).max(0);
    let count = usize::try_from((span + width - 1) / width).unwrap_or(0);
    Self {
      start,
      width,
      count,
    }
  }

  #[must_use]
  pub fn bucket_of(&self, timestamp: i64) -> Option<usize> {
    if timestamp < self.start {
      return None;
    }
    usize::try_from((timestamp - self.start) / self.width)
      .ok()
      .filter(|bucket| *bucket < self.count)
  }

  // The samples of a series grouped by bucket, absent samples included as None.
  #[must_use]
  pub fn partition(&self, series: &MetricData) -> Vec<Vec<Option<f64>>> {
    let mut buckets = vec![Vec::new(); self.count];
    for (i, value) in series.iter().enumerate() {
      if let Some(bucket) = self.bucket_of(series.timestamp(i)) {
        buckets[bucket].push(value);
      }
    }
    buckets
  }

  fn output(&self, series: &MetricData, name: String) -> MetricData {
    let mut out = MetricData::from_options(name, self.start, self.width, &vec![None; self.count]);
    out.path_expression.clone_from(&series.path_expression);
    out.consolidation = series.consolidation;
    for (key, value) in &series.tags {
      if key != "name" {
        out.tags.insert(key.clone(), value.clone());
      }
    }
    out
  }
}

fn interval_arg(call: &Call) -> Result<(i64, String), EvalError> {
  let text = string_arg(call, 1, "intervalString")?;
  let width = parse_interval(text)?.abs();
  if width == 0 {
    return Err(invalid(call, "interval must be positive"));
  }
  Ok((width, format!("\"{text}\"")))
}

// summarize(seriesList, intervalString, func="sum", alignToFrom=false)
fn summarize(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let (width, interval_literal) = interval_arg(call)?;
  let func = optional_string(call, 2, "func")?.unwrap_or("sum");
  let aggregator =
    Aggregator::from_name(func).ok_or_else(|| invalid(call, format!("unknown aggregation '{func}'")))?;
  let align_to_from = bool_arg(call, 3, "alignToFrom", false)?;
  let mut params = vec![interval_literal, format!("\"{func}\"")];
  if align_to_from {
    params.push("true".to_string());
  }
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let layout = BucketLayout::new(series, width, align_to_from.then_some(from));
        let mut out = layout.output(series, output_name(call, &series.name, &params));
        let mut values = Vec::new();
        for (i, bucket) in layout.partition(series).into_iter().enumerate() {
          values.clear();
          values.extend(bucket.into_iter().flatten());
          out.set(i, aggregator.reduce(&mut values));
        }
        Arc::new(out)
      })
      .collect(),
  )
}

// hitcount(seriesList, intervalString). Treats values as rates per second of the source step and
// totals the hits that landed in each bucket.
fn hitcount(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let (width, interval_literal) = interval_arg(call)?;
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let layout = BucketLayout::new(series, width, None);
        let mut out = layout.output(
          series,
          output_name(call, &series.name, std::slice::from_ref(&interval_literal)),
        );
        let step = series.step.lossy_to_f64();
        for (i, bucket) in layout.partition(series).into_iter().enumerate() {
          let hits = bucket.into_iter().flatten().map(|v| v * step);
          out.set(i, ConsolidationFunc::Sum.reduce(hits));
        }
        Arc::new(out)
      })
      .collect(),
  )
}

// consolidateBy(seriesList, func). Only changes how the series is folded when downsampled.
fn consolidate_by(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let func = string_arg(call, 1, "consolidationFunc")?;
  let consolidation = ConsolidationFunc::from_name(func)
    .ok_or_else(|| invalid(call, format!("unknown consolidation function '{func}'")))?;
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let mut out = series.with_name(output_name(call, &series.name, &[format!("\"{func}\"")]));
        out.consolidation = consolidation;
        Arc::new(out)
      })
      .collect(),
  )
}

pub fn register(registry: &mut FunctionRegistry) {
  registry.register_fn("summarize", summarize);
  registry.register_fn("hitcount", hitcount);
  registry.register_fn("consolidateBy", consolidate_by);
}
