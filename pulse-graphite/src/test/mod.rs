// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::evaluator::{EvalError, Evaluator};
use crate::fetch::MemoryFetcher;
use crate::parser::parse;
use crate::request::FetchedSeries;
use crate::series::{MetricData, SeriesList};

pub mod thread_synchronizer;

#[must_use]
pub fn make_series(name: &str, start: i64, step: i64, samples: &[Option<f64>]) -> MetricData {
  MetricData::from_options(name, start, step, samples)
}

// Samples of a series rounded to 6 decimal places so float results compare stably.
#[must_use]
pub fn rounded(series: &MetricData) -> Vec<Option<f64>> {
  series
    .iter()
    .map(|value| value.map(|v| (v * 1e6).round() / 1e6))
    .collect()
}

#[must_use]
pub fn names(series: &SeriesList) -> Vec<&str> {
  series.iter().map(|s| s.name.as_str()).collect()
}

// Plan, fetch and evaluate a target against in-memory series using the default evaluator.
pub fn eval_target(
  target: &str,
  from: i64,
  until: i64,
  series: Vec<MetricData>,
) -> Result<SeriesList, EvalError> {
  eval_target_with(&Evaluator::default(), target, from, until, series)
}

pub fn eval_target_with(
  evaluator: &Evaluator,
  target: &str,
  from: i64,
  until: i64,
  series: Vec<MetricData>,
) -> Result<SeriesList, EvalError> {
  let expr = parse(target).map_err(|e| EvalError::Internal(e.to_string()))?;
  let fetcher = MemoryFetcher::new(series);
  let mut fetched = FetchedSeries::default();
  for request in evaluator.metric_requests(&expr, from, until)? {
    let matched = fetcher
      .resolve(&request)
      .map_err(|e| EvalError::Internal(e.to_string()))?;
    fetched.insert(request, matched);
  }
  evaluator.evaluate_target(&expr, from, until, &fetched)
}
