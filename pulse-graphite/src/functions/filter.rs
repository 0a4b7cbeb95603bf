// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./filter_test.rs"]
mod filter_test;

use super::FunctionRegistry;
use super::args::{int_arg, invalid, number_arg, series_arg};
use crate::evaluator::{EvalContext, EvalError};
use crate::parser::Call;
use crate::series::{ConsolidationFunc, MetricData, SeriesList};
use std::cmp::Ordering;

// Summary statistic used to rank or filter whole series. Series without valid values have no
// statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesStat {
  Max,
  Current,
  Average,
}

impl SeriesStat {
  #[must_use]
  pub fn of(self, series: &MetricData) -> Option<f64> {
    let values = series.valid_values();
    match self {
      Self::Max => ConsolidationFunc::Max.reduce(values),
      Self::Current => ConsolidationFunc::Last.reduce(values),
      Self::Average => ConsolidationFunc::Average.reduce(values),
    }
  }
}

fn count_arg(call: &Call, index: usize) -> Result<usize, EvalError> {
  let n = int_arg(call, index, "n")?;
  usize::try_from(n).map_err(|_| invalid(call, format!("n must not be negative, got {n}")))
}

fn limit(call: &Call, from: i64, until: i64, ctx: &EvalContext<'_>) -> Result<SeriesList, EvalError> {
  let n = count_arg(call, 1)?;
  let mut series = series_arg(call, 0, from, until, ctx)?;
  series.truncate(n);
  Ok(series)
}

// Order series by a statistic, dropping those without one. The sort is stable so ties keep their
// input order.
fn ranked(series: SeriesList, stat: SeriesStat, descending: bool) -> SeriesList {
  let mut keyed: Vec<(f64, _)> = series
    .into_iter()
    .filter_map(|series| stat.of(&series).map(|key| (key, series)))
    .collect();
  keyed.sort_by(|(a, _), (b, _)| {
    if descending {
      b.total_cmp(a)
    } else {
      a.total_cmp(b)
    }
  });
  keyed.into_iter().map(|(_, series)| series).collect()
}

fn top_n(
  stat: SeriesStat,
  descending: bool,
) -> impl Fn(&Call, i64, i64, &EvalContext<'_>) -> Result<SeriesList, EvalError> + Send + Sync {
  move |call, from, until, ctx| {
    let n = count_arg(call, 1)?;
    let mut series = ranked(series_arg(call, 0, from, until, ctx)?, stat, descending);
    series.truncate(n);
    Ok(series)
  }
}

fn sort_by_maxima(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let mut series = series_arg(call, 0, from, until, ctx)?;
  // Series without a maximum sort last.
  series.sort_by(|a, b| match (SeriesStat::Max.of(a), SeriesStat::Max.of(b)) {
    (Some(a), Some(b)) => b.total_cmp(&a),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => Ordering::Equal,
  });
  Ok(series)
}

fn sort_by_name(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let mut series = series_arg(call, 0, from, until, ctx)?;
  series.sort_by(|a, b| a.name.cmp(&b.name));
  Ok(series)
}

// Keep series whose statistic is strictly above the threshold, or at most the threshold.
fn threshold_filter(
  stat: SeriesStat,
  above: bool,
) -> impl Fn(&Call, i64, i64, &EvalContext<'_>) -> Result<SeriesList, EvalError> + Send + Sync {
  move |call, from, until, ctx| {
    let threshold = number_arg(call, 1, "n")?;
    Ok(
      series_arg(call, 0, from, until, ctx)?
        .into_iter()
        .filter(|series| {
          stat.of(series).is_some_and(|value| {
            if above {
              value > threshold
            } else {
              value <= threshold
            }
          })
        })
        .collect(),
    )
  }
}

pub fn register(registry: &mut FunctionRegistry) {
  registry.register_fn("limit", limit);
  registry.register_fn("highestMax", top_n(SeriesStat::Max, true));
  registry.register_fn("highestCurrent", top_n(SeriesStat::Current, true));
  registry.register_fn("highestAverage", top_n(SeriesStat::Average, true));
  registry.register_fn("lowestAverage", top_n(SeriesStat::Average, false));
  registry.register_fn("lowestCurrent", top_n(SeriesStat::Current, false));
  registry.register_fn("sortByMaxima", sort_by_maxima);
  registry.register_fn("sortByName", sort_by_name);
  registry.register_fn("averageAbove", threshold_filter(SeriesStat::Average, true));
  registry.register_fn("averageBelow", threshold_filter(SeriesStat::Average, false));
  registry.register_fn("maximumAbove", threshold_filter(SeriesStat::Max, true));
  registry.register_fn("maximumBelow", threshold_filter(SeriesStat::Max, false));
  registry.register_fn("currentAbove", threshold_filter(SeriesStat::Current, true));
  registry.register_fn("currentBelow", threshold_filter(SeriesStat::Current, false));
}
