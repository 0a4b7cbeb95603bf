// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./window_test.rs"]
mod window_test;

use super::args::{
  Window,
  checked_range,
  invalid,
  literal,
  optional_number,
  output_name,
  series_arg,
  window_arg,
};
use super::percentile::percentile;
use super::{Function, FunctionRegistry};
use crate::config::EvaluatorConfig;
use crate::evaluator::{EvalContext, EvalError};
use crate::parser::Call;
use crate::series::{MetricData, SeriesList};
use pulse_common::LossyIntToFloat;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStat {
  Average,
  Sum,
  Min,
  Max,
  Median,
  Stddev,
}

//
// RollingWindow
//

// The last W samples of a series. Absent samples occupy a slot as NaN so that a window spanning a
// gap has fewer valid values rather than reaching further back.
pub struct RollingWindow {
  slots: Vec<f64>,
  next: usize,
  pushed: usize,
  valid: usize,
  sum: f64,
  sum_of_squares: f64,
}

impl RollingWindow {
  #[must_use]
  pub fn new(size: usize) -> Self {
    Self {
      slots: vec![f64::NAN; size.max(1)],
      next: 0,
      pushed: 0,
      valid: 0,
      sum: 0.0,
      sum_of_squares: 0.0,
    }
  }

  pub fn push(&mut self, value: Option<f64>) {
    let evicted = self.slots[self.next];
    if !evicted.is_nan() {
      self.valid -= 1;
      self.sum -= evicted;
      self.sum_of_squares -= evicted * evicted;
    }
    let value = value.unwrap_or(f64::NAN);
    if !value.is_nan() {
      self.valid += 1;
      self.sum += value;
      self.sum_of_squares += value * value;
    }
    self.slots[self.next] = value;
    self.next = (self.next + 1) % self.slots.len();
    self.pushed += 1;
  }

  #[must_use]
  pub const fn is_full(&self) -> bool {
    self.pushed >= self.slots.len()
  }

  // Fraction of the window holding valid samples.
  #[must_use]
  pub fn valid_fraction(&self) -> f64 {
    self.valid.lossy_to_f64() / self.slots.len().lossy_to_f64()
  }

  fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
    self.slots.iter().copied().filter(|v| !v.is_nan())
  }

  // The statistic over the window, or None until W samples were pushed or when the valid fraction
  // is below `min_valid_fraction`. Exactly reaching the fraction counts as valid.
  #[must_use]
  pub fn stat(&self, stat: WindowStat, min_valid_fraction: f64) -> Option<f64> {
    if !self.is_full() || self.valid == 0 || self.valid_fraction() < min_valid_fraction {
      return None;
    }
    let count = self.valid.lossy_to_f64();
    Some(match stat {
      WindowStat::Average => self.sum / count,
      WindowStat::Sum => self.sum,
      WindowStat::Min => self.valid_values().fold(f64::INFINITY, f64::min),
      WindowStat::Max => self.valid_values().fold(f64::NEG_INFINITY, f64::max),
      WindowStat::Median => {
        let mut values: Vec<f64> = self.valid_values().collect();
        percentile(&mut values, 50.0, true)
      },
      WindowStat::Stddev => {
        let mean = self.sum / count;
        (self.sum_of_squares / count - mean * mean).max(0.0).sqrt()
      },
    })
  }
}

//
// MovingWindow
//

// movingAverage and friends, plus stdev. A window given as an interval needs that much history
// before the requested range, which is fetched and then trimmed away.
pub struct MovingWindow {
  stat: WindowStat,
  // Keyword carrying the minimum valid fraction. Without a default the evaluator's configured
  // xFilesFactor applies.
  tolerance_name: &'static str,
  default_tolerance: Option<f64>,
}

impl MovingWindow {
  fn window(call: &Call) -> Result<Window, EvalError> {
    window_arg(call, 1, "windowSize")
  }
}

impl Function for MovingWindow {
  fn evaluate(
    &self,
    call: &Call,
    from: i64,
    until: i64,
    ctx: &EvalContext<'_>,
  ) -> Result<SeriesList, EvalError> {
    let window = Self::window(call)?;
    let tolerance = optional_number(call, 2, self.tolerance_name)?
      .or(self.default_tolerance)
      .unwrap_or(ctx.config().default_xfiles_factor);
    if !(0.0 ..= 1.0).contains(&tolerance) {
      return Err(invalid(
        call,
        format!("{} must be within [0, 1], got {tolerance}", self.tolerance_name),
      ));
    }
    let (fetch_from, fetch_until) = self.request_range(call, from, until, ctx.config())?;
    let window_literal = literal(call, 1, "windowSize");
    Ok(
      series_arg(call, 0, fetch_from, fetch_until, ctx)?
        .iter()
        .map(|series| {
          let name = output_name(call, &series.name, std::slice::from_ref(&window_literal));
          let out = rolling(series, name, window.points(series.step), self.stat, tolerance);
          Arc::new(if window.lookback() > 0 {
            out.trim_before(from)
          } else {
            out
          })
        })
        .collect(),
    )
  }

  fn request_range(
    &self,
    call: &Call,
    from: i64,
    until: i64,
    _config: &EvaluatorConfig,
  ) -> Result<(i64, i64), EvalError> {
    let lookback = Self::window(call)?.lookback();
    checked_range(call, from.checked_sub(lookback), Some(until))
  }
}

pub fn register(registry: &mut FunctionRegistry) {
  for (name, stat) in [
    ("movingAverage", WindowStat::Average),
    ("movingSum", WindowStat::Sum),
    ("movingMin", WindowStat::Min),
    ("movingMax", WindowStat::Max),
    ("movingMedian", WindowStat::Median),
  ] {
    registry.register(
      name,
      Arc::new(MovingWindow {
        stat,
        tolerance_name: "xFilesFactor",
        default_tolerance: None,
      }),
    );
  }
  registry.register(
    "stdev",
    Arc::new(MovingWindow {
      stat: WindowStat::Stddev,
      tolerance_name: "windowTolerance",
      default_tolerance: Some(0.1),
    }),
  );
}

// Apply a rolling statistic over a series, producing an output on the same grid.
#[must_use]
pub fn rolling(
  series: &MetricData,
  name: String,
  points: usize,
  stat: WindowStat,
  tolerance: f64,
) -> MetricData {
  let mut out = series.new_like(name);
  let mut window = RollingWindow::new(points);
  for (i, value) in series.iter().enumerate() {
    window.push(value);
    out.set(i, window.stat(stat, tolerance));
  }
  out
}
