// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./forecast_test.rs"]
mod forecast_test;

use super::args::{
  bool_arg,
  checked_range,
  invalid,
  optional_number,
  optional_string,
  parse_interval,
  series_arg,
  string_arg,
};
use super::{Function, FunctionRegistry};
use crate::config::EvaluatorConfig;
use crate::evaluator::{EvalContext, EvalError};
use crate::parser::Call;
use crate::series::{MetricData, SeriesList};
use std::sync::Arc;

//
// timeShift
//

// timeShift(seriesList, timeShift, resetEnd=true). The argument is evaluated over the range moved
// by the offset and the result is moved back onto the requested range. An unsigned offset points
// into the past.
struct TimeShift;

impl TimeShift {
  fn offset(call: &Call) -> Result<i64, EvalError> {
    let text = string_arg(call, 1, "timeShift")?.trim();
    let seconds = parse_interval(text)?;
    Ok(if text.starts_with(['+', '-']) {
      seconds
    } else {
      -seconds
    })
  }
}

impl Function for TimeShift {
  fn evaluate(
    &self,
    call: &Call,
    from: i64,
    until: i64,
    ctx: &EvalContext<'_>,
  ) -> Result<SeriesList, EvalError> {
    let offset = Self::offset(call)?;
    let reset_end = bool_arg(call, 2, "resetEnd", true)?;
    let text = string_arg(call, 1, "timeShift")?;
    let (shifted_from, shifted_until) = self.request_range(call, from, until, ctx.config())?;
    Ok(
      series_arg(call, 0, shifted_from, shifted_until, ctx)?
        .iter()
        .map(|series| {
          let mut shifted = series.with_name(format!("{}({},\"{text}\")", call.name, series.name));
          shifted.start = shifted.start.saturating_sub(offset);
          shifted.stop = shifted.stop.saturating_sub(offset);
          Arc::new(if reset_end {
            shifted.trim_after(until)
          } else {
            shifted
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
    let offset = Self::offset(call)?;
    checked_range(call, from.checked_add(offset), until.checked_add(offset))
  }
}

//
// Holt-Winters
//

const ALPHA: f64 = 0.1;
const BETA: f64 = 0.0035;
const GAMMA: f64 = 0.1;
const DEFAULT_SEASONALITY: i64 = 86400;

// Per-sample output of triple exponential smoothing. A prediction is made for every sample from
// the state after the previous one; deviations track the seasonal absolute prediction error.
#[derive(Debug, Default)]
pub struct HoltWintersAnalysis {
  pub predictions: Vec<Option<f64>>,
  pub deviations: Vec<f64>,
}

#[must_use]
pub fn holt_winters_analysis(series: &MetricData, seasonality: i64) -> HoltWintersAnalysis {
  let season_length = usize::try_from(seasonality / series.step.max(1))
    .unwrap_or(1)
    .max(1);
  let mut intercepts: Vec<Option<f64>> = Vec::with_capacity(series.len());
  let mut slopes = Vec::with_capacity(series.len());
  let mut seasonals = Vec::with_capacity(series.len());
  let mut analysis = HoltWintersAnalysis::default();
  let mut next_prediction = None;

  let last_season = |values: &[f64], i: usize| {
    i.checked_sub(season_length)
      .map_or(0.0, |j| values.get(j).copied().unwrap_or(0.0))
  };

  for (i, value) in series.iter().enumerate() {
    let Some(actual) = value else {
      intercepts.push(None);
      slopes.push(0.0);
      seasonals.push(0.0);
      analysis.predictions.push(next_prediction);
      analysis.deviations.push(0.0);
      next_prediction = None;
      continue;
    };

    let (last_intercept, last_slope, prediction) = if i == 0 {
      (actual, 0.0, Some(actual))
    } else {
      (
        intercepts[i - 1].unwrap_or(actual),
        slopes[i - 1],
        next_prediction,
      )
    };
    let last_seasonal = last_season(&seasonals, i);
    let next_last_seasonal = last_season(&seasonals, i + 1);
    let last_deviation = last_season(&analysis.deviations, i);

    let intercept = ALPHA * (actual - last_seasonal) + (1.0 - ALPHA) * (last_intercept + last_slope);
    let slope = BETA * (intercept - last_intercept) + (1.0 - BETA) * last_slope;
    let seasonal = GAMMA * (actual - intercept) + (1.0 - GAMMA) * last_seasonal;
    let deviation =
      GAMMA * (actual - prediction.unwrap_or(0.0)).abs() + (1.0 - GAMMA) * last_deviation;
    next_prediction = Some(intercept + slope + next_last_seasonal);

    intercepts.push(Some(intercept));
    slopes.push(slope);
    seasonals.push(seasonal);
    analysis.predictions.push(prediction);
    analysis.deviations.push(deviation);
  }
  analysis
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoltWintersOutput {
  Forecast,
  ConfidenceBands,
  Aberration,
}

// holtWintersForecast(seriesList, bootstrapInterval, seasonality) and the band and aberration
// variants, which take a delta before the bootstrap interval. The model is trained over the
// bootstrap window preceding the range and only the requested range is returned.
struct HoltWinters {
  output: HoltWintersOutput,
}

impl HoltWinters {
  const fn bootstrap_index(&self) -> usize {
    match self.output {
      HoltWintersOutput::Forecast => 1,
      HoltWintersOutput::ConfidenceBands | HoltWintersOutput::Aberration => 2,
    }
  }

  fn bootstrap(&self, call: &Call, config: &EvaluatorConfig) -> Result<i64, EvalError> {
    optional_string(call, self.bootstrap_index(), "bootstrapInterval")?.map_or_else(
      || Ok(config.holt_winters_bootstrap_seconds()),
      |text| parse_interval(text).map(i64::abs),
    )
  }

  fn seasonality(&self, call: &Call) -> Result<i64, EvalError> {
    let seasonality = optional_string(call, self.bootstrap_index() + 1, "seasonality")?
      .map_or(Ok(DEFAULT_SEASONALITY), |text| parse_interval(text).map(i64::abs))?;
    if seasonality == 0 {
      return Err(invalid(call, "seasonality must be positive"));
    }
    Ok(seasonality)
  }

  fn bands(
    series: &MetricData,
    analysis: &HoltWintersAnalysis,
    delta: f64,
  ) -> (MetricData, MetricData) {
    let mut lower = series.new_like(format!("holtWintersConfidenceLower({})", series.name));
    let mut upper = series.new_like(format!("holtWintersConfidenceUpper({})", series.name));
    for (i, prediction) in analysis.predictions.iter().enumerate() {
      let spread = delta * analysis.deviations[i];
      lower.set(i, prediction.map(|p| p - spread));
      upper.set(i, prediction.map(|p| p + spread));
    }
    (lower, upper)
  }
}

impl Function for HoltWinters {
  fn evaluate(
    &self,
    call: &Call,
    from: i64,
    until: i64,
    ctx: &EvalContext<'_>,
  ) -> Result<SeriesList, EvalError> {
    let delta = if self.output == HoltWintersOutput::Forecast {
      0.0
    } else {
      optional_number(call, 1, "delta")?.unwrap_or(3.0)
    };
    let seasonality = self.seasonality(call)?;
    let (fetch_from, fetch_until) = self.request_range(call, from, until, ctx.config())?;

    let mut results = Vec::new();
    for series in series_arg(call, 0, fetch_from, fetch_until, ctx)? {
      let analysis = holt_winters_analysis(&series, seasonality);
      match self.output {
        HoltWintersOutput::Forecast => {
          let mut forecast = series.new_like(format!("holtWintersForecast({})", series.name));
          for (i, prediction) in analysis.predictions.iter().enumerate() {
            forecast.set(i, *prediction);
          }
          results.push(Arc::new(forecast.trim_before(from)));
        },
        HoltWintersOutput::ConfidenceBands => {
          let (lower, upper) = Self::bands(&series, &analysis, delta);
          results.push(Arc::new(lower.trim_before(from)));
          results.push(Arc::new(upper.trim_before(from)));
        },
        HoltWintersOutput::Aberration => {
          let (lower, upper) = Self::bands(&series, &analysis, delta);
          let mut aberration =
            series.new_like(format!("holtWintersAberration({})", series.name));
          for (i, actual) in series.iter().enumerate() {
            let distance = match (actual, lower.get(i), upper.get(i)) {
              (Some(actual), _, Some(upper)) if actual > upper => actual - upper,
              (Some(actual), Some(lower), _) if actual < lower => actual - lower,
              _ => 0.0,
            };
            aberration.set(i, Some(distance));
          }
          results.push(Arc::new(aberration.trim_before(from)));
        },
      }
    }
    Ok(results)
  }

  fn request_range(
    &self,
    call: &Call,
    from: i64,
    until: i64,
    config: &EvaluatorConfig,
  ) -> Result<(i64, i64), EvalError> {
    let bootstrap = self.bootstrap(call, config)?;
    checked_range(call, from.checked_sub(bootstrap), Some(until))
  }
}

pub fn register(registry: &mut FunctionRegistry) {
  registry.register("timeShift", Arc::new(TimeShift));
  for (name, output) in [
    ("holtWintersForecast", HoltWintersOutput::Forecast),
    ("holtWintersConfidenceBands", HoltWintersOutput::ConfidenceBands),
    ("holtWintersAberration", HoltWintersOutput::Aberration),
  ] {
    registry.register(name, Arc::new(HoltWinters { output }));
  }
}
