// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./transform_test.rs"]
mod transform_test;

use super::FunctionRegistry;
use super::args::{invalid, number_arg, optional_number, output_name, series_arg};
use crate::evaluator::{EvalContext, EvalError};
use crate::parser::{Call, format_number};
use crate::series::{MetricData, SeriesList};
use pulse_common::LossyIntToFloat;
use std::sync::Arc;

// Apply `f` to every valid sample of every series in the first argument. Absent samples stay
// absent, and `f` may also drop a sample by returning None.
fn map_series(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
  params: &[String],
  f: impl Fn(f64) -> Option<f64>,
) -> Result<SeriesList, EvalError> {
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let mut out = series.new_like(output_name(call, &series.name, params));
        for (i, value) in series.iter().enumerate() {
          out.set(i, value.and_then(&f));
        }
        Arc::new(out)
      })
      .collect(),
  )
}

// Fold each series left to right with access to the previous valid sample. The previous sample
// resets to None across a gap.
fn map_with_previous(
  series: &MetricData,
  name: String,
  f: impl Fn(f64, Option<f64>) -> Option<f64>,
) -> MetricData {
  let mut out = series.new_like(name);
  let mut previous = None;
  for (i, value) in series.iter().enumerate() {
    out.set(i, value.and_then(|v| f(v, previous)));
    previous = value;
  }
  out
}

fn derivative_like(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
  per_second: bool,
  non_negative: bool,
) -> Result<SeriesList, EvalError> {
  let max_value = if non_negative {
    optional_number(call, 1, "maxValue")?
  } else {
    None
  };
  let params: Vec<String> = max_value.map(format_number).into_iter().collect();
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let step = series.step.lossy_to_f64();
        Arc::new(map_with_previous(
          series,
          output_name(call, &series.name, &params),
          |value, previous| {
            let previous = previous?;
            let delta = value - previous;
            let delta = if delta >= 0.0 || !non_negative {
              delta
            } else {
              // Counter wrap. Without a known maximum the sample is dropped.
              let max_value = max_value.filter(|max_value| *max_value >= value)?;
              max_value - previous + value + 1.0
            };
            Some(if per_second { delta / step } else { delta })
          },
        ))
      })
      .collect(),
  )
}

// Fill a gap of absent samples in [start, end) with the last valid value if the gap is no longer
// than the limit.
fn fill_gap(out: &mut MetricData, start: usize, end: usize, last: Option<f64>, limit: f64) {
  let Some(last) = last else {
    return;
  };
  if (end - start).lossy_to_f64() > limit {
    return;
  }
  for i in start .. end {
    out.set(i, Some(last));
  }
}

fn keep_last_value(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let limit = optional_number(call, 1, "limit")?.unwrap_or(f64::INFINITY);
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let mut out = series.with_name(output_name(call, &series.name, &[]));
        let mut last = None;
        let mut gap_start = None;
        for (i, value) in series.iter().enumerate() {
          match value {
            None => {
              gap_start.get_or_insert(i);
            },
            Some(value) => {
              if let Some(start) = gap_start.take() {
                fill_gap(&mut out, start, i, last, limit);
              }
              last = Some(value);
            },
          }
        }
        if let Some(start) = gap_start {
          fill_gap(&mut out, start, series.len(), last, limit);
        }
        Arc::new(out)
      })
      .collect(),
  )
}

fn transform_null(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let default = optional_number(call, 1, "default")?.unwrap_or(0.0);
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let mut out = series.new_like(output_name(call, &series.name, &[format_number(default)]));
        for (i, value) in series.iter().enumerate() {
          out.set(i, Some(value.unwrap_or(default)));
        }
        Arc::new(out)
      })
      .collect(),
  )
}

fn is_non_null(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let mut out = series.new_like(output_name(call, &series.name, &[]));
        for (i, value) in series.iter().enumerate() {
          out.set(i, Some(if value.is_some() { 1.0 } else { 0.0 }));
        }
        Arc::new(out)
      })
      .collect(),
  )
}

fn integral(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let mut out = series.new_like(output_name(call, &series.name, &[]));
        let mut total = 0.0;
        for (i, value) in series.iter().enumerate() {
          out.set(
            i,
            value.map(|v| {
              total += v;
              total
            }),
          );
        }
        Arc::new(out)
      })
      .collect(),
  )
}

fn scale_to_seconds(
  call: &Call,
  from: i64,
  until: i64,
  ctx: &EvalContext<'_>,
) -> Result<SeriesList, EvalError> {
  let seconds = number_arg(call, 1, "seconds")?;
  Ok(
    series_arg(call, 0, from, until, ctx)?
      .iter()
      .map(|series| {
        let factor = seconds / series.step.lossy_to_f64();
        let mut out = series.new_like(output_name(call, &series.name, &[format_number(seconds)]));
        for (i, value) in series.iter().enumerate() {
          out.set(i, value.map(|v| v * factor));
        }
        Arc::new(out)
      })
      .collect(),
  )
}

pub fn register(registry: &mut FunctionRegistry) {
  registry.register_fn("absolute", |call, from, until, ctx| {
    map_series(call, from, until, ctx, &[], |v| Some(v.abs()))
  });
  registry.register_fn("scale", |call, from, until, ctx| {
    let factor = number_arg(call, 1, "factor")?;
    map_series(call, from, until, ctx, &[format_number(factor)], |v| {
      Some(v * factor)
    })
  });
  registry.register_fn("offset", |call, from, until, ctx| {
    let factor = number_arg(call, 1, "factor")?;
    map_series(call, from, until, ctx, &[format_number(factor)], |v| {
      Some(v + factor)
    })
  });
  registry.register_fn("invert", |call, from, until, ctx| {
    map_series(call, from, until, ctx, &[], |v| {
      (v != 0.0).then(|| v.recip())
    })
  });
  registry.register_fn("pow", |call, from, until, ctx| {
    let factor = number_arg(call, 1, "factor")?;
    map_series(call, from, until, ctx, &[format_number(factor)], |v| {
      Some(v.powf(factor))
    })
  });
  registry.register_fn("squareRoot", |call, from, until, ctx| {
    map_series(call, from, until, ctx, &[], |v| Some(v.sqrt()))
  });
  for name in ["logarithm", "log"] {
    registry.register_fn(name, |call, from, until, ctx| {
      let base = optional_number(call, 1, "base")?.unwrap_or(10.0);
      if base <= 0.0 || base == 1.0 {
        return Err(invalid(call, format!("invalid log base {base}")));
      }
      map_series(call, from, until, ctx, &[format_number(base)], |v| {
        (v > 0.0).then(|| v.log(base))
      })
    });
  }
  registry.register_fn("removeBelowValue", |call, from, until, ctx| {
    let n = number_arg(call, 1, "n")?;
    map_series(call, from, until, ctx, &[format_number(n)], |v| {
      (v >= n).then_some(v)
    })
  });
  registry.register_fn("removeAboveValue", |call, from, until, ctx| {
    let n = number_arg(call, 1, "n")?;
    map_series(call, from, until, ctx, &[format_number(n)], |v| {
      (v <= n).then_some(v)
    })
  });
  registry.register_fn("derivative", |call, from, until, ctx| {
    derivative_like(call, from, until, ctx, false, false)
  });
  registry.register_fn("nonNegativeDerivative", |call, from, until, ctx| {
    derivative_like(call, from, until, ctx, false, true)
  });
  registry.register_fn("perSecond", |call, from, until, ctx| {
    derivative_like(call, from, until, ctx, true, true)
  });
  registry.register_fn("keepLastValue", keep_last_value);
  registry.register_fn("transformNull", transform_null);
  registry.register_fn("isNonNull", is_non_null);
  registry.register_fn("integral", integral);
  registry.register_fn("scaleToSeconds", scale_to_seconds);
}
