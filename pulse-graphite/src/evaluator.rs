// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./evaluator_test.rs"]
mod evaluator_test;

use crate::config::EvaluatorConfig;
use crate::functions::{FunctionRegistry, registry};
use crate::parser::{Expr, format_number};
use crate::request::{MetricRequest, SeriesLookup};
use crate::series::{SeriesError, SeriesList, constant_series};
use itertools::Itertools;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
  #[error("unknown function '{0}'")]
  UnknownFunction(String),
  #[error("{function}: missing argument {index}")]
  MissingArgument { function: String, index: usize },
  #[error("{function}: argument {index} must be {expected}")]
  BadArgumentType {
    function: String,
    index: usize,
    expected: &'static str,
  },
  #[error("{function}: expected exactly one series, got {count}")]
  TooManySeries { function: String, count: usize },
  #[error("{function}: no input series")]
  EmptySeriesList { function: String },
  #[error("{function}: {message}")]
  InvalidArgument { function: String, message: String },
  #[error("invalid interval '{0}'")]
  Interval(String),
  #[error("'{0}' does not evaluate to series")]
  NotASeries(String),
  #[error(transparent)]
  Series(#[from] SeriesError),
  #[error("internal error: {0}")]
  Internal(String),
}

//
// EvalContext
//

// Handed to function bodies. Lets a function evaluate its argument expressions, possibly over a
// range other than the one it was called with.
pub struct EvalContext<'a> {
  evaluator: &'a Evaluator,
  lookup: &'a dyn SeriesLookup,
}

impl EvalContext<'_> {
  pub fn eval(&self, expr: &Expr, from: i64, until: i64) -> Result<SeriesList, EvalError> {
    self.evaluator.eval(expr, from, until, self.lookup)
  }

  #[must_use]
  pub fn config(&self) -> &EvaluatorConfig {
    &self.evaluator.config
  }
}

//
// Evaluator
//

// Walks an expression tree against series that were fetched ahead of time. Evaluation is pure and
// synchronous, so one evaluator can be shared by any number of concurrent requests.
pub struct Evaluator {
  registry: Arc<FunctionRegistry>,
  config: EvaluatorConfig,
}

impl Default for Evaluator {
  fn default() -> Self {
    Self::new(registry(), EvaluatorConfig::default())
  }
}

impl Evaluator {
  #[must_use]
  pub fn new(registry: Arc<FunctionRegistry>, config: EvaluatorConfig) -> Self {
    Self { registry, config }
  }

  #[must_use]
  pub const fn config(&self) -> &EvaluatorConfig {
    &self.config
  }

  pub fn eval(
    &self,
    expr: &Expr,
    from: i64,
    until: i64,
    lookup: &dyn SeriesLookup,
  ) -> Result<SeriesList, EvalError> {
    match expr {
      // A pattern that matched nothing is an empty list, not an error.
      Expr::Name(pattern) => Ok(
        lookup
          .lookup(&MetricRequest::new(pattern.clone(), from, until))
          .map(<[_]>::to_vec)
          .unwrap_or_default(),
      ),
      Expr::Const(value) => Ok(vec![Arc::new(constant_series(
        format_number(*value),
        *value,
        from,
        until,
      ))]),
      Expr::String(_) | Expr::Bool(_) => Err(EvalError::NotASeries(expr.to_string())),
      Expr::Func(call) => {
        let function = self
          .registry
          .get(&call.name)
          .ok_or_else(|| EvalError::UnknownFunction(call.name.clone()))?;
        log::trace!("evaluating {}({}) over [{from}, {until}]", call.name, call.raw_args);
        function.evaluate(
          call,
          from,
          until,
          &EvalContext {
            evaluator: self,
            lookup,
          },
        )
      },
    }
  }

  // Every metric request the tree will make when evaluated over [from, until], de-duplicated and
  // in first-use order.
  pub fn metric_requests(
    &self,
    expr: &Expr,
    from: i64,
    until: i64,
  ) -> Result<Vec<MetricRequest>, EvalError> {
    let mut requests = Vec::new();
    self.collect_requests(expr, from, until, &mut requests)?;
    Ok(requests.into_iter().unique().collect())
  }

  fn collect_requests(
    &self,
    expr: &Expr,
    from: i64,
    until: i64,
    requests: &mut Vec<MetricRequest>,
  ) -> Result<(), EvalError> {
    match expr {
      Expr::Name(pattern) => requests.push(MetricRequest::new(pattern.clone(), from, until)),
      Expr::Func(call) => {
        let function = self
          .registry
          .get(&call.name)
          .ok_or_else(|| EvalError::UnknownFunction(call.name.clone()))?;
        let (from, until) = function.request_range(call, from, until, &self.config)?;
        for arg in call
          .args
          .iter()
          .chain(call.named_args.iter().map(|(_, value)| value))
        {
          self.collect_requests(arg, from, until, requests)?;
        }
      },
      Expr::Const(_) | Expr::String(_) | Expr::Bool(_) => {},
    }
    Ok(())
  }

  // Evaluate one top-level target. A panic inside any function is contained and reported as an
  // error for this target only.
  pub fn evaluate_target(
    &self,
    expr: &Expr,
    from: i64,
    until: i64,
    lookup: &dyn SeriesLookup,
  ) -> Result<SeriesList, EvalError> {
    catch_unwind(AssertUnwindSafe(|| self.eval(expr, from, until, lookup))).unwrap_or_else(
      |panic| {
        let message = panic
          .downcast_ref::<&str>()
          .map(|message| (*message).to_string())
          .or_else(|| panic.downcast_ref::<String>().cloned())
          .unwrap_or_else(|| "unknown panic".to_string());
        log::warn!("evaluation of '{expr}' panicked: {message}");
        Err(EvalError::Internal(message))
      },
    )
  }

  // Evaluate several targets independently. Returns the series of the targets that succeeded, in
  // target order, and the errors of the ones that did not, keyed by target index.
  pub fn evaluate_targets(
    &self,
    targets: &[Expr],
    from: i64,
    until: i64,
    lookup: &dyn SeriesLookup,
  ) -> (SeriesList, Vec<(usize, EvalError)>) {
    let mut series = Vec::new();
    let mut errors = Vec::new();
    for (index, target) in targets.iter().enumerate() {
      match self.evaluate_target(target, from, until, lookup) {
        Ok(result) => series.extend(result),
        Err(e) => errors.push((index, e)),
      }
    }
    (series, errors)
  }
}
