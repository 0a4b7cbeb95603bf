// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod aggregate;
pub mod args;
pub mod filter;
pub mod forecast;
pub mod naming;
pub mod percentile;
pub mod summarize;
pub mod synthetic;
pub mod transform;
pub mod window;


use crate::config::EvaluatorConfig;
use crate::evaluator::{EvalContext, EvalError};
use crate::parser::Call;
use crate::series::SeriesList;
use std::sync::{Arc, OnceLock};

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

//
// Function
//

// A named transform callable from an expression. Implementations are stateless and shared across
// concurrent evaluations.
pub trait Function: Send + Sync {
  fn evaluate(
    &self,
    call: &Call,
    from: i64,
    until: i64,
    ctx: &EvalContext<'_>,
  ) -> Result<SeriesList, EvalError>;

  // The range over which this call's series arguments are evaluated. Functions that look outside
  // the requested window (time shifts, bootstrapped forecasts) override this so that request
  // planning fetches the data they will read.
  fn request_range(
    &self,
    _call: &Call,
    from: i64,
    until: i64,
    _config: &EvaluatorConfig,
  ) -> Result<(i64, i64), EvalError> {
    Ok((from, until))
  }
}

//
// FnFunction
//

// Adapts a plain closure into a Function that evaluates its arguments over the requested range.
pub struct FnFunction<F>(pub F);

impl<F> Function for FnFunction<F>
where
  F: Fn(&Call, i64, i64, &EvalContext<'_>) -> Result<SeriesList, EvalError> + Send + Sync,
{
  fn evaluate(
    &self,
    call: &Call,
    from: i64,
    until: i64,
    ctx: &EvalContext<'_>,
  ) -> Result<SeriesList, EvalError> {
    (self.0)(call, from, until, ctx)
  }
}

//
// FunctionRegistry
//

#[derive(Default)]
pub struct FunctionRegistry {
  functions: HashMap<String, Arc<dyn Function>>,
}

impl FunctionRegistry {
  // Register a function under a name. Registering a name twice replaces the earlier function.
  pub fn register(&mut self, name: &str, function: Arc<dyn Function>) {
    if self.functions.insert(name.to_string(), function).is_some() {
      log::warn!("function '{name}' registered more than once, using the last registration");
    }
  }

  pub fn register_fn<F>(&mut self, name: &str, function: F)
  where
    F: Fn(&Call, i64, i64, &EvalContext<'_>) -> Result<SeriesList, EvalError>
      + Send
      + Sync
      + 'static,
  {
    self.register(name, Arc::new(FnFunction(function)));
  }

  #[must_use]
  pub fn get(&self, name: &str) -> Option<&Arc<dyn Function>> {
    self.functions.get(name)
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.functions.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.functions.is_empty()
  }

  #[must_use]
  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }

  #[must_use]
  pub fn with_builtins() -> Self {
    let mut registry = Self::default();
    transform::register(&mut registry);
    aggregate::register(&mut registry);
    window::register(&mut registry);
    percentile::register(&mut registry);
    summarize::register(&mut registry);
    forecast::register(&mut registry);
    naming::register(&mut registry);
    filter::register(&mut registry);
    synthetic::register(&mut registry);
    log::debug!("registered {} builtin functions", registry.len());
    registry
  }
}

// The process wide registry of builtin functions. It is built on first use and read-only
// afterwards.
pub fn registry() -> Arc<FunctionRegistry> {
  static REGISTRY: OnceLock<Arc<FunctionRegistry>> = OnceLock::new();
  REGISTRY
    .get_or_init(|| Arc::new(FunctionRegistry::with_builtins()))
    .clone()
}
