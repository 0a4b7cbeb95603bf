// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./render_test.rs"]
mod render_test;

use crate::cache::key::CacheKey;
use crate::cache::{CacheError, Lookup, QueryCache};
use crate::config::EngineConfig;
use crate::evaluator::{EvalError, Evaluator};
use crate::functions::registry;
use crate::marshal::{JsonMarshaler, MarshalError, Marshaler};
use crate::parser::{Expr, ParseError, parse};
use crate::request::{FetchError, FetchedSeries, Fetcher, MetricRequest};
use crate::series::SeriesList;
use crate::time::RealTimeProvider;
use bd_server_stats::stats::Scope;
use bytes::Bytes;
use futures::future::join_all;
use itertools::Itertools;
use prometheus::IntCounter;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TargetFailure {
  #[error(transparent)]
  Parse(#[from] ParseError),
  #[error(transparent)]
  Fetch(#[from] FetchError),
  #[error(transparent)]
  Eval(#[from] EvalError),
}

// A target of a render that produced no series.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("target {index} '{target}': {error}")]
pub struct TargetError {
  pub index: usize,
  pub target: String,
  pub error: TargetFailure,
}

#[derive(Error, Debug)]
pub enum RenderError {
  #[error("all {} targets failed", .0.len())]
  AllTargetsFailed(Vec<TargetError>),
  #[error(transparent)]
  Cache(#[from] CacheError),
  #[error(transparent)]
  Marshal(#[from] MarshalError),
}

//
// RenderRequest
//

#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
  pub targets: Vec<String>,
  pub from: i64,
  pub until: i64,
  // Any other request parameters, such as the output format. They take part in the cache key.
  pub params: Vec<(String, String)>,
}

impl RenderRequest {
  #[must_use]
  pub fn cache_key(&self) -> CacheKey {
    let targets = self
      .targets
      .iter()
      .map(|target| ("target".to_string(), target.clone()));
    let range = [
      ("from".to_string(), self.from.to_string()),
      ("until".to_string(), self.until.to_string()),
    ];
    CacheKey::from_params(targets.chain(range).chain(self.params.iter().cloned()))
  }
}

#[derive(Debug)]
pub struct RenderResponse {
  pub payload: Bytes,
  // Failed targets of a freshly computed render. Payloads served from the cache carry none.
  pub errors: Vec<TargetError>,
  pub cached: bool,
}

struct PlannedTarget<'a> {
  index: usize,
  target: &'a str,
  expr: Expr,
  requests: Vec<MetricRequest>,
}

//
// Stats
//

struct Stats {
  renders: IntCounter,
  fetches: IntCounter,
  fetch_errors: IntCounter,
  target_errors: IntCounter,
}

impl Stats {
  fn new(scope: &Scope) -> Self {
    Self {
      renders: scope.counter("renders"),
      fetches: scope.counter("fetches"),
      fetch_errors: scope.counter("fetch_errors"),
      target_errors: scope.counter("target_errors"),
    }
  }
}

//
// RenderPipeline
//

// Serves render requests: parse, plan, fetch, evaluate and marshal, fronted by the single flight
// cache so that identical concurrent renders are computed once.
pub struct RenderPipeline {
  evaluator: Evaluator,
  fetcher: Arc<dyn Fetcher>,
  cache: Arc<QueryCache>,
  marshaler: Arc<dyn Marshaler>,
  wait_timeout: Duration,
  stats: Stats,
}

impl RenderPipeline {
  #[must_use]
  pub fn new(
    evaluator: Evaluator,
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<QueryCache>,
    marshaler: Arc<dyn Marshaler>,
    wait_timeout: Duration,
    scope: &Scope,
  ) -> Self {
    Self {
      evaluator,
      fetcher,
      cache,
      marshaler,
      wait_timeout,
      stats: Stats::new(scope),
    }
  }

  // Pipeline with the builtin functions, JSON output and a wall clock cache.
  #[must_use]
  pub fn from_config(config: &EngineConfig, fetcher: Arc<dyn Fetcher>, scope: &Scope) -> Self {
    let cache = Arc::new(QueryCache::new(
      &config.cache,
      &scope.scope("cache"),
      Arc::new(RealTimeProvider {}),
    ));
    Self::new(
      Evaluator::new(registry(), config.evaluator.clone()),
      fetcher,
      cache,
      Arc::new(JsonMarshaler::default()),
      config.cache.wait_timeout,
      scope,
    )
  }

  #[must_use]
  pub const fn cache(&self) -> &Arc<QueryCache> {
    &self.cache
  }

  pub async fn render(&self, request: &RenderRequest) -> Result<RenderResponse, RenderError> {
    self.stats.renders.inc();
    let key = request.cache_key();
    let deadline = Instant::now() + self.wait_timeout;
    let computer = match self
      .cache
      .fetch_or_become_computer(key.as_str(), deadline)
      .await?
    {
      Lookup::Ready(payload) => {
        return Ok(RenderResponse {
          payload,
          errors: Vec::new(),
          cached: true,
        });
      },
      Lookup::Compute(computer) => computer,
    };

    let (series, errors) = self.compute(request).await;
    self.stats.target_errors.inc_by(errors.len() as u64);
    if !request.targets.is_empty() && errors.len() == request.targets.len() {
      computer.abort();
      return Err(RenderError::AllTargetsFailed(errors));
    }

    // A marshal error drops the computer, which aborts it.
    let payload = self.marshaler.marshal(&series)?;
    // Cached payloads carry no errors. Partial results go to this caller only.
    if errors.is_empty() {
      computer.publish(payload.clone());
    } else {
      computer.abort();
    }
    Ok(RenderResponse {
      payload,
      errors,
      cached: false,
    })
  }

  // Produce the series of every target that succeeded, in target order, and the errors of the rest.
  async fn compute(&self, request: &RenderRequest) -> (SeriesList, Vec<TargetError>) {
    let mut errors = Vec::new();
    let mut planned = Vec::new();
    for (index, target) in request.targets.iter().enumerate() {
      match self.plan(target, request.from, request.until) {
        Ok((expr, requests)) => planned.push(PlannedTarget {
          index,
          target,
          expr,
          requests,
        }),
        Err(error) => errors.push(TargetError {
          index,
          target: target.clone(),
          error,
        }),
      }
    }

    let unique: Vec<MetricRequest> = planned
      .iter()
      .flat_map(|target| target.requests.iter().cloned())
      .unique()
      .collect();
    log::debug!(
      "rendering {} targets with {} fetches over [{}, {}]",
      request.targets.len(),
      unique.len(),
      request.from,
      request.until
    );
    self.stats.fetches.inc_by(unique.len() as u64);
    let results = join_all(unique.iter().map(|request| self.fetcher.fetch(request))).await;

    let mut fetched = FetchedSeries::default();
    let mut failed: HashMap<MetricRequest, FetchError> = HashMap::default();
    for (request, result) in unique.into_iter().zip(results) {
      match result {
        Ok(series) => fetched.insert(request, series),
        Err(e) => {
          log::debug!("fetch of {} failed: {e}", request.pattern);
          self.stats.fetch_errors.inc();
          failed.insert(request, e);
        },
      }
    }

    let mut series = Vec::new();
    for target in planned {
      let result = match target.requests.iter().find_map(|request| failed.get(request)) {
        Some(e) => Err(TargetFailure::Fetch(e.clone())),
        None => self
          .evaluator
          .evaluate_target(&target.expr, request.from, request.until, &fetched)
          .map_err(TargetFailure::Eval),
      };
      match result {
        Ok(result) => series.extend(result),
        Err(error) => errors.push(TargetError {
          index: target.index,
          target: target.target.to_string(),
          error,
        }),
      }
    }
    errors.sort_by_key(|error| error.index);
    (series, errors)
  }

  fn plan(
    &self,
    target: &str,
    from: i64,
    until: i64,
  ) -> Result<(Expr, Vec<MetricRequest>), TargetFailure> {
    let expr = parse(target)?;
    let requests = self.evaluator.metric_requests(&expr, from, until)?;
    Ok((expr, requests))
  }
}
