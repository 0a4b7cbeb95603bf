// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::series::{MetricData, SeriesList};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

//
// MetricRequest
//

// Join key between what an expression tree needs and what has been fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricRequest {
  pub pattern: String,
  pub from: i64,
  pub until: i64,
}

impl MetricRequest {
  #[must_use]
  pub fn new(pattern: impl Into<String>, from: i64, until: i64) -> Self {
    Self {
      pattern: pattern.into(),
      from,
      until,
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("fetch of '{pattern}' failed: {message}")]
  Backend { pattern: String, message: String },
  #[error("invalid pattern '{0}'")]
  InvalidPattern(String),
}

//
// Fetcher
//

// The backend collaborator that turns a glob into concrete series.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &MetricRequest) -> Result<Vec<MetricData>, FetchError>;
}

//
// SeriesLookup
//

// Synchronous read access to series that were fetched ahead of evaluation.
pub trait SeriesLookup: Send + Sync {
  fn lookup(&self, request: &MetricRequest) -> Option<&[Arc<MetricData>]>;
}

//
// FetchedSeries
//

#[derive(Default)]
pub struct FetchedSeries {
  series: HashMap<MetricRequest, SeriesList>,
}

impl FetchedSeries {
  pub fn insert(&mut self, request: MetricRequest, series: Vec<MetricData>) {
    self
      .series
      .insert(request, series.into_iter().map(Arc::new).collect());
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.series.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.series.is_empty()
  }
}

impl SeriesLookup for FetchedSeries {
  fn lookup(&self, request: &MetricRequest) -> Option<&[Arc<MetricData>]> {
    self.series.get(request).map(Vec::as_slice)
  }
}
