// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./fetch_test.rs"]
mod fetch_test;

use crate::glob::glob_to_regex;
use crate::request::{FetchError, Fetcher, MetricRequest};
use crate::series::MetricData;
use async_trait::async_trait;
use parking_lot::RwLock;

//
// MemoryFetcher
//

// In-process fetch backend holding complete series. Requests are answered by matching the glob
// against stored names and slicing each match to [from, until).
#[derive(Default)]
pub struct MemoryFetcher {
  series: RwLock<Vec<MetricData>>,
}

impl MemoryFetcher {
  #[must_use]
  pub fn new(series: Vec<MetricData>) -> Self {
    Self {
      series: RwLock::new(series),
    }
  }

  pub fn insert(&self, series: MetricData) {
    let mut locked = self.series.write();
    locked.retain(|existing| existing.name != series.name);
    locked.push(series);
  }

  pub fn resolve(&self, request: &MetricRequest) -> Result<Vec<MetricData>, FetchError> {
    let regex = glob_to_regex(&request.pattern)
      .map_err(|_| FetchError::InvalidPattern(request.pattern.clone()))?;
    let mut matched: Vec<MetricData> = self
      .series
      .read()
      .iter()
      .filter(|series| regex.is_match(&series.name))
      .map(|series| slice(series, request))
      .collect();
    matched.sort_by(|a, b| a.name.cmp(&b.name));
    log::trace!(
      "resolved {} to {} series",
      request.pattern,
      matched.len()
    );
    Ok(matched)
  }
}

fn index_at_or_after(series: &MetricData, ts: i64) -> usize {
  if ts <= series.start {
    return 0;
  }
  let index = (ts - series.start + series.step - 1) / series.step;
  usize::try_from(index).unwrap_or(usize::MAX).min(series.len())
}

fn slice(series: &MetricData, request: &MetricRequest) -> MetricData {
  let first = index_at_or_after(series, request.from);
  let last = index_at_or_after(series, request.until).max(first);
  let samples: Vec<Option<f64>> = (first .. last).map(|i| series.get(i)).collect();
  let mut out = MetricData::from_options(
    series.name.clone(),
    series.timestamp(first),
    series.step,
    &samples,
  );
  out.path_expression.clone_from(&request.pattern);
  out.tags.clone_from(&series.tags);
  out.consolidation = series.consolidation;
  out
}

#[async_trait]
impl Fetcher for MemoryFetcher {
  async fn fetch(&self, request: &MetricRequest) -> Result<Vec<MetricData>, FetchError> {
    self.resolve(request)
  }
}
