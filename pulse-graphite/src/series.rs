// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./series_test.rs"]
mod series_test;

use pulse_common::LossyIntToFloat;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

pub type SeriesList = Vec<Arc<MetricData>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeriesError {
  #[error("values and absent mask differ in length ({values} != {absent})")]
  MaskLength { values: usize, absent: usize },
  #[error(
    "series '{left}' and '{right}' are not aligned (step {left_step}/{right_step}, length \
     {left_len}/{right_len})"
  )]
  Mismatch {
    left: String,
    right: String,
    left_step: i64,
    right_step: i64,
    left_len: usize,
    right_len: usize,
  },
  #[error("series step must be positive, got {0}")]
  InvalidStep(i64),
}

//
// ConsolidationFunc
//

// How raw samples are folded when a series is downsampled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConsolidationFunc {
  Sum,
  #[default]
  Average,
  Min,
  Max,
  First,
  Last,
}

impl ConsolidationFunc {
  #[must_use]
  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "sum" => Some(Self::Sum),
      "avg" | "average" => Some(Self::Average),
      "min" => Some(Self::Min),
      "max" => Some(Self::Max),
      "first" => Some(Self::First),
      "last" => Some(Self::Last),
      _ => None,
    }
  }

  #[must_use]
  pub const fn name(self) -> &'static str {
    match self {
      Self::Sum => "sum",
      Self::Average => "average",
      Self::Min => "min",
      Self::Max => "max",
      Self::First => "first",
      Self::Last => "last",
    }
  }

  // Fold the valid values of one bucket. Returns None for a bucket without valid values.
  pub fn reduce(self, mut values: impl Iterator<Item = f64>) -> Option<f64> {
    let first = values.next()?;
    Some(match self {
      Self::Sum => values.fold(first, |acc, v| acc + v),
      Self::Average => {
        let (sum, count) = values.fold((first, 1_usize), |(sum, count), v| (sum + v, count + 1));
        sum / count.lossy_to_f64()
      },
      Self::Min => values.fold(first, f64::min),
      Self::Max => values.fold(first, f64::max),
      Self::First => first,
      Self::Last => values.last().unwrap_or(first),
    })
  }
}

impl Display for ConsolidationFunc {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

//
// MetricData
//

// A named signal on a fixed time grid. The timestamp of sample i is start + i * step. Every sample
// has a slot in both the values and absent arrays so that indexes always map to timestamps; a
// value whose absent flag is set carries no meaning.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricData {
  pub name: String,
  pub path_expression: String,
  pub start: i64,
  pub stop: i64,
  pub step: i64,
  pub values_per_point: usize,
  pub consolidation: ConsolidationFunc,
  pub tags: BTreeMap<String, String>,
  values: Vec<f64>,
  absent: Vec<bool>,
}

impl MetricData {
  pub fn new(
    name: impl Into<String>,
    start: i64,
    step: i64,
    values: Vec<f64>,
    absent: Vec<bool>,
  ) -> Result<Self, SeriesError> {
    if step <= 0 {
      return Err(SeriesError::InvalidStep(step));
    }
    if values.len() != absent.len() {
      return Err(SeriesError::MaskLength {
        values: values.len(),
        absent: absent.len(),
      });
    }
    Ok(Self::from_parts(name.into(), start, step, values, absent))
  }

  // Build a series from optional samples, None marking an absent slot. The step is clamped to at
  // least one second.
  #[must_use]
  pub fn from_options(name: impl Into<String>, start: i64, step: i64, samples: &[Option<f64>]) -> Self {
    debug_assert!(step > 0);
    let values = samples.iter().map(|v| v.unwrap_or(0.0)).collect();
    let absent = samples.iter().map(Option::is_none).collect();
    Self::from_parts(name.into(), start, step.max(1), values, absent)
  }

  fn from_parts(name: String, start: i64, step: i64, values: Vec<f64>, absent: Vec<bool>) -> Self {
    let stop = start + i64::try_from(values.len()).unwrap_or(i64::MAX) * step;
    let mut tags = BTreeMap::new();
    tags.insert("name".to_string(), name.clone());
    Self {
      path_expression: name.clone(),
      name,
      start,
      stop,
      step,
      values_per_point: 1,
      consolidation: ConsolidationFunc::default(),
      tags,
      values,
      absent,
    }
  }

  // Allocate an output series on the same grid as this one with zeroed values and no absent
  // samples. Metadata other than the name is carried over.
  #[must_use]
  pub fn new_like(&self, name: impl Into<String>) -> Self {
    let name = name.into();
    let mut tags = self.tags.clone();
    tags.insert("name".to_string(), name.clone());
    Self {
      name,
      path_expression: self.path_expression.clone(),
      start: self.start,
      stop: self.stop,
      step: self.step,
      values_per_point: self.values_per_point,
      consolidation: self.consolidation,
      tags,
      values: vec![0.0; self.values.len()],
      absent: vec![false; self.absent.len()],
    }
  }

  #[must_use]
  pub fn with_name(&self, name: impl Into<String>) -> Self {
    let mut renamed = self.clone();
    renamed.name = name.into();
    renamed
      .tags
      .insert("name".to_string(), renamed.name.clone());
    renamed
  }

  #[must_use]
  pub const fn len(&self) -> usize {
    self.values.len()
  }

  #[must_use]
  pub const fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  #[must_use]
  pub fn timestamp(&self, index: usize) -> i64 {
    self.start + i64::try_from(index).unwrap_or(i64::MAX) * self.step
  }

  // End of the grid, one step past the last sample.
  #[must_use]
  pub fn grid_end(&self) -> i64 {
    self.timestamp(self.len())
  }

  #[must_use]
  pub fn get(&self, index: usize) -> Option<f64> {
    if self.absent[index] {
      None
    } else {
      Some(self.values[index])
    }
  }

  // Set a sample. None, and NaN which no consumer can use, mark the slot absent.
  pub fn set(&mut self, index: usize, value: Option<f64>) {
    match value {
      Some(v) if !v.is_nan() => {
        self.values[index] = v;
        self.absent[index] = false;
      },
      _ => {
        self.values[index] = 0.0;
        self.absent[index] = true;
      },
    }
  }

  #[must_use]
  pub fn values(&self) -> &[f64] {
    &self.values
  }

  #[must_use]
  pub fn absent(&self) -> &[bool] {
    &self.absent
  }

  pub fn iter(&self) -> impl Iterator<Item = Option<f64>> + '_ {
    self
      .values
      .iter()
      .zip(self.absent.iter())
      .map(|(v, absent)| if *absent { None } else { Some(*v) })
  }

  pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
    self.iter().flatten()
  }

  #[must_use]
  pub fn is_all_absent(&self) -> bool {
    self.absent.iter().all(|absent| *absent)
  }

  // Check that two series share a grid. Transforms over several series never resample
  // implicitly.
  pub fn check_aligned(&self, other: &Self) -> Result<(), SeriesError> {
    if self.step != other.step || self.len() != other.len() {
      return Err(SeriesError::Mismatch {
        left: self.name.clone(),
        right: other.name.clone(),
        left_step: self.step,
        right_step: other.step,
        left_len: self.len(),
        right_len: other.len(),
      });
    }
    Ok(())
  }

  // Iterate two series index by index as (index, a value, a absent, b value, b absent).
  pub fn for_each_aligned<'a>(
    a: &'a Self,
    b: &'a Self,
  ) -> Result<impl Iterator<Item = (usize, f64, bool, f64, bool)> + 'a, SeriesError> {
    a.check_aligned(b)?;
    Ok((0 .. a.len()).map(|i| (i, a.values[i], a.absent[i], b.values[i], b.absent[i])))
  }

  // Drop leading samples that fall before `from`. Used to remove bootstrap data fetched for
  // lookback functions.
  #[must_use]
  pub fn trim_before(&self, from: i64) -> Self {
    if from <= self.start {
      return self.clone();
    }
    let skip = usize::try_from((from - self.start + self.step - 1) / self.step)
      .unwrap_or(0)
      .min(self.len());
    let mut trimmed = self.clone();
    trimmed.values.drain(.. skip);
    trimmed.absent.drain(.. skip);
    trimmed.start = self.timestamp(skip);
    trimmed.stop = trimmed.stop.max(trimmed.start);
    trimmed
  }

  // Drop trailing samples whose timestamp is after `until`.
  #[must_use]
  pub fn trim_after(&self, until: i64) -> Self {
    let keep = (0 .. self.len())
      .take_while(|i| self.timestamp(*i) <= until)
      .count();
    let mut trimmed = self.clone();
    trimmed.values.truncate(keep);
    trimmed.absent.truncate(keep);
    trimmed.stop = trimmed.grid_end();
    trimmed
  }

  // Downsample by folding each run of `values_per_point` samples with the series' consolidation
  // function. A run with no valid samples is absent.
  #[must_use]
  pub fn consolidate(&self, values_per_point: usize) -> Self {
    if values_per_point <= 1 {
      return self.clone();
    }
    let samples: Vec<Option<f64>> = self
      .iter()
      .collect::<Vec<_>>()
      .chunks(values_per_point)
      .map(|chunk| self.consolidation.reduce(chunk.iter().flatten().copied()))
      .collect();
    let step = self.step * i64::try_from(values_per_point).unwrap_or(1);
    let mut consolidated = Self::from_options(self.name.clone(), self.start, step, &samples);
    consolidated.path_expression.clone_from(&self.path_expression);
    consolidated.tags.clone_from(&self.tags);
    consolidated.consolidation = self.consolidation;
    consolidated.values_per_point = self.values_per_point * values_per_point;
    consolidated
  }
}

// Synthesize a flat two point series spanning [from, until].
#[must_use]
pub fn constant_series(name: impl Into<String>, value: f64, from: i64, until: i64) -> MetricData {
  let step = (until - from).max(1);
  let mut series = MetricData::from_options(name, from, step, &[Some(value), Some(value)]);
  series.stop = until.max(from + step);
  series
}
