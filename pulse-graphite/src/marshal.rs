// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./marshal_test.rs"]
mod marshal_test;

use crate::series::MetricData;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarshalError {
  #[error("json encoding failed: {0}")]
  Json(#[from] serde_json::Error),
}

//
// Marshaler
//

// Encodes the series of a render into the bytes that are cached and returned to the client.
pub trait Marshaler: Send + Sync {
  fn marshal(&self, series: &[Arc<MetricData>]) -> Result<Bytes, MarshalError>;
}

//
// JsonMarshaler
//

#[derive(Serialize)]
struct JsonSeries<'a> {
  target: &'a str,
  tags: &'a BTreeMap<String, String>,
  // [value, timestamp] pairs. Absent samples are null.
  datapoints: Vec<(Option<f64>, i64)>,
}

// The Graphite render API JSON format.
#[derive(Default)]
pub struct JsonMarshaler {}

impl Marshaler for JsonMarshaler {
  fn marshal(&self, series: &[Arc<MetricData>]) -> Result<Bytes, MarshalError> {
    let encoded: Vec<JsonSeries<'_>> = series
      .iter()
      .map(|series| JsonSeries {
        target: &series.name,
        tags: &series.tags,
        datapoints: series
          .iter()
          .enumerate()
          .map(|(i, value)| (value.filter(|v| v.is_finite()), series.timestamp(i)))
          .collect(),
      })
      .collect();
    Ok(serde_json::to_vec(&encoded)?.into())
  }
}
