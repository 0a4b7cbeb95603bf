// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod cache;
pub mod config;
pub mod evaluator;
pub mod fetch;
pub mod functions;
pub mod glob;
pub mod marshal;
pub mod parser;
pub mod render;
pub mod request;
pub mod series;
pub mod test;
pub mod time;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  use pulse_common::global_initialize;

  global_initialize();
}
