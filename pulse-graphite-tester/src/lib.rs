// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
mod test;

use anyhow::bail;
use pretty_assertions::Comparison;
use pulse_common::config::{Validate, load_from_file, yaml_to_config};
use pulse_graphite::config::EngineConfig;
use pulse_graphite::evaluator::Evaluator;
use pulse_graphite::fetch::MemoryFetcher;
use pulse_graphite::functions::registry;
use pulse_graphite::parser::parse;
use pulse_graphite::request::FetchedSeries;
use pulse_graphite::series::{MetricData, SeriesList};
use serde::Deserialize;

#[ctor::ctor]
fn global_init() {
  bd_log::SwapLogger::initialize();
}

//
// TesterConfig
//

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct TesterConfig {
  #[serde(default)]
  pub engine: EngineConfig,
  // Series served to every test case, sliced to each planned request.
  #[serde(default)]
  pub series: Vec<SeriesFixture>,
  pub test_cases: Vec<TestCase>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct SeriesFixture {
  pub name: String,
  pub start: i64,
  pub step: i64,
  pub values: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct TestCase {
  pub target: String,
  pub from: i64,
  pub until: i64,
  #[serde(default)]
  pub expected: Vec<ExpectedSeries>,
  // When set the target must fail with an error containing this text.
  #[serde(default)]
  pub error: Option<String>,
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExpectedSeries {
  pub name: String,
  pub values: Vec<Option<f64>>,
}

impl ExpectedSeries {
  // Values are compared at 6 decimal places.
  fn from_series(series: &MetricData) -> Self {
    Self {
      name: series.name.clone(),
      values: series
        .iter()
        .map(|value| value.map(|v| (v * 1e6).round() / 1e6))
        .collect(),
    }
  }
}

impl Validate for TesterConfig {
  fn validate(&self) -> anyhow::Result<()> {
    self.engine.validate()?;
    for fixture in &self.series {
      if fixture.step <= 0 {
        bail!("series '{}' must have a positive step", fixture.name);
      }
    }
    for test_case in &self.test_cases {
      if test_case.from >= test_case.until {
        bail!(
          "target '{}' must have from < until, got [{}, {}]",
          test_case.target,
          test_case.from,
          test_case.until
        );
      }
      if test_case.error.is_some() && !test_case.expected.is_empty() {
        bail!(
          "target '{}' cannot expect both an error and output",
          test_case.target
        );
      }
    }
    Ok(())
  }
}

fn evaluate(
  evaluator: &Evaluator,
  fetcher: &MemoryFetcher,
  test_case: &TestCase,
) -> anyhow::Result<SeriesList> {
  let expr = parse(&test_case.target)?;
  let mut fetched = FetchedSeries::default();
  for request in evaluator.metric_requests(&expr, test_case.from, test_case.until)? {
    let series = fetcher.resolve(&request)?;
    log::debug!("{} matched {} series", request.pattern, series.len());
    fetched.insert(request, series);
  }
  Ok(evaluator.evaluate_target(&expr, test_case.from, test_case.until, &fetched)?)
}

fn run_test_case(
  evaluator: &Evaluator,
  fetcher: &MemoryFetcher,
  test_case: &TestCase,
) -> anyhow::Result<()> {
  match (evaluate(evaluator, fetcher, test_case), &test_case.error) {
    (Ok(series), None) => {
      let actual: Vec<ExpectedSeries> = series
        .iter()
        .map(|series| ExpectedSeries::from_series(series))
        .collect();
      if actual != test_case.expected {
        bail!(
          "target '{}' produced unexpected output: {}",
          test_case.target,
          Comparison::new(&test_case.expected, &actual)
        );
      }
    },
    (Ok(series), Some(expected)) => {
      bail!(
        "target '{}' was expected to fail with '{expected}', got {} series",
        test_case.target,
        series.len()
      );
    },
    (Err(e), Some(expected)) => {
      if !e.to_string().contains(expected.as_str()) {
        bail!(
          "target '{}' was expected to fail with '{expected}', failed with '{e}'",
          test_case.target
        );
      }
    },
    (Err(e), None) => {
      bail!("target '{}' failed: {e}", test_case.target);
    },
  }
  Ok(())
}

pub fn run_config(config: TesterConfig) -> anyhow::Result<()> {
  let evaluator = Evaluator::new(registry(), config.engine.evaluator.clone());
  let fetcher = MemoryFetcher::new(
    config
      .series
      .into_iter()
      .map(|fixture| MetricData::from_options(fixture.name, fixture.start, fixture.step, &fixture.values))
      .collect(),
  );

  for test_case in &config.test_cases {
    run_test_case(&evaluator, &fetcher, test_case)?;
  }
  log::info!("processed {} test case(s)", config.test_cases.len());

  Ok(())
}

pub fn run(config: &str) -> anyhow::Result<()> {
  run_config(yaml_to_config(config)?)
}

pub fn run_file(path: &str) -> anyhow::Result<()> {
  run_config(load_from_file(path)?)
}
