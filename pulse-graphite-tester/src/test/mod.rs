// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::{run, run_file};
use std::io::Write;
use tempfile::NamedTempFile;

const SERIES: &str = r"
series:
- name: host.a.requests
  start: 0
  step: 10
  values: [1, 2, null]
- name: host.b.requests
  start: 0
  step: 10
  values: [3, null, null]
";

#[test]
fn basic_case() {
  let config = format!(
    r#"{SERIES}
test_cases:
- target: sum(host.*.requests)
  from: 0
  until: 30
  expected:
  - name: sum(host.*.requests)
    values: [4, 2, null]
- target: aliasByNode(scale(host.a.requests, 0.5), 1)
  from: 0
  until: 30
  expected:
  - name: a
    values: [0.5, 1, null]
- target: constantLine(5)
  from: 0
  until: 10
  expected:
  - name: "5"
    values: [5, 5]
- target: no.such.metric
  from: 0
  until: 30
"#
  );

  run(&config).unwrap();
}

#[test]
fn expected_error() {
  let config = format!(
    r"{SERIES}
test_cases:
- target: nope(host.a.requests)
  from: 0
  until: 30
  error: unknown function
- target: sum(missing.*)
  from: 0
  until: 30
  error: no input series
"
  );

  run(&config).unwrap();
}

#[test]
fn failing_case() {
  let config = format!(
    r"{SERIES}
test_cases:
- target: sum(host.*.requests)
  from: 0
  until: 30
  expected:
  - name: sum(host.*.requests)
    values: [4, 3, null]
"
  );

  assert!(
    run(&config)
      .unwrap_err()
      .to_string()
      .starts_with("target 'sum(host.*.requests)' produced unexpected output")
  );
}

#[test]
fn unexpected_success() {
  let config = format!(
    r"{SERIES}
test_cases:
- target: host.a.requests
  from: 0
  until: 30
  error: anything
"
  );

  assert_eq!(
    "target 'host.a.requests' was expected to fail with 'anything', got 1 series",
    run(&config).unwrap_err().to_string()
  );
}

#[test]
fn invalid_config() {
  let config = r"
series:
- name: bad
  start: 0
  step: 0
  values: []
test_cases: []
";

  assert_eq!(
    "series 'bad' must have a positive step",
    run(config).unwrap_err().to_string()
  );
}

#[test]
fn from_file() {
  let mut file = NamedTempFile::new().unwrap();
  write!(
    file,
    r"{SERIES}
engine:
  evaluator:
    default_xfiles_factor: 0.5
test_cases:
- target: movingAverage(host.a.requests, 2)
  from: 0
  until: 30
  expected:
  - name: movingAverage(host.a.requests,2)
    values: [null, 1.5, 2]
"
  )
  .unwrap();

  run_file(file.path().to_str().unwrap()).unwrap();
}
