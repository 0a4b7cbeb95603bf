// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::evaluator::EvalError;
use crate::test::{eval_target, make_series, names, rounded};
use matches::assert_matches;
use pretty_assertions::assert_eq;

fn input() -> Vec<crate::series::MetricData> {
  vec![make_series(
    "a.b",
    0,
    10,
    &[Some(-2.0), None, Some(4.0), Some(0.0), Some(8.0)],
  )]
}

fn single(target: &str) -> Vec<Option<f64>> {
  let result = eval_target(target, 0, 50, input()).unwrap();
  assert_eq!(1, result.len());
  rounded(&result[0])
}

#[test]
fn simple_maps() {
  assert_eq!(
    vec![Some(2.0), None, Some(4.0), Some(0.0), Some(8.0)],
    single("absolute(a.b)")
  );
  assert_eq!(
    vec![Some(-4.0), None, Some(8.0), Some(0.0), Some(16.0)],
    single("scale(a.b, 2)")
  );
  assert_eq!(
    vec![Some(-1.0), None, Some(5.0), Some(1.0), Some(9.0)],
    single("offset(a.b, 1)")
  );
  assert_eq!(
    vec![Some(-0.5), None, Some(0.25), None, Some(0.125)],
    single("invert(a.b)")
  );
  assert_eq!(
    vec![Some(4.0), None, Some(16.0), Some(0.0), Some(64.0)],
    single("pow(a.b, 2)")
  );
  assert_eq!(
    vec![None, None, Some(2.0), Some(0.0), Some(2.828427)],
    single("squareRoot(a.b)")
  );
  assert_eq!(
    vec![None, None, Some(2.0), None, Some(3.0)],
    single("log(a.b, 2)")
  );
  assert_eq!(
    vec![None, None, Some(4.0), Some(0.0), Some(8.0)],
    single("removeBelowValue(a.b, 0)")
  );
  assert_eq!(
    vec![Some(-2.0), None, Some(4.0), Some(0.0), None],
    single("removeAboveValue(a.b, 4)")
  );
  assert_eq!(
    vec![Some(1.0), Some(0.0), Some(1.0), Some(1.0), Some(1.0)],
    single("isNonNull(a.b)")
  );
  assert_eq!(
    vec![Some(-2.0), Some(5.0), Some(4.0), Some(0.0), Some(8.0)],
    single("transformNull(a.b, 5)")
  );
  assert_eq!(
    vec![Some(-2.0), None, Some(2.0), Some(2.0), Some(10.0)],
    single("integral(a.b)")
  );
  assert_eq!(
    vec![Some(-12.0), None, Some(24.0), Some(0.0), Some(48.0)],
    single("scaleToSeconds(a.b, 60)")
  );
}

#[test]
fn naming() {
  let result = eval_target("scale(a.b, 2)", 0, 50, input()).unwrap();
  assert_eq!(vec!["scale(a.b,2)"], names(&result));
  let result = eval_target("log(absolute(a.b))", 0, 50, input()).unwrap();
  assert_eq!(vec!["log(absolute(a.b),10)"], names(&result));
}

#[test]
fn derivatives() {
  let counter = vec![make_series(
    "c",
    0,
    10,
    &[Some(1.0), Some(3.0), None, Some(6.0), Some(10.0), Some(2.0)],
  )];
  let result = eval_target("derivative(c)", 0, 60, counter.clone()).unwrap();
  assert_eq!(
    vec![None, Some(2.0), None, None, Some(4.0), Some(-8.0)],
    rounded(&result[0])
  );
  let result = eval_target("nonNegativeDerivative(c)", 0, 60, counter.clone()).unwrap();
  assert_eq!(
    vec![None, Some(2.0), None, None, Some(4.0), None],
    rounded(&result[0])
  );
  let result = eval_target("nonNegativeDerivative(c, 15)", 0, 60, counter.clone()).unwrap();
  assert_eq!(
    vec![None, Some(2.0), None, None, Some(4.0), Some(8.0)],
    rounded(&result[0])
  );
  assert_eq!("nonNegativeDerivative(c,15)", result[0].name);
  let result = eval_target("perSecond(c)", 0, 60, counter).unwrap();
  assert_eq!(
    vec![None, Some(0.2), None, None, Some(0.4), None],
    rounded(&result[0])
  );
}

#[test]
fn keep_last_value() {
  let gappy = vec![make_series(
    "g",
    0,
    1,
    &[None, Some(1.0), None, Some(2.0), None, None, None, Some(3.0), None],
  )];
  let result = eval_target("keepLastValue(g)", 0, 9, gappy.clone()).unwrap();
  assert_eq!(
    vec![
      None,
      Some(1.0),
      Some(1.0),
      Some(2.0),
      Some(2.0),
      Some(2.0),
      Some(2.0),
      Some(3.0),
      Some(3.0)
    ],
    rounded(&result[0])
  );
  let result = eval_target("keepLastValue(g, 2)", 0, 9, gappy).unwrap();
  assert_eq!(
    vec![
      None,
      Some(1.0),
      Some(1.0),
      Some(2.0),
      None,
      None,
      None,
      Some(3.0),
      Some(3.0)
    ],
    rounded(&result[0])
  );
  assert_eq!("keepLastValue(g)", result[0].name);
}

#[test]
fn absence_propagates() {
  for target in [
    "absolute(a.b)",
    "scale(a.b, 3)",
    "offset(a.b, -1)",
    "invert(a.b)",
    "pow(a.b, 3)",
    "squareRoot(a.b)",
    "log(a.b)",
    "derivative(a.b)",
    "integral(a.b)",
  ] {
    let result = eval_target(target, 0, 50, input()).unwrap();
    assert!(result[0].get(1).is_none(), "{target}");
    assert_eq!(5, result[0].len(), "{target}");
  }
}

#[test]
fn argument_errors() {
  assert_matches!(
    eval_target("scale(a.b)", 0, 50, input()),
    Err(EvalError::MissingArgument { index: 1, .. })
  );
  assert_matches!(
    eval_target("scale(a.b, 'x')", 0, 50, input()),
    Err(EvalError::BadArgumentType { index: 1, .. })
  );
  assert_matches!(
    eval_target("scale(2, 2)", 0, 50, input()),
    Err(EvalError::BadArgumentType { index: 0, .. })
  );
  assert_matches!(
    eval_target("log(a.b, 1)", 0, 50, input()),
    Err(EvalError::InvalidArgument { .. })
  );
  assert_eq!(
    Vec::<&str>::new(),
    names(&eval_target("scale(missing.*, 2)", 0, 50, input()).unwrap())
  );
}
