// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::{eval_target, make_series, names, rounded};
use matches::assert_matches;
use pretty_assertions::assert_eq;

#[test]
fn exactness() {
  assert_eq!(3.0, percentile(&mut [1.0, 2.0, 3.0, 4.0, 5.0], 50.0, false));
  assert_eq!(2.5, percentile(&mut [1.0, 2.0, 3.0, 4.0], 50.0, true));
  assert_eq!(3.0, percentile(&mut [4.0, 3.0, 2.0, 1.0], 50.0, false));
  assert_eq!(2.5, percentile(&mut [4.0, 1.0, 3.0, 2.0], 50.0, true));
  assert_eq!(5.0, percentile(&mut [5.0, 1.0, 3.0], 100.0, true));
  assert_eq!(1.0, percentile(&mut [5.0, 1.0, 3.0], 0.0, true));
  assert_eq!(7.0, percentile(&mut [7.0], 90.0, true));
  assert!(percentile(&mut [], 50.0, false).is_nan());
  // k = 0.9 * 9 = 8.1, top is the 10th value and interpolation blends from the 9th.
  let mut values: Vec<f64> = (1 ..= 10).rev().map(f64::from).collect();
  assert!((percentile(&mut values, 90.0, true) - 9.1).abs() < 1e-9);
}

#[test]
fn functions() {
  let input = vec![
    make_series("a", 0, 1, &[Some(1.0), Some(5.0), None, Some(3.0)]),
    make_series("b", 0, 1, &[Some(2.0), None, None, Some(4.0)]),
    make_series("c", 0, 1, &[Some(3.0), Some(6.0), None, Some(5.0)]),
  ];

  let result = eval_target("nPercentile(a, 50)", 0, 4, input.clone()).unwrap();
  assert_eq!(vec!["nPercentile(a,50)"], names(&result));
  assert_eq!(vec![Some(3.0); 4], rounded(&result[0]));

  let result = eval_target("percentileOfSeries(*, 50)", 0, 4, input.clone()).unwrap();
  assert_eq!(vec!["percentileOfSeries(*,50)"], names(&result));
  assert_eq!(
    vec![Some(2.0), Some(6.0), None, Some(4.0)],
    rounded(&result[0])
  );
  let result = eval_target("percentileOfSeries(*, 50, true)", 0, 4, input.clone()).unwrap();
  assert_eq!(
    vec![Some(2.0), Some(5.5), None, Some(4.0)],
    rounded(&result[0])
  );

  let result = eval_target("removeBelowPercentile(c, 50)", 0, 4, input.clone()).unwrap();
  assert_eq!(
    vec![None, Some(6.0), None, Some(5.0)],
    rounded(&result[0])
  );
  let result = eval_target("removeAbovePercentile(c, 50)", 0, 4, input.clone()).unwrap();
  assert_eq!(
    vec![Some(3.0), None, None, Some(5.0)],
    rounded(&result[0])
  );

  assert_matches!(
    eval_target("nPercentile(a, 150)", 0, 4, input.clone()),
    Err(EvalError::InvalidArgument { .. })
  );
  assert_matches!(
    eval_target("percentileOfSeries(missing, 50)", 0, 4, input),
    Err(EvalError::EmptySeriesList { .. })
  );
}
