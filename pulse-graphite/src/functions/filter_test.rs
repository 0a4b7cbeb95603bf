// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::{eval_target, make_series, names};
use matches::assert_matches;
use pretty_assertions::assert_eq;

fn servers() -> Vec<MetricData> {
  vec![
    make_series("srv.b", 0, 10, &[Some(1.0), Some(9.0), Some(2.0)]),
    make_series("srv.a", 0, 10, &[Some(4.0), Some(4.0), Some(4.0)]),
    make_series("srv.d", 0, 10, &[None, None, None]),
    make_series("srv.c", 0, 10, &[Some(6.0), Some(1.0), None]),
  ]
}

fn eval_names(target: &str) -> Vec<String> {
  names(&eval_target(target, 0, 30, servers()).unwrap())
    .into_iter()
    .map(ToString::to_string)
    .collect()
}

#[test]
fn statistics() {
  let series = make_series("x", 0, 10, &[Some(6.0), Some(1.0), None]);
  assert_eq!(Some(6.0), SeriesStat::Max.of(&series));
  assert_eq!(Some(1.0), SeriesStat::Current.of(&series));
  assert_eq!(Some(3.5), SeriesStat::Average.of(&series));
  assert_eq!(None, SeriesStat::Max.of(&make_series("y", 0, 10, &[None])));
}

#[test]
fn limit_and_sort() {
  // The fetcher returns matches sorted by name.
  assert_eq!(vec!["srv.a", "srv.b"], eval_names("limit(srv.*, 2)"));
  assert_eq!(4, eval_names("limit(srv.*, 10)").len());
  assert_eq!(
    vec!["srv.b", "srv.c", "srv.a", "srv.d"],
    eval_names("sortByMaxima(srv.*)")
  );
  assert_eq!(
    vec!["srv.a", "srv.b", "srv.c", "srv.d"],
    eval_names("sortByName(group(srv.d, srv.b, srv.c, srv.a))")
  );
}

#[test]
fn highest_and_lowest() {
  assert_eq!(vec!["srv.b"], eval_names("highestMax(srv.*, 1)"));
  assert_eq!(vec!["srv.a", "srv.b"], eval_names("highestCurrent(srv.*, 2)"));
  assert_eq!(
    vec!["srv.a", "srv.b", "srv.c"],
    eval_names("highestAverage(srv.*, 5)")
  );
  assert_eq!(vec!["srv.c"], eval_names("lowestAverage(srv.*, 1)"));
  assert_eq!(vec!["srv.c", "srv.b"], eval_names("lowestCurrent(srv.*, 2)"));
}

#[test]
fn threshold_filters() {
  assert_eq!(vec!["srv.a", "srv.b"], eval_names("averageAbove(srv.*, 3.5)"));
  assert_eq!(vec!["srv.c"], eval_names("averageBelow(srv.*, 3.5)"));
  assert!(eval_names("averageAbove(srv.*, 4)").is_empty());
  assert_eq!(vec!["srv.b", "srv.c"], eval_names("maximumAbove(srv.*, 5)"));
  assert_eq!(vec!["srv.a"], eval_names("maximumBelow(srv.*, 5)"));
  assert_eq!(vec!["srv.a"], eval_names("currentAbove(srv.*, 2)"));
  assert_eq!(vec!["srv.b", "srv.c"], eval_names("currentBelow(srv.*, 2)"));
}

#[test]
fn filters_return_inputs() {
  let all = eval_target("group(srv.*)", 0, 30, servers()).unwrap();
  let filtered = eval_target("maximumAbove(srv.*, 5)", 0, 30, servers()).unwrap();
  assert_eq!(*all[1], *filtered[0]);
  assert_eq!(*all[2], *filtered[1]);
}

#[test]
fn invalid_counts() {
  assert_matches!(
    eval_target("limit(srv.*, -1)", 0, 30, servers()),
    Err(EvalError::InvalidArgument { .. })
  );
  assert_matches!(
    eval_target("highestMax(srv.*, 1.5)", 0, 30, servers()),
    Err(EvalError::BadArgumentType { index: 1, .. })
  );
}
