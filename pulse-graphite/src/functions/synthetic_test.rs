// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::{eval_target, names, rounded};
use matches::assert_matches;
use pretty_assertions::assert_eq;

#[test]
fn constant_line() {
  let result = eval_target("constantLine(5)", 0, 10, vec![]).unwrap();
  assert_eq!(vec!["5"], names(&result));
  assert_eq!(0, result[0].start);
  assert_eq!(10, result[0].step);
  assert_eq!(10, result[0].stop);
  assert_eq!(vec![Some(5.0), Some(5.0)], rounded(&result[0]));

  let result = eval_target("scale(constantLine(5), 2)", 0, 10, vec![]).unwrap();
  assert_eq!(vec!["scale(5,2)"], names(&result));
  assert_eq!(vec![Some(10.0), Some(10.0)], rounded(&result[0]));

  let result = eval_target("constantLine(0.25)", 0, 10, vec![]).unwrap();
  assert_eq!(vec!["0.25"], names(&result));
}

#[test]
fn threshold_label() {
  let result = eval_target("threshold(90, 'limit', 'red')", 0, 60, vec![]).unwrap();
  assert_eq!(vec!["limit"], names(&result));
  assert_eq!(vec![Some(90.0), Some(90.0)], rounded(&result[0]));

  let result = eval_target("threshold(90)", 0, 60, vec![]).unwrap();
  assert_eq!(vec!["90"], names(&result));
}

#[test]
fn requires_number() {
  assert_matches!(
    eval_target("constantLine('x')", 0, 10, vec![]),
    Err(EvalError::BadArgumentType { index: 0, .. })
  );
  assert_matches!(
    eval_target("constantLine()", 0, 10, vec![]),
    Err(EvalError::MissingArgument { index: 0, .. })
  );
  assert_matches!(
    eval_target("threshold(90, 'limit', 3)", 0, 60, vec![]),
    Err(EvalError::BadArgumentType { index: 2, .. })
  );
}
