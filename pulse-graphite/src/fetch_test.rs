// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::make_series;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn glob_and_slice() {
  let fetcher = MemoryFetcher::new(vec![
    make_series("host.b.requests", 0, 10, &[Some(3.0), None, None, Some(7.0)]),
    make_series("host.a.requests", 0, 10, &[Some(1.0), Some(2.0), None, Some(4.0)]),
    make_series("host.c.errors", 0, 10, &[Some(1.0); 4]),
  ]);

  let fetched = fetcher
    .fetch(&MetricRequest::new("host.{a,b}.requests", 0, 30))
    .await
    .unwrap();
  assert_eq!(
    vec!["host.a.requests", "host.b.requests"],
    fetched.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
  );
  assert_eq!(
    vec![Some(1.0), Some(2.0), None],
    fetched[0].iter().collect::<Vec<_>>()
  );
  assert_eq!("host.{a,b}.requests", fetched[0].path_expression);

  let fetched = fetcher
    .fetch(&MetricRequest::new("host.a.requests", 5, 100))
    .await
    .unwrap();
  assert_eq!(10, fetched[0].start);
  assert_eq!(
    vec![Some(2.0), None, Some(4.0)],
    fetched[0].iter().collect::<Vec<_>>()
  );

  assert!(
    fetcher
      .fetch(&MetricRequest::new("nothing.*", 0, 30))
      .await
      .unwrap()
      .is_empty()
  );
}

#[test]
fn insert_replaces() {
  let fetcher = MemoryFetcher::default();
  fetcher.insert(make_series("a", 0, 1, &[Some(1.0)]));
  fetcher.insert(make_series("a", 0, 1, &[Some(2.0)]));
  let fetched = fetcher.resolve(&MetricRequest::new("a", 0, 1)).unwrap();
  assert_eq!(1, fetched.len());
  assert_eq!(Some(2.0), fetched[0].get(0));
}
