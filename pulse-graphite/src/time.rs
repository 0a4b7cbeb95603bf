// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use time::OffsetDateTime;

//
// TimeProvider
//

pub trait TimeProvider: Send + Sync + 'static {
  fn unix_now(&self) -> i64;
}

//
// RealTimeProvider
//

pub struct RealTimeProvider {}

impl TimeProvider for RealTimeProvider {
  fn unix_now(&self) -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
  }
}

//
// TestTimeProvider
//

#[derive(Default, Clone)]
pub struct TestTimeProvider {
  pub time: Arc<AtomicI64>,
}

impl TestTimeProvider {
  pub fn advance(&self, seconds: i64) {
    self.time.fetch_add(seconds, Ordering::SeqCst);
  }
}

impl TimeProvider for TestTimeProvider {
  fn unix_now(&self) -> i64 {
    self.time.load(Ordering::SeqCst)
  }
}
