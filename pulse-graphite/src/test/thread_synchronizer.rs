// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointState {
  Idle,
  // The next task to reach the point parks there.
  Armed,
  Parked,
  Released,
}

// Named sync points that let tests park a task at a precise spot in cache code, for example a
// waiter that has registered for completion but not yet started waiting.
#[derive(Default)]
pub struct ThreadSynchronizer {
  points: Mutex<HashMap<String, Arc<watch::Sender<PointState>>>>,
}

impl ThreadSynchronizer {
  fn point(&self, name: &str) -> Arc<watch::Sender<PointState>> {
    self
      .points
      .lock()
      .entry(name.to_string())
      .or_insert_with(|| Arc::new(watch::channel(PointState::Idle).0))
      .clone()
  }

  // Called from library code. Does nothing unless a test armed the point with wait_on().
  pub async fn sync_point(&self, name: &str) {
    let point = self.point(name);
    let mut parked = false;
    point.send_if_modified(|state| match *state {
      PointState::Armed => {
        *state = PointState::Parked;
        parked = true;
        true
      },
      // Released before anyone arrived.
      PointState::Released => {
        *state = PointState::Idle;
        true
      },
      PointState::Idle | PointState::Parked => false,
    });
    if !parked {
      return;
    }

    log::debug!("parked at sync point {name}");
    let mut receiver = point.subscribe();
    // The returned guard must be released before the state is written again.
    drop(
      receiver
        .wait_for(|state| *state == PointState::Released)
        .await,
    );
    point.send_replace(PointState::Idle);
    log::debug!("released from sync point {name}");
  }

  // Park the next caller of sync_point(name). One-shot.
  pub fn wait_on(&self, name: &str) {
    let previous = self.point(name).send_replace(PointState::Armed);
    assert_eq!(PointState::Idle, previous, "sync point {name} is already armed");
  }

  // Block until a task is parked at the named sync point.
  pub async fn barrier_on(&self, name: &str) {
    let mut receiver = self.point(name).subscribe();
    drop(
      receiver
        .wait_for(|state| *state == PointState::Parked)
        .await,
    );
  }

  // Release the task parked at, or about to reach, the named sync point.
  pub fn signal(&self, name: &str) {
    self.point(name).send_modify(|state| {
      assert!(
        matches!(*state, PointState::Armed | PointState::Parked),
        "sync point {name} signaled while {state:?}"
      );
      *state = PointState::Released;
    });
  }
}
