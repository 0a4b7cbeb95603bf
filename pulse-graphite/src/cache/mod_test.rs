// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::time::TestTimeProvider;
use bd_server_stats::stats::Collector;
use bd_shutdown::ComponentShutdownTrigger;
use matches::assert_matches;
use pretty_assertions::assert_eq;
use std::sync::atomic::AtomicUsize;

fn make_cache(config: &CacheConfig) -> (Arc<QueryCache>, TestTimeProvider) {
  let time_provider = TestTimeProvider::default();
  time_provider.advance(1_000_000);
  let cache = Arc::new(QueryCache::new(
    config,
    &Collector::default().scope("cache"),
    Arc::new(time_provider.clone()),
  ));
  (cache, time_provider)
}

fn far_deadline() -> Instant {
  Instant::now() + Duration::from_secs(3600)
}

async fn compute_now(cache: &QueryCache, key: &str, payload: &'static [u8]) {
  match cache.fetch_or_become_computer(key, far_deadline()).await {
    Ok(Lookup::Compute(computer)) => computer.publish(Bytes::from_static(payload)),
    other => panic!("expected to compute {key}, got {other:?}"),
  }
}

async fn ready(cache: &QueryCache, key: &str) -> Option<Bytes> {
  match cache.fetch_or_become_computer(key, far_deadline()).await {
    Ok(Lookup::Ready(bytes)) => Some(bytes),
    _ => None,
  }
}

#[tokio::test(start_paused = true)]
async fn single_flight() {
  let (cache, _) = make_cache(&CacheConfig::default());
  let computations = Arc::new(AtomicUsize::default());

  let tasks: Vec<_> = (0 .. 10)
    .map(|_| {
      let cache = cache.clone();
      let computations = computations.clone();
      tokio::spawn(async move {
        cache
          .get_or_compute::<CacheError, _>("key", far_deadline(), async {
            computations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Bytes::from_static(b"result"))
          })
          .await
      })
    })
    .collect();

  for task in tasks {
    assert_eq!(Bytes::from_static(b"result"), task.await.unwrap().unwrap());
  }
  assert_eq!(1, computations.load(Ordering::SeqCst));
  assert_eq!(1, cache.stats.misses.get());
  assert_eq!(9, cache.stats.waits.get());
  // Every waiter counts as a hit once the result is published.
  assert_eq!(9, cache.stats.hits.get());
  assert_eq!(Some(Bytes::from_static(b"result")), ready(&cache, "key").await);
  assert_eq!(10, cache.stats.hits.get());
}

#[tokio::test(start_paused = true)]
async fn abort_hands_over_to_waiter() {
  let (cache, _) = make_cache(&CacheConfig::default());
  let Ok(Lookup::Compute(computer)) = cache.fetch_or_become_computer("key", far_deadline()).await
  else {
    panic!("first caller must compute");
  };

  cache.thread_synchronizer.wait_on("cache_wait");
  let waiter = {
    let cache = cache.clone();
    tokio::spawn(async move {
      match cache.fetch_or_become_computer("key", far_deadline()).await {
        Ok(Lookup::Compute(computer)) => {
          computer.publish(Bytes::from_static(b"second"));
          true
        },
        _ => false,
      }
    })
  };
  cache.thread_synchronizer.barrier_on("cache_wait").await;

  // The waiter registered before the abort and must not miss the wakeup.
  computer.abort();
  cache.thread_synchronizer.signal("cache_wait");
  assert!(waiter.await.unwrap());
  assert_eq!(Some(Bytes::from_static(b"second")), ready(&cache, "key").await);
  assert_eq!(1, cache.stats.aborts.get());
}

#[tokio::test(start_paused = true)]
async fn waiter_follows_the_next_computation() {
  let (cache, _) = make_cache(&CacheConfig::default());
  let Ok(Lookup::Compute(first)) = cache.fetch_or_become_computer("key", far_deadline()).await
  else {
    panic!("first caller must compute");
  };

  // Park the waiter after it picked the completion event but before it registered on it.
  cache.thread_synchronizer.wait_on("cache_register");
  let waiter = {
    let cache = cache.clone();
    tokio::spawn(async move { ready(&cache, "key").await })
  };
  cache.thread_synchronizer.barrier_on("cache_register").await;

  // The first computation aborts and a second caller takes over before the waiter registers.
  first.abort();
  let Ok(Lookup::Compute(second)) = cache.fetch_or_become_computer("key", far_deadline()).await
  else {
    panic!("second caller must compute");
  };

  cache.thread_synchronizer.wait_on("cache_wait");
  cache.thread_synchronizer.signal("cache_register");
  cache.thread_synchronizer.barrier_on("cache_wait").await;
  second.publish(Bytes::from_static(b"second"));
  cache.thread_synchronizer.signal("cache_wait");

  assert_eq!(Some(Bytes::from_static(b"second")), waiter.await.unwrap());
  assert_eq!(0, cache.stats.timeouts.get());
}

#[tokio::test(start_paused = true)]
async fn dropped_computer_aborts() {
  let (cache, _) = make_cache(&CacheConfig::default());
  {
    let lookup = cache.fetch_or_become_computer("key", far_deadline()).await;
    assert_matches!(lookup, Ok(Lookup::Compute(_)));
  }
  assert_eq!(1, cache.stats.aborts.get());
  compute_now(&cache, "key", b"value").await;
  assert_eq!(Some(Bytes::from_static(b"value")), ready(&cache, "key").await);
}

#[tokio::test(start_paused = true)]
async fn waiter_times_out() {
  let (cache, _) = make_cache(&CacheConfig::default());
  let Ok(Lookup::Compute(computer)) = cache.fetch_or_become_computer("key", far_deadline()).await
  else {
    panic!("first caller must compute");
  };

  let deadline = Instant::now() + Duration::from_secs(1);
  assert_eq!(
    CacheError::Timeout("key".to_string()),
    cache
      .fetch_or_become_computer("key", deadline)
      .await
      .unwrap_err()
  );
  assert_eq!(1, cache.stats.timeouts.get());

  // The computation is unaffected by the departed waiter.
  computer.publish(Bytes::from_static(b"late"));
  assert_eq!(Some(Bytes::from_static(b"late")), ready(&cache, "key").await);
}

#[tokio::test(start_paused = true)]
async fn failed_computation_is_not_cached() {
  let (cache, _) = make_cache(&CacheConfig::default());
  let result = cache
    .get_or_compute("key", far_deadline(), async {
      Err::<Bytes, _>(CacheError::Timeout("backend".to_string()))
    })
    .await;
  assert_matches!(result, Err(CacheError::Timeout(_)));
  assert_eq!(1, cache.stats.aborts.get());
  assert_eq!(None, ready(&cache, "key").await);
}

#[tokio::test(start_paused = true)]
async fn expired_results_are_not_served() {
  let (cache, time_provider) = make_cache(&CacheConfig {
    ttl: Duration::from_secs(60),
    ..Default::default()
  });
  compute_now(&cache, "key", b"old").await;
  time_provider.advance(59);
  assert_eq!(Some(Bytes::from_static(b"old")), ready(&cache, "key").await);

  time_provider.advance(1);
  let Ok(Lookup::Compute(computer)) = cache.fetch_or_become_computer("key", far_deadline()).await
  else {
    panic!("expired entry must be recomputed");
  };
  assert_eq!(0, cache.size_bytes());
  computer.publish(Bytes::from_static(b"new"));
  assert_eq!(Some(Bytes::from_static(b"new")), ready(&cache, "key").await);
}

#[tokio::test(start_paused = true)]
async fn sweep_removes_expired_and_idle() {
  let (cache, time_provider) = make_cache(&CacheConfig::default());
  compute_now(&cache, "a", b"aaaa").await;
  time_provider.advance(30);
  compute_now(&cache, "b", b"bb").await;
  {
    let _aborted = cache.fetch_or_become_computer("c", far_deadline()).await;
  }
  assert_eq!(3, cache.len());
  assert_eq!(6, cache.size_bytes());

  time_provider.advance(31);
  cache.sweep();
  assert_eq!(1, cache.len());
  assert_eq!(2, cache.size_bytes());
  assert_eq!(2, cache.stats.size_bytes.get());
  assert_eq!(1, cache.stats.entries.get());
  assert_eq!(Some(Bytes::from_static(b"bb")), ready(&cache, "b").await);
}

#[tokio::test(start_paused = true)]
async fn sweep_keeps_slots_in_use() {
  let (cache, time_provider) = make_cache(&CacheConfig {
    ttl: Duration::from_secs(60),
    ..Default::default()
  });
  compute_now(&cache, "key", b"old").await;
  time_provider.advance(61);

  // A caller that found the expired slot but has not looked at it yet.
  let held = cache.slot("key");
  cache.sweep();
  assert_eq!(1, cache.len());
  assert!(cache.is_attached(&held));

  let Ok(Lookup::Compute(computer)) = cache.fetch_or_become_computer("key", far_deadline()).await
  else {
    panic!("expired entry must be recomputed");
  };
  // Only one computation runs. Everyone else waits for it.
  let deadline = Instant::now() + Duration::from_secs(1);
  assert_matches!(
    cache.fetch_or_become_computer("key", deadline).await,
    Err(CacheError::Timeout(_))
  );
  computer.publish(Bytes::from_static(b"new"));
  drop(held);

  cache.sweep();
  assert_eq!(Some(Bytes::from_static(b"new")), ready(&cache, "key").await);
  assert_eq!(3, cache.size_bytes());
}

#[tokio::test(start_paused = true)]
async fn over_budget_results_are_detached() {
  let (cache, _) = make_cache(&CacheConfig {
    max_size_bytes: 10,
    ..Default::default()
  });
  compute_now(&cache, "a", b"12345678").await;

  let Ok(Lookup::Compute(computer)) = cache.fetch_or_become_computer("b", far_deadline()).await
  else {
    panic!("first caller must compute");
  };
  cache.thread_synchronizer.wait_on("cache_wait");
  let waiter = {
    let cache = cache.clone();
    tokio::spawn(async move { ready(&cache, "b").await })
  };
  cache.thread_synchronizer.barrier_on("cache_wait").await;
  computer.publish(Bytes::from_static(b"87654321"));
  cache.thread_synchronizer.signal("cache_wait");

  // The current waiter gets the result even though the cache did not keep it.
  assert_eq!(Some(Bytes::from_static(b"87654321")), waiter.await.unwrap());
  assert_eq!(1, cache.stats.evictions.get());
  assert_eq!(8, cache.size_bytes());
  assert_eq!(None, ready(&cache, "b").await);
  assert_eq!(Some(Bytes::from_static(b"12345678")), ready(&cache, "a").await);
}

#[tokio::test(start_paused = true)]
async fn sweeper_runs_until_shutdown() {
  let (cache, time_provider) = make_cache(&CacheConfig::default());
  let shutdown_trigger = ComponentShutdownTrigger::default();
  let sweeper = cache
    .clone()
    .spawn_sweeper(Duration::from_secs(30), shutdown_trigger.make_shutdown());

  compute_now(&cache, "key", b"value").await;
  time_provider.advance(120);
  tokio::time::sleep(Duration::from_secs(31)).await;
  assert!(cache.is_empty());

  shutdown_trigger.shutdown().await;
  sweeper.await.unwrap();
}
