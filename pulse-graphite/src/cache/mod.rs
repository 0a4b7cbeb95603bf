// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod key;

#[cfg(test)]
#[path = "./mod_test.rs"]
mod mod_test;

use crate::config::CacheConfig;
use crate::test::thread_synchronizer::ThreadSynchronizer;
use crate::time::TimeProvider;
use bd_log::warn_every;
use bd_server_stats::stats::Scope;
use bd_shutdown::ComponentShutdown;
use bytes::Bytes;
use event_listener::{Event, listener};
use parking_lot::{Mutex, RwLock};
use prometheus::{IntCounter, IntGauge};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use time::ext::NumericalDuration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

const SHARDS: usize = 16;

const EMPTY: u8 = 0;
const PENDING: u8 = 1;
const READY: u8 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
  #[error("timed out waiting for the computation of '{0}'")]
  Timeout(String),
}

//
// Stats
//

struct Stats {
  hits: IntCounter,
  misses: IntCounter,
  waits: IntCounter,
  aborts: IntCounter,
  timeouts: IntCounter,
  evictions: IntCounter,
  size_bytes: IntGauge,
  entries: IntGauge,
}

impl Stats {
  fn new(scope: &Scope) -> Self {
    Self {
      hits: scope.counter("hits"),
      misses: scope.counter("misses"),
      waits: scope.counter("waits"),
      aborts: scope.counter("aborts"),
      timeouts: scope.counter("timeouts"),
      evictions: scope.counter("evictions"),
      size_bytes: scope.gauge("size_bytes"),
      entries: scope.gauge("entries"),
    }
  }
}

//
// CacheSlot
//

struct Payload {
  bytes: Bytes,
  expires_at: i64,
  // Whether the bytes are counted against the size budget. Payloads of detached slots are not.
  accounted: bool,
}

// Waiters of one computation attempt. Each abort or publish retires the current generation and
// installs a fresh event for the next attempt.
struct Completion {
  generation: u64,
  event: Arc<Event>,
}

struct CacheSlot {
  key: String,
  state: AtomicU8,
  payload: Mutex<Option<Payload>>,
  completion: Mutex<Completion>,
}

impl CacheSlot {
  fn new(key: &str) -> Self {
    Self {
      key: key.to_string(),
      state: AtomicU8::new(EMPTY),
      payload: Mutex::default(),
      completion: Mutex::new(Completion {
        generation: 0,
        event: Arc::new(Event::new()),
      }),
    }
  }

  fn current_event(&self) -> (u64, Arc<Event>) {
    let completion = self.completion.lock();
    (completion.generation, completion.event.clone())
  }

  fn generation(&self) -> u64 {
    self.completion.lock().generation
  }

  fn finish_generation(&self) {
    let retired = {
      let mut completion = self.completion.lock();
      log::trace!("cache entry '{}' finished generation {}", self.key, completion.generation);
      completion.generation += 1;
      std::mem::replace(&mut completion.event, Arc::new(Event::new()))
    };
    retired.notify(usize::MAX);
  }

  fn is_expired(&self, now: i64) -> bool {
    self
      .payload
      .lock()
      .as_ref()
      .is_none_or(|payload| payload.expires_at <= now)
  }
}

//
// Lookup
//

pub enum Lookup<'a> {
  // A published result.
  Ready(Bytes),
  // The caller won the race and must publish or abort.
  Compute(Computer<'a>),
}

impl std::fmt::Debug for Lookup<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Ready(bytes) => write!(f, "Ready({} bytes)", bytes.len()),
      Self::Compute(computer) => write!(f, "Compute({})", computer.key()),
    }
  }
}

//
// Computer
//

// Exclusive right to compute one key. Dropping it without publishing aborts the computation so
// that a waiter can take over.
pub struct Computer<'a> {
  cache: &'a QueryCache,
  slot: Arc<CacheSlot>,
  finished: bool,
}

impl Computer<'_> {
  #[must_use]
  pub fn key(&self) -> &str {
    &self.slot.key
  }

  pub fn publish(mut self, payload: Bytes) {
    self.finished = true;
    self.cache.publish(&self.slot, payload);
  }

  pub fn abort(mut self) {
    self.finished = true;
    self.cache.abort(&self.slot);
  }
}

impl Drop for Computer<'_> {
  fn drop(&mut self) {
    if !self.finished {
      self.cache.abort(&self.slot);
    }
  }
}

//
// QueryCache
//

// Single flight result cache. For any key at most one caller computes at a time; concurrent
// callers for the same key wait for that computation and share its result.
pub struct QueryCache {
  shards: Vec<RwLock<HashMap<String, Arc<CacheSlot>>>>,
  hasher: ahash::RandomState,
  ttl_seconds: i64,
  max_size_bytes: u64,
  size_bytes: AtomicU64,
  time_provider: Arc<dyn TimeProvider>,
  stats: Stats,
  thread_synchronizer: ThreadSynchronizer,
}

impl QueryCache {
  #[must_use]
  pub fn new(config: &CacheConfig, scope: &Scope, time_provider: Arc<dyn TimeProvider>) -> Self {
    Self {
      shards: (0 .. SHARDS).map(|_| RwLock::default()).collect(),
      hasher: ahash::RandomState::new(),
      ttl_seconds: i64::try_from(config.ttl.as_secs()).unwrap_or(i64::MAX).max(1),
      max_size_bytes: config.max_size_bytes,
      size_bytes: AtomicU64::default(),
      time_provider,
      stats: Stats::new(scope),
      thread_synchronizer: ThreadSynchronizer::default(),
    }
  }

  fn shard(&self, key: &str) -> &RwLock<HashMap<String, Arc<CacheSlot>>> {
    let index = usize::try_from(self.hasher.hash_one(key) % SHARDS as u64).unwrap_or(0);
    &self.shards[index]
  }

  fn slot(&self, key: &str) -> Arc<CacheSlot> {
    let shard = self.shard(key);
    if let Some(slot) = shard.read().get(key) {
      return slot.clone();
    }
    shard
      .write()
      .entry(key.to_string())
      .or_insert_with(|| {
        self.stats.entries.inc();
        Arc::new(CacheSlot::new(key))
      })
      .clone()
  }

  fn is_attached(&self, slot: &Arc<CacheSlot>) -> bool {
    self
      .shard(&slot.key)
      .read()
      .get(&slot.key)
      .is_some_and(|current| Arc::ptr_eq(current, slot))
  }

  fn detach(&self, slot: &Arc<CacheSlot>) {
    let mut locked = self.shard(&slot.key).write();
    if locked
      .get(&slot.key)
      .is_some_and(|current| Arc::ptr_eq(current, slot))
    {
      locked.remove(&slot.key);
      self.stats.entries.dec();
    }
  }

  fn release_payload(&self, payload: Option<Payload>) {
    if let Some(payload) = payload.filter(|payload| payload.accounted) {
      let len = payload.bytes.len() as u64;
      let previous = self.size_bytes.fetch_sub(len, Ordering::Relaxed);
      self.stats.size_bytes.set(i64::try_from(previous - len).unwrap_or(i64::MAX));
    }
  }

  // Either return the published result for `key`, wait for a concurrent computation of it, or
  // hand the caller the right to compute it. Waiting gives up at `deadline` without affecting the
  // computation.
  pub async fn fetch_or_become_computer(
    &self,
    key: &str,
    deadline: Instant,
  ) -> Result<Lookup<'_>, CacheError> {
    // Waiters stay on the slot they found, which may be detached from the table by the time the
    // result is published.
    let mut slot = self.slot(key);
    let mut waited = false;
    loop {
      match slot.state.load(Ordering::Acquire) {
        READY => {
          let now = self.time_provider.unix_now();
          let fresh = slot
            .payload
            .lock()
            .as_ref()
            .filter(|payload| payload.expires_at > now)
            .map(|payload| payload.bytes.clone());
          if let Some(bytes) = fresh {
            self.stats.hits.inc();
            return Ok(Lookup::Ready(bytes));
          }
          // A detached slot never takes a new computation. Start over on the current one.
          if !self.is_attached(&slot) {
            slot = self.slot(key);
            continue;
          }
          // Expired results are never served. The caller that retires the stale payload computes
          // the replacement.
          if slot
            .state
            .compare_exchange(READY, PENDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
          {
            log::debug!("cache entry '{key}' expired, recomputing");
            self.release_payload(slot.payload.lock().take());
            self.stats.misses.inc();
            return Ok(Lookup::Compute(Computer {
              cache: self,
              slot,
              finished: false,
            }));
          }
        },
        EMPTY => {
          if slot
            .state
            .compare_exchange(EMPTY, PENDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
          {
            log::debug!("computing cache entry '{key}'");
            self.stats.misses.inc();
            return Ok(Lookup::Compute(Computer {
              cache: self,
              slot,
              finished: false,
            }));
          }
        },
        _ => {
          if !waited {
            waited = true;
            self.stats.waits.inc();
          }
          let (generation, event) = slot.current_event();
          self.thread_synchronizer.sync_point("cache_register").await;
          listener!(*event => listener);
          // The computation may have finished between the state load and registering, in which
          // case the event may already be retired.
          if slot.generation() != generation || slot.state.load(Ordering::Acquire) != PENDING {
            continue;
          }
          self.thread_synchronizer.sync_point("cache_wait").await;
          if tokio::time::timeout_at(deadline, listener).await.is_err() {
            log::debug!("timed out waiting for cache entry '{key}'");
            self.stats.timeouts.inc();
            return Err(CacheError::Timeout(key.to_string()));
          }
        },
      }
    }
  }

  fn publish(&self, slot: &Arc<CacheSlot>, bytes: Bytes) {
    let len = bytes.len() as u64;
    let mut accounted = false;
    if self.is_attached(slot) {
      if self.size_bytes.load(Ordering::Relaxed) + len > self.max_size_bytes {
        self.sweep();
      }
      let size = self.size_bytes.load(Ordering::Relaxed);
      if size + len <= self.max_size_bytes {
        self.size_bytes.fetch_add(len, Ordering::Relaxed);
        self.stats.size_bytes.set(i64::try_from(size + len).unwrap_or(i64::MAX));
        accounted = true;
      } else {
        warn_every!(
          15.seconds(),
          "cache full ({} of {} bytes), not retaining a {} byte result",
          size,
          self.max_size_bytes,
          len
        );
        self.stats.evictions.inc();
      }
    }

    *slot.payload.lock() = Some(Payload {
      bytes,
      expires_at: self.time_provider.unix_now() + self.ttl_seconds,
      accounted,
    });
    slot.state.store(READY, Ordering::Release);
    log::debug!("published cache entry '{}' ({len} bytes)", slot.key);
    slot.finish_generation();

    // Waiters already hold the slot and still get the result. Later callers recompute.
    if !accounted {
      self.detach(slot);
    }
  }

  fn abort(&self, slot: &Arc<CacheSlot>) {
    log::debug!("aborted computation of cache entry '{}'", slot.key);
    self.stats.aborts.inc();
    slot.state.store(EMPTY, Ordering::Release);
    slot.finish_generation();
  }

  // Remove expired results, and idle slots left behind by aborted computations. Slots that a
  // caller still holds stay, since that caller may be about to compute on them.
  pub fn sweep(&self) {
    let now = self.time_provider.unix_now();
    let mut removed = 0;
    for shard in &self.shards {
      let mut released = Vec::new();
      shard.write().retain(|_, slot| {
        let keep = Arc::strong_count(slot) > 1
          || match slot.state.load(Ordering::Acquire) {
            READY => !slot.is_expired(now),
            EMPTY => false,
            _ => true,
          };
        if !keep {
          released.push(slot.payload.lock().take());
        }
        keep
      });
      removed += released.len();
      for payload in released {
        self.release_payload(payload);
      }
    }
    if removed > 0 {
      log::debug!("swept {removed} cache entries");
      self.stats.entries.sub(i64::try_from(removed).unwrap_or(i64::MAX));
    }
  }

  pub fn spawn_sweeper(
    self: Arc<Self>,
    interval: Duration,
    mut shutdown: ComponentShutdown,
  ) -> JoinHandle<()> {
    tokio::spawn(async move {
      let shutdown = shutdown.cancelled();
      tokio::pin!(shutdown);
      let mut ticker = tokio::time::interval(interval);

      loop {
        tokio::select! {
          () = &mut shutdown => break,
          _ = ticker.tick() => self.sweep(),
        }
      }
      log::debug!("cache sweeper shutting down");
    })
  }

  // Return the cached result for `key`, computing it with `compute` if needed. A failed
  // computation is not cached and its error is returned to this caller only; waiters retry.
  pub async fn get_or_compute<E, F>(
    &self,
    key: &str,
    deadline: Instant,
    compute: F,
  ) -> Result<Bytes, E>
  where
    E: From<CacheError>,
    F: Future<Output = Result<Bytes, E>>,
  {
    match self.fetch_or_become_computer(key, deadline).await? {
      Lookup::Ready(bytes) => Ok(bytes),
      Lookup::Compute(computer) => match compute.await {
        Ok(bytes) => {
          computer.publish(bytes.clone());
          Ok(bytes)
        },
        Err(e) => {
          computer.abort();
          Err(e)
        },
      },
    }
  }

  #[must_use]
  pub fn size_bytes(&self) -> u64 {
    self.size_bytes.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.shards.iter().map(|shard| shard.read().len()).sum()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
