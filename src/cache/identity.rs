//! Identity map with per-key fetch deduplication.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error};

use super::traits::Cacheable;
use crate::error::{Error, Result};

type InFlight<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;

struct CacheState<T> {
  entries: HashMap<String, Arc<T>>,
  /// One pending fetch per key; removed by the fetch itself when it settles
  in_flight: HashMap<String, InFlight<T>>,
}

impl<T: Cacheable> CacheState<T> {
  /// Insert `entity`, or fold it into the object already cached under its key.
  fn install(&mut self, fallback_key: &str, entity: Arc<T>) -> Arc<T> {
    let key = entity
      .cache_key()
      .unwrap_or_else(|| fallback_key.to_string());
    match self.entries.get(&key) {
      Some(existing) => {
        if !Arc::ptr_eq(existing, &entity) {
          existing.absorb(&entity);
        }
        Arc::clone(existing)
      }
      None => {
        self.entries.insert(key, Arc::clone(&entity));
        entity
      }
    }
  }
}

/// Per-context map from id to entity.
///
/// At most one object exists per key: later fetches or puts for a cached key
/// update the existing object in place, so holders observe changes without
/// re-subscribing. Concurrent [`get_or_fetch`](Self::get_or_fetch) calls for
/// the same missing key share a single remote fetch.
///
/// The lock is never held across a remote call.
pub struct IdentityCache<T: Cacheable> {
  state: Arc<Mutex<CacheState<T>>>,
}

impl<T: Cacheable> IdentityCache<T> {
  pub fn new() -> Self {
    Self {
      state: Arc::new(Mutex::new(CacheState {
        entries: HashMap::new(),
        in_flight: HashMap::new(),
      })),
    }
  }

  /// Cached entity for `key`, without any remote call.
  pub fn get(&self, key: &str) -> Option<Arc<T>> {
    self.state.lock().entries.get(key).cloned()
  }

  /// Cached entity for `key`, fetching it with `fetcher` when missing.
  ///
  /// `fetcher` is invoked at most once per missing key no matter how many
  /// callers race; every caller gets the same object or the same error.
  /// Failures leave no entry behind.
  pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetcher: F) -> Result<Arc<T>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<T>>> + Send + 'static,
  {
    let pending = {
      let mut state = self.state.lock();
      if let Some(entity) = state.entries.get(key) {
        return Ok(Arc::clone(entity));
      }

      match state.in_flight.get(key) {
        Some(pending) => {
          debug!("joining in-flight fetch of {} {}", T::entity_type(), key);
          pending.clone()
        }
        None => {
          let fetch = fetcher();
          let state_ref = Arc::clone(&self.state);
          let owned_key = key.to_string();
          let pending = async move {
            let result = fetch.await;
            match &result {
              Err(Error::NotFound(msg)) => {
                debug!("{} {} not found: {}", T::entity_type(), owned_key, msg)
              }
              Err(e) => error!("failed to fetch {} {}: {}", T::entity_type(), owned_key, e),
              Ok(_) => {}
            }

            let mut state = state_ref.lock();
            state.in_flight.remove(&owned_key);
            result.map(|entity| state.install(&owned_key, entity))
          }
          .boxed()
          .shared();
          state.in_flight.insert(key.to_string(), pending.clone());
          pending
        }
      }
    };

    pending.await
  }

  /// Install an entity obtained elsewhere (e.g. a search result).
  ///
  /// If an entity with the same key is cached, it absorbs `entity` and is
  /// returned instead. Entities without a key are returned untouched.
  pub fn put(&self, entity: Arc<T>) -> Arc<T> {
    let Some(key) = entity.cache_key() else {
      return entity;
    };
    self.state.lock().install(&key, entity)
  }

  /// Explicit eviction, for callers that learned the entity is gone.
  pub fn remove(&self, key: &str) -> Option<Arc<T>> {
    self.state.lock().entries.remove(key)
  }

  pub fn keys(&self) -> Vec<String> {
    self.state.lock().entries.keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.state.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T: Cacheable> Default for IdentityCache<T> {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  struct Probe {
    key: Option<String>,
    value: Mutex<u32>,
  }

  impl Probe {
    fn new(key: &str, value: u32) -> Arc<Self> {
      Arc::new(Self {
        key: Some(key.to_string()),
        value: Mutex::new(value),
      })
    }

    fn value(&self) -> u32 {
      *self.value.lock()
    }
  }

  impl Cacheable for Probe {
    fn cache_key(&self) -> Option<String> {
      self.key.clone()
    }

    fn absorb(&self, other: &Self) {
      *self.value.lock() = other.value();
    }

    fn entity_type() -> &'static str {
      "probe"
    }
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_fetches_share_one_call() {
    let cache = Arc::new(IdentityCache::<Probe>::new());
    let calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
      let cache = Arc::clone(&cache);
      let calls = Arc::clone(&calls);
      handles.push(tokio::spawn(async move {
        cache
          .get_or_fetch("7", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Probe::new("7", 1))
          })
          .await
      }));
    }

    let mut results = Vec::new();
    for handle in handles {
      results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    assert!(Arc::ptr_eq(&cache.get("7").unwrap(), &results[0]));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_not_found_is_shared_and_not_cached() {
    let cache = Arc::new(IdentityCache::<Probe>::new());
    let calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
      let cache = Arc::clone(&cache);
      let calls = Arc::clone(&calls);
      handles.push(tokio::spawn(async move {
        cache
          .get_or_fetch("9", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<Arc<Probe>, _>(Error::NotFound("issue 9".to_string()))
          })
          .await
      }));
    }

    for handle in handles {
      let err = handle.await.unwrap().err().unwrap();
      assert!(err.is_not_found());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.get("9").is_none());

    // A later call tries again instead of replaying the failure
    let entity = cache
      .get_or_fetch("9", || async { Ok(Probe::new("9", 3)) })
      .await
      .unwrap();
    assert_eq!(entity.value(), 3);
  }

  #[tokio::test]
  async fn test_remote_error_leaves_no_entry() {
    let cache = IdentityCache::<Probe>::new();
    let err = cache
      .get_or_fetch("1", || async {
        Err::<Arc<Probe>, _>(Error::Remote("connection refused".to_string()))
      })
      .await
      .err()
      .unwrap();
    assert!(matches!(err, Error::Remote(_)));
    assert!(cache.is_empty());
  }

  #[tokio::test]
  async fn test_cached_entry_skips_fetch() {
    let cache = IdentityCache::<Probe>::new();
    let calls = Arc::new(AtomicU32::new(0));
    let first = cache.put(Probe::new("1", 1));
    let counter = Arc::clone(&calls);
    let second = cache
      .get_or_fetch("1", move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Probe::new("1", 2))
      })
      .await
      .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(second.value(), 1);
  }

  #[test]
  fn test_put_preserves_identity() {
    let cache = IdentityCache::<Probe>::new();
    let original = cache.put(Probe::new("5", 1));
    let returned = cache.put(Probe::new("5", 2));

    assert!(Arc::ptr_eq(&original, &returned));
    assert_eq!(original.value(), 2);
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn test_put_without_key_is_not_cached() {
    let cache = IdentityCache::<Probe>::new();
    let draft = Arc::new(Probe {
      key: None,
      value: Mutex::new(0),
    });
    let returned = cache.put(Arc::clone(&draft));
    assert!(Arc::ptr_eq(&draft, &returned));
    assert!(cache.is_empty());
  }

  #[test]
  fn test_remove_evicts() {
    let cache = IdentityCache::<Probe>::new();
    cache.put(Probe::new("5", 1));
    assert!(cache.remove("5").is_some());
    assert!(cache.get("5").is_none());
    assert_eq!(cache.keys(), Vec::<String>::new());
  }
}
