//! Periodic background refresh of subscribed issues and queries.
//!
//! Each context runs up to two timer loops: one re-reads the issues in the
//! subscribed-id working set, the other re-runs the subscribed saved queries.
//! A loop is spawned on the first subscription and then lives as long as its
//! context; an empty working set only turns its ticks into no-ops.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::query::SavedQuery;

/// Fallback issue refresh interval, in minutes
pub const DEFAULT_ISSUE_REFRESH_MINUTES: i64 = 20;
/// Fallback query refresh interval, in minutes
pub const DEFAULT_QUERY_REFRESH_MINUTES: i64 = 30;
/// Smallest interval accepted from configuration, in minutes
pub const MIN_REFRESH_MINUTES: i64 = 5;

/// Refreshes running at the same time within one tick
const REFRESH_CONCURRENCY: usize = 4;

/// Out-of-band switches for tests and debugging, never part of normal configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugOverrides {
  /// Skip the immediate refresh when an issue is opened
  pub no_issue_refresh: bool,
  /// Honor issue intervals below the floor
  pub force_refresh_delay: bool,
  /// Fixed query refresh delay in milliseconds
  pub force_refresh_schedule_ms: Option<u64>,
}

/// Refresh settings of one context, read again every time a tick is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
  pub issue_interval_minutes: i64,
  pub query_interval_minutes: i64,
  pub debug: DebugOverrides,
}

impl Default for RefreshSettings {
  fn default() -> Self {
    Self {
      issue_interval_minutes: DEFAULT_ISSUE_REFRESH_MINUTES,
      query_interval_minutes: DEFAULT_QUERY_REFRESH_MINUTES,
      debug: DebugOverrides::default(),
    }
  }
}

impl RefreshSettings {
  /// Delay until the next issue refresh tick.
  pub fn issue_delay(&self) -> Duration {
    let mut minutes = self.issue_interval_minutes;
    if minutes < MIN_REFRESH_MINUTES {
      if self.debug.force_refresh_delay {
        minutes = minutes.max(1);
      } else {
        warn!(
          "wrong issue refresh delay {}, falling back to default {}",
          minutes, DEFAULT_ISSUE_REFRESH_MINUTES
        );
        minutes = DEFAULT_ISSUE_REFRESH_MINUTES;
      }
    }
    minutes_to_duration(minutes)
  }

  /// Delay until the next query refresh tick.
  pub fn query_delay(&self) -> Duration {
    if let Some(ms) = self.debug.force_refresh_schedule_ms {
      return Duration::from_millis(ms.max(1));
    }

    let mut minutes = self.query_interval_minutes;
    if minutes < MIN_REFRESH_MINUTES {
      warn!(
        "wrong query refresh delay {}, falling back to default {}",
        minutes, DEFAULT_QUERY_REFRESH_MINUTES
      );
      minutes = DEFAULT_QUERY_REFRESH_MINUTES;
    }
    minutes_to_duration(minutes)
  }
}

fn minutes_to_duration(minutes: i64) -> Duration {
  Duration::from_secs((minutes as u64).saturating_mul(60))
}

/// Settings handle shared between a context and its scheduler
pub type SharedSettings = Arc<RwLock<RefreshSettings>>;

/// What a scheduler tick acts on. Implemented by the remote context.
#[async_trait]
pub trait RefreshTarget: Send + Sync + 'static {
  /// Name used in log output
  fn display_name(&self) -> String;

  /// Re-read one subscribed issue. Failures are handled (and logged) by the target.
  async fn refresh_issue(&self, id: &str) -> bool;

  /// Re-run one subscribed query if its own policy allows it.
  async fn refresh_query(&self, query: &Arc<SavedQuery>);
}

/// Set of subscriptions guarded by its own lock
pub struct WorkingSet<T> {
  members: Mutex<HashSet<T>>,
}

impl<T: Eq + Hash + Clone> WorkingSet<T> {
  pub fn new() -> Self {
    Self {
      members: Mutex::new(HashSet::new()),
    }
  }

  /// Returns true if `member` was not subscribed yet.
  pub fn insert(&self, member: T) -> bool {
    self.members.lock().insert(member)
  }

  pub fn remove(&self, member: &T) -> bool {
    self.members.lock().remove(member)
  }

  pub fn contains(&self, member: &T) -> bool {
    self.members.lock().contains(member)
  }

  /// Copy of the current members; the lock is not held while acting on them.
  pub fn snapshot(&self) -> Vec<T> {
    self.members.lock().iter().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.members.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T: Eq + Hash + Clone> Default for WorkingSet<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// Query subscription compared by object identity
#[derive(Clone)]
struct QueryHandle(Arc<SavedQuery>);

impl PartialEq for QueryHandle {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl Eq for QueryHandle {}

impl Hash for QueryHandle {
  fn hash<H: Hasher>(&self, state: &mut H) {
    std::ptr::hash(Arc::as_ptr(&self.0), state);
  }
}

/// Per-context pair of refresh loops plus their working sets.
///
/// Must be used from within a tokio runtime: the first subscription spawns
/// the corresponding loop.
pub struct RefreshScheduler {
  target: Weak<dyn RefreshTarget>,
  settings: SharedSettings,
  issues: Arc<WorkingSet<String>>,
  queries: Arc<WorkingSet<QueryHandle>>,
  issue_task: Mutex<Option<JoinHandle<()>>>,
  query_task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
  pub fn new(target: Weak<dyn RefreshTarget>, settings: SharedSettings) -> Self {
    Self {
      target,
      settings,
      issues: Arc::new(WorkingSet::new()),
      queries: Arc::new(WorkingSet::new()),
      issue_task: Mutex::new(None),
      query_task: Mutex::new(None),
    }
  }

  pub fn schedule_issue(&self, id: &str) {
    debug!("scheduling issue {} for refresh", id);
    self.issues.insert(id.to_string());
    self.ensure_issue_loop();
  }

  pub fn stop_issue(&self, id: &str) {
    debug!("removing issue {} from refresh", id);
    self.issues.remove(&id.to_string());
  }

  pub fn schedule_query(&self, query: &Arc<SavedQuery>) {
    debug!("scheduling query {} for refresh", query.name());
    self.queries.insert(QueryHandle(Arc::clone(query)));
    self.ensure_query_loop();
  }

  pub fn stop_query(&self, query: &Arc<SavedQuery>) {
    debug!("removing query {} from refresh", query.name());
    self.queries.remove(&QueryHandle(Arc::clone(query)));
  }

  pub fn is_issue_scheduled(&self, id: &str) -> bool {
    self.issues.contains(&id.to_string())
  }

  pub fn is_query_scheduled(&self, query: &Arc<SavedQuery>) -> bool {
    self.queries.contains(&QueryHandle(Arc::clone(query)))
  }

  pub fn scheduled_issues(&self) -> Vec<String> {
    self.issues.snapshot()
  }

  pub fn scheduled_queries(&self) -> Vec<Arc<SavedQuery>> {
    self.queries.snapshot().into_iter().map(|q| q.0).collect()
  }

  fn ensure_issue_loop(&self) {
    let mut task = self.issue_task.lock();
    if task.is_none() {
      *task = Some(tokio::spawn(issue_loop(
        self.target.clone(),
        Arc::clone(&self.settings),
        Arc::clone(&self.issues),
      )));
    }
  }

  fn ensure_query_loop(&self) {
    let mut task = self.query_task.lock();
    if task.is_none() {
      *task = Some(tokio::spawn(query_loop(
        self.target.clone(),
        Arc::clone(&self.settings),
        Arc::clone(&self.queries),
      )));
    }
  }
}

impl Drop for RefreshScheduler {
  fn drop(&mut self) {
    for task in [self.issue_task.get_mut(), self.query_task.get_mut()] {
      if let Some(handle) = task.take() {
        handle.abort();
      }
    }
  }
}

async fn issue_loop(
  target: Weak<dyn RefreshTarget>,
  settings: SharedSettings,
  issues: Arc<WorkingSet<String>>,
) {
  loop {
    let delay = settings.read().issue_delay();
    let Some(name) = target.upgrade().map(|t| t.display_name()) else {
      return;
    };
    debug!("scheduling issue refresh for {} in {:?}", name, delay);
    tokio::time::sleep(delay).await;

    let Some(target) = target.upgrade() else {
      debug!("context {} is gone, stopping issue refresh", name);
      return;
    };
    let ids = issues.snapshot();
    if ids.is_empty() {
      debug!("no issues to refresh {}", name);
      continue;
    }
    debug!("preparing to refresh issues {} - {:?}", name, ids);

    stream::iter(ids)
      .for_each_concurrent(REFRESH_CONCURRENCY, |id| {
        let target = Arc::clone(&target);
        async move {
          // Own task per id so a panic only loses that id
          let task = tokio::spawn({
            let id = id.clone();
            async move { target.refresh_issue(&id).await }
          });
          match task.await {
            Ok(true) => {}
            Ok(false) => debug!("refresh of issue {} failed, retrying next tick", id),
            Err(e) => error!("refresh of issue {} aborted: {}", id, e),
          }
        }
      })
      .await;
  }
}

async fn query_loop(
  target: Weak<dyn RefreshTarget>,
  settings: SharedSettings,
  queries: Arc<WorkingSet<QueryHandle>>,
) {
  loop {
    let delay = settings.read().query_delay();
    let Some(name) = target.upgrade().map(|t| t.display_name()) else {
      return;
    };
    debug!("scheduling query refresh for {} in {:?}", name, delay);
    tokio::time::sleep(delay).await;

    let Some(target) = target.upgrade() else {
      debug!("context {} is gone, stopping query refresh", name);
      return;
    };
    let subscribed = queries.snapshot();
    if subscribed.is_empty() {
      debug!("no queries to refresh {}", name);
      continue;
    }

    stream::iter(subscribed)
      .for_each_concurrent(REFRESH_CONCURRENCY, |QueryHandle(query)| {
        let target = Arc::clone(&target);
        async move {
          debug!("preparing to refresh query {}", query.name());
          let name = query.name().to_string();
          let task = tokio::spawn(async move { target.refresh_query(&query).await });
          if let Err(e) = task.await {
            error!("refresh of query {} aborted: {}", name, e);
          }
        }
      })
      .await;
  }
}
