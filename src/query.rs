//! Saved queries and their last known result sets.
//!
//! A [`SavedQuery`] is a named summary search. Running it (see
//! `RemoteContext::run_query`) installs every hit into the identity cache and
//! hands the entities to [`SavedQuery::apply_results`], which diffs them
//! against the previous run and notifies listeners when the set changed.
//!
//! # Example
//!
//! ```ignore
//! let query = SavedQuery::new(SavedQueryConfig::new("Crashes", "crash"));
//! context.save_query(Arc::clone(&query));
//! context.schedule_query_refresh(&query);
//!
//! let mut events = query.add_change_listener();
//! while let Some(QueryEvent::ResultsChanged(diff)) = events.next().await {
//!     println!("+{:?} -{:?}", diff.added, diff.removed);
//! }
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::event::{EventReceiver, ListenerId, Listeners};
use crate::issue::IssueEntity;

/// Persisted form of a saved query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedQueryConfig {
  pub name: String,
  /// Project identifier; the context's selected project when absent
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project: Option<String>,
  /// Text matched against issue subjects
  pub summary: String,
  #[serde(default = "default_auto_refresh")]
  pub auto_refresh: bool,
}

fn default_auto_refresh() -> bool {
  true
}

impl SavedQueryConfig {
  pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      project: None,
      summary: summary.into(),
      auto_refresh: true,
    }
  }
}

/// The state of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
  /// Query has never run
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Last run succeeded
  Success { fetched_at: Instant },
  /// Last run failed; the previous results are kept
  Error(String),
}

impl QueryState {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success { .. })
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Issue ids that entered or left a query's result set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDiff {
  pub added: Vec<String>,
  pub removed: Vec<String>,
}

impl QueryDiff {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.removed.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
  ResultsChanged(QueryDiff),
}

pub struct SavedQuery {
  name: String,
  project: Option<String>,
  summary: String,
  auto_refresh: AtomicBool,
  state: Mutex<QueryState>,
  results: Mutex<Vec<Arc<IssueEntity>>>,
  listeners: Listeners<QueryEvent>,
}

impl SavedQuery {
  pub fn new(config: SavedQueryConfig) -> Arc<Self> {
    Arc::new(Self {
      name: config.name,
      project: config.project,
      summary: config.summary,
      auto_refresh: AtomicBool::new(config.auto_refresh),
      state: Mutex::new(QueryState::Idle),
      results: Mutex::new(Vec::new()),
      listeners: Listeners::new(),
    })
  }

  pub fn to_config(&self) -> SavedQueryConfig {
    SavedQueryConfig {
      name: self.name.clone(),
      project: self.project.clone(),
      summary: self.summary.clone(),
      auto_refresh: self.auto_refresh(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn project(&self) -> Option<&str> {
    self.project.as_deref()
  }

  pub fn summary(&self) -> &str {
    &self.summary
  }

  /// Wildcard pattern sent to the summary search
  pub fn pattern(&self) -> String {
    format!("*{}*", self.summary)
  }

  /// Whether periodic refresh may re-run this query
  pub fn auto_refresh(&self) -> bool {
    self.auto_refresh.load(Ordering::Relaxed)
  }

  /// Flip the toggle in memory only; [`RemoteContext::set_query_auto_refresh`]
  /// also stores it.
  ///
  /// [`RemoteContext::set_query_auto_refresh`]: crate::context::RemoteContext::set_query_auto_refresh
  pub fn set_auto_refresh(&self, enabled: bool) {
    self.auto_refresh.store(enabled, Ordering::Relaxed);
  }

  pub fn state(&self) -> QueryState {
    self.state.lock().clone()
  }

  pub fn issues(&self) -> Vec<Arc<IssueEntity>> {
    self.results.lock().clone()
  }

  pub fn add_change_listener(&self) -> EventReceiver<QueryEvent> {
    self.listeners.add()
  }

  pub fn remove_change_listener(&self, id: ListenerId) -> bool {
    self.listeners.remove(id)
  }

  pub(crate) fn begin_loading(&self) {
    *self.state.lock() = QueryState::Loading;
  }

  /// Replace the result set and report which ids came and went.
  pub(crate) fn apply_results(&self, issues: Vec<Arc<IssueEntity>>) -> QueryDiff {
    let new_ids: Vec<String> = issues.iter().filter_map(|i| i.id()).collect();
    let old_ids: Vec<String> = {
      let mut results = self.results.lock();
      let old = results.iter().filter_map(|i| i.id()).collect();
      *results = issues;
      old
    };
    *self.state.lock() = QueryState::Success {
      fetched_at: Instant::now(),
    };

    let diff = diff_ids(&old_ids, &new_ids);
    if !diff.is_empty() {
      self.listeners.fire(QueryEvent::ResultsChanged(diff.clone()));
    }
    diff
  }

  pub(crate) fn fail(&self, message: String) {
    *self.state.lock() = QueryState::Error(message);
  }
}

impl std::fmt::Debug for SavedQuery {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SavedQuery")
      .field("name", &self.name)
      .field("summary", &self.summary)
      .field("auto_refresh", &self.auto_refresh())
      .field("state", &self.state())
      .finish_non_exhaustive()
  }
}

fn diff_ids(old: &[String], new: &[String]) -> QueryDiff {
  let old_set: HashSet<&String> = old.iter().collect();
  let new_set: HashSet<&String> = new.iter().collect();
  QueryDiff {
    added: new
      .iter()
      .filter(|id| !old_set.contains(id))
      .cloned()
      .collect(),
    removed: old
      .iter()
      .filter(|id| !new_set.contains(id))
      .cloned()
      .collect(),
  }
}
