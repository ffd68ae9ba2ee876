//! In-memory remote used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context::{ContextOptions, RemoteContext};
use crate::error::{Error, Result};
use crate::redmine::types::{
  Attachment, Include, Issue, IssueCategory, IssuePriority, IssueStatus, Membership, NamedRef,
  Project, TimeEntryActivity, Tracker, User, Version,
};
use crate::redmine::{ConnectionParams, Connector, RemoteClient};
use crate::refresh::RefreshSettings;
use crate::store::MemoryQueryStore;

pub const TEST_PROJECT: &str = "demo";

/// Fake server keeping issues in a map.
///
/// A fetch copies the stored issue before any configured delay, so a delayed
/// fetch returns data that may be older than a fetch started after it.
pub struct FakeRemote {
  issues: Mutex<HashMap<u32, Issue>>,
  fetches: Mutex<HashMap<u32, u32>>,
  delays: Mutex<VecDeque<Duration>>,
  updates: Mutex<Vec<Issue>>,
  searches: AtomicU32,
  next_id: AtomicU32,
  next_upload: AtomicU32,
  offline: AtomicBool,
  fail_updates: AtomicBool,
  statuses: Mutex<Option<Vec<IssueStatus>>>,
  priorities: Mutex<Option<Vec<IssuePriority>>>,
  categories_listed: AtomicU32,
}

impl FakeRemote {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      issues: Mutex::new(HashMap::new()),
      fetches: Mutex::new(HashMap::new()),
      delays: Mutex::new(VecDeque::new()),
      updates: Mutex::new(Vec::new()),
      searches: AtomicU32::new(0),
      next_id: AtomicU32::new(1000),
      next_upload: AtomicU32::new(1),
      offline: AtomicBool::new(false),
      fail_updates: AtomicBool::new(false),
      statuses: Mutex::new(None),
      priorities: Mutex::new(None),
      categories_listed: AtomicU32::new(0),
    })
  }

  pub fn put_issue(&self, issue: Issue) {
    if let Some(id) = issue.id {
      self.issues.lock().insert(id, issue);
    }
  }

  pub fn delete_issue(&self, id: u32) {
    self.issues.lock().remove(&id);
  }

  /// Delay applied to the next `fetch_issue_by_id` call only.
  pub fn delay_next_fetch(&self, delay: Duration) {
    self.delays.lock().push_back(delay);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn fail_updates(&self, fail: bool) {
    self.fail_updates.store(fail, Ordering::SeqCst);
  }

  pub fn set_statuses(&self, statuses: Vec<IssueStatus>) {
    *self.statuses.lock() = Some(statuses);
  }

  pub fn set_priorities(&self, priorities: Vec<IssuePriority>) {
    *self.priorities.lock() = Some(priorities);
  }

  pub fn fetches_of(&self, id: u32) -> u32 {
    self.fetches.lock().get(&id).copied().unwrap_or(0)
  }

  pub fn total_fetches(&self) -> u32 {
    self.fetches.lock().values().sum()
  }

  pub fn searches(&self) -> u32 {
    self.searches.load(Ordering::SeqCst)
  }

  pub fn categories_listed(&self) -> u32 {
    self.categories_listed.load(Ordering::SeqCst)
  }

  pub fn last_update(&self) -> Option<Issue> {
    self.updates.lock().last().cloned()
  }

  fn check_online(&self) -> Result<()> {
    if self.offline.load(Ordering::SeqCst) {
      Err(Error::Remote("connection refused".to_string()))
    } else {
      Ok(())
    }
  }

  /// What the server keeps after a write: notes are consumed and uploads get ids.
  fn store_written(&self, issue: &Issue) -> Issue {
    let mut stored = issue.clone();
    stored.notes = None;
    for attachment in stored.attachments.iter_mut() {
      if attachment.id.is_none() {
        attachment.id = Some(self.next_upload.fetch_add(1, Ordering::SeqCst) + 500);
        attachment.token = None;
      }
    }
    self.put_issue(stored.clone());
    stored
  }
}

#[async_trait]
impl RemoteClient for FakeRemote {
  async fn fetch_issue_by_id(&self, id: u32, _include: &[Include]) -> Result<Issue> {
    self.check_online()?;
    *self.fetches.lock().entry(id).or_default() += 1;
    let snapshot = self.issues.lock().get(&id).cloned();
    let delay = self.delays.lock().pop_front();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    snapshot.ok_or_else(|| Error::NotFound(format!("issue {}", id)))
  }

  async fn search_issues_by_summary(&self, project_key: &str, pattern: &str) -> Result<Vec<Issue>> {
    self.check_online()?;
    self.searches.fetch_add(1, Ordering::SeqCst);
    let needle = pattern.trim_matches('*').to_lowercase();
    let mut hits: Vec<Issue> = self
      .issues
      .lock()
      .values()
      .filter(|i| {
        i.project
          .as_ref()
          .map_or(project_key == TEST_PROJECT, |p| p.name == project_key)
      })
      .filter(|i| i.subject.to_lowercase().contains(&needle))
      .cloned()
      .collect();
    hits.sort_by_key(|i| i.id);
    Ok(hits)
  }

  async fn update_issue(&self, issue: &Issue) -> Result<()> {
    self.check_online()?;
    if self.fail_updates.load(Ordering::SeqCst) {
      return Err(Error::Remote("422 Unprocessable Entity".to_string()));
    }
    self.updates.lock().push(issue.clone());
    self.store_written(issue);
    Ok(())
  }

  async fn create_issue(&self, _project_key: &str, issue: &Issue) -> Result<Issue> {
    self.check_online()?;
    if self.fail_updates.load(Ordering::SeqCst) {
      return Err(Error::Remote("422 Unprocessable Entity".to_string()));
    }
    let mut created = issue.clone();
    created.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
    Ok(self.store_written(&created))
  }

  async fn upload_attachment(&self, mime_type: &str, path: &Path) -> Result<Attachment> {
    self.check_online()?;
    let n = self.next_upload.fetch_add(1, Ordering::SeqCst);
    Ok(Attachment {
      file_name: path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default(),
      content_type: Some(mime_type.to_string()),
      token: Some(format!("tok-{}", n)),
      ..Default::default()
    })
  }

  async fn list_trackers(&self) -> Result<Vec<Tracker>> {
    self.check_online()?;
    Ok(vec![
      Tracker {
        id: 1,
        name: "Bug".to_string(),
      },
      Tracker {
        id: 2,
        name: "Feature".to_string(),
      },
    ])
  }

  async fn list_statuses(&self) -> Result<Vec<IssueStatus>> {
    self.check_online()?;
    self
      .statuses
      .lock()
      .clone()
      .ok_or_else(|| Error::Remote("500 Internal Server Error".to_string()))
  }

  async fn list_categories(&self, project_id: u32) -> Result<Vec<IssueCategory>> {
    self.check_online()?;
    self.categories_listed.fetch_add(1, Ordering::SeqCst);
    Ok(vec![IssueCategory {
      id: project_id * 10,
      name: "Backend".to_string(),
    }])
  }

  async fn list_versions(&self, _project_id: u32) -> Result<Vec<Version>> {
    self.check_online()?;
    Ok(vec![Version {
      id: 1,
      name: "1.0".to_string(),
      status: Some("open".to_string()),
    }])
  }

  async fn list_memberships(&self, _project_id: u32) -> Result<Vec<Membership>> {
    self.check_online()?;
    Ok(vec![
      Membership {
        id: 1,
        user: Some(NamedRef {
          id: 1,
          name: "Jane Doe".to_string(),
        }),
      },
      Membership {
        id: 2,
        user: Some(NamedRef {
          id: 2,
          name: "Sam Roe".to_string(),
        }),
      },
      Membership { id: 3, user: None },
    ])
  }

  async fn list_time_entry_activities(&self) -> Result<Vec<TimeEntryActivity>> {
    self.check_online()?;
    Err(Error::NotFound("enumerations/time_entry_activities".to_string()))
  }

  async fn list_issue_priorities(&self) -> Result<Vec<IssuePriority>> {
    self.check_online()?;
    self
      .priorities
      .lock()
      .clone()
      .ok_or_else(|| Error::NotFound("enumerations/issue_priorities".to_string()))
  }

  async fn get_current_user(&self) -> Result<User> {
    self.check_online()?;
    Ok(User {
      id: 1,
      login: "jdoe".to_string(),
      firstname: "Jane".to_string(),
      lastname: "Doe".to_string(),
      mail: None,
    })
  }

  async fn get_project_by_key(&self, key: &str) -> Result<Project> {
    self.check_online()?;
    Ok(Project {
      id: 7,
      identifier: key.to_string(),
      name: key.to_uppercase(),
    })
  }
}

/// Hands out the same fake remote and counts how often it was asked to.
pub struct FakeConnector {
  remote: Arc<FakeRemote>,
  connects: AtomicU32,
}

impl FakeConnector {
  pub fn new(remote: &Arc<FakeRemote>) -> Arc<Self> {
    Arc::new(Self {
      remote: Arc::clone(remote),
      connects: AtomicU32::new(0),
    })
  }

  pub fn connects(&self) -> u32 {
    self.connects.load(Ordering::SeqCst)
  }
}

impl Connector for FakeConnector {
  fn connect(&self, _params: &ConnectionParams) -> Result<Arc<dyn RemoteClient>> {
    self.connects.fetch_add(1, Ordering::SeqCst);
    // Widen the window for racing first uses
    std::thread::sleep(Duration::from_millis(5));
    Ok(Arc::clone(&self.remote) as Arc<dyn RemoteClient>)
  }
}

pub fn test_options() -> ContextOptions {
  ContextOptions {
    id: "test".to_string(),
    name: "Test".to_string(),
    params: ConnectionParams {
      url: "https://redmine.example.com".to_string(),
      username: "jdoe".to_string(),
      ..Default::default()
    },
    project_key: Some(TEST_PROJECT.to_string()),
    feature_watchers: false,
    refresh: RefreshSettings::default(),
    query_store: Arc::new(MemoryQueryStore::new()),
  }
}

pub fn context_with(remote: &Arc<FakeRemote>) -> Arc<RemoteContext> {
  RemoteContext::new(test_options(), FakeConnector::new(remote))
}
