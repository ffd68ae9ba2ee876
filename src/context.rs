//! One configured connection to a Redmine server.
//!
//! [`RemoteContext`] ties the pieces together: the lazily built remote client,
//! the identity cache of issues, the background refresh scheduler, saved
//! queries and the reference data (trackers, statuses, priorities...) the UI
//! needs to render and edit issues.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::IdentityCache;
use crate::config::{AuthMode, ContextConfig, RefreshConfig};
use crate::error::{Error, Result};
use crate::event::{ContextEvent, EventReceiver, ListenerId, Listeners};
use crate::issue::IssueEntity;
use crate::query::{QueryDiff, SavedQuery, SavedQueryConfig};
use crate::redmine::types::{
  Issue, IssueCategory, IssuePriority, IssueStatus, NamedRef, Project, TimeEntryActivity, Tracker,
  User, Version,
};
use crate::redmine::{ConnectionParams, Connector, RemoteClient};
use crate::refresh::{DebugOverrides, RefreshScheduler, RefreshSettings, RefreshTarget};
use crate::registry::ContextRegistry;
use crate::store::QueryStore;

/// Everything needed to build a context
pub struct ContextOptions {
  pub id: String,
  pub name: String,
  pub params: ConnectionParams,
  /// Project identifier used for searches and new issues
  pub project_key: Option<String>,
  pub feature_watchers: bool,
  pub refresh: RefreshSettings,
  pub query_store: Arc<dyn QueryStore>,
}

impl ContextOptions {
  pub fn from_config(
    config: &ContextConfig,
    global: &RefreshConfig,
    debug: DebugOverrides,
    query_store: Arc<dyn QueryStore>,
  ) -> Self {
    Self {
      id: config.context_id(),
      name: config.name.clone(),
      params: config.connection_params(),
      project_key: config.project.clone(),
      feature_watchers: config.feature_watchers,
      refresh: config.refresh_settings(global, debug),
      query_store,
    }
  }
}

/// Connection parameters plus the client built from them.
struct Connection {
  params: ConnectionParams,
  client: Option<Arc<dyn RemoteClient>>,
}

/// Reference data cached until the connection or project changes
#[derive(Default)]
struct ReferenceData {
  current_user: Option<User>,
  project: Option<Project>,
  statuses: Option<Vec<IssueStatus>>,
  categories: Option<Vec<IssueCategory>>,
  priorities: Option<Vec<IssuePriority>>,
}

pub struct RemoteContext {
  id: String,
  name: String,
  feature_watchers: bool,
  me: Weak<RemoteContext>,
  connector: Arc<dyn Connector>,
  connection: Mutex<Connection>,
  project_key: RwLock<Option<String>>,
  reference: RwLock<ReferenceData>,
  settings: Arc<RwLock<RefreshSettings>>,
  scheduler: RefreshScheduler,
  issues: IdentityCache<IssueEntity>,
  query_store: Arc<dyn QueryStore>,
  queries: Mutex<Option<Vec<Arc<SavedQuery>>>>,
  listeners: Listeners<ContextEvent>,
}

impl RemoteContext {
  /// Build a context and register it in [`ContextRegistry::global`].
  pub fn new(options: ContextOptions, connector: Arc<dyn Connector>) -> Arc<Self> {
    let settings = Arc::new(RwLock::new(options.refresh));
    let context = Arc::new_cyclic(|me: &Weak<RemoteContext>| {
      let target: Weak<dyn RefreshTarget> = me.clone();
      Self {
        id: options.id,
        name: options.name,
        feature_watchers: options.feature_watchers,
        me: me.clone(),
        connector,
        connection: Mutex::new(Connection {
          params: options.params,
          client: None,
        }),
        project_key: RwLock::new(options.project_key),
        reference: RwLock::new(ReferenceData::default()),
        settings: Arc::clone(&settings),
        scheduler: RefreshScheduler::new(target, settings),
        issues: IdentityCache::new(),
        query_store: options.query_store,
        queries: Mutex::new(None),
        listeners: Listeners::new(),
      }
    });
    ContextRegistry::global().register(&context);
    info!("created context {} ({})", context.name, context.id);
    context
  }

  pub fn from_config(
    config: &ContextConfig,
    global: &RefreshConfig,
    debug: DebugOverrides,
    query_store: Arc<dyn QueryStore>,
    connector: Arc<dyn Connector>,
  ) -> Arc<Self> {
    Self::new(
      ContextOptions::from_config(config, global, debug, query_store),
      connector,
    )
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn feature_watchers(&self) -> bool {
    self.feature_watchers
  }

  /// Name plus url, for status lines and tooltips.
  pub fn tooltip(&self) -> String {
    let connection = self.connection.lock();
    let user = &connection.params.username;
    if user.is_empty() {
      format!("{} : {}", self.name, connection.params.url)
    } else {
      format!("{} : {}@{}", self.name, user, connection.params.url)
    }
  }

  // -- Connection ------------------------------------------------------------

  /// Remote client, built on first use.
  ///
  /// Construction happens under the connection lock, so racing first users
  /// share one client.
  pub fn client(&self) -> Result<Arc<dyn RemoteClient>> {
    let mut connection = self.connection.lock();
    if let Some(client) = &connection.client {
      return Ok(Arc::clone(client));
    }
    debug!("connecting {} to {}", self.name, connection.params.url);
    let client = self.connector.connect(&connection.params)?;
    connection.client = Some(Arc::clone(&client));
    Ok(client)
  }

  pub fn connection_params(&self) -> ConnectionParams {
    self.connection.lock().params.clone()
  }

  /// Apply `update` to the connection parameters; any change forces a reconnect.
  fn update_params(&self, update: impl FnOnce(&mut ConnectionParams)) {
    let changed = {
      let mut connection = self.connection.lock();
      let before = connection.params.clone();
      update(&mut connection.params);
      let changed = connection.params != before;
      if changed {
        connection.client = None;
      }
      changed
    };
    if changed {
      debug!("connection of {} changed, reconnecting on next use", self.name);
      self.reference.write().current_user = None;
    }
  }

  pub fn set_url(&self, url: impl Into<String>) {
    let url = url.into();
    self.update_params(|p| p.url = url);
  }

  pub fn set_auth_mode(&self, auth_mode: Option<AuthMode>) {
    self.update_params(|p| p.auth_mode = auth_mode);
  }

  pub fn set_access_key(&self, access_key: Option<String>) {
    self.update_params(|p| p.access_key = access_key);
  }

  pub fn set_credentials(&self, username: impl Into<String>, password: Option<String>) {
    let username = username.into();
    self.update_params(|p| {
      p.username = username;
      p.password = password;
    });
  }

  /// Drop the client and every cached piece of reference data.
  pub fn reset(&self) {
    self.connection.lock().client = None;
    *self.reference.write() = ReferenceData::default();
  }

  pub async fn current_user(&self) -> Result<User> {
    let cached = self.reference.read().current_user.clone();
    if let Some(user) = cached {
      return Ok(user);
    }
    let user = self.client()?.get_current_user().await?;
    self.reference.write().current_user = Some(user.clone());
    Ok(user)
  }

  // -- Settings --------------------------------------------------------------

  pub fn refresh_settings(&self) -> RefreshSettings {
    *self.settings.read()
  }

  /// Takes effect from the next scheduled tick.
  pub fn set_refresh_intervals(&self, issue_minutes: i64, query_minutes: i64) {
    let mut settings = self.settings.write();
    settings.issue_interval_minutes = issue_minutes;
    settings.query_interval_minutes = query_minutes;
  }

  pub fn debug_overrides(&self) -> DebugOverrides {
    self.settings.read().debug
  }

  // -- Project ---------------------------------------------------------------

  pub fn project_key(&self) -> Option<String> {
    self.project_key.read().clone()
  }

  /// Select another project; project-scoped reference data is dropped.
  pub fn set_project_key(&self, key: Option<String>) {
    *self.project_key.write() = key;
    let mut reference = self.reference.write();
    reference.project = None;
    reference.categories = None;
  }

  pub async fn project(&self) -> Result<Project> {
    let cached = self.reference.read().project.clone();
    if let Some(project) = cached {
      return Ok(project);
    }
    let key = self
      .project_key()
      .ok_or_else(|| Error::Configuration(format!("no project selected for {}", self.name)))?;
    let project = self.client()?.get_project_by_key(&key).await?;
    self.reference.write().project = Some(project.clone());
    Ok(project)
  }

  // -- Issues ----------------------------------------------------------------

  /// Cached issue, fetched once when missing.
  ///
  /// Concurrent calls for the same id share a single remote fetch.
  pub async fn fetch_issue(&self, id: &str) -> Result<Arc<IssueEntity>> {
    let numeric: u32 = id
      .trim()
      .parse()
      .map_err(|_| Error::NotFound(format!("invalid issue id {:?}", id)))?;

    self
      .issues
      .get_or_fetch(&numeric.to_string(), || {
        // Runs under the cache lock: the client is resolved inside the future
        let me = self.me.clone();
        async move {
          let context = me
            .upgrade()
            .ok_or_else(|| Error::Configuration("context was dropped".to_string()))?;
          let issue = context.client()?.fetch_issue_by_id(numeric, &[]).await?;
          Ok(IssueEntity::new(me, issue))
        }
      })
      .await
  }

  /// Like [`fetch_issue`](Self::fetch_issue), with failures logged and dropped.
  pub async fn get_issue(&self, id: &str) -> Option<Arc<IssueEntity>> {
    self.fetch_issue(id).await.ok()
  }

  /// Every id that could be resolved, in request order.
  pub async fn get_issues(&self, ids: &[&str]) -> Vec<Arc<IssueEntity>> {
    join_all(ids.iter().map(|id| self.get_issue(id)))
      .await
      .into_iter()
      .flatten()
      .collect()
  }

  /// Cached issue without any remote call.
  pub fn cached_issue(&self, id: &str) -> Option<Arc<IssueEntity>> {
    self.issues.get(id)
  }

  pub fn cached_issue_ids(&self) -> Vec<String> {
    self.issues.keys()
  }

  /// Forget an issue, e.g. after learning it was deleted remotely.
  pub fn evict_issue(&self, id: &str) -> Option<Arc<IssueEntity>> {
    self.issues.remove(id)
  }

  /// Install an entity obtained outside of `fetch_issue`.
  pub(crate) fn install_issue(&self, entity: Arc<IssueEntity>) -> Arc<IssueEntity> {
    self.issues.put(entity)
  }

  fn install_snapshot(&self, issue: Issue) -> Arc<IssueEntity> {
    self.install_issue(IssueEntity::new(self.me.clone(), issue))
  }

  /// Empty draft; not cached until submitted.
  pub fn create_issue(&self) -> Arc<IssueEntity> {
    IssueEntity::new(self.me.clone(), Issue::default())
  }

  pub fn create_issue_with(&self, summary: &str, description: &str) -> Arc<IssueEntity> {
    let project = self.project_key().map(|key| NamedRef {
      id: 0,
      name: key,
    });
    IssueEntity::new(
      self.me.clone(),
      Issue {
        project,
        subject: summary.to_string(),
        description: (!description.is_empty()).then(|| description.to_string()),
        ..Default::default()
      },
    )
  }

  async fn search_by_summary(
    &self,
    project_key: &str,
    pattern: &str,
  ) -> Result<Vec<Arc<IssueEntity>>> {
    let hits = self
      .client()?
      .search_issues_by_summary(project_key, pattern)
      .await?;
    Ok(hits.into_iter().map(|i| self.install_snapshot(i)).collect())
  }

  /// Exact id match first, then issues whose subject contains `text`.
  ///
  /// Every hit goes through the identity cache, so an issue found both ways
  /// shows up once.
  pub async fn simple_search(&self, text: &str) -> Result<Vec<Arc<IssueEntity>>> {
    let text = text.trim();
    let mut found: Vec<Arc<IssueEntity>> = Vec::new();

    if text.parse::<u32>().is_ok() {
      match self.fetch_issue(text).await {
        Ok(entity) => found.push(entity),
        Err(Error::NotFound(_)) => {}
        Err(e) => return Err(e),
      }
    }

    let project_key = self
      .project_key()
      .ok_or_else(|| Error::Configuration(format!("no project selected for {}", self.name)))?;
    let pattern = format!("*{}*", text);
    let hits = self.search_by_summary(&project_key, &pattern).await.map_err(|e| {
      error!("can't search for issues: {}", e);
      e
    })?;
    for entity in hits {
      if !found.iter().any(|f| Arc::ptr_eq(f, &entity)) {
        found.push(entity);
      }
    }
    Ok(found)
  }

  // -- Queries ---------------------------------------------------------------

  fn with_queries<R>(&self, f: impl FnOnce(&mut Vec<Arc<SavedQuery>>) -> R) -> R {
    let mut queries = self.queries.lock();
    let loaded = queries.get_or_insert_with(|| match self.query_store.load(&self.id) {
      Ok(configs) => configs.into_iter().map(SavedQuery::new).collect(),
      Err(e) => {
        warn!("couldn't load saved queries of {}: {}", self.name, e);
        Vec::new()
      }
    });
    f(loaded)
  }

  fn persist_queries(&self, configs: Vec<SavedQueryConfig>) {
    if let Err(e) = self.query_store.save(&self.id, &configs) {
      error!("couldn't store saved queries of {}: {}", self.name, e);
    }
  }

  fn fire_query_list_changed(&self) {
    debug!("firing query list changed for context {}", self.name);
    self.listeners.fire(ContextEvent::QueryListChanged);
  }

  pub fn queries(&self) -> Vec<Arc<SavedQuery>> {
    self.with_queries(|queries| queries.clone())
  }

  pub fn query(&self, name: &str) -> Option<Arc<SavedQuery>> {
    self.with_queries(|queries| queries.iter().find(|q| q.name() == name).cloned())
  }

  /// Add `query`, replacing any saved query of the same name.
  pub fn save_query(&self, query: Arc<SavedQuery>) {
    let (replaced, configs) = self.with_queries(|queries| {
      let replaced = queries
        .iter()
        .position(|q| q.name() == query.name())
        .map(|index| queries.remove(index));
      queries.push(query);
      (replaced, queries.iter().map(|q| q.to_config()).collect::<Vec<_>>())
    });
    if let Some(old) = replaced {
      self.scheduler.stop_query(&old);
    }
    self.persist_queries(configs);
    self.fire_query_list_changed();
  }

  pub fn remove_query(&self, name: &str) -> Option<Arc<SavedQuery>> {
    let (removed, configs) = self.with_queries(|queries| {
      let removed = queries
        .iter()
        .position(|q| q.name() == name)
        .map(|index| queries.remove(index));
      (removed, queries.iter().map(|q| q.to_config()).collect::<Vec<_>>())
    });
    let removed = removed?;
    self.scheduler.stop_query(&removed);
    self.persist_queries(configs);
    self.fire_query_list_changed();
    Some(removed)
  }

  /// Turn periodic refresh of the saved query `name` on or off and store the change.
  ///
  /// Returns false when no saved query has that name.
  pub fn set_query_auto_refresh(&self, name: &str, enabled: bool) -> bool {
    let configs = self.with_queries(|queries| {
      let query = queries.iter().find(|q| q.name() == name)?;
      query.set_auto_refresh(enabled);
      Some(queries.iter().map(|q| q.to_config()).collect::<Vec<_>>())
    });
    match configs {
      Some(configs) => {
        self.persist_queries(configs);
        true
      }
      None => false,
    }
  }

  /// Run `query` now and report how its result set changed.
  pub async fn run_query(&self, query: &Arc<SavedQuery>) -> Result<QueryDiff> {
    query.begin_loading();
    let project_key = match query.project().map(str::to_string).or_else(|| self.project_key()) {
      Some(key) => key,
      None => {
        let err = Error::Configuration(format!("no project for query {}", query.name()));
        query.fail(err.to_string());
        return Err(err);
      }
    };

    match self.search_by_summary(&project_key, &query.pattern()).await {
      Ok(issues) => {
        let diff = query.apply_results(issues);
        debug!(
          "query {} of {}: +{} -{}",
          query.name(),
          self.name,
          diff.added.len(),
          diff.removed.len()
        );
        Ok(diff)
      }
      Err(e) => {
        error!("query {} of {} failed: {}", query.name(), self.name, e);
        query.fail(e.to_string());
        Err(e)
      }
    }
  }

  // -- Refresh subscriptions -------------------------------------------------

  pub fn schedule_issue_refresh(&self, id: &str) {
    self.scheduler.schedule_issue(id);
  }

  pub fn stop_issue_refresh(&self, id: &str) {
    self.scheduler.stop_issue(id);
  }

  pub fn schedule_query_refresh(&self, query: &Arc<SavedQuery>) {
    self.scheduler.schedule_query(query);
  }

  pub fn stop_query_refresh(&self, query: &Arc<SavedQuery>) {
    self.scheduler.stop_query(query);
  }

  pub fn is_issue_refresh_scheduled(&self, id: &str) -> bool {
    self.scheduler.is_issue_scheduled(id)
  }

  pub fn is_query_refresh_scheduled(&self, query: &Arc<SavedQuery>) -> bool {
    self.scheduler.is_query_scheduled(query)
  }

  pub fn scheduled_issue_ids(&self) -> Vec<String> {
    self.scheduler.scheduled_issues()
  }

  // -- Listeners -------------------------------------------------------------

  pub fn add_change_listener(&self) -> EventReceiver<ContextEvent> {
    self.listeners.add()
  }

  pub fn remove_change_listener(&self, id: ListenerId) -> bool {
    self.listeners.remove(id)
  }

  // -- Reference data --------------------------------------------------------

  pub async fn trackers(&self) -> Vec<Tracker> {
    match self.try_trackers().await {
      Ok(trackers) => trackers,
      Err(e) => {
        error!("can't get issue trackers: {}", e);
        Vec::new()
      }
    }
  }

  async fn try_trackers(&self) -> Result<Vec<Tracker>> {
    self.client()?.list_trackers().await
  }

  /// Issue statuses; a single `[n/a]` placeholder when the server has none to offer.
  ///
  /// The placeholder is not cached, later calls ask again.
  pub async fn statuses(&self) -> Vec<IssueStatus> {
    let cached = self.reference.read().statuses.clone();
    if let Some(statuses) = cached {
      return statuses;
    }

    let fetched = match self.client() {
      Ok(client) => client.list_statuses().await,
      Err(e) => Err(e),
    };
    match fetched {
      Ok(statuses) if !statuses.is_empty() => {
        self.reference.write().statuses = Some(statuses.clone());
        statuses
      }
      Ok(_) => vec![unknown_status()],
      Err(e) => {
        error!("can't get issue statuses: {}", e);
        vec![unknown_status()]
      }
    }
  }

  pub async fn status(&self, id: i32) -> Option<IssueStatus> {
    self.statuses().await.into_iter().find(|s| s.id == id)
  }

  pub async fn issue_categories(&self) -> Vec<IssueCategory> {
    let cached = self.reference.read().categories.clone();
    if let Some(categories) = cached {
      return categories;
    }
    match self.try_categories().await {
      Ok(categories) => {
        self.reference.write().categories = Some(categories.clone());
        categories
      }
      Err(e) => {
        error!("can't get issue categories of {:?}: {}", self.project_key(), e);
        Vec::new()
      }
    }
  }

  async fn try_categories(&self) -> Result<Vec<IssueCategory>> {
    let project = self.project().await?;
    self.client()?.list_categories(project.id).await
  }

  pub async fn reload_issue_categories(&self) -> Vec<IssueCategory> {
    self.reference.write().categories = None;
    self.issue_categories().await
  }

  pub async fn versions(&self) -> Vec<Version> {
    let fetched = async {
      let project = self.project().await?;
      self.client()?.list_versions(project.id).await
    };
    match fetched.await {
      Ok(versions) => versions,
      Err(e) => {
        error!("can't get versions of {:?}: {}", self.project_key(), e);
        Vec::new()
      }
    }
  }

  /// Priorities, highest first. Servers without the endpoint get a built-in list.
  pub async fn issue_priorities(&self) -> Vec<IssuePriority> {
    let cached = self.reference.read().priorities.clone();
    if let Some(priorities) = cached {
      return priorities;
    }

    let fetched = match self.client() {
      Ok(client) => client.list_issue_priorities().await,
      Err(e) => Err(e),
    };
    let priorities = match fetched {
      Ok(mut priorities) => {
        priorities.reverse();
        priorities
      }
      Err(e) => {
        info!("can't get issue priorities, using defaults: {}", e);
        fallback_priorities()
      }
    };
    self.reference.write().priorities = Some(priorities.clone());
    priorities
  }

  pub async fn time_entry_activities(&self) -> Vec<TimeEntryActivity> {
    let fetched = match self.client() {
      Ok(client) => client.list_time_entry_activities().await,
      Err(e) => Err(e),
    };
    fetched.unwrap_or_else(|e| {
      info!(
        "can't get time entry activities (either the API is missing or no permission): {}",
        e
      );
      fallback_time_entry_activities()
    })
  }

  /// The current user followed by the other members of the selected project.
  pub async fn users(&self) -> Vec<NamedRef> {
    let mut users = Vec::new();
    let current = match self.current_user().await {
      Ok(user) => {
        users.push(NamedRef {
          id: user.id,
          name: user.display_name(),
        });
        Some(user.id)
      }
      Err(e) => {
        error!("can't get current user: {}", e);
        None
      }
    };

    let memberships = async {
      let project = self.project().await?;
      self.client()?.list_memberships(project.id).await
    };
    match memberships.await {
      Ok(memberships) => users.extend(
        memberships
          .into_iter()
          .filter_map(|m| m.user)
          .filter(|u| Some(u.id) != current),
      ),
      Err(e) => error!("can't get project members: {}", e),
    }
    users
  }
}

fn unknown_status() -> IssueStatus {
  IssueStatus {
    id: -1,
    name: "[n/a]".to_string(),
    is_closed: false,
  }
}

fn fallback_priorities() -> Vec<IssuePriority> {
  [
    (7, "Immediate", false),
    (6, "Urgent", false),
    (5, "High", false),
    (4, "Normal", true),
    (3, "Low", false),
  ]
  .into_iter()
  .map(|(id, name, is_default)| IssuePriority {
    id,
    name: name.to_string(),
    is_default,
  })
  .collect()
}

fn fallback_time_entry_activities() -> Vec<TimeEntryActivity> {
  vec![
    TimeEntryActivity {
      id: 8,
      name: "Design".to_string(),
      is_default: false,
    },
    TimeEntryActivity {
      id: 9,
      name: "Development".to_string(),
      is_default: false,
    },
  ]
}

#[async_trait]
impl RefreshTarget for RemoteContext {
  fn display_name(&self) -> String {
    self.name.clone()
  }

  async fn refresh_issue(&self, id: &str) -> bool {
    match self.issues.get(id) {
      Some(entity) => entity.refresh().await,
      // Evicted while subscribed: read it back into the cache
      None => self.fetch_issue(id).await.is_ok(),
    }
  }

  async fn refresh_query(&self, query: &Arc<SavedQuery>) {
    if !query.auto_refresh() {
      debug!("auto refresh of query {} is off", query.name());
      return;
    }
    if let Err(e) = self.run_query(query).await {
      debug!("query {} will be retried next tick: {}", query.name(), e);
    }
  }
}

impl std::fmt::Debug for RemoteContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RemoteContext")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("project_key", &self.project_key())
      .finish_non_exhaustive()
  }
}
