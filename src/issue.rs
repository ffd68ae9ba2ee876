//! Live local mirror of one remote issue.
//!
//! An [`IssueEntity`] holds the last snapshot read from the server plus the
//! summary and description edits the user has not pushed yet. Refreshes swap
//! the snapshot as a whole; pushes (comments, attachments, schedule changes)
//! mutate it optimistically and put the touched fields back when the server
//! rejects the update.

use std::path::Path;
use std::sync::{Arc, Weak};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::cache::Cacheable;
use crate::context::RemoteContext;
use crate::error::{Error, Result};
use crate::event::{EventReceiver, IssueEvent, ListenerId, Listeners};
use crate::interactive;
use crate::redmine::types::{Include, Issue, IssueField};

/// Status id Redmine assigns to "Resolved" in a default installation
pub const RESOLVED_STATUS_ID: u32 = 3;

const ATTACHMENT_MIME_TYPE: &str = "application/octet-stream";

const NEW_ISSUE_LABEL: &str = "New Issue";

/// Where an entity stands relative to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
  /// Never submitted
  New,
  /// Carries local edits not pushed yet
  Modified,
  /// Matches the last read from the server
  Seen,
}

#[derive(Debug, Clone, Default)]
struct IssueState {
  snapshot: Issue,
  local_summary: Option<String>,
  local_description: Option<String>,
}

pub struct IssueEntity {
  context: Weak<RemoteContext>,
  state: RwLock<IssueState>,
  listeners: Listeners<IssueEvent>,
}

impl IssueEntity {
  pub(crate) fn new(context: Weak<RemoteContext>, snapshot: Issue) -> Arc<Self> {
    Arc::new(Self {
      context,
      state: RwLock::new(IssueState {
        snapshot,
        ..Default::default()
      }),
      listeners: Listeners::new(),
    })
  }

  /// Entity bound to no context. Remote operations on it fail with a
  /// configuration error.
  pub fn detached(snapshot: Issue) -> Arc<Self> {
    Self::new(Weak::new(), snapshot)
  }

  fn context(&self) -> Result<Arc<RemoteContext>> {
    self
      .context
      .upgrade()
      .ok_or_else(|| Error::Configuration("issue is not bound to a live context".to_string()))
  }

  /// Remote id as text, `None` for drafts.
  pub fn id(&self) -> Option<String> {
    self.remote_id().map(|id| id.to_string())
  }

  pub fn remote_id(&self) -> Option<u32> {
    self.state.read().snapshot.remote_id()
  }

  pub fn is_new(&self) -> bool {
    self.remote_id().is_none()
  }

  /// Derived on every call from the current id and pending edits.
  pub fn status(&self) -> EntityStatus {
    let state = self.state.read();
    if state.snapshot.remote_id().is_none() {
      EntityStatus::New
    } else if state.local_summary.is_some() || state.local_description.is_some() {
      EntityStatus::Modified
    } else {
      EntityStatus::Seen
    }
  }

  pub fn summary(&self) -> String {
    let state = self.state.read();
    if state.snapshot.remote_id().is_none() && state.snapshot.subject.is_empty() {
      NEW_ISSUE_LABEL.to_string()
    } else {
      state.snapshot.subject.clone()
    }
  }

  /// `"Bug #42: Crash on save"`, or just the subject for drafts.
  pub fn display_name(&self) -> String {
    let state = self.state.read();
    let issue = &state.snapshot;
    match issue.remote_id() {
      None if issue.subject.is_empty() => NEW_ISSUE_LABEL.to_string(),
      None => issue.subject.clone(),
      Some(id) => {
        let tracker = issue
          .tracker
          .as_ref()
          .map(|t| t.name.as_str())
          .unwrap_or("Issue");
        format!("{} #{}: {}", tracker, id, issue.subject)
      }
    }
  }

  pub fn tooltip(&self) -> String {
    self.display_name()
  }

  /// Copy of the last snapshot read from (or created on) the server.
  pub fn snapshot(&self) -> Issue {
    self.state.read().snapshot.clone()
  }

  pub fn field(&self, field: IssueField) -> Option<String> {
    field.value(&self.state.read().snapshot)
  }

  pub fn is_finished(&self) -> bool {
    self
      .state
      .read()
      .snapshot
      .status_name
      .as_deref()
      .is_some_and(|s| s.eq_ignore_ascii_case("closed"))
  }

  pub fn has_parent(&self) -> bool {
    self.state.read().snapshot.parent_id.is_some()
  }

  pub fn due_date(&self) -> Option<NaiveDate> {
    self.state.read().snapshot.due_date
  }

  /// Scheduled start date
  pub fn schedule(&self) -> Option<NaiveDate> {
    self.state.read().snapshot.start_date
  }

  pub fn created(&self) -> Option<DateTime<Utc>> {
    self.state.read().snapshot.created_on
  }

  pub fn last_modified(&self) -> Option<DateTime<Utc>> {
    self.state.read().snapshot.updated_on
  }

  pub fn local_summary(&self) -> Option<String> {
    self.state.read().local_summary.clone()
  }

  pub fn local_description(&self) -> Option<String> {
    self.state.read().local_description.clone()
  }

  pub fn set_local_summary(&self, summary: Option<String>) {
    self.state.write().local_summary = summary;
    self.fire_changed();
  }

  pub fn set_local_description(&self, description: Option<String>) {
    self.state.write().local_description = description;
    self.fire_changed();
  }

  /// Drop every pending local edit.
  pub fn discard_outgoing(&self) {
    {
      let mut state = self.state.write();
      state.local_summary = None;
      state.local_description = None;
    }
    self.fire_changed();
  }

  pub fn add_change_listener(&self) -> EventReceiver<IssueEvent> {
    self.listeners.add()
  }

  pub fn remove_change_listener(&self, id: ListenerId) -> bool {
    self.listeners.remove(id)
  }

  fn fire_changed(&self) {
    self.listeners.fire(IssueEvent::DataChanged);
  }

  fn replace_snapshot(&self, snapshot: Issue) {
    self.state.write().snapshot = snapshot;
    self.fire_changed();
  }

  /// Re-read the issue with its journals, attachments and watchers.
  ///
  /// Must not run on the interactive thread. Drafts succeed without a remote
  /// call. Failures are logged and reported as `false`; the previous snapshot
  /// stays in place.
  pub async fn refresh(&self) -> bool {
    debug_assert!(
      !interactive::is_current_thread(),
      "remote access from the interactive thread"
    );

    let Some(id) = self.remote_id() else {
      return true;
    };

    match self.fetch_full(id).await {
      Ok(snapshot) => {
        self.replace_snapshot(snapshot);
        true
      }
      Err(Error::NotFound(msg)) => {
        error!("can't refresh issue {}, it no longer exists: {}", id, msg);
        false
      }
      Err(e) => {
        error!("can't refresh issue {}: {}", id, e);
        false
      }
    }
  }

  async fn fetch_full(&self, id: u32) -> Result<Issue> {
    let client = self.context()?.client()?;
    client
      .fetch_issue_by_id(id, &[Include::Journals, Include::Attachments, Include::Watchers])
      .await
  }

  /// Refresh now and subscribe to periodic refresh.
  ///
  /// On the interactive thread the refresh is handed to a worker and this
  /// returns without waiting for it.
  pub async fn open(self: &Arc<Self>) {
    let Some(id) = self.id() else {
      return;
    };
    debug!("issue {} open start", id);
    let Ok(context) = self.context() else {
      warn!("issue {} opened without a live context", id);
      return;
    };

    if !context.debug_overrides().no_issue_refresh {
      if interactive::is_current_thread() {
        let entity = Arc::clone(self);
        interactive::dispatch(async move { entity.refresh().await });
      } else {
        self.refresh().await;
      }
    }

    context.schedule_issue_refresh(&id);
    debug!("issue {} open finish", id);
  }

  /// Unsubscribe from periodic refresh.
  pub fn close(&self) {
    let (Some(id), Some(context)) = (self.id(), self.context.upgrade()) else {
      return;
    };
    debug!("issue {} close start", id);
    context.stop_issue_refresh(&id);
    debug!("issue {} close finish", id);
  }

  /// Add a journal note and optionally mark the issue resolved.
  ///
  /// On failure the note and status go back to their previous values.
  pub async fn add_comment(&self, comment: &str, resolve: bool) -> Result<()> {
    if self.is_new() {
      return Err(Error::Unsupported("comments on an issue that was never submitted"));
    }
    let client = self.context()?.client()?;

    let (previous_notes, previous_status, outgoing) = {
      let mut state = self.state.write();
      let previous_notes = state.snapshot.notes.take();
      let previous_status = state.snapshot.status_id;
      state.snapshot.notes = Some(comment.to_string());
      if resolve {
        state.snapshot.status_id = Some(RESOLVED_STATUS_ID);
      }
      (previous_notes, previous_status, state.snapshot.clone())
    };

    if let Err(e) = client.update_issue(&outgoing).await {
      error!("can't add comment to issue {:?}: {}", outgoing.id, e);
      {
        let mut state = self.state.write();
        state.snapshot.notes = previous_notes;
        state.snapshot.status_id = previous_status;
      }
      self.fire_changed();
      return Err(e);
    }

    self.state.write().snapshot.notes = None;
    self.refresh().await;
    Ok(())
  }

  /// Upload `path` and link it to the issue, with an optional journal note.
  ///
  /// On failure the attachment list and note go back to their previous values.
  pub async fn attach_file(&self, path: &Path, description: &str, comment: &str) -> Result<()> {
    if self.is_new() {
      return Err(Error::Unsupported("attachments on an issue that was never submitted"));
    }
    let client = self.context()?.client()?;

    let mut attachment = client.upload_attachment(ATTACHMENT_MIME_TYPE, path).await?;
    if !description.is_empty() {
      attachment.description = Some(description.to_string());
    }

    let (previous_attachments, previous_notes, outgoing) = {
      let mut state = self.state.write();
      let previous_attachments = state.snapshot.attachments.clone();
      let previous_notes = state.snapshot.notes.clone();
      state.snapshot.attachments.push(attachment);
      if !comment.trim().is_empty() {
        state.snapshot.notes = Some(comment.to_string());
      }
      (previous_attachments, previous_notes, state.snapshot.clone())
    };

    if let Err(e) = client.update_issue(&outgoing).await {
      error!("can't attach {} to issue {:?}: {}", path.display(), outgoing.id, e);
      {
        let mut state = self.state.write();
        state.snapshot.attachments = previous_attachments;
        state.snapshot.notes = previous_notes;
      }
      self.fire_changed();
      return Err(e);
    }

    self.state.write().snapshot.notes = None;
    self.refresh().await;
    Ok(())
  }

  /// Move the scheduled start date. Drafts ignore the call.
  pub async fn set_schedule(&self, start_date: Option<NaiveDate>) -> Result<()> {
    if self.is_new() {
      debug!("ignoring schedule change on unsaved issue");
      return Ok(());
    }
    let client = self.context()?.client()?;

    let (previous, outgoing) = {
      let mut state = self.state.write();
      let previous = state.snapshot.start_date;
      state.snapshot.start_date = start_date;
      (previous, state.snapshot.clone())
    };
    self.fire_changed();

    if let Err(e) = client.update_issue(&outgoing).await {
      warn!("failed to update start date for issue {:?}: {}", outgoing.id, e);
      self.state.write().snapshot.start_date = previous;
      self.fire_changed();
      return Err(e);
    }
    Ok(())
  }

  /// Push pending work to the server.
  ///
  /// Drafts are created in the context's project and installed into the
  /// identity cache under their new id. Existing issues push their pending
  /// summary and description. Pending edits survive a failed push.
  pub async fn submit(self: &Arc<Self>) -> Result<()> {
    let context = self.context()?;
    let outgoing = {
      let state = self.state.read();
      let mut outgoing = state.snapshot.clone();
      if let Some(summary) = &state.local_summary {
        outgoing.subject = summary.clone();
      }
      if let Some(description) = &state.local_description {
        outgoing.description = Some(description.clone());
      }
      outgoing
    };

    match outgoing.remote_id() {
      None => {
        let project_key = context
          .project_key()
          .ok_or_else(|| Error::Configuration("no project selected for new issues".to_string()))?;
        if outgoing.subject.trim().is_empty() {
          return Err(Error::Configuration("new issue needs a subject".to_string()));
        }
        let created = context.client()?.create_issue(&project_key, &outgoing).await?;
        info!("created issue {:?} in {}", created.id, project_key);
        {
          let mut state = self.state.write();
          state.snapshot = created;
          state.local_summary = None;
          state.local_description = None;
        }
        self.fire_changed();
        context.install_issue(Arc::clone(self));
        Ok(())
      }
      Some(id) => {
        if self.status() != EntityStatus::Modified {
          return Ok(());
        }
        context.client()?.update_issue(&outgoing).await?;
        {
          let mut state = self.state.write();
          state.snapshot.subject = outgoing.subject;
          state.snapshot.description = outgoing.description;
          state.local_summary = None;
          state.local_description = None;
        }
        self.fire_changed();
        debug!("pushed local edits of issue {}", id);
        self.refresh().await;
        Ok(())
      }
    }
  }
}

impl Cacheable for IssueEntity {
  fn cache_key(&self) -> Option<String> {
    self.id()
  }

  /// Take the newer snapshot; pending local edits stay.
  fn absorb(&self, other: &Self) {
    let snapshot = other.snapshot();
    self.replace_snapshot(snapshot);
  }

  fn entity_type() -> &'static str {
    "issue"
  }
}

impl std::fmt::Debug for IssueEntity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.state.read();
    f.debug_struct("IssueEntity")
      .field("id", &state.snapshot.id)
      .field("subject", &state.snapshot.subject)
      .field("local_summary", &state.local_summary)
      .field("local_description", &state.local_description)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::redmine::types::{NamedRef, Journal};
  use crate::testing::{context_with, test_options, FakeConnector, FakeRemote};
  use std::time::Duration;

  fn remote_issue(id: u32, subject: &str) -> Issue {
    Issue {
      id: Some(id),
      tracker: Some(NamedRef {
        id: 1,
        name: "Bug".to_string(),
      }),
      status_id: Some(1),
      status_name: Some("New".to_string()),
      subject: subject.to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn test_status_follows_draft_edit_submit() {
    let entity = IssueEntity::detached(Issue {
      subject: "Fix bug".to_string(),
      ..Default::default()
    });
    assert_eq!(entity.status(), EntityStatus::New);
    assert_eq!(entity.status(), EntityStatus::New);

    entity.set_local_summary(Some("Fix the bug".to_string()));
    // Still a draft: no id wins over pending edits
    assert_eq!(entity.status(), EntityStatus::New);

    entity.state.write().snapshot.id = Some(17);
    assert_eq!(entity.status(), EntityStatus::Modified);

    entity.discard_outgoing();
    assert_eq!(entity.status(), EntityStatus::Seen);
  }

  #[test]
  fn test_zero_id_is_a_draft() {
    let entity = IssueEntity::detached(Issue {
      id: Some(0),
      ..Default::default()
    });
    assert!(entity.is_new());
    assert_eq!(entity.id(), None);
    assert_eq!(entity.status(), EntityStatus::New);
    assert_eq!(entity.display_name(), "New Issue");
    assert_eq!(entity.cache_key(), None);
  }

  #[test]
  fn test_names_and_derived_fields() {
    let mut issue = remote_issue(42, "Crash on save");
    issue.status_name = Some("Closed".to_string());
    issue.parent_id = Some(7);
    let entity = IssueEntity::detached(issue);

    assert_eq!(entity.display_name(), "Bug #42: Crash on save");
    assert_eq!(entity.tooltip(), entity.display_name());
    assert!(entity.is_finished());
    assert!(entity.has_parent());
    assert_eq!(entity.field(IssueField::Id).as_deref(), Some("42"));
  }

  #[tokio::test]
  async fn test_draft_refresh_makes_no_remote_call() {
    let remote = FakeRemote::new();
    let context = context_with(&remote);
    let draft = context.create_issue_with("Fix bug", "");

    assert!(draft.refresh().await);
    assert_eq!(remote.total_fetches(), 0);
  }

  #[tokio::test]
  async fn test_refresh_replaces_snapshot_wholesale() {
    let remote = FakeRemote::new();
    let mut before = remote_issue(5, "before");
    before.due_date = NaiveDate::from_ymd_opt(2024, 1, 31);
    before.assignee = Some(NamedRef {
      id: 3,
      name: "Ann".to_string(),
    });
    remote.put_issue(before);
    let context = context_with(&remote);
    let entity = context.fetch_issue("5").await.unwrap();
    entity.set_local_description(Some("draft text".to_string()));

    let mut after = remote_issue(5, "after");
    after.journals.push(Journal {
      id: 1,
      notes: Some("looked at it".to_string()),
      ..Default::default()
    });
    remote.put_issue(after.clone());

    let mut events = entity.add_change_listener();
    assert!(entity.refresh().await);
    assert_eq!(entity.snapshot(), after);
    assert_eq!(entity.due_date(), None);
    assert_eq!(entity.local_description().as_deref(), Some("draft text"));
    assert_eq!(events.try_next(), Some(IssueEvent::DataChanged));
  }

  #[tokio::test]
  async fn test_refresh_of_vanished_issue_fails_quietly() {
    let remote = FakeRemote::new();
    remote.put_issue(remote_issue(5, "doomed"));
    let context = context_with(&remote);
    let entity = context.fetch_issue("5").await.unwrap();

    remote.delete_issue(5);
    assert!(!entity.refresh().await);
    assert_eq!(entity.summary(), "doomed");

    remote.set_offline(true);
    assert!(!entity.refresh().await);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_out_of_order_refreshes_apply_last_completed() {
    let remote = FakeRemote::new();
    remote.put_issue(remote_issue(9, "v0"));
    let context = context_with(&remote);
    let entity = context.fetch_issue("9").await.unwrap();

    let mut v1 = remote_issue(9, "v1");
    v1.done_ratio = Some(10);
    remote.put_issue(v1.clone());
    remote.delay_next_fetch(Duration::from_millis(200));
    let slow = tokio::spawn({
      let entity = Arc::clone(&entity);
      async move { entity.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut v2 = remote_issue(9, "v2");
    v2.priority_name = Some("High".to_string());
    remote.put_issue(v2.clone());
    assert!(entity.refresh().await);
    assert_eq!(entity.snapshot(), v2);

    assert!(slow.await.unwrap());
    // The slow, older read landed last and wins as a whole
    assert_eq!(entity.snapshot(), v1);
  }

  #[tokio::test]
  async fn test_failed_comment_rolls_back() {
    let remote = FakeRemote::new();
    remote.put_issue(remote_issue(5, "flaky"));
    let context = context_with(&remote);
    let entity = context.fetch_issue("5").await.unwrap();

    remote.fail_updates(true);
    let err = entity.add_comment("done", true).await.err().unwrap();
    assert!(matches!(err, Error::Remote(_)));
    let snapshot = entity.snapshot();
    assert_eq!(snapshot.status_id, Some(1));
    assert_eq!(snapshot.notes, None);

    remote.fail_updates(false);
    entity.add_comment("done", true).await.unwrap();
    let pushed = remote.last_update().unwrap();
    assert_eq!(pushed.notes.as_deref(), Some("done"));
    assert_eq!(pushed.status_id, Some(RESOLVED_STATUS_ID));
    assert_eq!(entity.snapshot().status_id, Some(RESOLVED_STATUS_ID));
    assert_eq!(entity.snapshot().notes, None);
  }

  #[tokio::test]
  async fn test_failed_attachment_rolls_back() {
    let remote = FakeRemote::new();
    remote.put_issue(remote_issue(5, "with files"));
    let context = context_with(&remote);
    let entity = context.fetch_issue("5").await.unwrap();

    remote.fail_updates(true);
    let path = Path::new("/tmp/trace.log");
    assert!(entity.attach_file(path, "trace", "see log").await.is_err());
    assert!(entity.snapshot().attachments.is_empty());
    assert_eq!(entity.snapshot().notes, None);

    remote.fail_updates(false);
    entity.attach_file(path, "trace", "see log").await.unwrap();
    let attachments = entity.snapshot().attachments;
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].file_name, "trace.log");
    assert!(attachments[0].id.is_some());
  }

  #[tokio::test]
  async fn test_draft_rejects_comments_and_attachments() {
    let remote = FakeRemote::new();
    let context = context_with(&remote);
    let draft = context.create_issue();

    assert!(matches!(
      draft.add_comment("hi", false).await,
      Err(Error::Unsupported(_))
    ));
    assert!(matches!(
      draft.attach_file(Path::new("/tmp/a"), "", "").await,
      Err(Error::Unsupported(_))
    ));
    // Schedule changes on drafts are dropped silently
    assert!(draft
      .set_schedule(NaiveDate::from_ymd_opt(2024, 5, 1))
      .await
      .is_ok());
    assert_eq!(draft.schedule(), None);
  }

  #[tokio::test]
  async fn test_failed_schedule_change_restores_start_date() {
    let remote = FakeRemote::new();
    let mut issue = remote_issue(5, "planned");
    issue.start_date = NaiveDate::from_ymd_opt(2024, 3, 1);
    remote.put_issue(issue);
    let context = context_with(&remote);
    let entity = context.fetch_issue("5").await.unwrap();

    remote.fail_updates(true);
    let new_date = NaiveDate::from_ymd_opt(2024, 4, 1);
    assert!(entity.set_schedule(new_date).await.is_err());
    assert_eq!(entity.schedule(), NaiveDate::from_ymd_opt(2024, 3, 1));

    remote.fail_updates(false);
    entity.set_schedule(new_date).await.unwrap();
    assert_eq!(entity.schedule(), new_date);
  }

  #[tokio::test]
  async fn test_submit_draft_installs_into_cache() {
    let remote = FakeRemote::new();
    let context = context_with(&remote);
    let draft = context.create_issue_with("Fix bug", "It crashes");
    assert_eq!(draft.status(), EntityStatus::New);

    draft.submit().await.unwrap();
    assert_eq!(draft.status(), EntityStatus::Seen);
    let id = draft.id().unwrap();
    let cached = context.fetch_issue(&id).await.unwrap();
    assert!(Arc::ptr_eq(&cached, &draft));
    assert_eq!(remote.total_fetches(), 0);
  }

  #[tokio::test]
  async fn test_failed_submit_keeps_local_edits() {
    let remote = FakeRemote::new();
    remote.put_issue(remote_issue(5, "old title"));
    let context = context_with(&remote);
    let entity = context.fetch_issue("5").await.unwrap();
    entity.set_local_summary(Some("new title".to_string()));

    remote.fail_updates(true);
    assert!(entity.submit().await.is_err());
    assert_eq!(entity.status(), EntityStatus::Modified);
    assert_eq!(entity.summary(), "old title");

    remote.fail_updates(false);
    entity.submit().await.unwrap();
    assert_eq!(entity.status(), EntityStatus::Seen);
    assert_eq!(entity.summary(), "new title");
  }

  #[tokio::test]
  async fn test_open_subscribes_and_close_unsubscribes() {
    let remote = FakeRemote::new();
    remote.put_issue(remote_issue(5, "watched"));
    let context = context_with(&remote);
    let entity = context.fetch_issue("5").await.unwrap();

    entity.open().await;
    entity.open().await;
    assert!(context.is_issue_refresh_scheduled("5"));
    assert_eq!(remote.fetches_of(5), 3);

    entity.close();
    entity.close();
    assert!(!context.is_issue_refresh_scheduled("5"));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_open_on_interactive_thread_hands_refresh_to_worker() {
    let remote = FakeRemote::new();
    remote.put_issue(remote_issue(5, "before"));
    let context = context_with(&remote);
    let entity = context.fetch_issue("5").await.unwrap();
    let mut events = entity.add_change_listener();

    remote.put_issue(remote_issue(5, "after"));
    remote.delay_next_fetch(Duration::from_millis(200));

    interactive::mark_current_thread();
    entity.open().await;
    interactive::unmark_current_thread();

    // Returned before the delayed fetch finished, already subscribed
    assert_eq!(entity.summary(), "before");
    assert!(context.is_issue_refresh_scheduled("5"));

    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
      .await
      .unwrap();
    assert_eq!(event, Some(IssueEvent::DataChanged));
    assert_eq!(entity.summary(), "after");
    assert_eq!(remote.fetches_of(5), 2);
  }

  #[tokio::test]
  async fn test_open_without_immediate_refresh_still_subscribes() {
    let remote = FakeRemote::new();
    remote.put_issue(remote_issue(5, "watched"));
    let mut options = test_options();
    options.refresh.debug.no_issue_refresh = true;
    let context = RemoteContext::new(options, FakeConnector::new(&remote));
    let entity = context.fetch_issue("5").await.unwrap();

    entity.open().await;
    assert_eq!(remote.fetches_of(5), 1);
    assert!(context.is_issue_refresh_scheduled("5"));
  }

  #[tokio::test]
  async fn test_drafts_are_never_subscribed() {
    let remote = FakeRemote::new();
    let context = context_with(&remote);
    let draft = context.create_issue();
    draft.open().await;
    assert!(context.scheduled_issue_ids().is_empty());
  }
}
