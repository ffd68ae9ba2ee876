//! Serde types matching Redmine REST API payloads.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::types::{
  Attachment, Issue, IssueCategory, IssuePriority, IssueStatus, Journal, Membership, NamedRef,
  Project, TimeEntryActivity, Tracker, User, Version,
};

// ============================================================================
// Common nested field types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRef {
  pub id: u32,
  #[serde(default)]
  pub name: String,
}

impl From<ApiRef> for NamedRef {
  fn from(r: ApiRef) -> Self {
    NamedRef {
      id: r.id,
      name: r.name,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiParent {
  pub id: u32,
}

// ============================================================================
// Issues
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiJournal {
  pub id: u32,
  pub user: Option<ApiRef>,
  pub notes: Option<String>,
  pub created_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAttachment {
  pub id: u32,
  #[serde(default)]
  pub filename: String,
  #[serde(default)]
  pub filesize: u64,
  pub content_type: Option<String>,
  pub description: Option<String>,
  pub author: Option<ApiRef>,
  pub created_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ApiIssue {
  pub id: u32,
  pub project: Option<ApiRef>,
  pub tracker: Option<ApiRef>,
  pub status: Option<ApiRef>,
  pub priority: Option<ApiRef>,
  pub author: Option<ApiRef>,
  pub assigned_to: Option<ApiRef>,
  pub category: Option<ApiRef>,
  pub fixed_version: Option<ApiRef>,
  pub parent: Option<ApiParent>,
  #[serde(default)]
  pub subject: String,
  pub description: Option<String>,
  pub start_date: Option<NaiveDate>,
  pub due_date: Option<NaiveDate>,
  pub done_ratio: Option<u8>,
  pub estimated_hours: Option<f32>,
  pub spent_hours: Option<f32>,
  pub created_on: Option<DateTime<Utc>>,
  pub updated_on: Option<DateTime<Utc>>,
  #[serde(default)]
  pub journals: Vec<ApiJournal>,
  #[serde(default)]
  pub attachments: Vec<ApiAttachment>,
  #[serde(default)]
  pub watchers: Vec<ApiRef>,
}

#[derive(Debug, Deserialize)]
pub struct ApiIssueResponse {
  pub issue: ApiIssue,
}

#[derive(Debug, Deserialize)]
pub struct ApiIssuesResponse {
  #[serde(default)]
  pub issues: Vec<ApiIssue>,
  #[serde(default)]
  pub total_count: u64,
}

/// Outgoing attachment reference for an update or create
#[derive(Debug, Serialize)]
pub struct ApiUpload {
  pub token: String,
  pub filename: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub content_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// Writable subset of an issue
#[derive(Debug, Serialize)]
pub struct ApiIssueWrite {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub project_id: Option<String>,
  pub subject: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tracker_id: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status_id: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority_id: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assigned_to_id: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category_id: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub fixed_version_id: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent_issue_id: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_date: Option<NaiveDate>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<NaiveDate>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub done_ratio: Option<u8>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub estimated_hours: Option<f32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub uploads: Vec<ApiUpload>,
}

#[derive(Debug, Serialize)]
pub struct ApiIssueEnvelope {
  pub issue: ApiIssueWrite,
}

#[derive(Debug, Deserialize)]
pub struct ApiUploadToken {
  pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiUploadResponse {
  pub upload: ApiUploadToken,
}

// ============================================================================
// Reference data
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTrackersResponse {
  #[serde(default)]
  pub trackers: Vec<ApiRef>,
}

#[derive(Debug, Deserialize)]
pub struct ApiStatus {
  pub id: i32,
  pub name: String,
  #[serde(default)]
  pub is_closed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiStatusesResponse {
  #[serde(default)]
  pub issue_statuses: Vec<ApiStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ApiCategoriesResponse {
  #[serde(default)]
  pub issue_categories: Vec<ApiRef>,
}

#[derive(Debug, Deserialize)]
pub struct ApiVersion {
  pub id: u32,
  pub name: String,
  pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiVersionsResponse {
  #[serde(default)]
  pub versions: Vec<ApiVersion>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMembership {
  pub id: u32,
  pub user: Option<ApiRef>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMembershipsResponse {
  #[serde(default)]
  pub memberships: Vec<ApiMembership>,
  #[serde(default)]
  pub total_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct ApiEnumeration {
  pub id: u32,
  pub name: String,
  #[serde(default)]
  pub is_default: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiActivitiesResponse {
  #[serde(default)]
  pub time_entry_activities: Vec<ApiEnumeration>,
}

#[derive(Debug, Deserialize)]
pub struct ApiPrioritiesResponse {
  #[serde(default)]
  pub issue_priorities: Vec<ApiEnumeration>,
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  pub id: u32,
  #[serde(default)]
  pub login: String,
  #[serde(default)]
  pub firstname: String,
  #[serde(default)]
  pub lastname: String,
  pub mail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiUserResponse {
  pub user: ApiUser,
}

#[derive(Debug, Deserialize)]
pub struct ApiProject {
  pub id: u32,
  pub identifier: String,
  pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiProjectResponse {
  pub project: ApiProject,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiIssue> for Issue {
  fn from(api: ApiIssue) -> Self {
    let (status_id, status_name) = split_ref(api.status);
    let (priority_id, priority_name) = split_ref(api.priority);
    Issue {
      id: Some(api.id),
      project: api.project.map(NamedRef::from),
      tracker: api.tracker.map(NamedRef::from),
      status_id,
      status_name,
      priority_id,
      priority_name,
      subject: api.subject,
      description: api.description,
      author: api.author.map(NamedRef::from),
      assignee: api.assigned_to.map(NamedRef::from),
      category: api.category.map(NamedRef::from),
      target_version: api.fixed_version.map(NamedRef::from),
      parent_id: api.parent.map(|p| p.id),
      done_ratio: api.done_ratio,
      estimated_hours: api.estimated_hours,
      spent_hours: api.spent_hours,
      start_date: api.start_date,
      due_date: api.due_date,
      created_on: api.created_on,
      updated_on: api.updated_on,
      notes: None,
      journals: api.journals.into_iter().map(Journal::from).collect(),
      attachments: api.attachments.into_iter().map(Attachment::from).collect(),
      watchers: api.watchers.into_iter().map(NamedRef::from).collect(),
    }
  }
}

impl From<ApiJournal> for Journal {
  fn from(j: ApiJournal) -> Self {
    Journal {
      id: j.id,
      user: j.user.map(NamedRef::from),
      notes: j.notes,
      created_on: j.created_on,
    }
  }
}

impl From<ApiAttachment> for Attachment {
  fn from(a: ApiAttachment) -> Self {
    Attachment {
      id: Some(a.id),
      file_name: a.filename,
      file_size: a.filesize,
      content_type: a.content_type,
      description: a.description,
      token: None,
      author: a.author.map(NamedRef::from),
      created_on: a.created_on,
    }
  }
}

impl ApiIssueWrite {
  /// Build the write payload for `issue`. Only attachments that were uploaded
  /// but not yet linked (token, no id) are sent.
  pub fn from_issue(issue: &Issue, project_id: Option<String>) -> Self {
    ApiIssueWrite {
      project_id,
      subject: issue.subject.clone(),
      description: issue.description.clone(),
      tracker_id: issue.tracker.as_ref().map(|t| t.id),
      status_id: issue.status_id,
      priority_id: issue.priority_id,
      assigned_to_id: issue.assignee.as_ref().map(|a| a.id),
      category_id: issue.category.as_ref().map(|c| c.id),
      fixed_version_id: issue.target_version.as_ref().map(|v| v.id),
      parent_issue_id: issue.parent_id,
      start_date: issue.start_date,
      due_date: issue.due_date,
      done_ratio: issue.done_ratio,
      estimated_hours: issue.estimated_hours,
      notes: issue.notes.clone(),
      uploads: issue
        .attachments
        .iter()
        .filter(|a| a.id.is_none())
        .filter_map(|a| {
          a.token.as_ref().map(|token| ApiUpload {
            token: token.clone(),
            filename: a.file_name.clone(),
            content_type: a.content_type.clone(),
            description: a.description.clone(),
          })
        })
        .collect(),
    }
  }
}

impl From<ApiRef> for Tracker {
  fn from(r: ApiRef) -> Self {
    Tracker {
      id: r.id,
      name: r.name,
    }
  }
}

impl From<ApiStatus> for IssueStatus {
  fn from(s: ApiStatus) -> Self {
    IssueStatus {
      id: s.id,
      name: s.name,
      is_closed: s.is_closed,
    }
  }
}

impl From<ApiRef> for IssueCategory {
  fn from(r: ApiRef) -> Self {
    IssueCategory {
      id: r.id,
      name: r.name,
    }
  }
}

impl From<ApiVersion> for Version {
  fn from(v: ApiVersion) -> Self {
    Version {
      id: v.id,
      name: v.name,
      status: v.status,
    }
  }
}

impl From<ApiMembership> for Membership {
  fn from(m: ApiMembership) -> Self {
    Membership {
      id: m.id,
      user: m.user.map(NamedRef::from),
    }
  }
}

impl From<ApiEnumeration> for IssuePriority {
  fn from(e: ApiEnumeration) -> Self {
    IssuePriority {
      id: e.id,
      name: e.name,
      is_default: e.is_default,
    }
  }
}

impl From<ApiEnumeration> for TimeEntryActivity {
  fn from(e: ApiEnumeration) -> Self {
    TimeEntryActivity {
      id: e.id,
      name: e.name,
      is_default: e.is_default,
    }
  }
}

impl From<ApiUser> for User {
  fn from(u: ApiUser) -> Self {
    User {
      id: u.id,
      login: u.login,
      firstname: u.firstname,
      lastname: u.lastname,
      mail: u.mail,
    }
  }
}

impl From<ApiProject> for Project {
  fn from(p: ApiProject) -> Self {
    Project {
      id: p.id,
      identifier: p.identifier,
      name: p.name,
    }
  }
}

// ============================================================================
// Helpers
// ============================================================================

fn split_ref(r: Option<ApiRef>) -> (Option<u32>, Option<String>) {
  match r {
    Some(r) => (Some(r.id), Some(r.name)),
    None => (None, None),
  }
}
