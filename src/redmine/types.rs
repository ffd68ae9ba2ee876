use chrono::{DateTime, NaiveDate, Utc};

/// Id + name pair Redmine uses for most nested references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedRef {
  pub id: u32,
  pub name: String,
}

/// Snapshot of one remote issue, as last read from (or about to be written to) the server.
///
/// `id` is `None` for drafts that were never submitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Issue {
  pub id: Option<u32>,
  pub project: Option<NamedRef>,
  pub tracker: Option<NamedRef>,
  pub status_id: Option<u32>,
  pub status_name: Option<String>,
  pub priority_id: Option<u32>,
  pub priority_name: Option<String>,
  pub subject: String,
  pub description: Option<String>,
  pub author: Option<NamedRef>,
  pub assignee: Option<NamedRef>,
  pub category: Option<NamedRef>,
  pub target_version: Option<NamedRef>,
  pub parent_id: Option<u32>,
  pub done_ratio: Option<u8>,
  pub estimated_hours: Option<f32>,
  pub spent_hours: Option<f32>,
  pub start_date: Option<NaiveDate>,
  pub due_date: Option<NaiveDate>,
  pub created_on: Option<DateTime<Utc>>,
  pub updated_on: Option<DateTime<Utc>>,
  /// Outgoing journal note, only sent with the next update
  pub notes: Option<String>,
  pub journals: Vec<Journal>,
  pub attachments: Vec<Attachment>,
  pub watchers: Vec<NamedRef>,
}

impl Issue {
  /// Remote id, treating `0` the same as no id at all.
  pub fn remote_id(&self) -> Option<u32> {
    self.id.filter(|id| *id != 0)
  }
}

/// History entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Journal {
  pub id: u32,
  pub user: Option<NamedRef>,
  pub notes: Option<String>,
  pub created_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attachment {
  /// None until the server assigns one (freshly uploaded files only carry a token)
  pub id: Option<u32>,
  pub file_name: String,
  pub file_size: u64,
  pub content_type: Option<String>,
  pub description: Option<String>,
  pub token: Option<String>,
  pub author: Option<NamedRef>,
  pub created_on: Option<DateTime<Utc>>,
}

/// Related collections requested alongside an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Include {
  Journals,
  Attachments,
  Watchers,
}

impl Include {
  pub fn as_str(&self) -> &'static str {
    match self {
      Include::Journals => "journals",
      Include::Attachments => "attachments",
      Include::Watchers => "watchers",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
  pub id: u32,
  pub identifier: String,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracker {
  pub id: u32,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueStatus {
  pub id: i32,
  pub name: String,
  pub is_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueCategory {
  pub id: u32,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
  pub id: u32,
  pub name: String,
  pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuePriority {
  pub id: u32,
  pub name: String,
  pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeEntryActivity {
  pub id: u32,
  pub name: String,
  pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
  pub id: u32,
  pub login: String,
  pub firstname: String,
  pub lastname: String,
  pub mail: Option<String>,
}

impl User {
  pub fn display_name(&self) -> String {
    let full = format!("{} {}", self.firstname, self.lastname);
    let full = full.trim();
    if full.is_empty() {
      self.login.clone()
    } else {
      full.to_string()
    }
  }
}

/// Project membership; group memberships carry no user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
  pub id: u32,
  pub user: Option<NamedRef>,
}

/// Explicit accessor table over the mirrored issue fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueField {
  Id,
  Project,
  Tracker,
  Parent,
  Status,
  Category,
  Priority,
  Subject,
  Author,
  Assignee,
  Created,
  Updated,
  TargetVersion,
  DoneRatio,
  EstimatedHours,
  SpentHours,
  StartDate,
  DueDate,
  Description,
}

impl IssueField {
  pub const ALL: [IssueField; 19] = [
    IssueField::Id,
    IssueField::Project,
    IssueField::Tracker,
    IssueField::Parent,
    IssueField::Status,
    IssueField::Category,
    IssueField::Priority,
    IssueField::Subject,
    IssueField::Author,
    IssueField::Assignee,
    IssueField::Created,
    IssueField::Updated,
    IssueField::TargetVersion,
    IssueField::DoneRatio,
    IssueField::EstimatedHours,
    IssueField::SpentHours,
    IssueField::StartDate,
    IssueField::DueDate,
    IssueField::Description,
  ];

  pub fn label(&self) -> &'static str {
    match self {
      IssueField::Id => "ID",
      IssueField::Project => "Project",
      IssueField::Tracker => "Tracker",
      IssueField::Parent => "Parent task",
      IssueField::Status => "Status",
      IssueField::Category => "Category",
      IssueField::Priority => "Priority",
      IssueField::Subject => "Subject",
      IssueField::Author => "Author",
      IssueField::Assignee => "Assigned To",
      IssueField::Created => "Created",
      IssueField::Updated => "Updated",
      IssueField::TargetVersion => "Target Version",
      IssueField::DoneRatio => "Done",
      IssueField::EstimatedHours => "Estimated time",
      IssueField::SpentHours => "Spent time",
      IssueField::StartDate => "Start date",
      IssueField::DueDate => "Due date",
      IssueField::Description => "Description",
    }
  }

  /// Render the field of `issue` as text, `None` when unset.
  pub fn value(&self, issue: &Issue) -> Option<String> {
    let name = |r: &Option<NamedRef>| r.as_ref().map(|r| r.name.clone());
    match self {
      IssueField::Id => issue.remote_id().map(|id| id.to_string()),
      IssueField::Project => name(&issue.project),
      IssueField::Tracker => name(&issue.tracker),
      IssueField::Parent => issue.parent_id.map(|id| id.to_string()),
      IssueField::Status => issue.status_name.clone(),
      IssueField::Category => name(&issue.category),
      IssueField::Priority => issue.priority_name.clone(),
      IssueField::Subject => Some(issue.subject.clone()),
      IssueField::Author => name(&issue.author),
      IssueField::Assignee => name(&issue.assignee),
      IssueField::Created => issue.created_on.map(|d| d.to_rfc3339()),
      IssueField::Updated => issue.updated_on.map(|d| d.to_rfc3339()),
      IssueField::TargetVersion => name(&issue.target_version),
      IssueField::DoneRatio => issue.done_ratio.map(|r| format!("{}%", r)),
      IssueField::EstimatedHours => issue.estimated_hours.map(|h| format!("{:.2}", h)),
      IssueField::SpentHours => issue.spent_hours.map(|h| format!("{:.2}", h)),
      IssueField::StartDate => issue.start_date.map(|d| d.to_string()),
      IssueField::DueDate => issue.due_date.map(|d| d.to_string()),
      IssueField::Description => issue.description.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_zero_id_is_no_id() {
    let issue = Issue {
      id: Some(0),
      ..Default::default()
    };
    assert_eq!(issue.remote_id(), None);
    assert_eq!(IssueField::Id.value(&issue), None);
  }

  #[test]
  fn test_field_values() {
    let issue = Issue {
      id: Some(42),
      subject: "Crash on start".to_string(),
      tracker: Some(NamedRef {
        id: 1,
        name: "Bug".to_string(),
      }),
      done_ratio: Some(30),
      ..Default::default()
    };
    assert_eq!(IssueField::Id.value(&issue).as_deref(), Some("42"));
    assert_eq!(IssueField::Tracker.value(&issue).as_deref(), Some("Bug"));
    assert_eq!(IssueField::DoneRatio.value(&issue).as_deref(), Some("30%"));
    assert_eq!(IssueField::Assignee.value(&issue), None);
  }

  #[test]
  fn test_user_display_name_falls_back_to_login() {
    let user = User {
      id: 1,
      login: "jdoe".to_string(),
      firstname: String::new(),
      lastname: String::new(),
      mail: None,
    };
    assert_eq!(user.display_name(), "jdoe");
  }
}
