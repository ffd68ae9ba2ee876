use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::config::AuthMode;
use crate::error::{Error, Result};
use crate::redmine::api_types::{
  ApiActivitiesResponse, ApiCategoriesResponse, ApiIssueEnvelope, ApiIssueResponse,
  ApiIssueWrite, ApiIssuesResponse, ApiMembershipsResponse, ApiPrioritiesResponse,
  ApiProjectResponse, ApiStatusesResponse, ApiTrackersResponse, ApiUploadResponse,
  ApiUserResponse, ApiVersionsResponse,
};
use crate::redmine::types::{
  Attachment, Include, Issue, IssueCategory, IssuePriority, IssueStatus, Membership, Project,
  TimeEntryActivity, Tracker, User, Version,
};

/// Page size used for every paginated listing
const OBJECTS_PER_PAGE: u64 = 100;

/// Remote calls are bounded by the transport, nothing else cancels them
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote issue tracker API as seen by the mirror.
///
/// Every call may fail with [`Error::NotFound`] or [`Error::Remote`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
  async fn fetch_issue_by_id(&self, id: u32, include: &[Include]) -> Result<Issue>;

  /// Issues of `project_key` whose subject matches `pattern` (`*` wildcards).
  async fn search_issues_by_summary(&self, project_key: &str, pattern: &str)
    -> Result<Vec<Issue>>;

  async fn update_issue(&self, issue: &Issue) -> Result<()>;

  /// Create `issue` in `project_key`, returning the server's view of it.
  async fn create_issue(&self, project_key: &str, issue: &Issue) -> Result<Issue>;

  /// Upload a file; the returned attachment carries a token to link on the next update.
  async fn upload_attachment(&self, mime_type: &str, path: &Path) -> Result<Attachment>;

  async fn list_trackers(&self) -> Result<Vec<Tracker>>;

  async fn list_statuses(&self) -> Result<Vec<IssueStatus>>;

  async fn list_categories(&self, project_id: u32) -> Result<Vec<IssueCategory>>;

  async fn list_versions(&self, project_id: u32) -> Result<Vec<Version>>;

  async fn list_memberships(&self, project_id: u32) -> Result<Vec<Membership>>;

  async fn list_time_entry_activities(&self) -> Result<Vec<TimeEntryActivity>>;

  async fn list_issue_priorities(&self) -> Result<Vec<IssuePriority>>;

  async fn get_current_user(&self) -> Result<User>;

  async fn get_project_by_key(&self, key: &str) -> Result<Project>;
}

/// Connection parameters of one remote context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
  pub url: String,
  pub username: String,
  pub password: Option<String>,
  pub access_key: Option<String>,
  pub auth_mode: Option<AuthMode>,
}

/// Builds a [`RemoteClient`] for a set of connection parameters.
pub trait Connector: Send + Sync {
  fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn RemoteClient>>;
}

/// Connector producing HTTP clients for the Redmine REST API
#[derive(Debug, Default, Clone, Copy)]
pub struct RedmineConnector;

impl Connector for RedmineConnector {
  fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn RemoteClient>> {
    Ok(Arc::new(RedmineClient::new(params)?))
  }
}

#[derive(Clone)]
enum Auth {
  ApiKey(String),
  Basic { username: String, password: String },
}

/// Redmine REST client
#[derive(Clone)]
pub struct RedmineClient {
  http: reqwest::Client,
  base: Url,
  auth: Auth,
}

impl RedmineClient {
  pub fn new(params: &ConnectionParams) -> Result<Self> {
    let auth = match params.auth_mode {
      None => return Err(Error::Configuration("auth mode must be set".to_string())),
      Some(AuthMode::AccessKey) => {
        let key = params
          .access_key
          .clone()
          .filter(|k| !k.is_empty())
          .ok_or_else(|| Error::Configuration("access key is not set".to_string()))?;
        Auth::ApiKey(key)
      }
      Some(AuthMode::Credentials) => {
        if params.username.is_empty() {
          return Err(Error::Configuration("username is not set".to_string()));
        }
        Auth::Basic {
          username: params.username.clone(),
          password: params.password.clone().unwrap_or_default(),
        }
      }
    };

    // Url::join drops the last path segment unless the base ends with '/'
    let mut base = Url::parse(&params.url)?;
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    let http = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(|e| Error::Configuration(format!("failed to build http client: {}", e)))?;

    Ok(Self { http, base, auth })
  }

  fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
    let url = self.base.join(path)?;
    let builder = self.http.request(method, url);
    Ok(match &self.auth {
      Auth::ApiKey(key) => builder.header("X-Redmine-API-Key", key),
      Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
    })
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
    let response = self
      .request(Method::GET, path)?
      .query(query)
      .send()
      .await?
      .error_for_status()?;
    Ok(response.json::<T>().await?)
  }

  async fn send_json<B: Serialize>(
    &self,
    method: Method,
    path: &str,
    body: &B,
  ) -> Result<reqwest::Response> {
    Ok(
      self
        .request(method, path)?
        .json(body)
        .send()
        .await?
        .error_for_status()?,
    )
  }
}

#[async_trait]
impl RemoteClient for RedmineClient {
  async fn fetch_issue_by_id(&self, id: u32, include: &[Include]) -> Result<Issue> {
    let include = include
      .iter()
      .map(Include::as_str)
      .collect::<Vec<_>>()
      .join(",");
    let mut query = Vec::new();
    if !include.is_empty() {
      query.push(("include", include));
    }

    let response: ApiIssueResponse = self
      .get_json(&format!("issues/{}.json", id), &query)
      .await?;
    Ok(response.issue.into())
  }

  async fn search_issues_by_summary(
    &self,
    project_key: &str,
    pattern: &str,
  ) -> Result<Vec<Issue>> {
    // Redmine's "~" operator is a contains match, so wildcards are implied
    let needle = pattern.trim_matches('*').to_string();
    let mut all_issues = Vec::new();
    let mut offset = 0u64;

    loop {
      let response: ApiIssuesResponse = self
        .get_json(
          "issues.json",
          &[
            ("project_id", project_key.to_string()),
            ("subject", format!("~{}", needle)),
            ("status_id", "*".to_string()),
            ("offset", offset.to_string()),
            ("limit", OBJECTS_PER_PAGE.to_string()),
          ],
        )
        .await?;

      let count = response.issues.len() as u64;
      all_issues.extend(response.issues.into_iter().map(Issue::from));

      if count == 0 || offset + count >= response.total_count {
        break;
      }
      offset += count;
    }

    Ok(all_issues)
  }

  async fn update_issue(&self, issue: &Issue) -> Result<()> {
    let id = issue
      .remote_id()
      .ok_or(Error::Unsupported("update of an issue that was never submitted"))?;
    let body = ApiIssueEnvelope {
      issue: ApiIssueWrite::from_issue(issue, None),
    };
    self
      .send_json(Method::PUT, &format!("issues/{}.json", id), &body)
      .await?;
    Ok(())
  }

  async fn create_issue(&self, project_key: &str, issue: &Issue) -> Result<Issue> {
    let body = ApiIssueEnvelope {
      issue: ApiIssueWrite::from_issue(issue, Some(project_key.to_string())),
    };
    let response: ApiIssueResponse = self
      .send_json(Method::POST, "issues.json", &body)
      .await?
      .json()
      .await?;
    Ok(response.issue.into())
  }

  async fn upload_attachment(&self, mime_type: &str, path: &Path) -> Result<Attachment> {
    let bytes = tokio::fs::read(path)
      .await
      .map_err(|e| Error::Remote(format!("failed to read {}: {}", path.display(), e)))?;
    let file_size = bytes.len() as u64;

    let response: ApiUploadResponse = self
      .request(Method::POST, "uploads.json")?
      .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
      .body(bytes)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;

    Ok(Attachment {
      id: None,
      file_name: path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default(),
      file_size,
      content_type: Some(mime_type.to_string()),
      description: None,
      token: Some(response.upload.token),
      author: None,
      created_on: None,
    })
  }

  async fn list_trackers(&self) -> Result<Vec<Tracker>> {
    let response: ApiTrackersResponse = self.get_json("trackers.json", &[]).await?;
    Ok(response.trackers.into_iter().map(Tracker::from).collect())
  }

  async fn list_statuses(&self) -> Result<Vec<IssueStatus>> {
    let response: ApiStatusesResponse = self.get_json("issue_statuses.json", &[]).await?;
    Ok(
      response
        .issue_statuses
        .into_iter()
        .map(IssueStatus::from)
        .collect(),
    )
  }

  async fn list_categories(&self, project_id: u32) -> Result<Vec<IssueCategory>> {
    let response: ApiCategoriesResponse = self
      .get_json(
        &format!("projects/{}/issue_categories.json", project_id),
        &[],
      )
      .await?;
    Ok(
      response
        .issue_categories
        .into_iter()
        .map(IssueCategory::from)
        .collect(),
    )
  }

  async fn list_versions(&self, project_id: u32) -> Result<Vec<Version>> {
    let response: ApiVersionsResponse = self
      .get_json(&format!("projects/{}/versions.json", project_id), &[])
      .await?;
    Ok(response.versions.into_iter().map(Version::from).collect())
  }

  async fn list_memberships(&self, project_id: u32) -> Result<Vec<Membership>> {
    let mut all = Vec::new();
    let mut offset = 0u64;

    loop {
      let response: ApiMembershipsResponse = self
        .get_json(
          &format!("projects/{}/memberships.json", project_id),
          &[
            ("offset", offset.to_string()),
            ("limit", OBJECTS_PER_PAGE.to_string()),
          ],
        )
        .await?;

      let count = response.memberships.len() as u64;
      all.extend(response.memberships.into_iter().map(Membership::from));

      if count == 0 || offset + count >= response.total_count {
        break;
      }
      offset += count;
    }

    Ok(all)
  }

  async fn list_time_entry_activities(&self) -> Result<Vec<TimeEntryActivity>> {
    let response: ApiActivitiesResponse = self
      .get_json("enumerations/time_entry_activities.json", &[])
      .await?;
    Ok(
      response
        .time_entry_activities
        .into_iter()
        .map(TimeEntryActivity::from)
        .collect(),
    )
  }

  async fn list_issue_priorities(&self) -> Result<Vec<IssuePriority>> {
    let response: ApiPrioritiesResponse = self
      .get_json("enumerations/issue_priorities.json", &[])
      .await?;
    Ok(
      response
        .issue_priorities
        .into_iter()
        .map(IssuePriority::from)
        .collect(),
    )
  }

  async fn get_current_user(&self) -> Result<User> {
    let response: ApiUserResponse = self.get_json("users/current.json", &[]).await?;
    Ok(response.user.into())
  }

  async fn get_project_by_key(&self, key: &str) -> Result<Project> {
    let response: ApiProjectResponse = self
      .get_json(&format!("projects/{}.json", key), &[])
      .await?;
    Ok(response.project.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params(auth_mode: Option<AuthMode>) -> ConnectionParams {
    ConnectionParams {
      url: "https://redmine.example.com/sub".to_string(),
      username: "jdoe".to_string(),
      password: None,
      access_key: Some("secret".to_string()),
      auth_mode,
    }
  }

  #[test]
  fn test_missing_auth_mode_is_configuration_error() {
    let err = RedmineClient::new(&params(None)).err().unwrap();
    assert!(matches!(err, Error::Configuration(_)));
  }

  #[test]
  fn test_access_key_required() {
    let mut p = params(Some(AuthMode::AccessKey));
    p.access_key = None;
    assert!(matches!(
      RedmineClient::new(&p).err().unwrap(),
      Error::Configuration(_)
    ));
  }

  #[test]
  fn test_endpoints_keep_base_path() {
    let client = RedmineClient::new(&params(Some(AuthMode::Credentials))).unwrap();
    let url = client.base.join("issues/1.json").unwrap();
    assert_eq!(url.as_str(), "https://redmine.example.com/sub/issues/1.json");
  }
}
