use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::redmine::ConnectionParams;
use crate::refresh::{DebugOverrides, RefreshSettings};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Refresh intervals shared by every context unless overridden
  #[serde(default)]
  pub refresh: RefreshConfig,
  /// Context used when none is given on the command line
  pub default_context: Option<String>,
  #[serde(default)]
  pub contexts: Vec<ContextConfig>,
}

/// Refresh intervals, in whole minutes
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct RefreshConfig {
  #[serde(default = "default_issue_interval")]
  pub issue_interval: i64,
  #[serde(default = "default_query_interval")]
  pub query_interval: i64,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      issue_interval: default_issue_interval(),
      query_interval: default_query_interval(),
    }
  }
}

fn default_issue_interval() -> i64 {
  crate::refresh::DEFAULT_ISSUE_REFRESH_MINUTES
}

fn default_query_interval() -> i64 {
  crate::refresh::DEFAULT_QUERY_REFRESH_MINUTES
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
  /// API access key sent as `X-Redmine-API-Key`
  AccessKey,
  /// HTTP basic auth with username + password
  Credentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
  /// Stable identifier; derived from name + url when omitted
  pub id: Option<String>,
  pub name: String,
  pub url: String,
  pub auth_mode: Option<AuthMode>,
  #[serde(default)]
  pub username: String,
  /// Project identifier selected for searches and new issues
  pub project: Option<String>,
  #[serde(default)]
  pub feature_watchers: bool,
  /// Per-context interval override
  pub refresh: Option<RefreshConfig>,
}

impl ContextConfig {
  /// The configured id, or a short stable hash of name and url.
  pub fn context_id(&self) -> String {
    if let Some(id) = &self.id {
      return id.clone();
    }
    let mut hasher = Sha256::new();
    hasher.update(self.name.as_bytes());
    hasher.update(b"\n");
    hasher.update(self.url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
  }

  /// Connection parameters with secrets pulled from the environment.
  pub fn connection_params(&self) -> ConnectionParams {
    ConnectionParams {
      url: self.url.clone(),
      username: self.username.clone(),
      password: Config::get_password().ok(),
      access_key: Config::get_access_key().ok(),
      auth_mode: self.auth_mode,
    }
  }

  /// Refresh settings for this context, falling back to the global intervals.
  pub fn refresh_settings(&self, global: &RefreshConfig, debug: DebugOverrides) -> RefreshSettings {
    let refresh = self.refresh.unwrap_or(*global);
    RefreshSettings {
      issue_interval_minutes: refresh.issue_interval,
      query_interval_minutes: refresh.query_interval,
      debug,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./redmirror.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/redmirror/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/redmirror/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("redmirror.yaml");
    if local.exists() {
      return Some(local);
    }

    let xdg_path = Self::config_dir()?.join("config.yaml");
    if xdg_path.exists() {
      return Some(xdg_path);
    }

    None
  }

  /// `$XDG_CONFIG_HOME/redmirror`
  pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("redmirror"))
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Pick a context by id or name, else the default one, else the first.
  pub fn context(&self, selector: Option<&str>) -> Result<&ContextConfig> {
    let selector = selector.or(self.default_context.as_deref());
    match selector {
      Some(sel) => self
        .contexts
        .iter()
        .find(|c| c.context_id() == sel || c.name == sel)
        .ok_or_else(|| eyre!("No context named {}", sel)),
      None => self
        .contexts
        .first()
        .ok_or_else(|| eyre!("No contexts configured")),
    }
  }

  /// Get the Redmine API access key from environment variables.
  ///
  /// Checks REDMIRROR_ACCESS_KEY first, then REDMINE_API_KEY as fallback.
  pub fn get_access_key() -> Result<String> {
    std::env::var("REDMIRROR_ACCESS_KEY")
      .or_else(|_| std::env::var("REDMINE_API_KEY"))
      .map_err(|_| {
        eyre!("Redmine access key not found. Set REDMIRROR_ACCESS_KEY or REDMINE_API_KEY.")
      })
  }

  /// Get the Redmine password from environment variables.
  pub fn get_password() -> Result<String> {
    std::env::var("REDMIRROR_PASSWORD")
      .map_err(|_| eyre!("Redmine password not found. Set REDMIRROR_PASSWORD."))
  }

  /// Debug overrides from the environment.
  ///
  /// - REDMIRROR_NO_ISSUE_REFRESH=true skips the refresh when an issue is opened
  /// - REDMIRROR_FORCE_REFRESH_DELAY (any value) lets issue intervals go below the floor
  /// - REDMIRROR_FORCE_REFRESH_SCHEDULE=<ms> fixes the query refresh delay
  pub fn debug_overrides() -> DebugOverrides {
    DebugOverrides {
      no_issue_refresh: std::env::var("REDMIRROR_NO_ISSUE_REFRESH")
        .map(|v| v == "true")
        .unwrap_or(false),
      force_refresh_delay: std::env::var("REDMIRROR_FORCE_REFRESH_DELAY").is_ok(),
      force_refresh_schedule_ms: std::env::var("REDMIRROR_FORCE_REFRESH_SCHEDULE")
        .ok()
        .and_then(|v| v.parse().ok()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
refresh:
  issue_interval: 15
default_context: work
contexts:
  - id: work
    name: Work
    url: https://redmine.example.com
    auth_mode: access_key
    project: demo
  - name: Home
    url: https://home.example.com
    auth_mode: credentials
    username: me
    refresh:
      issue_interval: 2
      query_interval: 60
"#;

  #[test]
  fn test_parse_sample() {
    let config = Config::parse(SAMPLE).unwrap();
    assert_eq!(config.refresh.issue_interval, 15);
    assert_eq!(
      config.refresh.query_interval,
      crate::refresh::DEFAULT_QUERY_REFRESH_MINUTES
    );
    assert_eq!(config.contexts.len(), 2);
    assert_eq!(config.contexts[0].auth_mode, Some(AuthMode::AccessKey));
    assert_eq!(config.contexts[1].auth_mode, Some(AuthMode::Credentials));
  }

  #[test]
  fn test_context_selection() {
    let config = Config::parse(SAMPLE).unwrap();
    assert_eq!(config.context(None).unwrap().name, "Work");
    assert_eq!(config.context(Some("Home")).unwrap().name, "Home");
    assert!(config.context(Some("nope")).is_err());
  }

  #[test]
  fn test_derived_id_is_stable() {
    let config = Config::parse(SAMPLE).unwrap();
    let home = &config.contexts[1];
    assert_eq!(home.context_id(), home.context_id());
    assert_eq!(home.context_id().len(), 12);
    assert_eq!(config.contexts[0].context_id(), "work");
  }

  #[test]
  fn test_per_context_refresh_override() {
    let config = Config::parse(SAMPLE).unwrap();
    let settings = config.contexts[1].refresh_settings(&config.refresh, DebugOverrides::default());
    assert_eq!(settings.issue_interval_minutes, 2);
    assert_eq!(settings.query_interval_minutes, 60);

    let settings = config.contexts[0].refresh_settings(&config.refresh, DebugOverrides::default());
    assert_eq!(settings.issue_interval_minutes, 15);
  }
}
