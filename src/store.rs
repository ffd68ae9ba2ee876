//! Persistence of saved queries, keyed by context id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::query::SavedQueryConfig;

/// Where a context keeps its saved queries
pub trait QueryStore: Send + Sync {
  fn load(&self, context_id: &str) -> Result<Vec<SavedQueryConfig>>;

  /// Replace every saved query of `context_id`.
  fn save(&self, context_id: &str, queries: &[SavedQueryConfig]) -> Result<()>;
}

/// Store that forgets everything on exit
#[derive(Default)]
pub struct MemoryQueryStore {
  contexts: Mutex<BTreeMap<String, Vec<SavedQueryConfig>>>,
}

impl MemoryQueryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl QueryStore for MemoryQueryStore {
  fn load(&self, context_id: &str) -> Result<Vec<SavedQueryConfig>> {
    Ok(self.contexts.lock().get(context_id).cloned().unwrap_or_default())
  }

  fn save(&self, context_id: &str, queries: &[SavedQueryConfig]) -> Result<()> {
    self
      .contexts
      .lock()
      .insert(context_id.to_string(), queries.to_vec());
    Ok(())
  }
}

/// YAML file mapping context ids to their saved queries:
///
/// ```yaml
/// a1b2c3d4e5f6:
///   - name: Crashes
///     summary: crash
///     auto_refresh: true
/// ```
pub struct YamlQueryStore {
  path: PathBuf,
  /// Serializes read-modify-write cycles on the file
  lock: Mutex<()>,
}

impl YamlQueryStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      lock: Mutex::new(()),
    }
  }

  /// `queries.yaml` next to the configuration file
  pub fn default_location() -> Option<Self> {
    crate::config::Config::config_dir().map(|dir| Self::new(dir.join("queries.yaml")))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn read_all(&self) -> Result<BTreeMap<String, Vec<SavedQueryConfig>>> {
    if !self.path.exists() {
      return Ok(BTreeMap::new());
    }
    let contents = std::fs::read_to_string(&self.path).map_err(|e| {
      Error::Configuration(format!("failed to read {}: {}", self.path.display(), e))
    })?;
    if contents.trim().is_empty() {
      return Ok(BTreeMap::new());
    }
    serde_yaml::from_str(&contents).map_err(|e| {
      Error::Configuration(format!("failed to parse {}: {}", self.path.display(), e))
    })
  }
}

impl QueryStore for YamlQueryStore {
  fn load(&self, context_id: &str) -> Result<Vec<SavedQueryConfig>> {
    let _guard = self.lock.lock();
    Ok(self.read_all()?.remove(context_id).unwrap_or_default())
  }

  fn save(&self, context_id: &str, queries: &[SavedQueryConfig]) -> Result<()> {
    let _guard = self.lock.lock();
    let mut all = self.read_all()?;
    if queries.is_empty() {
      all.remove(context_id);
    } else {
      all.insert(context_id.to_string(), queries.to_vec());
    }

    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::Configuration(format!("failed to create {}: {}", parent.display(), e))
      })?;
    }
    let contents = serde_yaml::to_string(&all)
      .map_err(|e| Error::Configuration(format!("failed to serialize queries: {}", e)))?;
    std::fs::write(&self.path, contents).map_err(|e| {
      Error::Configuration(format!("failed to write {}: {}", self.path.display(), e))
    })?;
    debug!(
      "saved {} queries of {} to {}",
      queries.len(),
      context_id,
      self.path.display()
    );
    Ok(())
  }
}
