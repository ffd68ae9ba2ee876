//! Process-wide lookup of live remote contexts.

use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::context::RemoteContext;

static GLOBAL: LazyLock<ContextRegistry> = LazyLock::new(ContextRegistry::new);

/// Weakly held list of contexts.
///
/// Registration never keeps a context alive. Dropped contexts are pruned on
/// the next lookup; there is no explicit unregister.
pub struct ContextRegistry {
  contexts: Mutex<Vec<Weak<RemoteContext>>>,
}

impl ContextRegistry {
  pub fn new() -> Self {
    Self {
      contexts: Mutex::new(Vec::new()),
    }
  }

  /// The registry every context joins on creation.
  pub fn global() -> &'static ContextRegistry {
    &GLOBAL
  }

  pub fn register(&self, context: &Arc<RemoteContext>) {
    debug!("registering context {}", context.id());
    self.contexts.lock().push(Arc::downgrade(context));
  }

  /// First live context with the given id.
  pub fn find_by_id(&self, id: &str) -> Option<Arc<RemoteContext>> {
    let mut contexts = self.contexts.lock();
    contexts.retain(|weak| weak.strong_count() > 0);
    contexts
      .iter()
      .filter_map(Weak::upgrade)
      .find(|context| context.id() == id)
  }

  /// Every context still alive.
  pub fn live(&self) -> Vec<Arc<RemoteContext>> {
    let mut contexts = self.contexts.lock();
    contexts.retain(|weak| weak.strong_count() > 0);
    contexts.iter().filter_map(Weak::upgrade).collect()
  }

  /// Number of entries, dead ones included until the next lookup prunes them.
  pub fn len(&self) -> usize {
    self.contexts.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for ContextRegistry {
  fn default() -> Self {
    Self::new()
  }
}
