//! Change notifications and listener fan-out.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Events fired by a single issue entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueEvent {
  /// Mirrored data or local edits changed
  DataChanged,
}

/// Events fired by a remote context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEvent {
  /// A saved query was added or removed
  QueryListChanged,
}

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Receiving end handed to a listener
pub struct EventReceiver<E> {
  id: ListenerId,
  rx: mpsc::UnboundedReceiver<E>,
}

impl<E> EventReceiver<E> {
  pub fn id(&self) -> ListenerId {
    self.id
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<E> {
    self.rx.recv().await
  }

  /// Receive an already-fired event without waiting
  pub fn try_next(&mut self) -> Option<E> {
    self.rx.try_recv().ok()
  }
}

/// Registered listeners of one event source.
///
/// Firing is synchronous and never blocks: every listener gets its own
/// unbounded channel. Listeners whose receiver was dropped are pruned on the
/// next fire. No ordering between listeners.
pub struct Listeners<E> {
  next_id: AtomicU64,
  senders: Mutex<Vec<(ListenerId, mpsc::UnboundedSender<E>)>>,
}

impl<E: Clone> Listeners<E> {
  pub fn new() -> Self {
    Self {
      next_id: AtomicU64::new(0),
      senders: Mutex::new(Vec::new()),
    }
  }

  pub fn add(&self) -> EventReceiver<E> {
    let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    let (tx, rx) = mpsc::unbounded_channel();
    self.senders.lock().push((id, tx));
    EventReceiver { id, rx }
  }

  /// Returns false if the listener was not registered.
  pub fn remove(&self, id: ListenerId) -> bool {
    let mut senders = self.senders.lock();
    let before = senders.len();
    senders.retain(|(existing, _)| *existing != id);
    senders.len() != before
  }

  pub fn fire(&self, event: E) {
    self
      .senders
      .lock()
      .retain(|(_, tx)| tx.send(event.clone()).is_ok());
  }

  pub fn len(&self) -> usize {
    self.senders.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<E: Clone> Default for Listeners<E> {
  fn default() -> Self {
    Self::new()
  }
}
