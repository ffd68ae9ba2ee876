//! Tracks which thread is the interactive (UI) thread.
//!
//! Remote calls must never be awaited there. The UI loop marks its thread once
//! at startup; code that may be reached from it checks [`is_current_thread`]
//! and hands work to the tokio worker pool instead.

use std::cell::Cell;
use std::future::Future;

use tokio::task::JoinHandle;

thread_local! {
  static INTERACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Mark the calling thread as the interactive thread.
pub fn mark_current_thread() {
  INTERACTIVE.with(|flag| flag.set(true));
}

/// Undo [`mark_current_thread`] for the calling thread.
pub fn unmark_current_thread() {
  INTERACTIVE.with(|flag| flag.set(false));
}

pub fn is_current_thread() -> bool {
  INTERACTIVE.with(|flag| flag.get())
}

/// Run `future` on a background worker and return immediately.
pub fn dispatch<F>(future: F) -> JoinHandle<F::Output>
where
  F: Future + Send + 'static,
  F::Output: Send + 'static,
{
  tokio::spawn(future)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_marking_is_per_thread() {
    mark_current_thread();
    assert!(is_current_thread());

    let other = std::thread::spawn(is_current_thread).join().unwrap();
    assert!(!other);

    unmark_current_thread();
    assert!(!is_current_thread());
  }
}
