//! Live local mirrors of Redmine issues and saved queries.
//!
//! A [`RemoteContext`] owns one server connection. Issues fetched through it
//! live in an identity cache, so every holder of issue `42` shares the same
//! [`IssueEntity`]; background refresh mutates that object in place and
//! listeners get an [`IssueEvent::DataChanged`]. Opening an issue subscribes
//! it to periodic refresh, closing it unsubscribes.
//!
//! ```ignore
//! let context = RemoteContext::new(options, Arc::new(RedmineConnector));
//! let issue = context.fetch_issue("42").await?;
//! let mut events = issue.add_change_listener();
//! issue.open().await;
//! while let Some(IssueEvent::DataChanged) = events.next().await {
//!     println!("{}", issue.display_name());
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod interactive;
pub mod issue;
pub mod logging;
pub mod query;
pub mod redmine;
pub mod refresh;
pub mod registry;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{ContextOptions, RemoteContext};
pub use error::{Error, Result};
pub use event::{ContextEvent, IssueEvent};
pub use issue::{EntityStatus, IssueEntity};
pub use query::{SavedQuery, SavedQueryConfig};
pub use registry::ContextRegistry;
