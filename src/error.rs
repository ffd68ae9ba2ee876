//! Error taxonomy for the mirror subsystem.

use thiserror::Error;

/// Errors raised by remote contexts, the identity cache and issue entities.
///
/// `Clone` so that a single in-flight fetch can hand the same failure to every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
  /// The remote entity does not exist (anymore).
  #[error("not found: {0}")]
  NotFound(String),

  /// Transport, authentication or server failure.
  #[error("remote error: {0}")]
  Remote(String),

  /// Missing or invalid connection settings.
  #[error("configuration error: {0}")]
  Configuration(String),

  /// Operation that is deliberately not supported in the current state.
  #[error("unsupported operation: {0}")]
  Unsupported(&'static str),
}

impl Error {
  pub fn is_not_found(&self) -> bool {
    matches!(self, Error::NotFound(_))
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
      Error::NotFound(e.to_string())
    } else {
      Error::Remote(e.to_string())
    }
  }
}

impl From<url::ParseError> for Error {
  fn from(e: url::ParseError) -> Self {
    Error::Configuration(format!("invalid url: {}", e))
  }
}

pub type Result<T> = std::result::Result<T, Error>;
