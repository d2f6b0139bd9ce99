//! Error taxonomy shared by the task store, the asset cache and the quota monitor.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the offline core.
///
/// Nothing in the core retries on error; every variant is handed to the
/// immediate caller.
#[derive(Debug, Error)]
pub enum Error {
  /// A task was submitted without a title.
  #[error("task title is required")]
  MissingTitle,

  /// A status string did not name a known task status.
  #[error("unknown task status: {0}")]
  UnknownStatus(String),

  /// A request URL or manifest path could not be resolved.
  #[error("invalid request url '{url}': {reason}")]
  InvalidUrl { url: String, reason: String },

  /// SQLite could not complete a statement or transaction.
  #[error("storage failure while {action}: {source}")]
  Storage {
    action: &'static str,
    #[source]
    source: rusqlite::Error,
  },

  /// The filesystem backing a store failed.
  #[error("storage failure while {action}: {source}")]
  StorageIo {
    action: &'static str,
    #[source]
    source: std::io::Error,
  },

  /// Persisted data could not be decoded.
  #[error("corrupt stored data: {0}")]
  Corrupt(String),

  /// The on-disk schema was written by a newer version.
  #[error("store schema version {found} is newer than supported version {supported}")]
  SchemaTooNew { found: i64, supported: i64 },

  /// A store mutex was poisoned by a panicking holder.
  #[error("storage lock poisoned: {0}")]
  LockPoisoned(String),

  /// The HTTP client could not be constructed.
  #[error("failed to build HTTP client: {0}")]
  HttpClient(String),

  /// A network fetch failed and nothing cached covered the request.
  #[error("network failure fetching {url}: {reason}")]
  Network { url: String, reason: String },

  /// Pre-populating a cache generation did not complete.
  #[error("install of asset generation '{version}' failed: {source}")]
  Install {
    version: String,
    #[source]
    source: Box<Error>,
  },

  /// An operation required a cache generation that does not exist.
  #[error("asset generation '{0}' is not installed")]
  NotInstalled(String),
}

/// Coarse classification of [`Error`] for callers that pick a policy per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Rejected input, nothing was attempted.
  InvalidInput,
  /// The persistent store could not complete the operation.
  StorageFailure,
  /// The network failed and no cache entry covered the request.
  NetworkFailure,
  /// Asset pre-population failed; the generation was not written.
  InstallFailure,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::MissingTitle | Error::UnknownStatus(_) | Error::InvalidUrl { .. } => {
        ErrorKind::InvalidInput
      }
      Error::Storage { .. }
      | Error::StorageIo { .. }
      | Error::Corrupt(_)
      | Error::SchemaTooNew { .. }
      | Error::LockPoisoned(_)
      | Error::NotInstalled(_) => ErrorKind::StorageFailure,
      Error::Network { .. } | Error::HttpClient(_) => ErrorKind::NetworkFailure,
      Error::Install { .. } => ErrorKind::InstallFailure,
    }
  }

  /// Helper for `map_err` on rusqlite calls.
  pub(crate) fn storage(action: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |source| Error::Storage { action, source }
  }

  pub(crate) fn storage_io(action: &'static str) -> impl FnOnce(std::io::Error) -> Error {
    move |source| Error::StorageIo { action, source }
  }

  pub(crate) fn poisoned<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::LockPoisoned(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_install_failure_is_distinguishable_from_its_cause() {
    let err = Error::Install {
      version: "v1".to_string(),
      source: Box::new(Error::Network {
        url: "http://localhost/a.html".to_string(),
        reason: "connection refused".to_string(),
      }),
    };

    assert_eq!(err.kind(), ErrorKind::InstallFailure);
    let cause = std::error::Error::source(&err).map(|e| e.to_string());
    assert_eq!(
      cause.as_deref(),
      Some("network failure fetching http://localhost/a.html: connection refused")
    );
  }

  #[test]
  fn test_storage_kinds() {
    assert_eq!(
      Error::LockPoisoned("x".to_string()).kind(),
      ErrorKind::StorageFailure
    );
    assert_eq!(
      Error::SchemaTooNew {
        found: 3,
        supported: 1
      }
      .kind(),
      ErrorKind::StorageFailure
    );
    assert_eq!(Error::MissingTitle.kind(), ErrorKind::InvalidInput);
  }

  #[test]
  fn test_http_client_failure_names_the_client() {
    let err = Error::HttpClient("no TLS backend".to_string());
    assert_eq!(err.kind(), ErrorKind::NetworkFailure);
    assert_eq!(err.to_string(), "failed to build HTTP client: no TLS backend");
  }
}
