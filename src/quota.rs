//! Storage quota observation.
//!
//! The monitor is read-only: it reports how much of the storage allowance the
//! local stores occupy and flags the near-quota state, but never deletes data
//! or refuses writes.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default ratio above which the near-quota warning is raised.
pub const DEFAULT_WARN_RATIO: f64 = 0.8;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Raw usage numbers as reported by a [`UsageSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
  pub used_bytes: u64,
  pub quota_bytes: u64,
}

/// Something that can report aggregate storage consumption.
pub trait UsageSource: Send + Sync {
  fn usage(&self) -> Result<Usage>;
}

/// Usage measured from the on-disk size of SQLite databases.
///
/// Each registered database also counts its `-wal`, `-shm` and `-journal`
/// siblings. Files that do not exist count as zero bytes.
#[derive(Debug, Clone)]
pub struct FileUsage {
  databases: Vec<PathBuf>,
  quota_bytes: u64,
}

impl FileUsage {
  pub fn new(quota_bytes: u64) -> Self {
    Self {
      databases: Vec::new(),
      quota_bytes,
    }
  }

  /// Add a database file to the measured set.
  pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
    self.databases.push(path.into());
    self
  }

  fn file_len(path: &Path) -> Result<u64> {
    match std::fs::metadata(path) {
      Ok(meta) => Ok(meta.len()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
      Err(e) => Err(Error::storage_io("measuring storage usage")(e)),
    }
  }
}

impl UsageSource for FileUsage {
  fn usage(&self) -> Result<Usage> {
    let mut used_bytes = 0u64;
    for db in &self.databases {
      used_bytes += Self::file_len(db)?;
      for suffix in ["-wal", "-shm", "-journal"] {
        let mut sibling = db.clone().into_os_string();
        sibling.push(suffix);
        used_bytes += Self::file_len(Path::new(&sibling))?;
      }
    }

    Ok(Usage {
      used_bytes,
      quota_bytes: self.quota_bytes,
    })
  }
}

/// Usage source that always reports the same numbers.
#[derive(Debug, Clone, Copy)]
pub struct FixedUsage(pub Usage);

impl FixedUsage {
  pub fn new(used_bytes: u64, quota_bytes: u64) -> Self {
    Self(Usage {
      used_bytes,
      quota_bytes,
    })
  }
}

impl UsageSource for FixedUsage {
  fn usage(&self) -> Result<Usage> {
    Ok(self.0)
  }
}

/// A point-in-time reading handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaSnapshot {
  pub used_bytes: u64,
  pub quota_bytes: u64,
  pub near_quota: bool,
}

impl QuotaSnapshot {
  /// Used bytes divided by the quota. An unknown (zero) quota reads as `0.0`.
  pub fn usage_ratio(&self) -> f64 {
    if self.quota_bytes == 0 {
      return 0.0;
    }
    self.used_bytes as f64 / self.quota_bytes as f64
  }

  pub fn used_mb(&self) -> f64 {
    self.used_bytes as f64 / BYTES_PER_MB
  }

  pub fn quota_mb(&self) -> f64 {
    self.quota_bytes as f64 / BYTES_PER_MB
  }
}

impl fmt::Display for QuotaSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Storage used: {:.2} MB of {:.2} MB",
      self.used_mb(),
      self.quota_mb()
    )
  }
}

/// Observer of aggregate storage consumption.
///
/// Every [`refresh`](Self::refresh) publishes the new snapshot on a watch
/// channel, so a presentation layer can hold a receiver and redraw on change.
pub struct QuotaMonitor {
  source: Box<dyn UsageSource>,
  warn_ratio: f64,
  tx: watch::Sender<Option<QuotaSnapshot>>,
}

impl QuotaMonitor {
  pub fn new(source: impl UsageSource + 'static) -> Self {
    let (tx, _rx) = watch::channel(None);
    Self {
      source: Box::new(source),
      warn_ratio: DEFAULT_WARN_RATIO,
      tx,
    }
  }

  /// Set the ratio above which `near_quota` is reported.
  pub fn with_warn_ratio(mut self, warn_ratio: f64) -> Self {
    self.warn_ratio = warn_ratio;
    self
  }

  /// Read current usage without publishing it.
  pub fn estimate(&self) -> Result<QuotaSnapshot> {
    let usage = self.source.usage()?;
    let mut snapshot = QuotaSnapshot {
      used_bytes: usage.used_bytes,
      quota_bytes: usage.quota_bytes,
      near_quota: false,
    };
    snapshot.near_quota = snapshot.usage_ratio() > self.warn_ratio;
    Ok(snapshot)
  }

  /// Estimate and publish to subscribers.
  pub fn refresh(&self) -> Result<QuotaSnapshot> {
    let snapshot = self.estimate()?;
    if snapshot.near_quota {
      warn!(
        used_bytes = snapshot.used_bytes,
        quota_bytes = snapshot.quota_bytes,
        "running low on storage: {}",
        snapshot
      );
    } else {
      debug!(
        used_bytes = snapshot.used_bytes,
        quota_bytes = snapshot.quota_bytes,
        "storage usage refreshed"
      );
    }
    self.tx.send_replace(Some(snapshot));
    Ok(snapshot)
  }

  /// Last published snapshot, if any refresh has happened yet.
  pub fn latest(&self) -> Option<QuotaSnapshot> {
    *self.tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<Option<QuotaSnapshot>> {
    self.tx.subscribe()
  }
}

impl fmt::Debug for QuotaMonitor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QuotaMonitor")
      .field("warn_ratio", &self.warn_ratio)
      .field("latest", &self.latest())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_near_quota_above_threshold() {
    let monitor = QuotaMonitor::new(FixedUsage::new(850_000, 1_000_000));
    let snapshot = monitor.estimate().unwrap();

    assert_eq!(snapshot.used_bytes, 850_000);
    assert_eq!(snapshot.quota_bytes, 1_000_000);
    assert!((snapshot.usage_ratio() - 0.85).abs() < f64::EPSILON);
    assert!(snapshot.near_quota);
  }

  #[test]
  fn test_exactly_at_threshold_is_normal() {
    let monitor = QuotaMonitor::new(FixedUsage::new(800, 1000));
    assert!(!monitor.estimate().unwrap().near_quota);
  }

  #[test]
  fn test_unknown_quota_is_normal() {
    let monitor = QuotaMonitor::new(FixedUsage::new(4096, 0));
    let snapshot = monitor.estimate().unwrap();
    assert_eq!(snapshot.usage_ratio(), 0.0);
    assert!(!snapshot.near_quota);
  }

  #[test]
  fn test_custom_warn_ratio() {
    let monitor = QuotaMonitor::new(FixedUsage::new(600, 1000)).with_warn_ratio(0.5);
    assert!(monitor.estimate().unwrap().near_quota);
  }

  #[test]
  fn test_display_in_megabytes() {
    let snapshot = QuotaSnapshot {
      used_bytes: 1024 * 1024 * 3 / 2,
      quota_bytes: 1024 * 1024 * 10,
      near_quota: false,
    };
    assert_eq!(snapshot.to_string(), "Storage used: 1.50 MB of 10.00 MB");
  }

  #[test]
  fn test_estimate_does_not_publish() {
    let monitor = QuotaMonitor::new(FixedUsage::new(1, 10));
    monitor.estimate().unwrap();
    assert!(monitor.latest().is_none());
  }

  #[tokio::test]
  async fn test_refresh_notifies_subscribers() {
    let monitor = QuotaMonitor::new(FixedUsage::new(900, 1000));
    let mut rx = monitor.subscribe();

    monitor.refresh().unwrap();

    rx.changed().await.unwrap();
    let published = (*rx.borrow()).unwrap();
    assert!(published.near_quota);
    assert_eq!(monitor.latest(), Some(published));
  }

  #[test]
  fn test_file_usage_counts_database_and_siblings() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("tasks.db");
    std::fs::write(&db, vec![0u8; 300]).unwrap();
    std::fs::write(dir.path().join("tasks.db-wal"), vec![0u8; 200]).unwrap();

    let usage = FileUsage::new(10_000)
      .with_database(&db)
      .with_database(dir.path().join("missing.db"))
      .usage()
      .unwrap();

    assert_eq!(usage.used_bytes, 500);
    assert_eq!(usage.quota_bytes, 10_000);
  }
}
