//! Offline-first core of the task manager.
//!
//! - [`tasks`]: transactional task records with a status index
//! - [`cache`]: versioned, cache-first asset cache behind a dispatch interface
//! - [`quota`]: read-only storage usage observer

pub mod cache;
pub mod error;
pub mod quota;
pub mod tasks;

pub use error::{Error, ErrorKind, Result};
