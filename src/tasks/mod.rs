//! Persistent task records.
//!
//! Tasks live in a SQLite table keyed by an auto-incrementing id with a
//! secondary index on status. Every mutation runs in its own transaction and
//! refreshes the quota monitor once it has committed.

mod store;
mod types;

pub use store::{TaskStore, SCHEMA_VERSION};
pub use types::{NewTask, Task, TaskId, TaskStatus};
