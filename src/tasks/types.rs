use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Store-assigned task identifier. Never reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

impl FromStr for TaskId {
  type Err = std::num::ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.trim().parse().map(TaskId)
  }
}

/// Workflow status of a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  #[default]
  Pending,
  InProgress,
  Done,
}

impl TaskStatus {
  pub const ALL: [TaskStatus; 3] = [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Done];

  /// Text stored in the `status` column
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskStatus::Pending => "pending",
      TaskStatus::InProgress => "in_progress",
      TaskStatus::Done => "done",
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for TaskStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    TaskStatus::ALL
      .into_iter()
      .find(|status| status.as_str() == s)
      .ok_or_else(|| Error::UnknownStatus(s.to_string()))
  }
}

/// A persisted task record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
  pub id: TaskId,
  pub title: String,
  pub description: Option<String>,
  pub status: TaskStatus,
}

/// A task as submitted by the user, before the store assigns an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub status: TaskStatus,
}

impl NewTask {
  pub fn new(title: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      description: None,
      status: TaskStatus::Pending,
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn with_status(mut self, status: TaskStatus) -> Self {
    self.status = status;
    self
  }
}
