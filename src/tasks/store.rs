//! SQLite-backed task record store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, ToSql, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::quota::QuotaMonitor;

use super::types::{NewTask, Task, TaskId, TaskStatus};

/// Version written to `PRAGMA user_version` once the schema is provisioned.
pub const SCHEMA_VERSION: i64 = 1;

/// How long a writer waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Schema for the task table and its status index.
///
/// `AUTOINCREMENT` keeps deleted ids from ever being handed out again.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
"#;

const SELECT_TASK: &str = "SELECT id, title, description, status FROM tasks";

/// Handle to the persistent task store.
///
/// Obtained once through [`TaskStore::open`] and cloned wherever it is needed;
/// clones share the same connection.
#[derive(Clone)]
pub struct TaskStore {
  inner: Arc<Inner>,
}

struct Inner {
  conn: Mutex<Connection>,
  quota: Arc<QuotaMonitor>,
}

impl TaskStore {
  /// Open the store at `path`, creating and provisioning it on first use.
  pub fn open(path: &Path, quota: Arc<QuotaMonitor>) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(Error::storage_io("creating data directory"))?;
    }

    let conn = Connection::open(path).map_err(Error::storage("opening task database"))?;
    debug!(path = %path.display(), "opened task database");

    Self::from_connection(conn, quota)
  }

  /// Open a private in-memory store.
  pub fn open_in_memory(quota: Arc<QuotaMonitor>) -> Result<Self> {
    let conn = Connection::open_in_memory().map_err(Error::storage("opening task database"))?;
    Self::from_connection(conn, quota)
  }

  fn from_connection(mut conn: Connection, quota: Arc<QuotaMonitor>) -> Result<Self> {
    conn
      .busy_timeout(BUSY_TIMEOUT)
      .map_err(Error::storage("configuring task database"))?;
    provision(&mut conn)?;

    Ok(Self {
      inner: Arc::new(Inner {
        conn: Mutex::new(conn),
        quota,
      }),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.inner.conn.lock().map_err(Error::poisoned)
  }

  /// The monitor refreshed after every committed mutation.
  pub fn quota(&self) -> &QuotaMonitor {
    &self.inner.quota
  }

  /// Insert a task and return its assigned id.
  pub fn add(&self, task: &NewTask) -> Result<TaskId> {
    if task.title.trim().is_empty() {
      return Err(Error::MissingTitle);
    }

    let id = {
      let mut conn = self.lock()?;
      let tx = conn
        .transaction()
        .map_err(Error::storage("starting add transaction"))?;

      tx.execute(
        "INSERT INTO tasks (title, description, status) VALUES (?1, ?2, ?3)",
        params![task.title, task.description, task.status.as_str()],
      )
      .map_err(Error::storage("inserting task"))?;
      let id = tx.last_insert_rowid();

      tx.commit().map_err(Error::storage("committing task insert"))?;
      TaskId(id)
    };

    info!(%id, status = %task.status, "task added");
    self.refresh_quota();
    Ok(id)
  }

  /// Remove a task. Returns `false` when no task had that id.
  pub fn delete(&self, id: TaskId) -> Result<bool> {
    let removed = {
      let mut conn = self.lock()?;
      let tx = conn
        .transaction()
        .map_err(Error::storage("starting delete transaction"))?;

      let removed = tx
        .execute("DELETE FROM tasks WHERE id = ?1", params![id.0])
        .map_err(Error::storage("deleting task"))?;

      tx.commit().map_err(Error::storage("committing task delete"))?;
      removed > 0
    };

    if removed {
      info!(%id, "task deleted");
    } else {
      debug!(%id, "delete of unknown task ignored");
    }
    self.refresh_quota();
    Ok(removed)
  }

  /// All tasks in insertion order, read from a single snapshot.
  pub fn list_all(&self) -> Result<Vec<Task>> {
    let mut conn = self.lock()?;
    let tx = read_transaction(&mut conn)?;
    let tasks = query_tasks(&tx, &format!("{SELECT_TASK} ORDER BY id"), params![])?;
    tx.commit().map_err(Error::storage("finishing read transaction"))?;
    Ok(tasks)
  }

  /// Tasks with the given status, in insertion order. Served by the status index.
  pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
    let mut conn = self.lock()?;
    let tx = read_transaction(&mut conn)?;
    let tasks = query_tasks(
      &tx,
      &format!("{SELECT_TASK} WHERE status = ?1 ORDER BY id"),
      params![status.as_str()],
    )?;
    tx.commit().map_err(Error::storage("finishing read transaction"))?;
    Ok(tasks)
  }

  /// Look up a single task by id.
  pub fn get(&self, id: TaskId) -> Result<Option<Task>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        &format!("{SELECT_TASK} WHERE id = ?1"),
        params![id.0],
        raw_row,
      )
      .optional()
      .map_err(Error::storage("reading task"))?;

    row.map(RawTask::into_task).transpose()
  }

  /// Number of tasks per status. Statuses with no tasks are omitted.
  pub fn count_by_status(&self) -> Result<BTreeMap<TaskStatus, u64>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")
      .map_err(Error::storage("preparing status count"))?;

    let rows: Vec<(String, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(Error::storage("counting tasks"))?
      .collect::<rusqlite::Result<_>>()
      .map_err(Error::storage("counting tasks"))?;

    rows
      .into_iter()
      .map(|(status, count)| {
        let status = status
          .parse::<TaskStatus>()
          .map_err(|_| Error::Corrupt(format!("unknown status '{status}' in task table")))?;
        Ok((status, count.unsigned_abs()))
      })
      .collect()
  }

  /// Publish post-commit usage. The write already succeeded, so a failed
  /// measurement is only logged.
  fn refresh_quota(&self) {
    if let Err(e) = self.inner.quota.refresh() {
      warn!(error = %e, "failed to refresh storage usage");
    }
  }
}

/// Bring the schema up to [`SCHEMA_VERSION`].
///
/// Runs under `BEGIN IMMEDIATE`, so concurrent openers queue on the write lock
/// and the version check plus DDL happen as one step.
fn provision(conn: &mut Connection) -> Result<()> {
  let tx = conn
    .transaction_with_behavior(TransactionBehavior::Immediate)
    .map_err(Error::storage("starting schema upgrade"))?;

  let found: i64 = tx
    .query_row("PRAGMA user_version", [], |row| row.get(0))
    .map_err(Error::storage("reading schema version"))?;

  if found > SCHEMA_VERSION {
    return Err(Error::SchemaTooNew {
      found,
      supported: SCHEMA_VERSION,
    });
  }

  if found < SCHEMA_VERSION {
    info!(from = found, to = SCHEMA_VERSION, "provisioning task store schema");
    tx.execute_batch(SCHEMA_V1)
      .map_err(Error::storage("creating task schema"))?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
      .map_err(Error::storage("writing schema version"))?;
  }

  tx.commit().map_err(Error::storage("committing schema upgrade"))
}

fn read_transaction(conn: &mut Connection) -> Result<Transaction<'_>> {
  conn
    .transaction_with_behavior(TransactionBehavior::Deferred)
    .map_err(Error::storage("starting read transaction"))
}

struct RawTask {
  id: i64,
  title: String,
  description: Option<String>,
  status: String,
}

impl RawTask {
  fn into_task(self) -> Result<Task> {
    let status = self.status.parse::<TaskStatus>().map_err(|_| {
      Error::Corrupt(format!(
        "task {} has unknown status '{}'",
        self.id, self.status
      ))
    })?;

    Ok(Task {
      id: TaskId(self.id),
      title: self.title,
      description: self.description,
      status,
    })
  }
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTask> {
  Ok(RawTask {
    id: row.get(0)?,
    title: row.get(1)?,
    description: row.get(2)?,
    status: row.get(3)?,
  })
}

fn query_tasks(tx: &Transaction<'_>, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<Task>> {
  let mut stmt = tx
    .prepare(sql)
    .map_err(Error::storage("preparing task query"))?;

  let rows: Vec<RawTask> = stmt
    .query_map(args, raw_row)
    .map_err(Error::storage("querying tasks"))?
    .collect::<rusqlite::Result<_>>()
    .map_err(Error::storage("reading task rows"))?;

  rows.into_iter().map(RawTask::into_task).collect()
}
