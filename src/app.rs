use color_eyre::Result;
use std::io::Write;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use offtask::cache::{
  AssetCache, AssetRequest, Dispatch, HttpNetwork, Manifest, NetworkOnly, ResponseSource,
  SqliteStorage,
};
use offtask::quota::{FileUsage, QuotaMonitor, QuotaSnapshot};
use offtask::tasks::{NewTask, Task, TaskStore};
use offtask::ErrorKind;

use crate::config::Config;
use crate::Command;

const LOW_SPACE_WARNING: &str = "Warning: You are running low on data";

/// Command-line presentation layer.
///
/// Holds the store and cache handles for the lifetime of the process and
/// renders whatever the core returns. It keeps no state of its own beyond
/// those handles.
pub struct App {
  store: TaskStore,
  quota: Arc<QuotaMonitor>,
  /// Present when asset caching is enabled
  assets: Option<AssetCache<SqliteStorage, HttpNetwork>>,
  /// Every asset request goes through here
  dispatcher: Box<dyn Dispatch>,
  origin: Url,
}

impl App {
  /// Open the stores and bring the configured asset generation up.
  pub async fn new(config: &Config) -> Result<Self> {
    let network = HttpNetwork::new(config.assets.timeout())?;
    Self::with_network(config, network).await
  }

  /// Like [`App::new`] with a preconfigured transport.
  ///
  /// Installing the asset generation is attempted here, on the first start of
  /// each version. A failed install is logged and retried on the next start;
  /// until then the previous generation, if any, keeps serving.
  pub async fn with_network(config: &Config, network: HttpNetwork) -> Result<Self> {
    let tasks_path = config.tasks_db_path()?;
    let assets_path = config.assets_db_path()?;

    let usage = FileUsage::new(config.quota.quota_bytes)
      .with_database(&tasks_path)
      .with_database(&assets_path);
    let quota = Arc::new(QuotaMonitor::new(usage).with_warn_ratio(config.quota.warn_ratio));

    let store = TaskStore::open(&tasks_path, Arc::clone(&quota))?;

    let origin = config.assets.origin_url()?;

    let (assets, dispatcher) = if config.assets.enabled {
      let manifest = Manifest::resolve(&origin, &config.assets.manifest)?;
      let storage = SqliteStorage::open_at(&assets_path)?;
      let cache = AssetCache::new(storage, network, &config.assets.version, manifest);
      if let Err(e) = cache.start().await {
        match e.kind() {
          ErrorKind::InstallFailure => {
            warn!(version = %cache.version(), error = %e, "asset install deferred")
          }
          _ => return Err(e.into()),
        }
      }
      (Some(cache.clone()), Box::new(cache) as Box<dyn Dispatch>)
    } else {
      (None, Box::new(NetworkOnly::new(network)) as Box<dyn Dispatch>)
    };

    Ok(Self {
      store,
      quota,
      assets,
      dispatcher,
      origin,
    })
  }

  pub async fn run(&self, command: &Command, out: &mut impl Write) -> Result<()> {
    match command {
      Command::Add {
        title,
        description,
        status,
      } => {
        let mut task = NewTask::new(title.as_str()).with_status(*status);
        if let Some(description) = description.as_deref().filter(|d| !d.trim().is_empty()) {
          task = task.with_description(description);
        }

        let id = self.store.add(&task)?;
        writeln!(out, "Added task {}", id)?;
        self.write_latest_quota(out)?;
      }

      Command::Delete { id } => {
        if self.store.delete(*id)? {
          writeln!(out, "Deleted task {}", id)?;
        } else {
          writeln!(out, "No task with id {}", id)?;
        }
        self.write_latest_quota(out)?;
      }

      Command::List { status } => {
        let tasks = match status {
          Some(status) => self.store.list_by_status(*status)?,
          None => self.store.list_all()?,
        };
        write_tasks(out, &tasks)?;
      }

      Command::Usage => {
        let snapshot = self.quota.refresh()?;
        write_quota(out, &snapshot)?;
      }

      Command::Install => match &self.assets {
        Some(cache) => {
          let lifecycle = cache.start().await?;
          let entries = cache.entries(cache.version())?.len();
          writeln!(
            out,
            "Asset generation {} is {} ({} entries)",
            cache.version(),
            lifecycle,
            entries
          )?;
          let snapshot = self.quota.refresh()?;
          write_quota(out, &snapshot)?;
        }
        None => writeln!(out, "Asset caching is disabled")?,
      },

      Command::Fetch { path } => {
        let url = self.origin.join(path).map_err(|e| offtask::Error::InvalidUrl {
          url: path.clone(),
          reason: e.to_string(),
        })?;

        let served = self.dispatcher.dispatch(AssetRequest::get(url.clone())).await?;
        let source = match served.source {
          ResponseSource::Cache => "cache",
          ResponseSource::Network => "network",
        };
        writeln!(
          out,
          "{} {} {} bytes from {}",
          served.response.status,
          url,
          served.response.body.len(),
          source
        )?;
      }

      Command::Generations => match &self.assets {
        Some(cache) => {
          let generations = cache.generations()?;
          if generations.is_empty() {
            writeln!(out, "No asset generations installed")?;
          }
          let serving = cache.serving()?;
          for generation in generations {
            let marker = if serving.as_deref() == Some(generation.name.as_str()) {
              "*"
            } else {
              " "
            };
            writeln!(
              out,
              "{} {}  {} entries  created {}",
              marker,
              generation.name,
              generation.entries,
              generation.created_at.format("%Y-%m-%d %H:%M:%S")
            )?;
          }
        }
        None => writeln!(out, "Asset caching is disabled")?,
      },
    }

    Ok(())
  }

  fn write_latest_quota(&self, out: &mut impl Write) -> Result<()> {
    if let Some(snapshot) = self.store.quota().latest() {
      write_quota(out, &snapshot)?;
    }
    Ok(())
  }
}

fn write_tasks(out: &mut impl Write, tasks: &[Task]) -> Result<()> {
  if tasks.is_empty() {
    writeln!(out, "No tasks")?;
    return Ok(());
  }

  for task in tasks {
    writeln!(out, "{:>4}  {:<11}  {}", task.id, task.status, task.title)?;
    if let Some(description) = &task.description {
      writeln!(out, "{:>4}  {:<11}  {}", "", "", description)?;
    }
  }
  Ok(())
}

fn write_quota(out: &mut impl Write, snapshot: &QuotaSnapshot) -> Result<()> {
  writeln!(out, "{}", snapshot)?;
  if snapshot.near_quota {
    writeln!(out, "{}", LOW_SPACE_WARNING)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use offtask::tasks::{TaskId, TaskStatus};
  use std::path::Path;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  fn config_in(dir: &Path, yaml: &str) -> Config {
    let mut config = Config::from_yaml(yaml).unwrap();
    config.data_dir = Some(dir.to_path_buf());
    config
  }

  /// Transport that talks to loopback directly, whatever proxy the environment sets.
  fn local_network() -> HttpNetwork {
    HttpNetwork::from_client(
      reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap(),
    )
  }

  async fn open(config: &Config) -> Result<App> {
    App::with_network(config, local_network()).await
  }

  /// Serve `asset <path>` for every request and count them. Paths containing
  /// `missing` get a 404.
  async fn asset_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}/", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
      loop {
        let Ok((mut socket, _)) = listener.accept().await else {
          break;
        };
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
          let mut buf = [0u8; 4096];
          let n = socket.read(&mut buf).await.unwrap_or(0);
          let request = String::from_utf8_lossy(&buf[..n]);
          let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
          let body = format!("asset {path}");
          let status = if path.contains("missing") {
            "404 Not Found"
          } else {
            "200 OK"
          };
          let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
          );
          let _ = socket.write_all(response.as_bytes()).await;
          let _ = socket.shutdown().await;
        });
      }
    });

    (origin, hits)
  }

  async fn run(app: &App, command: Command) -> Result<String> {
    let mut out = Vec::new();
    app.run(&command, &mut out).await?;
    Ok(String::from_utf8(out).unwrap())
  }

  #[tokio::test]
  async fn test_add_list_delete() {
    let dir = tempfile::TempDir::new().unwrap();
    let app = open(&config_in(dir.path(), "assets:\n  enabled: false\n"))
      .await
      .unwrap();

    let added = run(
      &app,
      Command::Add {
        title: "Buy milk".to_string(),
        description: Some("2%".to_string()),
        status: TaskStatus::Pending,
      },
    )
    .await
    .unwrap();
    assert!(added.starts_with("Added task 1\nStorage used: "));

    let listed = run(&app, Command::List { status: None }).await.unwrap();
    assert_eq!(
      listed,
      "   1  pending      Buy milk\n                   2%\n"
    );

    let deleted = run(&app, Command::Delete { id: TaskId(1) }).await.unwrap();
    assert!(deleted.starts_with("Deleted task 1\n"));
    let missing = run(&app, Command::Delete { id: TaskId(1) }).await.unwrap();
    assert!(missing.starts_with("No task with id 1\n"));

    let listed = run(&app, Command::List { status: None }).await.unwrap();
    assert_eq!(listed, "No tasks\n");
  }

  #[tokio::test]
  async fn test_blank_title_is_reported() {
    let dir = tempfile::TempDir::new().unwrap();
    let app = open(&config_in(dir.path(), "assets:\n  enabled: false\n"))
      .await
      .unwrap();

    let err = run(
      &app,
      Command::Add {
        title: " ".to_string(),
        description: None,
        status: TaskStatus::Pending,
      },
    )
    .await
    .unwrap_err();

    let core = err.downcast_ref::<offtask::Error>().unwrap();
    assert_eq!(core.kind(), ErrorKind::InvalidInput);
  }

  #[tokio::test]
  async fn test_usage_warns_near_quota() {
    let dir = tempfile::TempDir::new().unwrap();
    let app = open(&config_in(
      dir.path(),
      "assets:\n  enabled: false\nquota:\n  quota_bytes: 1024\n",
    ))
    .await
    .unwrap();

    let usage = run(&app, Command::Usage).await.unwrap();
    assert!(usage.contains(LOW_SPACE_WARNING), "{usage}");
  }

  #[tokio::test]
  async fn test_usage_without_warning() {
    let dir = tempfile::TempDir::new().unwrap();
    let app = open(&config_in(dir.path(), "assets:\n  enabled: false\n"))
      .await
      .unwrap();

    let usage = run(&app, Command::Usage).await.unwrap();
    assert!(usage.starts_with("Storage used: "));
    assert!(usage.ends_with("of 100.00 MB\n"), "{usage}");
  }

  #[tokio::test]
  async fn test_disabled_cache_commands() {
    let dir = tempfile::TempDir::new().unwrap();
    let app = open(&config_in(dir.path(), "assets:\n  enabled: false\n"))
      .await
      .unwrap();

    assert_eq!(
      run(&app, Command::Install).await.unwrap(),
      "Asset caching is disabled\n"
    );
    assert_eq!(
      run(&app, Command::Generations).await.unwrap(),
      "Asset caching is disabled\n"
    );
  }

  #[tokio::test]
  async fn test_failed_install_surfaces_install_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::TempDir::new().unwrap();
    // The startup install fails too, but the app still opens
    let app = open(&config_in(
      dir.path(),
      &format!("assets:\n  origin: http://{}/\n  manifest: [\"/a.html\"]\n", addr),
    ))
    .await
    .unwrap();

    assert_eq!(
      run(&app, Command::Generations).await.unwrap(),
      "No asset generations installed\n"
    );

    let err = run(&app, Command::Install).await.unwrap_err();
    let core = err.downcast_ref::<offtask::Error>().unwrap();
    assert_eq!(core.kind(), ErrorKind::InstallFailure);

    assert_eq!(
      run(&app, Command::Generations).await.unwrap(),
      "No asset generations installed\n"
    );
  }

  #[tokio::test]
  async fn test_startup_installs_and_fetches_are_cached() {
    let (origin, hits) = asset_server().await;
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(
      dir.path(),
      &format!("assets:\n  origin: {origin}\n  manifest: [\"/a.html\"]\n"),
    );

    let app = open(&config).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let cached = run(&app, Command::Fetch { path: "/a.html".to_string() }).await.unwrap();
    assert_eq!(cached, format!("200 {origin}a.html 13 bytes from cache\n"));

    let first = run(&app, Command::Fetch { path: "/b.js".to_string() }).await.unwrap();
    assert!(first.ends_with("from network\n"), "{first}");
    let second = run(&app, Command::Fetch { path: "/b.js".to_string() }).await.unwrap();
    assert_eq!(second, format!("200 {origin}b.js 11 bytes from cache\n"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // A second start of the same version makes no network calls
    drop(app);
    let app = open(&config).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    let generations = run(&app, Command::Generations).await.unwrap();
    assert!(generations.starts_with("* task-manager-v1  2 entries"), "{generations}");
  }

  #[tokio::test]
  async fn test_upgrade_keeps_serving_previous_generation() {
    let (origin, _hits) = asset_server().await;
    let dir = tempfile::TempDir::new().unwrap();
    let v1 = config_in(
      dir.path(),
      &format!("assets:\n  origin: {origin}\n  version: v1\n  manifest: [\"/a.html\"]\n"),
    );
    drop(open(&v1).await.unwrap());

    // v2 cannot install: one of its assets is gone
    let mut v2 = v1.clone();
    v2.assets.version = "v2".to_string();
    v2.assets.manifest = vec!["/a.html".to_string(), "/missing.css".to_string()];
    let app = open(&v2).await.unwrap();

    let generations = run(&app, Command::Generations).await.unwrap();
    assert!(generations.starts_with("* v1  1 entries"), "{generations}");
    let served = run(&app, Command::Fetch { path: "/a.html".to_string() }).await.unwrap();
    assert!(served.ends_with("from cache\n"), "{served}");
  }
}
