use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use offtask::quota::DEFAULT_WARN_RATIO;

/// Assets every generation pre-populates unless the config says otherwise.
const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/pages/about.html",
  "/pages/contact.html",
  "/css/materialize.min.css",
  "/js/materialize.min.js",
  "/js/ui.js",
  "/img/task.png",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Directory holding the databases and logs (defaults to $XDG_DATA_HOME/offtask)
  pub data_dir: Option<PathBuf>,
  pub assets: AssetsConfig,
  pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
  /// When false, requests go straight to the network and nothing is cached
  pub enabled: bool,
  /// Origin the manifest paths are resolved against
  pub origin: String,
  /// Application version; names the cache generation
  pub version: String,
  pub manifest: Vec<String>,
  /// Per-request HTTP timeout. `0` disables it.
  pub timeout_secs: u64,
}

impl Default for AssetsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      origin: "http://localhost:8080/".to_string(),
      version: "task-manager-v1".to_string(),
      manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
      timeout_secs: 30,
    }
  }
}

impl AssetsConfig {
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid asset origin '{}': {}", self.origin, e))
  }

  pub fn timeout(&self) -> Option<Duration> {
    (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
  /// Storage allowance the databases are measured against
  pub quota_bytes: u64,
  /// Usage ratio above which the low-space warning is shown
  pub warn_ratio: f64,
}

impl Default for QuotaConfig {
  fn default() -> Self {
    Self {
      quota_bytes: 100 * 1024 * 1024,
      warn_ratio: DEFAULT_WARN_RATIO,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offtask.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offtask/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found. `OFFTASK_DATA_DIR`
  /// overrides `data_dir` either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(dir) = std::env::var("OFFTASK_DATA_DIR") {
      config.data_dir = Some(PathBuf::from(dir));
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offtask.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offtask").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if !(self.quota.warn_ratio > 0.0 && self.quota.warn_ratio <= 1.0) {
      return Err(eyre!(
        "quota.warn_ratio must be in (0, 1], got {}",
        self.quota.warn_ratio
      ));
    }
    if self.assets.version.trim().is_empty() {
      return Err(eyre!("assets.version must not be empty"));
    }
    self.assets.origin_url()?;
    Ok(())
  }

  /// Resolved data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offtask"))
  }

  pub fn tasks_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("tasks.db"))
  }

  pub fn assets_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("assets.db"))
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("logs"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert!(config.assets.enabled);
    assert_eq!(config.assets.version, "task-manager-v1");
    assert_eq!(config.assets.manifest.len(), DEFAULT_MANIFEST.len());
    assert_eq!(config.quota.warn_ratio, 0.8);
    assert_eq!(config.assets.timeout(), Some(Duration::from_secs(30)));
    config.validate().unwrap();
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
data_dir: /tmp/offtask-test
assets:
  version: v2
  manifest: ["/a.html", "/b.js"]
quota:
  quota_bytes: 1000000
"#,
    )
    .unwrap();

    assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/offtask-test")));
    assert_eq!(config.assets.version, "v2");
    assert_eq!(config.assets.manifest, vec!["/a.html", "/b.js"]);
    assert_eq!(config.assets.origin, "http://localhost:8080/");
    assert_eq!(config.quota.quota_bytes, 1_000_000);
    assert_eq!(config.quota.warn_ratio, 0.8);
    assert_eq!(
      config.tasks_db_path().unwrap(),
      PathBuf::from("/tmp/offtask-test/tasks.db")
    );
  }

  #[test]
  fn test_invalid_values_are_rejected() {
    let bad_ratio = Config::from_yaml("quota:\n  warn_ratio: 1.5\n").unwrap();
    assert!(bad_ratio.validate().is_err());

    let bad_origin = Config::from_yaml("assets:\n  origin: not a url\n").unwrap();
    assert!(bad_origin.validate().is_err());
  }

  #[test]
  fn test_zero_timeout_disables_it() {
    let config = Config::from_yaml("assets:\n  timeout_secs: 0\n").unwrap();
    assert_eq!(config.assets.timeout(), None);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/offtask.yaml"))).is_err());
  }
}
