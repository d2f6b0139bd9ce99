//! Cache layer that arbitrates between stored asset generations and the network.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::manifest::Manifest;
use super::storage::{CacheStorage, EntrySummary, GenerationInfo};
use super::traits::{AssetRequest, CapturedResponse, Dispatch, Network, Served};

/// Where the cache is in the install/activate cycle for its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Nothing attempted yet
  Pending,
  /// Manifest assets are being fetched
  Installing,
  /// The generation is stored but not yet serving
  Installed,
  /// The last install attempt failed; install may be retried
  InstallFailed,
  /// Older generations are being retired
  Activating,
  /// The generation serves intercepted requests
  Active,
}

impl fmt::Display for Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Lifecycle::Pending => "pending",
      Lifecycle::Installing => "installing",
      Lifecycle::Installed => "installed",
      Lifecycle::InstallFailed => "install failed",
      Lifecycle::Activating => "activating",
      Lifecycle::Active => "active",
    };
    f.write_str(name)
  }
}

/// Versioned, cache-first asset cache.
///
/// One generation, named after the application version, holds a copy of
/// every manifest asset. Once active, lookups hit that generation first and
/// only misses reach the network. Freshness comes solely from retiring old
/// generations on activation; there is no per-entry expiry.
///
/// Until this version activates, the newest generation left by an earlier
/// version keeps answering lookups, so an upgrade or a failed install never
/// takes cached assets offline.
pub struct AssetCache<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  version: Arc<str>,
  manifest: Arc<Manifest>,
  lifecycle: Arc<Mutex<Lifecycle>>,
  /// Generation lookups are answered from, if any
  serving: Arc<Mutex<Option<String>>>,
}

impl<S: CacheStorage, N: Network> AssetCache<S, N> {
  /// Create a cache for one application version.
  pub fn new(storage: S, network: N, version: impl Into<String>, manifest: Manifest) -> Self {
    Self {
      storage: Arc::new(storage),
      network: Arc::new(network),
      version: Arc::from(version.into()),
      manifest: Arc::new(manifest),
      lifecycle: Arc::new(Mutex::new(Lifecycle::Pending)),
      serving: Arc::new(Mutex::new(None)),
    }
  }

  /// Name of the generation this cache installs and serves.
  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn manifest(&self) -> &Manifest {
    &self.manifest
  }

  pub fn lifecycle(&self) -> Result<Lifecycle> {
    self.lifecycle.lock().map(|l| *l).map_err(Error::poisoned)
  }

  /// Name of the generation currently answering lookups.
  pub fn serving(&self) -> Result<Option<String>> {
    self.serving.lock().map(|s| s.clone()).map_err(Error::poisoned)
  }

  fn set_serving(&self, generation: Option<String>) -> Result<()> {
    *self.serving.lock().map_err(Error::poisoned)? = generation;
    Ok(())
  }

  fn set_lifecycle(&self, next: Lifecycle) -> Result<()> {
    let mut current = self.lifecycle.lock().map_err(Error::poisoned)?;
    let previous = *current;
    debug!(version = %self.version, from = %previous, to = %next, "asset cache lifecycle");
    *current = next;
    Ok(())
  }

  /// Fetch every manifest asset and store them as this version's generation.
  ///
  /// All-or-nothing: if any asset fails to fetch or returns a non-2xx
  /// status, nothing is written and the install can be retried. Reinstalling
  /// a generation that is already stored leaves it in its previous state on
  /// failure.
  pub async fn install(&self) -> Result<()> {
    let previous = self.lifecycle()?;
    self.set_lifecycle(Lifecycle::Installing)?;
    info!(version = %self.version, assets = self.manifest.len(), "installing asset generation");

    let result = match self.fetch_manifest().await {
      Ok(entries) => self.storage.store_generation(&self.version, &entries),
      Err(e) => Err(e),
    };

    match result {
      Ok(()) => {
        self.set_lifecycle(Lifecycle::Installed)?;
        info!(version = %self.version, "asset generation installed");
        Ok(())
      }
      Err(source) => {
        let intact = matches!(previous, Lifecycle::Installed | Lifecycle::Active)
          && self.storage.has_generation(&self.version)?;
        self.set_lifecycle(if intact {
          previous
        } else {
          Lifecycle::InstallFailed
        })?;
        warn!(version = %self.version, error = %source, "asset generation install failed");
        Err(Error::Install {
          version: self.version.to_string(),
          source: Box::new(source),
        })
      }
    }
  }

  async fn fetch_manifest(&self) -> Result<Vec<(AssetRequest, CapturedResponse)>> {
    let network = &*self.network;
    try_join_all(self.manifest.urls().iter().map(|url| async move {
      let request = AssetRequest::get(url.clone());
      let response = network.fetch(&request).await?;
      if !response.is_success() {
        return Err(Error::Network {
          url: url.to_string(),
          reason: format!("unexpected status {}", response.status),
        });
      }
      Ok((request, response))
    }))
    .await
  }

  /// Make this version's generation the one serving traffic.
  ///
  /// Every other generation is deleted in full. Returns the retired names.
  pub fn activate(&self) -> Result<Vec<String>> {
    if !self.storage.has_generation(&self.version)? {
      return Err(Error::NotInstalled(self.version.to_string()));
    }
    self.set_lifecycle(Lifecycle::Activating)?;
    self.set_serving(Some(self.version.to_string()))?;

    let retired: Vec<String> = self
      .storage
      .generations()?
      .into_iter()
      .map(|generation| generation.name)
      .filter(|name| name.as_str() != &*self.version)
      .collect();

    for name in &retired {
      info!(generation = %name, "retiring old asset generation");
      self.storage.delete_generation(name)?;
    }

    self.set_lifecycle(Lifecycle::Active)?;
    info!(version = %self.version, retired = retired.len(), "asset generation active");
    Ok(retired)
  }

  /// Activate this version's generation if an earlier run already installed
  /// it. Otherwise keep serving the newest generation an earlier version left
  /// behind. Makes no network calls and leaves the lifecycle untouched unless
  /// it activates.
  pub fn resume(&self) -> Result<Lifecycle> {
    if self.storage.has_generation(&self.version)? {
      debug!(version = %self.version, "asset generation already installed");
      self.set_lifecycle(Lifecycle::Installed)?;
      self.activate()?;
    } else if self.serving()?.is_none() {
      // Oldest first, so the last one is the newest
      let fallback = self.storage.generations()?.pop().map(|g| g.name);
      if let Some(name) = &fallback {
        info!(
          version = %self.version,
          serving = %name,
          "serving previous asset generation until install"
        );
      }
      self.set_serving(fallback)?;
    }
    self.lifecycle()
  }

  /// Install (when this version's generation is missing) and activate.
  pub async fn start(&self) -> Result<Lifecycle> {
    if self.resume()? == Lifecycle::Active {
      return Ok(Lifecycle::Active);
    }

    self.install().await?;
    self.activate()?;
    self.lifecycle()
  }

  /// Serve a request cache-first.
  ///
  /// 1. Non-GET requests, and any request while no generation serves, go to the network
  /// 2. Cache hit in the serving generation: return it without a network call
  /// 3. Miss: fetch, return it, and write a copy of any 2xx response through
  ///    when this version's own generation is the one serving
  pub async fn fetch(&self, request: AssetRequest) -> Result<Served> {
    let serving = match self.serving()? {
      Some(generation) if request.is_cacheable() => generation,
      _ => {
        debug!(method = %request.method, url = %request.url, "bypassing asset cache");
        let response = self.network.fetch(&request).await?;
        return Ok(Served::from_network(response));
      }
    };

    if let Some(cached) = self.storage.match_request(&serving, &request)? {
      debug!(url = %request.url, generation = %serving, "asset cache hit");
      return Ok(Served::from_cache(cached));
    }

    debug!(url = %request.url, generation = %serving, "asset cache miss");
    let response = self.network.fetch(&request).await?;

    if response.is_success() && serving.as_str() == &*self.version {
      match self.storage.put(&self.version, &request, &response) {
        Ok(true) => debug!(url = %request.url, "cached network response"),
        Ok(false) => debug!(url = %request.url, "generation retired, response not cached"),
        // The caller still gets the live response
        Err(e) => warn!(url = %request.url, error = %e, "failed to cache network response"),
      }
    }

    Ok(Served::from_network(response))
  }

  pub fn generations(&self) -> Result<Vec<GenerationInfo>> {
    self.storage.generations()
  }

  pub fn entries(&self, generation: &str) -> Result<Vec<EntrySummary>> {
    self.storage.entries(generation)
  }
}

impl<S: CacheStorage, N: Network> Clone for AssetCache<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      version: Arc::clone(&self.version),
      manifest: Arc::clone(&self.manifest),
      lifecycle: Arc::clone(&self.lifecycle),
      serving: Arc::clone(&self.serving),
    }
  }
}

#[async_trait]
impl<S: CacheStorage, N: Network> Dispatch for AssetCache<S, N> {
  async fn dispatch(&self, request: AssetRequest) -> Result<Served> {
    self.fetch(request).await
  }
}
