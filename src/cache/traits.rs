//! Core traits and types for the asset cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::Result;

/// Identity of an outgoing request: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
  pub method: Method,
  pub url: Url,
}

impl AssetRequest {
  /// Build a request. The URL fragment never reaches the server, so it is
  /// dropped and does not split cache entries.
  pub fn new(method: Method, mut url: Url) -> Self {
    url.set_fragment(None);
    Self { method, url }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Only `GET` responses are ever stored.
  pub fn is_cacheable(&self) -> bool {
    self.method == Method::GET
  }

  /// Stable, fixed-length key for storage lookups.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response captured in full so it can be stored and replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
  pub status: u16,
  /// Header name/value pairs in the order received
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl CapturedResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// 2xx status
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name, case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A response read back from a cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: CapturedResponse,
  pub generation: String,
  pub cached_at: DateTime<Utc>,
}

/// Result of dispatching a request, including where the response came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: CapturedResponse,
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: CapturedResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live response from the network
  Network,
  /// Replayed from the active cache generation
  Cache,
}

/// Transport that performs the actual network round trip.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &AssetRequest) -> Result<CapturedResponse>;
}

/// Entry point the application's networking layer calls for every request.
///
/// Implementations decide how cache and network are combined.
#[async_trait]
pub trait Dispatch: Send + Sync {
  async fn dispatch(&self, request: AssetRequest) -> Result<Served>;
}
