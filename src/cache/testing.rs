//! In-process network double for cache tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::traits::{AssetRequest, CapturedResponse, Network};

/// Serves canned responses by URL and counts every call.
///
/// Clones share state, so a test can keep one handle while the cache owns another.
#[derive(Clone, Default)]
pub struct FakeNetwork {
  responses: Arc<Mutex<HashMap<String, CapturedResponse>>>,
  calls: Arc<AtomicUsize>,
  offline: Arc<AtomicBool>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn serve(&self, url: &str, response: CapturedResponse) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &AssetRequest) -> Result<CapturedResponse> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    tokio::task::yield_now().await;

    if self.offline.load(Ordering::SeqCst) {
      return Err(Error::Network {
        url: request.url.to_string(),
        reason: "offline".to_string(),
      });
    }

    let served = self.responses.lock().unwrap().get(request.url.as_str()).cloned();
    Ok(served.unwrap_or_else(|| CapturedResponse::new(404, "not found")))
  }
}
