//! HTTP transport and the pass-through dispatch strategy.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

use super::traits::{AssetRequest, CapturedResponse, Dispatch, Network, Served};

/// Network transport backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
      env!("CARGO_PKG_NAME"),
      "/",
      env!("CARGO_PKG_VERSION")
    ));
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| Error::HttpClient(e.to_string()))?;

    Ok(Self { client })
  }

  /// Wrap an already configured client.
  pub fn from_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &AssetRequest) -> Result<CapturedResponse> {
    let failed = |e: reqwest::Error| Error::Network {
      url: request.url.to_string(),
      reason: e.to_string(),
    };

    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(failed)?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();
    let body = response.bytes().await.map_err(failed)?.to_vec();

    debug!(url = %request.url, status, bytes = body.len(), "network fetch complete");

    Ok(CapturedResponse {
      status,
      headers,
      body,
    })
  }
}

/// Dispatch strategy that always goes to the network and never caches.
pub struct NetworkOnly<N: Network> {
  network: N,
}

impl<N: Network> NetworkOnly<N> {
  pub fn new(network: N) -> Self {
    Self { network }
  }
}

#[async_trait]
impl<N: Network> Dispatch for NetworkOnly<N> {
  async fn dispatch(&self, request: AssetRequest) -> Result<Served> {
    let response = self.network.fetch(&request).await?;
    Ok(Served::from_network(response))
  }
}
