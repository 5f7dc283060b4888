//! Lecture de plages d'octets chez l'amont
//!
//! Les préchargeurs passent par le trait [`RangeFetcher`] ; l'implémentation
//! par défaut est [`HttpRangeFetcher`] (reqwest, en-tête `Range`).

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::Client;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::keys::ByteRange;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Source des octets préchargés
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Lit la plage demandée de `uri`
    async fn fetch(&self, uri: &str, range: ByteRange) -> Result<Bytes>;

    /// Lit la ressource entière (manifestes, segments)
    async fn fetch_all(&self, uri: &str) -> Result<Bytes> {
        self.fetch(uri, ByteRange::whole()).await
    }
}

/// Client HTTP de plages d'octets
#[derive(Debug, Clone)]
pub struct HttpRangeFetcher {
    client: Client,
}

impl HttpRangeFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }

    /// Réutilise un client existant (pool de connexions partagé)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn http_client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeFetcher {
    async fn fetch(&self, uri: &str, range: ByteRange) -> Result<Bytes> {
        let mut request = self.client.get(uri);
        if let Some(value) = range.header_value() {
            request = request.header(RANGE, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::HttpStatus {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        // 200 sur une requête partielle : le serveur ignore Range, on découpe nous-mêmes
        let partial = status == reqwest::StatusCode::PARTIAL_CONTENT;
        let body = response.bytes().await?;
        if partial || range.header_value().is_none() {
            return Ok(body);
        }

        let start = usize::try_from(range.offset).unwrap_or(usize::MAX).min(body.len());
        let end = match range.end() {
            Some(end) => usize::try_from(end).unwrap_or(usize::MAX).min(body.len()),
            None => body.len(),
        };
        Ok(body.slice(start..end))
    }
}
