//! services/api/src/adapters/http_fetch.rs
//!
//! Downloads lesson documents over HTTP(S) for thumbnail rendering. Only the
//! service's own `/files/` URLs are fetched, and bodies are capped.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use course_catalog_core::ports::{DocumentFetcher, PortError, PortResult};
use reqwest::{redirect, Url};
use std::time::Duration;
use tracing::warn;

use crate::adapters::blob_fs::FILES_ROUTE;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpDocumentFetcher {
    client: reqwest::Client,
    /// `{public base}/files/`; every fetched URL must sit under it.
    allowed: Url,
    max_bytes: u64,
}

impl HttpDocumentFetcher {
    /// A fetcher for blobs served under `public_base_url`, refusing bodies
    /// larger than `max_bytes`.
    pub fn new(public_base_url: &str, max_bytes: u64) -> PortResult<Self> {
        let allowed = Url::parse(&format!(
            "{}/{}/",
            public_base_url.trim_end_matches('/'),
            FILES_ROUTE
        ))
        .map_err(|e| PortError::Unexpected(format!("invalid public base URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            client,
            allowed,
            max_bytes,
        })
    }

    /// Parses `url` and checks it points at a served blob.
    fn check_allowed(&self, url: &str) -> PortResult<Url> {
        let parsed = Url::parse(url)
            .map_err(|e| PortError::Rejected(format!("invalid document URL {}: {}", url, e)))?;
        let same_origin = parsed.scheme() == self.allowed.scheme()
            && parsed.host() == self.allowed.host()
            && parsed.port_or_known_default() == self.allowed.port_or_known_default();
        let plain = parsed.username().is_empty() && parsed.password().is_none();
        if !same_origin || !plain || !parsed.path().starts_with(self.allowed.path()) {
            warn!("Refusing to fetch {} for a thumbnail", url);
            return Err(PortError::Rejected(format!(
                "{} is not a lesson file URL",
                url
            )));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &str) -> PortResult<Bytes> {
        let target = self.check_allowed(url)?;
        let mut response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PortError::NotFound(url.to_string()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PortError::Unauthorized);
        }
        if !status.is_success() {
            return Err(PortError::Unexpected(format!("{} answered {}", url, status)));
        }

        let too_large = || {
            PortError::Rejected(format!("{} exceeds the {} byte limit", url, self.max_bytes))
        };
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(too_large());
        }
        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}
