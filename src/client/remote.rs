use super::protocol::*;
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult, ErrorBody};
use crate::membership::types::NodeInfo;
use crate::search::types::{SearchCriteria, SearchQuery};
use crate::tweets::types::{RetweetBody, Tweet};

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Invoked once when a peer stays unreachable after every retry.
pub type CleanupCallback = Arc<dyn Fn() + Send + Sync>;

/// Typed HTTP client bound to one peer address.
///
/// The underlying `reqwest::Client` is built on first use. Transient failures
/// (connection errors, timeouts, 502/503/504) are retried with exponential backoff;
/// once attempts run out the call fails with `BadGateway` and the cleanup callback fires.
pub struct RemoteClient {
    base_url: String,
    config: ClientConfig,
    http: OnceCell<reqwest::Client>,
    on_unreachable: Option<CleanupCallback>,
}

impl RemoteClient {
    pub fn new(address: &str, config: ClientConfig) -> Self {
        Self {
            base_url: normalize_address(address),
            config,
            http: OnceCell::new(),
            on_unreachable: None,
        }
    }

    pub fn with_cleanup(mut self, callback: CleanupCallback) -> Self {
        self.on_unreachable = Some(callback);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn session(&self) -> ApiResult<&reqwest::Client> {
        self.http
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .connect_timeout(self.config.timeout)
                    .build()
                    .map_err(|e| ApiError::ServerError(format!("HTTP client setup failed: {}", e)))
            })
            .await
    }

    /// Registers `me` with the peer and returns the peer's membership snapshot
    /// (the peer itself included).
    pub async fn register(&self, me: &NodeInfo, force_update: bool) -> ApiResult<Vec<NodeInfo>> {
        let url = self.url(ENDPOINT_REGISTRY);
        let force = if force_update { "true" } else { "false" };
        let response = self
            .send_with_retry(|http| http.post(url.clone()).query(&[("force", force)]).json(me))
            .await?;
        decode(response).await
    }

    pub async fn unregister(&self, name: &str) -> ApiResult<()> {
        let url = self.url(&registry_entry(name));
        let response = self.send_with_retry(|http| http.delete(url.clone())).await?;
        check(response).await.map(|_| ())
    }

    /// Fetches one tweet from the peer, already resolved on the peer's side.
    pub async fn get_tweet(&self, id: u64) -> ApiResult<Tweet> {
        self.fetch_tweet(id, &[]).await
    }

    /// Fetches one tweet as the peer stores it; a retweet comes back with empty content.
    pub async fn get_stored_tweet(&self, id: u64) -> ApiResult<Tweet> {
        self.fetch_tweet(id, &[("resolve", "false".to_string())]).await
    }

    /// Fetches one tweet resolved by the peer, which may follow at most `depth` references.
    pub async fn get_tweet_within(&self, id: u64, depth: usize) -> ApiResult<Tweet> {
        self.fetch_tweet(id, &[("depth", depth.to_string())]).await
    }

    async fn fetch_tweet(&self, id: u64, query: &[(&str, String)]) -> ApiResult<Tweet> {
        let url = self.url(&tweet_entry(id));
        let response = self
            .send_with_retry(|http| http.get(url.clone()).query(query))
            .await?;
        decode(response).await
    }

    /// Runs the peer's local search. The peer is never asked to fan out again.
    pub async fn search(&self, criteria: &SearchCriteria) -> ApiResult<Vec<Tweet>> {
        let url = self.url(ENDPOINT_SEARCH_LOCAL);
        let query = SearchQuery::for_peer(criteria);
        let response = self
            .send_with_retry(|http| http.get(url.clone()).query(&query))
            .await?;
        decode(response).await
    }

    /// Asks the peer to create a retweet of `origin_node#origin_id`.
    pub async fn create_retweet(&self, origin_node: &str, origin_id: u64) -> ApiResult<Tweet> {
        let url = self.url(ENDPOINT_RETWEET);
        let body = RetweetBody {
            server: origin_node.to_string(),
            id: origin_id,
        };
        let response = self
            .send_with_retry(|http| http.post(url.clone()).json(&body))
            .await?;
        decode(response).await
    }

    async fn send_with_retry<F>(&self, build: F) -> ApiResult<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let http = self.session().await?;
        let attempts = self.config.attempts.max(1);
        let mut delay = self.config.initial_backoff;

        for attempt in 0..attempts {
            match build(http).timeout(self.config.timeout).send().await {
                Ok(resp) if is_transient(resp.status()) => {
                    tracing::debug!(
                        "{} answered {} (attempt {}/{})",
                        self.base_url,
                        resp.status(),
                        attempt + 1,
                        attempts
                    );
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    tracing::debug!(
                        "{} failed: {} (attempt {}/{})",
                        self.base_url,
                        e,
                        attempt + 1,
                        attempts
                    );
                }
            }

            if attempt + 1 < attempts {
                // Simple jitter to prevent thundering herd
                let jitter = std::time::Duration::from_millis(rand::random::<u64>() % 50);
                tokio::time::sleep(delay + jitter).await;
                delay = (delay * 2).min(self.config.max_backoff);
            }
        }

        tracing::warn!("Peer {} unreachable after {} attempts", self.base_url, attempts);
        if let Some(cleanup) = &self.on_unreachable {
            cleanup();
        }
        Err(ApiError::unreachable())
    }
}

fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Peers may be registered as `host:port`; plain HTTP is assumed then.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Turns a non-success status into the matching taxonomy error, keeping the
/// peer's message when it sent one.
async fn check(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("Unexpected response")
                .to_string()
        });
    Err(ApiError::from_status(status, message))
}

async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let response = check(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::BadGateway(format!("Malformed response from peer: {}", e)))
}
