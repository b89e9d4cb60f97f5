//! Authenticated HTTP client shared by the Server and Cloud APIs.
//!
//! Every request goes through [`RestClient::send`], which owns the response
//! policy for the whole crate:
//!
//! - `429` sleeps for the configured backoff and replays the request. Callers
//!   never see it.
//! - `401` and `403` abort the run.
//! - Anything else is handed back to the caller to classify.

use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use crate::error::{MigrationError, Result};
use crate::types::Platform;

/// One page of a Server list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub values: Vec<T>,

    /// Offset of the next page; absent on the last page.
    #[serde(default)]
    pub next_page_start: Option<u64>,

    #[serde(default)]
    pub is_last_page: Option<bool>,
}

impl<T> Page<T> {
    /// Start offset for the following request, `None` once the listing is exhausted.
    pub fn next_start(&self) -> Option<u64> {
        if self.is_last_page == Some(true) {
            return None;
        }
        self.next_page_start
    }
}

/// Basic-auth client with rate-limit and auth-failure handling.
pub struct RestClient {
    client: Client,
    platform: Platform,
    username: String,
    password: String,
    rate_limit_backoff: Duration,
}

impl RestClient {
    /// Create a new client for `platform`.
    pub fn new(
        platform: Platform,
        username: impl Into<String>,
        password: impl Into<String>,
        rate_limit_backoff: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent("groupmirror")
            .timeout(request_timeout)
            .build()
            .map_err(|e| MigrationError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            platform,
            username: username.into(),
            password: password.into(),
            rate_limit_backoff,
        })
    }

    /// Send a request, retrying transparently while the server answers `429`.
    ///
    /// `build` is called once per attempt so the body can be replayed.
    pub async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        loop {
            let response = build(&self.client)
                .basic_auth(&self.username, Some(&self.password))
                .send()
                .await
                .map_err(|e| MigrationError::NetworkError(e.to_string()))?;

            let status = response.status();
            debug!(system = %self.platform, url = %response.url(), %status, "Response");

            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    warn!(
                        system = %self.platform,
                        backoff_secs = self.rate_limit_backoff.as_secs_f64(),
                        "Rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(self.rate_limit_backoff).await;
                }
                StatusCode::UNAUTHORIZED => {
                    return Err(MigrationError::AuthenticationFailed {
                        platform: self.platform,
                        message: format!(
                            "credentials rejected for {}; check username and password",
                            response.url()
                        ),
                    });
                }
                StatusCode::FORBIDDEN => {
                    return Err(MigrationError::Forbidden {
                        platform: self.platform,
                        message: format!(
                            "{} requires admin scope or an allow-listed address",
                            response.url()
                        ),
                    });
                }
                _ => return Ok(response),
            }
        }
    }

    /// GET `url` and decode a JSON body. Any non-2xx status is an error.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.send(|c| c.get(url).query(query)).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MigrationError::ApiError(format!(
                "{} API error ({status}) for {url}: {body}",
                self.platform
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MigrationError::ApiError(e.to_string()))
    }

    /// Fetch a single page starting at offset `start`.
    pub async fn fetch_page<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        start: u64,
        limit: u32,
    ) -> Result<Page<T>> {
        let mut params = query.to_vec();
        params.push(("start", start.to_string()));
        params.push(("limit", limit.to_string()));
        self.get_json(url, &params).await
    }

    /// Lazily walk every page of `url`, yielding one item at a time.
    ///
    /// The next page is only requested once the previous one has been
    /// consumed. The stream ends when a page carries no `nextPageStart`.
    pub fn paginate<'a, T>(
        &'a self,
        url: String,
        query: Vec<(&'static str, String)>,
        limit: u32,
    ) -> BoxStream<'a, Result<T>>
    where
        T: DeserializeOwned + Send + 'a,
    {
        stream::try_unfold(Some(0u64), move |cursor| {
            let url = url.clone();
            let query = query.clone();
            async move {
                let Some(start) = cursor else {
                    return Ok(None);
                };
                let page: Page<T> = self.fetch_page(&url, &query, start, limit).await?;
                let next = page.next_start();
                Ok::<_, MigrationError>(Some((page.values, next)))
            }
        })
        .map_ok(|values| stream::iter(values.into_iter().map(Ok::<T, MigrationError>)))
        .try_flatten()
        .boxed()
    }
}
