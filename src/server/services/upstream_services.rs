use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use mockall::automock;
use tracing::{debug, error};

use crate::server::error::{AppResult, Error};

pub type DynUpstreamService = Arc<dyn UpstreamServiceTrait + Send + Sync>;

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// url after redirects, relative playlist references resolve against this
    pub final_url: String,
    pub body: Body,
}

#[automock]
#[async_trait]
pub trait UpstreamServiceTrait {
    /// GET `url` with exactly `headers`, the body is streamed and not buffered
    async fn fetch(&self, url: String, headers: HeaderMap) -> AppResult<UpstreamResponse>;
}

pub struct UpstreamService {
    http: reqwest::Client,
}

impl UpstreamService {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { http }
    }
}

#[async_trait]
impl UpstreamServiceTrait for UpstreamService {
    async fn fetch(&self, url: String, headers: HeaderMap) -> AppResult<UpstreamResponse> {
        debug!("fetching upstream {}", url);

        let response = self.http.get(&url).headers(headers).send().await.map_err(|e| {
            error!("upstream request to {} failed: {}", url, e);
            Error::BadGateway(e.to_string())
        })?;

        debug!("upstream {} answered {}", url, response.status());

        Ok(UpstreamResponse {
            status: response.status(),
            headers: response.headers().clone(),
            final_url: response.url().to_string(),
            body: Body::from_stream(response.bytes_stream()),
        })
    }
}
