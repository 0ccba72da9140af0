use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// ten years, the upper bound for `expiration` on every generate surface
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 315_360_000;

/// one url to generate, also the item shape of the cli's json file
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct UrlItem {
    pub endpoint: Option<String>,
    #[validate(url)]
    pub destination_url: String,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateUrlRequest {
    #[validate(url)]
    pub mediaflow_proxy_url: String,
    #[serde(flatten)]
    #[validate(nested)]
    pub item: UrlItem,
    #[validate(range(min = 1, max = 315_360_000))]
    pub expiration: Option<u64>,
    pub ip: Option<IpAddr>,
    pub api_password: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateMultiUrlRequest {
    #[validate(url)]
    pub mediaflow_proxy_url: String,
    #[validate(range(min = 1, max = 315_360_000))]
    pub expiration: Option<u64>,
    pub ip: Option<IpAddr>,
    pub api_password: Option<String>,
    #[validate(nested)]
    pub urls: Vec<UrlItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateUrlResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateMultiUrlResponse {
    pub urls: Vec<String>,
}

// kept for clients of the old endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct EncodedUrlResponse {
    pub encoded_url: String,
}
