use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::{Position, Url, form_urlencoded};

use super::crypto_utils::{AccessWindow, EncryptionHandler, TokenError, TokenPayload};

pub const TOKEN_PREFIX: &str = "_token_";
pub const DESTINATION_KEY: &str = "d";
pub const REQUEST_HEADER_PREFIX: &str = "h_";
pub const RESPONSE_HEADER_PREFIX: &str = "r_";

/// path used by the stremio convention when the destination has none
const STREMIO_DEFAULT_PATH: &str = "stream";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyUrlError {
    #[error("invalid url: {0}")]
    Validation(String),

    #[error("encryption requested but no secret is configured")]
    Configuration,

    #[error("malformed proxy url: {0}")]
    MalformedProxyUrl(String),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// everything needed to mint one proxy url
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingSpec {
    pub destination: String,
    /// sent upstream with the proxied request
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    /// override headers on the response sent back to the client
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default)]
    pub filename: Option<String>,
    /// token lifetime in seconds, only used in token mode
    #[serde(default)]
    pub expiration: Option<u64>,
    /// address the token is bound to, only used in token mode
    #[serde(default)]
    pub ip: Option<String>,
}

impl ForwardingSpec {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Default::default()
        }
    }

    pub fn with_request_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_response_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.response_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_expiration(mut self, seconds: u64) -> Self {
        self.expiration = Some(seconds);
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// flattened `d` / `h_*` / `r_*` / extras pairs, destination first
    pub fn payload_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(
            1 + self.request_headers.len() + self.response_headers.len() + self.query_params.len(),
        );

        pairs.push((DESTINATION_KEY.to_string(), self.destination.clone()));

        for (name, value) in &self.request_headers {
            pairs.push((prefixed(REQUEST_HEADER_PREFIX, name), value.clone()));
        }

        for (name, value) in &self.response_headers {
            pairs.push((prefixed(RESPONSE_HEADER_PREFIX, name), value.clone()));
        }

        for (name, value) in &self.query_params {
            if pairs.iter().any(|(key, _)| key == name) {
                continue;
            }
            pairs.push((name.clone(), value.clone()));
        }

        pairs
    }

    pub fn to_payload(&self) -> TokenPayload {
        self.payload_pairs().into_iter().collect()
    }

    /// inverse of `payload_pairs`, filename and access window are not part of it
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ProxyUrlError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut destination = None;
        let mut spec = Self::default();

        for (key, value) in pairs {
            if key == DESTINATION_KEY {
                destination = Some(value);
            } else if let Some(name) = key.strip_prefix(REQUEST_HEADER_PREFIX) {
                spec.request_headers.insert(name.to_string(), value);
            } else if let Some(name) = key.strip_prefix(RESPONSE_HEADER_PREFIX) {
                spec.response_headers.insert(name.to_string(), value);
            } else {
                spec.query_params.insert(key, value);
            }
        }

        spec.destination = destination.ok_or_else(|| {
            ProxyUrlError::MalformedProxyUrl("missing destination parameter `d`".to_string())
        })?;
        parse_http_url(&spec.destination, "destination")?;

        Ok(spec)
    }
}

fn prefixed(prefix: &str, name: &str) -> String {
    if name.starts_with(prefix) {
        name.to_string()
    } else {
        format!("{}{}", prefix, name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UrlMode {
    /// forwarding data visible in the query string
    #[default]
    Query,
    /// forwarding data sealed in a `_token_` path segment
    Token,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedProxyUrl {
    pub spec: ForwardingSpec,
    /// present when the url carried a token
    pub access: Option<AccessWindow>,
}

impl DecodedProxyUrl {
    pub fn is_token(&self) -> bool {
        self.access.is_some()
    }
}

/// builds and parses mediaflow style proxy urls
#[derive(Debug, Clone, Default)]
pub struct ProxyUrlCodec {
    cipher: Option<Arc<EncryptionHandler>>,
}

impl ProxyUrlCodec {
    pub fn new(cipher: Option<Arc<EncryptionHandler>>) -> Self {
        Self { cipher }
    }

    pub fn has_cipher(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn encode(
        &self,
        origin: &str,
        endpoint: &str,
        spec: &ForwardingSpec,
        mode: UrlMode,
    ) -> Result<String, ProxyUrlError> {
        let origin = parse_http_url(origin, "proxy origin")?;
        parse_http_url(&spec.destination, "destination")?;

        let host_part = &origin[..Position::BeforePath];
        let origin_path = origin.path().trim_end_matches('/');

        let endpoint = endpoint.trim_matches('/');
        let endpoint_part = if endpoint.is_empty() {
            String::new()
        } else {
            format!("/{}", endpoint)
        };

        let filename_part = spec
            .filename
            .as_deref()
            .map(|name| format!("/{}", urlencoding::encode(name)))
            .unwrap_or_default();

        match mode {
            UrlMode::Query => {
                let mut query = form_urlencoded::Serializer::new(String::new());
                for (key, value) in spec.payload_pairs() {
                    query.append_pair(&key, &value);
                }

                Ok(format!(
                    "{}{}{}{}?{}",
                    host_part,
                    origin_path,
                    endpoint_part,
                    filename_part,
                    query.finish()
                ))
            }
            UrlMode::Token => {
                let cipher = self.cipher.as_deref().ok_or(ProxyUrlError::Configuration)?;
                let token = cipher.encrypt(&spec.to_payload(), spec.expiration, spec.ip.as_deref());

                Ok(format!(
                    "{}/{}{}{}{}{}",
                    host_part, TOKEN_PREFIX, token, origin_path, endpoint_part, filename_part
                ))
            }
        }
    }

    /// recover the forwarding instructions from an inbound path and query
    ///
    /// `endpoint` is the route the request was matched on; anything after it
    /// is the preserved filename.
    pub fn decode(
        &self,
        endpoint: &str,
        path: &str,
        query: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<DecodedProxyUrl, ProxyUrlError> {
        let (token, rest) = split_token(path)?;
        let filename = match_endpoint(endpoint, rest)?;

        let query_pairs: Vec<(String, String)> = query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        let (mut spec, access) = match token {
            Some(token) => {
                let cipher = self.cipher.as_deref().ok_or(ProxyUrlError::Configuration)?;
                let opened = cipher.open(token, client_ip)?;

                let mut payload = opened.payload;
                for (key, value) in query_pairs {
                    payload.entry(key).or_insert(value);
                }

                (ForwardingSpec::from_pairs(payload)?, Some(opened.access))
            }
            None => (ForwardingSpec::from_pairs(query_pairs)?, None),
        };

        spec.filename = filename;
        debug!(
            "decoded proxy url for {} (token: {})",
            spec.destination,
            access.is_some()
        );

        Ok(DecodedProxyUrl { spec, access })
    }
}

/// splits `/_token_<t>/rest` into the token and the remaining path
fn split_token(path: &str) -> Result<(Option<&str>, &str), ProxyUrlError> {
    let Some(after) = path
        .strip_prefix('/')
        .and_then(|p| p.strip_prefix(TOKEN_PREFIX))
    else {
        return Ok((None, path));
    };

    let (token, rest) = match after.find('/') {
        Some(idx) => after.split_at(idx),
        None => (after, ""),
    };

    if token.is_empty() {
        return Err(ProxyUrlError::MalformedProxyUrl("empty token segment".to_string()));
    }

    Ok((Some(token), rest))
}

fn match_endpoint(endpoint: &str, rest: &str) -> Result<Option<String>, ProxyUrlError> {
    let endpoint = endpoint.trim_matches('/');
    let expected = if endpoint.is_empty() {
        String::new()
    } else {
        format!("/{}", endpoint)
    };

    let remainder = rest.strip_prefix(expected.as_str()).ok_or_else(|| {
        ProxyUrlError::MalformedProxyUrl(format!("path `{}` does not match `{}`", rest, expected))
    })?;

    let filename = match remainder {
        "" | "/" => return Ok(None),
        other => other.strip_prefix('/').ok_or_else(|| {
            ProxyUrlError::MalformedProxyUrl(format!(
                "path `{}` does not match `{}`",
                rest, expected
            ))
        })?,
    };

    if filename.contains('/') {
        return Err(ProxyUrlError::MalformedProxyUrl(format!(
            "unexpected path segments after `{}`",
            expected
        )));
    }

    urlencoding::decode(filename)
        .map(|name| Some(name.into_owned()))
        .map_err(|e| ProxyUrlError::MalformedProxyUrl(format!("invalid filename encoding: {}", e)))
}

/// absolute http(s) url with a host
pub fn parse_http_url(raw: &str, what: &str) -> Result<Url, ProxyUrlError> {
    let url = Url::parse(raw)
        .map_err(|e| ProxyUrlError::Validation(format!("{} `{}`: {}", what, raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyUrlError::Validation(format!(
            "{} `{}` must use http or https",
            what, raw
        )));
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProxyUrlError::Validation(format!("{} `{}` has no host", what, raw)));
    }

    Ok(url)
}

/// proxy url in the stremio local server convention
///
/// `<origin>/proxy/d=<dest origin>&h=Name:Value&r=Name:Value/<dest path>?<dest query>`
pub fn encode_stremio_proxy_url(
    origin: &str,
    destination: &str,
    request_headers: &BTreeMap<String, String>,
    response_headers: &BTreeMap<String, String>,
) -> Result<String, ProxyUrlError> {
    let origin = parse_http_url(origin, "proxy origin")?;
    let destination = parse_http_url(destination, "destination")?;

    let mut block = form_urlencoded::Serializer::new(String::new());
    block.append_pair("d", &destination[..Position::BeforePath]);
    for (name, value) in request_headers {
        block.append_pair("h", &format!("{}:{}", name, value));
    }
    for (name, value) in response_headers {
        block.append_pair("r", &format!("{}:{}", name, value));
    }

    let destination_path = match destination.path().trim_start_matches('/') {
        "" => STREMIO_DEFAULT_PATH,
        path => path,
    };

    let mut url = format!(
        "{}{}/proxy/{}/{}",
        &origin[..Position::BeforePath],
        origin.path().trim_end_matches('/'),
        block.finish(),
        destination_path
    );

    // the player reads the destination query straight off the proxy url
    if let Some(query) = destination.query() {
        url.push('?');
        url.push_str(query);
    }

    Ok(url)
}
