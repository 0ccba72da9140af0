use axum::Extension;
use axum::extract::{ConnectInfo, FromRequestParts, MatchedPath};
use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Uri};
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::server::error::Error;
use crate::server::services::ProxyServices;
use crate::server::services::url_services::API_PASSWORD_PARAM;
use crate::server::utils::proxy_url_utils::DecodedProxyUrl;

/// route segment that captures `_token_<t>`
pub const TOKEN_ROUTE_SEGMENT: &str = "/{token}";
/// route segment that captures the preserved filename
pub const FILENAME_ROUTE_SEGMENT: &str = "/{filename}";

#[derive(Debug, Clone)]
pub struct ForwardedRequest {
    pub decoded: DecodedProxyUrl,
    pub client_ip: Option<String>,
    /// scheme and host this proxy was reached on, follow-up urls point here
    pub proxy_origin: String,
}

/// a decoded and authorized proxy request plus the services to serve it
pub struct Forwarded(pub ForwardedRequest, pub ProxyServices);

/// client address for token ip binding, forwarding headers only count when the
/// socket peer is a trusted proxy
pub fn client_ip(parts: &Parts, config: &AppConfig) -> Option<String> {
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())?;

    if !config.trusts_proxy(peer) {
        return Some(peer.to_string());
    }

    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| Some(peer.to_string()))
}

/// `/{token}/proxy/stream/{filename}` -> `proxy/stream`
pub fn endpoint_from_route(route: &str) -> &str {
    let route = route.strip_prefix(TOKEN_ROUTE_SEGMENT).unwrap_or(route);
    let route = route.strip_suffix(FILENAME_ROUTE_SEGMENT).unwrap_or(route);
    route.trim_matches('/')
}

pub fn proxy_origin(headers: &HeaderMap, uri: &Uri) -> Result<String, Error> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
    };

    let scheme = header("x-forwarded-proto")
        .or_else(|| uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string());

    let host = header("x-forwarded-host")
        .or_else(|| header(HOST.as_str()))
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .ok_or_else(|| Error::BadRequest("missing host header".to_string()))?;

    Ok(format!("{}://{}", scheme, host))
}

fn verify_api_password(
    expected: Option<&str>,
    decoded: &DecodedProxyUrl,
    headers: &HeaderMap,
) -> Result<(), Error> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let from_url = decoded.spec.query_params.get(API_PASSWORD_PARAM).map(String::as_str);
    let from_header = headers.get(API_PASSWORD_PARAM).and_then(|h| h.to_str().ok());

    if from_url == Some(expected) || from_header == Some(expected) {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

impl<S> FromRequestParts<S> for Forwarded
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(services): Extension<ProxyServices> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|err| Error::InternalServerErrorWithContext(err.to_string()))?;

        let route = parts
            .extensions
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_string())
            .ok_or_else(|| {
                Error::InternalServerErrorWithContext("proxy route has no matched path".to_string())
            })?;

        let client_ip = client_ip(parts, &services.config);
        let decoded = services.codec.decode(
            endpoint_from_route(&route),
            parts.uri.path(),
            parts.uri.query(),
            client_ip.as_deref(),
        )?;

        if let Err(err) = verify_api_password(
            services.config.api_password.as_deref(),
            &decoded,
            &parts.headers,
        ) {
            warn!("rejected proxy request from {:?}: bad api password", client_ip);
            return Err(err);
        }

        let proxy_origin = proxy_origin(&parts.headers, &parts.uri)?;
        debug!(
            "proxy request from {:?} via {} for {}",
            client_ip, proxy_origin, decoded.spec.destination
        );

        Ok(Forwarded(
            ForwardedRequest {
                decoded,
                client_ip,
                proxy_origin,
            },
            services,
        ))
    }
}
