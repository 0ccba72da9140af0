use std::io::Read;

use axum::{
    Router,
    handler::Handler,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use flate2::read::GzDecoder;
use tracing::{debug, error, warn};
use url::Url;

use crate::server::{
    error::{AppResult, Error},
    extractors::{FILENAME_ROUTE_SEGMENT, Forwarded, TOKEN_ROUTE_SEGMENT},
    utils::{
        m3u8_utils::{
            KEY_ENDPOINT, M3u8Processor, MANIFEST_ENDPOINT, ManifestContent, ProxyLineRewriter,
            RewriteContext, SEGMENT_ENDPOINT, STREAM_ENDPOINT,
        },
        proxy_url_utils::ForwardingSpec,
    },
};

/// playlists larger than this are refused instead of buffered
const MAX_MANIFEST_BYTES: usize = 32 * 1024 * 1024;

/// client headers that always reach upstream for byte-range playback
const PASSTHROUGH_REQUEST_HEADERS: [HeaderName; 2] = [header::RANGE, header::IF_RANGE];

/// upstream headers copied onto streamed responses
const PASSTHROUGH_RESPONSE_HEADERS: [HeaderName; 9] = [
    header::ACCEPT_RANGES,
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::CONTENT_ENCODING,
    header::LAST_MODIFIED,
    header::ETAG,
    header::CACHE_CONTROL,
    header::EXPIRES,
];

pub struct ProxyController;

impl ProxyController {
    pub fn app() -> Router {
        let router = Self::proxy_routes(Router::new(), MANIFEST_ENDPOINT, Self::hls_manifest);

        [SEGMENT_ENDPOINT, KEY_ENDPOINT, STREAM_ENDPOINT]
            .into_iter()
            .fold(router, |router, endpoint| {
                Self::proxy_routes(router, endpoint, Self::proxy_stream)
            })
    }

    /// plain, filename, token and token+filename shapes of one endpoint
    fn proxy_routes<H, T>(router: Router, endpoint: &str, handler: H) -> Router
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let base = format!("/{}", endpoint);
        let paths = [
            base.clone(),
            format!("{}{}", base, FILENAME_ROUTE_SEGMENT),
            format!("{}{}", TOKEN_ROUTE_SEGMENT, base),
            format!("{}{}{}", TOKEN_ROUTE_SEGMENT, base, FILENAME_ROUTE_SEGMENT),
        ];

        paths.iter().fold(router, |router, path| {
            router.route(path, get(handler.clone()).options(Self::proxy_options))
        })
    }

    async fn proxy_options() -> impl IntoResponse {
        StatusCode::NO_CONTENT
    }

    async fn hls_manifest(
        Forwarded(request, services): Forwarded,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        let spec = &request.decoded.spec;
        let upstream_headers = Self::upstream_headers(spec, &headers, false)?;

        let upstream = services
            .upstream
            .fetch(spec.destination.clone(), upstream_headers)
            .await?;

        if !upstream.status.is_success() {
            error!(
                "manifest fetch for {} returned {}",
                spec.destination, upstream.status
            );
            return Err(Error::BadGateway(format!(
                "upstream returned {}",
                upstream.status
            )));
        }

        let content_encoding = upstream
            .headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());

        let bytes = axum::body::to_bytes(upstream.body, MAX_MANIFEST_BYTES)
            .await
            .map_err(|e| {
                error!("failed to read manifest body: {}", e);
                Error::BadGateway("failed to read manifest body".to_string())
            })?;

        let decompressed = Self::decompress(&bytes, content_encoding.as_deref())?;
        let text = String::from_utf8(decompressed).map_err(|e| {
            error!("manifest from {} is not utf-8: {}", spec.destination, e);
            Error::BadGateway("manifest is not valid utf-8".to_string())
        })?;

        // relative references resolve against where the playlist really came from
        let base_url = Url::parse(&upstream.final_url)
            .or_else(|_| Url::parse(&spec.destination))
            .map_err(|e| Error::BadRequest(format!("invalid destination: {}", e)))?;

        let context = RewriteContext::from_decoded(request.proxy_origin.clone(), &request.decoded);
        let processor = M3u8Processor::new(ProxyLineRewriter::new(&services.codec, context));
        let rewritten = processor.process(ManifestContent::text(&text), &base_url)?;

        if !rewritten.warnings.is_empty() {
            warn!(
                "manifest {} rewritten with {} skipped lines",
                spec.destination,
                rewritten.warnings.len()
            );
        }

        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/vnd.apple.mpegurl"),
        );
        response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Self::apply_response_overrides(&mut response_headers, spec)?;

        Ok((StatusCode::OK, response_headers, rewritten.text).into_response())
    }

    async fn proxy_stream(
        Forwarded(request, services): Forwarded,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        let spec = &request.decoded.spec;
        let upstream_headers = Self::upstream_headers(spec, &headers, true)?;

        let upstream = services
            .upstream
            .fetch(spec.destination.clone(), upstream_headers)
            .await?;

        if !upstream.status.is_success() {
            warn!(
                "stream fetch for {} returned {}",
                spec.destination, upstream.status
            );
        }

        let mut response_headers = HeaderMap::new();
        for name in PASSTHROUGH_RESPONSE_HEADERS {
            if let Some(value) = upstream.headers.get(&name) {
                response_headers.insert(name, value.clone());
            }
        }
        Self::apply_response_overrides(&mut response_headers, spec)?;

        debug!(
            "streaming {} with status {}",
            spec.destination, upstream.status
        );

        Ok((upstream.status, response_headers, upstream.body).into_response())
    }

    /// `h_*` headers, plus range headers from the client unless overridden
    fn upstream_headers(
        spec: &ForwardingSpec,
        client_headers: &HeaderMap,
        forward_range: bool,
    ) -> AppResult<HeaderMap> {
        let mut upstream = HeaderMap::new();

        for (name, value) in &spec.request_headers {
            let (name, value) = Self::header_pair(name, value)?;
            upstream.insert(name, value);
        }

        if forward_range {
            for name in PASSTHROUGH_REQUEST_HEADERS {
                if upstream.contains_key(&name) {
                    continue;
                }
                if let Some(value) = client_headers.get(&name) {
                    upstream.insert(name, value.clone());
                }
            }
        }

        Ok(upstream)
    }

    fn apply_response_overrides(headers: &mut HeaderMap, spec: &ForwardingSpec) -> AppResult<()> {
        for (name, value) in &spec.response_headers {
            let (name, value) = Self::header_pair(name, value)?;
            headers.insert(name, value);
        }
        Ok(())
    }

    fn header_pair(name: &str, value: &str) -> AppResult<(HeaderName, HeaderValue)> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::BadRequest(format!("invalid header name `{}`", name)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| Error::BadRequest(format!("invalid value for header `{}`", name)))?;
        Ok((header_name, header_value))
    }

    fn decompress(bytes: &[u8], content_encoding: Option<&str>) -> AppResult<Vec<u8>> {
        match content_encoding {
            Some("zstd") => {
                debug!("decompressing zstd manifest");
                zstd::decode_all(bytes).map_err(|e| {
                    error!("failed to decompress zstd manifest: {}", e);
                    Error::BadGateway("failed to decompress manifest".to_string())
                })
            }
            Some("gzip") => {
                debug!("decompressing gzip manifest");
                let mut decoder = GzDecoder::new(bytes);
                let mut decompressed = Vec::new();
                decoder.read_to_end(&mut decompressed).map_err(|e| {
                    error!("failed to decompress gzip manifest: {}", e);
                    Error::BadGateway("failed to decompress manifest".to_string())
                })?;
                Ok(decompressed)
            }
            _ => Ok(bytes.to_vec()),
        }
    }
}
