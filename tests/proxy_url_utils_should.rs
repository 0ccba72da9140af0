use std::collections::BTreeMap;
use std::sync::Arc;

use mediaflow_proxy::server::utils::{
    crypto_utils::{EncryptionHandler, TokenError, TokenPayload},
    proxy_url_utils::{
        ForwardingSpec, ProxyUrlCodec, ProxyUrlError, UrlMode, encode_stremio_proxy_url,
    },
};
use url::Url;

const ORIGIN: &str = "http://proxy.local";
const DESTINATION: &str = "http://example.com/video.mp4?foo=bar";

fn spec() -> ForwardingSpec {
    ForwardingSpec::new(DESTINATION).with_request_header("User-Agent", "TestAgent")
}

fn codec_with_secret() -> ProxyUrlCodec {
    ProxyUrlCodec::new(Some(Arc::new(EncryptionHandler::new("test_secret"))))
}

fn query_of(url: &Url) -> BTreeMap<String, String> {
    url.query_pairs().into_owned().collect()
}

#[test]
fn encode_forwarding_data_in_the_query() {
    let url = ProxyUrlCodec::default()
        .encode(ORIGIN, "stream", &spec(), UrlMode::Query)
        .unwrap();
    let url = Url::parse(&url).unwrap();

    assert_eq!(url.path(), "/stream");
    let query = query_of(&url);
    assert_eq!(query["d"], DESTINATION);
    assert_eq!(query["h_User-Agent"], "TestAgent");
}

#[test]
fn preserve_the_filename_as_a_path_segment() {
    let url = ProxyUrlCodec::default()
        .encode(ORIGIN, "stream", &spec().with_filename("my file.ts"), UrlMode::Query)
        .unwrap();
    let url = Url::parse(&url).unwrap();

    assert_eq!(url.path(), "/stream/my%20file.ts");
    assert_eq!(query_of(&url)["d"], DESTINATION);
}

#[test]
fn seal_forwarding_data_in_a_token() {
    let codec = codec_with_secret();
    let url = codec.encode(ORIGIN, "stream", &spec(), UrlMode::Token).unwrap();
    let url = Url::parse(&url).unwrap();

    assert_eq!(url.query(), None);

    let segments: Vec<&str> = url.path_segments().unwrap().collect();
    assert_eq!(segments.len(), 2);
    assert!(segments[0].starts_with("_token_"));
    assert_eq!(segments[1], "stream");

    let token = segments[0].strip_prefix("_token_").unwrap();
    let payload = EncryptionHandler::new("test_secret")
        .decrypt(token, Some("127.0.0.1"))
        .unwrap();

    assert_eq!(
        payload,
        TokenPayload::from([
            ("d".to_string(), DESTINATION.to_string()),
            ("h_User-Agent".to_string(), "TestAgent".to_string()),
        ])
    );
}

#[test]
fn refuse_token_mode_without_a_secret() {
    assert_eq!(
        ProxyUrlCodec::default().encode(ORIGIN, "stream", &spec(), UrlMode::Token),
        Err(ProxyUrlError::Configuration)
    );
    assert_eq!(
        ProxyUrlCodec::default().decode("stream", "/_token_abc/stream", None, None),
        Err(ProxyUrlError::Configuration)
    );
}

#[test]
fn reject_invalid_destinations_and_origins() {
    let codec = ProxyUrlCodec::default();

    assert!(matches!(
        codec.encode(ORIGIN, "stream", &ForwardingSpec::new("video.mp4"), UrlMode::Query),
        Err(ProxyUrlError::Validation(_))
    ));
    assert!(matches!(
        codec.encode("proxy.local", "stream", &spec(), UrlMode::Query),
        Err(ProxyUrlError::Validation(_))
    ));
}

#[test]
fn round_trip_query_urls() {
    let codec = ProxyUrlCodec::default();
    let original = spec()
        .with_response_header("Content-Type", "video/mp2t")
        .with_query_param("api_password", "pw")
        .with_filename("my file.ts");

    let encoded = codec
        .encode(ORIGIN, "proxy/stream", &original, UrlMode::Query)
        .unwrap();
    let encoded = Url::parse(&encoded).unwrap();
    let decoded = codec
        .decode("proxy/stream", encoded.path(), encoded.query(), None)
        .unwrap();

    assert!(!decoded.is_token());
    assert_eq!(decoded.spec, original);
}

#[test]
fn round_trip_token_urls() {
    let codec = codec_with_secret();
    let original = spec()
        .with_response_header("Content-Type", "video/mp2t")
        .with_filename("seg 1.ts")
        .with_expiration(3600)
        .with_ip("127.0.0.1");

    let encoded = codec
        .encode(ORIGIN, "proxy/hls/segment", &original, UrlMode::Token)
        .unwrap();
    let encoded = Url::parse(&encoded).unwrap();
    let decoded = codec
        .decode("proxy/hls/segment", encoded.path(), encoded.query(), Some("127.0.0.1"))
        .unwrap();

    let access = decoded.access.clone().unwrap();
    assert_eq!(access.ip.as_deref(), Some("127.0.0.1"));
    assert!(access.expires_at.is_some());

    // the access window is returned next to the forwarding data
    let expected = ForwardingSpec {
        expiration: None,
        ip: None,
        ..original
    };
    assert_eq!(decoded.spec, expected);
}

#[test]
fn propagate_token_failures() {
    let codec = codec_with_secret();
    let encoded = codec
        .encode(ORIGIN, "stream", &spec().with_ip("127.0.0.1"), UrlMode::Token)
        .unwrap();
    let encoded = Url::parse(&encoded).unwrap();

    assert_eq!(
        codec.decode("stream", encoded.path(), None, Some("10.1.1.1")),
        Err(ProxyUrlError::Token(TokenError::IpMismatch))
    );

    let other = ProxyUrlCodec::new(Some(Arc::new(EncryptionHandler::new("other"))));
    assert_eq!(
        other.decode("stream", encoded.path(), None, Some("127.0.0.1")),
        Err(ProxyUrlError::Token(TokenError::Authentication))
    );
}

#[test]
fn merge_outer_query_into_token_payload() {
    let codec = codec_with_secret();
    let encoded = codec.encode(ORIGIN, "stream", &spec(), UrlMode::Token).unwrap();
    let encoded = Url::parse(&encoded).unwrap();

    let decoded = codec
        .decode(
            "stream",
            encoded.path(),
            Some("api_password=pw&d=http%3A%2F%2Fevil.com%2Fx"),
            None,
        )
        .unwrap();

    // sealed values win over the outer query
    assert_eq!(decoded.spec.destination, DESTINATION);
    assert_eq!(decoded.spec.query_params["api_password"], "pw");
}

#[test]
fn reject_query_urls_without_destination() {
    assert!(matches!(
        ProxyUrlCodec::default().decode("stream", "/stream", Some("h_Referer=x"), None),
        Err(ProxyUrlError::MalformedProxyUrl(_))
    ));
    assert!(matches!(
        ProxyUrlCodec::default().decode("stream", "/stream", None, None),
        Err(ProxyUrlError::MalformedProxyUrl(_))
    ));
}

#[test]
fn keep_the_origin_path_prefix() {
    let url = ProxyUrlCodec::default()
        .encode("https://proxy.local/mediaflow/", "/proxy/stream/", &spec(), UrlMode::Query)
        .unwrap();

    assert!(url.starts_with("https://proxy.local/mediaflow/proxy/stream?d="));
}

#[test]
fn build_stremio_style_urls() {
    let headers = BTreeMap::from([("User-Agent".to_string(), "TestAgent".to_string())]);
    let overrides = BTreeMap::from([("Content-Type".to_string(), "video/mp4".to_string())]);

    let url = encode_stremio_proxy_url(
        "http://127.0.0.1:11470",
        "https://cdn.example.com/path/video.mp4?token=abc",
        &headers,
        &overrides,
    )
    .unwrap();

    let block = "d=https%3A%2F%2Fcdn.example.com\
        &h=User-Agent%3ATestAgent\
        &r=Content-Type%3Avideo%2Fmp4";
    assert_eq!(
        url,
        format!("http://127.0.0.1:11470/proxy/{}/path/video.mp4?token=abc", block)
    );
}

#[test]
fn use_a_default_stremio_path_for_bare_destinations() {
    let url = encode_stremio_proxy_url(
        "http://127.0.0.1:11470",
        "https://cdn.example.com",
        &BTreeMap::new(),
        &BTreeMap::new(),
    )
    .unwrap();

    assert_eq!(
        url,
        "http://127.0.0.1:11470/proxy/d=https%3A%2F%2Fcdn.example.com/stream"
    );
}
