use std::io::Write;

use clap::Parser;
use mediaflow_proxy::cli::{Cli, generate_urls_from_json, run};
use mediaflow_proxy::server::services::UrlGenerator;
use serde_json::Value;

#[test]
fn print_a_single_query_url() {
    let cli = Cli::try_parse_from([
        "mediaflow-urls",
        "generate-url",
        "--mediaflow-proxy-url",
        "http://proxy.local",
        "--endpoint",
        "proxy/stream",
        "--destination-url",
        "https://cdn.example.com/video.mp4",
        "--request-headers",
        r#"{"User-Agent": "TestAgent"}"#,
    ])
    .unwrap();

    let url = run(cli).unwrap();

    assert!(url.starts_with("http://proxy.local/proxy/stream?d=https%3A%2F%2Fcdn.example.com"));
    assert!(url.contains("h_User-Agent=TestAgent"));
}

#[test]
fn print_token_urls_when_a_password_is_given() {
    let cli = Cli::try_parse_from([
        "mediaflow-urls",
        "generate-url",
        "--mediaflow-proxy-url",
        "http://proxy.local",
        "--endpoint",
        "proxy/stream",
        "--destination-url",
        "https://cdn.example.com/video.mp4",
        "--api-password",
        "pw",
    ])
    .unwrap();

    let url = run(cli).unwrap();

    assert!(url.starts_with("http://proxy.local/_token_"));
    assert!(url.ends_with("/proxy/stream"));
}

#[test]
fn fail_on_malformed_header_json() {
    let cli = Cli::try_parse_from([
        "mediaflow-urls",
        "generate-url",
        "--mediaflow-proxy-url",
        "http://proxy.local",
        "--destination-url",
        "https://cdn.example.com/video.mp4",
        "--request-headers",
        "{oops",
    ])
    .unwrap();

    assert!(run(cli).is_err());
}

#[test]
fn require_a_destination() {
    assert!(
        Cli::try_parse_from([
            "mediaflow-urls",
            "generate-url",
            "--mediaflow-proxy-url",
            "http://proxy.local",
        ])
        .is_err()
    );
}

#[test]
fn print_a_url_list_for_a_json_file() {
    let mut file = std::env::temp_dir();
    file.push(format!("mediaflow-urls-{}.json", std::process::id()));
    let mut handle = std::fs::File::create(&file).unwrap();
    handle
        .write_all(
            br#"[
                {"endpoint": "proxy/stream", "destination_url": "https://cdn.example.com/a.mp4"},
                {"endpoint": "proxy/hls/manifest.m3u8", "destination_url": "https://x.io/b.m3u8"}
            ]"#,
        )
        .unwrap();
    drop(handle);

    let cli = Cli::try_parse_from([
        "mediaflow-urls",
        "generate-urls",
        file.to_str().unwrap(),
        "--mediaflow-proxy-url",
        "http://proxy.local",
    ])
    .unwrap();

    let output = run(cli);
    std::fs::remove_file(&file).unwrap();

    let body: Value = serde_json::from_str(&output.unwrap()).unwrap();
    let urls = body["urls"].as_array().unwrap();
    assert_eq!(urls.len(), 2);
    assert!(urls[1].as_str().unwrap().starts_with("http://proxy.local/proxy/hls/manifest.m3u8?d="));
}

#[test]
fn fail_on_items_without_destination() {
    let generator = UrlGenerator::new("http://proxy.local", None, None, None);

    assert!(generate_urls_from_json(&generator, r#"[{"endpoint": "proxy/stream"}]"#).is_err());
    assert!(generate_urls_from_json(&generator, r#"{"urls": []}"#).is_err());
    assert!(generate_urls_from_json(&generator, "[]").is_ok());
}

#[test]
fn reject_out_of_range_expirations() {
    for expiration in ["0", "315360001", "18446744073709551615"] {
        let parsed = Cli::try_parse_from([
            "mediaflow-urls",
            "generate-url",
            "--mediaflow-proxy-url",
            "http://proxy.local",
            "--destination-url",
            "https://cdn.example.com/video.mp4",
            "--api-password",
            "pw",
            "--expiration",
            expiration,
        ]);

        assert!(parsed.is_err());
    }
}
