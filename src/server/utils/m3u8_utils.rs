use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::crypto_utils::AccessWindow;
use super::proxy_url_utils::{DecodedProxyUrl, ForwardingSpec, ProxyUrlCodec, UrlMode};

pub const MANIFEST_ENDPOINT: &str = "proxy/hls/manifest.m3u8";
pub const SEGMENT_ENDPOINT: &str = "proxy/hls/segment";
pub const KEY_ENDPOINT: &str = "proxy/hls/key";
pub const STREAM_ENDPOINT: &str = "proxy/stream";

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";
const URI_ATTRIBUTE: &str = "URI=\"";

static URI_ATTRIBUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"URI="([^"]*)""#).expect("static regex should compile"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaylistRewriteError {
    /// a single reference could not be rewritten, the rest of the playlist is fine
    #[error("line {line}: {reason}")]
    Line { line: usize, reason: String },

    /// tag syntax is broken, players cannot recover from this
    #[error("broken playlist structure at line {line}: {reason}")]
    Structure { line: usize, reason: String },
}

impl PlaylistRewriteError {
    pub fn leaf(reason: impl Into<String>) -> Self {
        Self::Line {
            line: 0,
            reason: reason.into(),
        }
    }

    pub fn structure(reason: impl Into<String>) -> Self {
        Self::Structure {
            line: 0,
            reason: reason.into(),
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structure { .. })
    }

    pub fn line(&self) -> usize {
        match self {
            Self::Line { line, .. } | Self::Structure { line, .. } => *line,
        }
    }

    fn at_line(self, number: usize) -> Self {
        match self {
            Self::Line { reason, .. } => Self::Line {
                line: number,
                reason,
            },
            Self::Structure { reason, .. } => Self::Structure {
                line: number,
                reason,
            },
        }
    }
}

/// playlist input, either already split or a single blob
pub enum ManifestContent<'a> {
    Lines(Box<dyn Iterator<Item = String> + 'a>),
    Text(&'a str),
}

impl<'a> ManifestContent<'a> {
    pub fn lines<I>(lines: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: 'a,
    {
        Self::Lines(Box::new(lines.into_iter()))
    }

    pub fn text(text: &'a str) -> Self {
        Self::Text(text)
    }
}

impl<'a> From<&'a str> for ManifestContent<'a> {
    fn from(text: &'a str) -> Self {
        Self::Text(text)
    }
}

/// per-line rewrite behaviour plugged into `M3u8Processor`
///
/// every method receives the reference as written in the playlist together with
/// the playlist url, resolving relative references is up to the implementation.
pub trait LineRewriter {
    /// a tag line carrying a `URI="..."` attribute (keys, init segments, renditions)
    fn rewrite_key_line(&self, line: &str, base_url: &Url) -> Result<String, PlaylistRewriteError>;

    /// a segment uri
    fn rewrite_content_url(&self, uri: &str, base_url: &Url)
    -> Result<String, PlaylistRewriteError>;

    /// any other reference, `use_full_url` is set for nested playlists whose
    /// fully resolved url has to be embedded since they may live on another origin
    fn rewrite_url(
        &self,
        uri: &str,
        base_url: &Url,
        use_full_url: bool,
    ) -> Result<String, PlaylistRewriteError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeafFailurePolicy {
    /// keep the original line and record a warning
    #[default]
    SkipWithWarning,
    /// abort the whole rewrite
    Fatal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewrittenPlaylist {
    pub text: String,
    pub warnings: Vec<PlaylistRewriteError>,
}

enum LineKind<'l> {
    PassThrough,
    VariantTag,
    KeyReference,
    Content(&'l str),
    NestedPlaylist(&'l str),
}

fn classify(line: &str, after_variant_tag: bool) -> LineKind<'_> {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return LineKind::PassThrough;
    }

    if trimmed.starts_with('#') {
        return if trimmed.contains("URI=") {
            LineKind::KeyReference
        } else if trimmed.starts_with(STREAM_INF_TAG) {
            LineKind::VariantTag
        } else {
            LineKind::PassThrough
        };
    }

    if after_variant_tag || looks_like_playlist(trimmed) {
        LineKind::NestedPlaylist(trimmed)
    } else {
        LineKind::Content(trimmed)
    }
}

/// path ends in .m3u8 / .m3u, query and fragment ignored
pub fn looks_like_playlist(uri: &str) -> bool {
    let path = uri.split(['?', '#']).next().unwrap_or(uri).to_ascii_lowercase();
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}

/// an unterminated `URI="` makes the whole tag unreadable
fn check_uri_attribute(line: &str) -> Result<(), PlaylistRewriteError> {
    let mut rest = line;
    while let Some(idx) = rest.find(URI_ATTRIBUTE) {
        let value = &rest[idx + URI_ATTRIBUTE.len()..];
        match value.find('"') {
            Some(end) => rest = &value[end + 1..],
            None => {
                return Err(PlaylistRewriteError::structure(
                    "unterminated URI attribute",
                ));
            }
        }
    }
    Ok(())
}

/// splits on the literal newline only, a trailing newline does not start a new line
fn split_text(text: &str) -> impl Iterator<Item = Cow<'_, str>> {
    let is_empty = text.is_empty();
    text.strip_suffix('\n')
        .unwrap_or(text)
        .split('\n')
        .filter(move |_| !is_empty)
        .map(Cow::Borrowed)
}

/// drives a `LineRewriter` over a playlist, one line at a time and in order
pub struct M3u8Processor<R> {
    rewriter: R,
    policy: LeafFailurePolicy,
}

impl<R: LineRewriter> M3u8Processor<R> {
    pub fn new(rewriter: R) -> Self {
        Self {
            rewriter,
            policy: LeafFailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LeafFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn rewriter(&self) -> &R {
        &self.rewriter
    }

    pub fn process(
        &self,
        content: ManifestContent<'_>,
        base_url: &Url,
    ) -> Result<RewrittenPlaylist, PlaylistRewriteError> {
        match content {
            ManifestContent::Lines(lines) => self.drive(lines.map(Cow::Owned), base_url),
            ManifestContent::Text(text) => self.drive(split_text(text), base_url),
        }
    }

    fn drive<'l, I>(
        &self,
        lines: I,
        base_url: &Url,
    ) -> Result<RewrittenPlaylist, PlaylistRewriteError>
    where
        I: Iterator<Item = Cow<'l, str>>,
    {
        let mut output = RewrittenPlaylist::default();
        let mut pending_variant: Option<usize> = None;
        let mut count = 0;

        for (idx, line) in lines.enumerate() {
            let number = idx + 1;
            count = number;

            // rewritten lines keep the line ending of the input
            let line_ending = if line.ends_with('\r') { "\r" } else { "" };

            let rewritten = match classify(&line, pending_variant.is_some()) {
                LineKind::PassThrough => {
                    push_line(&mut output.text, &line);
                    continue;
                }
                LineKind::VariantTag => {
                    if let Some(previous) = pending_variant {
                        return Err(PlaylistRewriteError::Structure {
                            line: number,
                            reason: format!("variant tag at line {} has no uri", previous),
                        });
                    }
                    pending_variant = Some(number);
                    push_line(&mut output.text, &line);
                    continue;
                }
                LineKind::KeyReference => {
                    let tag = line.strip_suffix('\r').unwrap_or(&*line);
                    check_uri_attribute(tag)
                        .and_then(|_| self.rewriter.rewrite_key_line(tag, base_url))
                }
                LineKind::Content(uri) => self.rewriter.rewrite_content_url(uri, base_url),
                LineKind::NestedPlaylist(uri) => {
                    pending_variant = None;
                    self.rewriter.rewrite_url(uri, base_url, true)
                }
            };

            match rewritten {
                Ok(mut new_line) => {
                    new_line.push_str(line_ending);
                    push_line(&mut output.text, &new_line);
                }
                Err(err) => {
                    let err = err.at_line(number);
                    if err.is_structural() || self.policy == LeafFailurePolicy::Fatal {
                        return Err(err);
                    }

                    warn!("keeping original playlist line: {}", err);
                    push_line(&mut output.text, &line);
                    output.warnings.push(err);
                }
            }
        }

        if let Some(line) = pending_variant {
            return Err(PlaylistRewriteError::Structure {
                line,
                reason: "variant tag has no uri before end of playlist".to_string(),
            });
        }

        debug!(
            "rewrote playlist: {} lines, {} warnings",
            count,
            output.warnings.len()
        );

        Ok(output)
    }
}

fn push_line(output: &mut String, line: &str) {
    output.push_str(line);
    output.push('\n');
}

/// resolve a playlist reference against the playlist url
pub fn resolve_uri(uri: &str, base_url: &Url) -> Result<Url, PlaylistRewriteError> {
    base_url
        .join(uri)
        .map_err(|e| PlaylistRewriteError::leaf(format!("cannot resolve `{}`: {}", uri, e)))
}

/// request-scoped inputs for minting follow-up proxy urls
#[derive(Debug, Clone, Default)]
pub struct RewriteContext {
    pub proxy_origin: String,
    /// forwarded upstream on every follow-up request
    pub request_headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub mode: UrlMode,
    /// constraints inherited by minted tokens
    pub access: Option<AccessWindow>,
}

impl RewriteContext {
    /// follow-up urls carry the same forwarding data and the same token constraints
    /// as the request that fetched the playlist; response overrides stay with it
    pub fn from_decoded(proxy_origin: impl Into<String>, decoded: &DecodedProxyUrl) -> Self {
        Self {
            proxy_origin: proxy_origin.into(),
            request_headers: decoded.spec.request_headers.clone(),
            query_params: decoded.spec.query_params.clone(),
            mode: if decoded.is_token() {
                UrlMode::Token
            } else {
                UrlMode::Query
            },
            access: decoded.access.clone(),
        }
    }
}

/// rewrites every reference into a proxy url minted by the codec
pub struct ProxyLineRewriter<'c> {
    codec: &'c ProxyUrlCodec,
    context: RewriteContext,
}

impl<'c> ProxyLineRewriter<'c> {
    pub fn new(codec: &'c ProxyUrlCodec, context: RewriteContext) -> Self {
        Self { codec, context }
    }

    fn mint(&self, destination: &Url, endpoint: &str) -> Result<String, PlaylistRewriteError> {
        let mut spec = ForwardingSpec::new(destination.as_str());
        spec.request_headers = self.context.request_headers.clone();
        spec.query_params = self.context.query_params.clone();

        if let Some(access) = &self.context.access {
            spec.expiration = access.remaining_seconds(Utc::now());
            spec.ip = access.ip.clone();
        }

        self.codec
            .encode(&self.context.proxy_origin, endpoint, &spec, self.context.mode)
            .map_err(|e| PlaylistRewriteError::leaf(e.to_string()))
    }
}

fn endpoint_for_tag(line: &str) -> &'static str {
    let tag = line
        .trim_start()
        .split(':')
        .next()
        .unwrap_or_default();

    match tag {
        "#EXT-X-KEY" | "#EXT-X-SESSION-KEY" => KEY_ENDPOINT,
        "#EXT-X-MEDIA" | "#EXT-X-I-FRAME-STREAM-INF" | "#EXT-X-RENDITION-REPORT" => {
            MANIFEST_ENDPOINT
        }
        _ => SEGMENT_ENDPOINT,
    }
}

impl LineRewriter for ProxyLineRewriter<'_> {
    fn rewrite_key_line(&self, line: &str, base_url: &Url) -> Result<String, PlaylistRewriteError> {
        let captures = URI_ATTRIBUTE_RE
            .captures(line)
            .ok_or_else(|| PlaylistRewriteError::leaf("tag has no quoted URI attribute"))?;

        let (Some(whole), Some(uri)) = (captures.get(0), captures.get(1)) else {
            return Err(PlaylistRewriteError::leaf("tag has no quoted URI attribute"));
        };

        if uri.as_str().is_empty() {
            return Err(PlaylistRewriteError::leaf("empty URI attribute"));
        }

        let resolved = resolve_uri(uri.as_str(), base_url)?;
        let proxied = self.mint(&resolved, endpoint_for_tag(line))?;

        Ok(format!(
            "{}URI=\"{}\"{}",
            &line[..whole.start()],
            proxied,
            &line[whole.end()..]
        ))
    }

    fn rewrite_content_url(
        &self,
        uri: &str,
        base_url: &Url,
    ) -> Result<String, PlaylistRewriteError> {
        let resolved = resolve_uri(uri, base_url)?;
        self.mint(&resolved, SEGMENT_ENDPOINT)
    }

    fn rewrite_url(
        &self,
        uri: &str,
        base_url: &Url,
        use_full_url: bool,
    ) -> Result<String, PlaylistRewriteError> {
        let resolved = resolve_uri(uri, base_url)?;
        let endpoint = if use_full_url || looks_like_playlist(resolved.path()) {
            MANIFEST_ENDPOINT
        } else {
            SEGMENT_ENDPOINT
        };
        self.mint(&resolved, endpoint)
    }
}
