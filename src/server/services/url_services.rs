use std::sync::Arc;

use crate::server::{
    dtos::url_dto::UrlItem,
    utils::{
        crypto_utils::EncryptionHandler,
        proxy_url_utils::{ForwardingSpec, ProxyUrlCodec, ProxyUrlError, UrlMode},
    },
};

pub const API_PASSWORD_PARAM: &str = "api_password";

/// mints proxy urls for the generate endpoints and the cli
///
/// an api password turns on token mode and is injected into every url so the
/// proxy accepts it later
pub struct UrlGenerator {
    codec: ProxyUrlCodec,
    mediaflow_proxy_url: String,
    api_password: Option<String>,
    expiration: Option<u64>,
    ip: Option<String>,
}

impl UrlGenerator {
    pub fn new(
        mediaflow_proxy_url: impl Into<String>,
        api_password: Option<String>,
        expiration: Option<u64>,
        ip: Option<String>,
    ) -> Self {
        let cipher = api_password
            .as_deref()
            .map(|password| Arc::new(EncryptionHandler::new(password)));

        Self {
            codec: ProxyUrlCodec::new(cipher),
            mediaflow_proxy_url: mediaflow_proxy_url.into(),
            api_password,
            expiration,
            ip,
        }
    }

    pub fn generate(&self, item: &UrlItem) -> Result<String, ProxyUrlError> {
        let mut query_params = item.query_params.clone();
        if let Some(password) = &self.api_password {
            query_params
                .entry(API_PASSWORD_PARAM.to_string())
                .or_insert_with(|| password.clone());
        }

        let spec = ForwardingSpec {
            destination: item.destination_url.clone(),
            request_headers: item.request_headers.clone(),
            response_headers: item.response_headers.clone(),
            query_params,
            filename: item.filename.clone(),
            expiration: self.expiration,
            ip: self.ip.clone(),
        };

        let mode = if self.codec.has_cipher() {
            UrlMode::Token
        } else {
            UrlMode::Query
        };

        self.codec.encode(
            &self.mediaflow_proxy_url,
            item.endpoint.as_deref().unwrap_or_default(),
            &spec,
            mode,
        )
    }

    pub fn generate_all(&self, items: &[UrlItem]) -> Result<Vec<String>, ProxyUrlError> {
        items.iter().map(|item| self.generate(item)).collect()
    }
}
