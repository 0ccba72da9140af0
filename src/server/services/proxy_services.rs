use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::{
    config::AppConfig,
    server::utils::{crypto_utils::EncryptionHandler, proxy_url_utils::ProxyUrlCodec},
};

use super::upstream_services::{DynUpstreamService, UpstreamService};

/// everything a proxy request needs, cloned into each handler
///
/// the cipher inside the codec is built once here and never mutated
#[derive(Clone)]
pub struct ProxyServices {
    pub codec: Arc<ProxyUrlCodec>,
    pub upstream: DynUpstreamService,
    pub config: Arc<AppConfig>,
}

impl ProxyServices {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let upstream = Arc::new(UpstreamService::new(Duration::from_secs(
            config.upstream_timeout_secs,
        ))) as DynUpstreamService;

        Self::with_upstream(config, upstream)
    }

    pub fn with_upstream(config: Arc<AppConfig>, upstream: DynUpstreamService) -> Self {
        info!("starting proxy services...");

        let cipher = config
            .api_password
            .as_deref()
            .map(|secret| Arc::new(EncryptionHandler::new(secret)));

        if cipher.is_some() {
            info!("api password set, token encryption enabled");
        } else {
            info!("no api password set, proxy is open and tokens are disabled");
        }

        Self {
            codec: Arc::new(ProxyUrlCodec::new(cipher)),
            upstream,
            config,
        }
    }
}
