pub mod proxy_services;
pub mod upstream_services;
pub mod url_services;

pub use proxy_services::ProxyServices;
pub use upstream_services::DynUpstreamService;
pub use url_services::UrlGenerator;
