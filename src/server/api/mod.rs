pub mod health_controller;
pub mod proxy_controller;
pub mod url_controller;

pub use proxy_controller::ProxyController;
pub use url_controller::UrlController;
