pub mod crypto_utils;
pub mod m3u8_utils;
pub mod proxy_url_utils;
