use std::net::IpAddr;

#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum, default_value = "development")]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "8888")]
    pub port: u16,

    // when set this is both the api password clients have to send and the secret
    // tokens are sealed with, generate it with something like 'openssl rand -base64 32'
    #[clap(long, env)]
    pub api_password: Option<String>,

    // this should be either * for allowing everything, or a comma seperated list of origins like
    // https://example.com,https://something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // peers allowed to report the client address through X-Forwarded-For / X-Real-IP,
    // comma seperated ips or * for any. empty means the socket peer is the client
    #[clap(long, env, value_delimiter = ',')]
    pub trusted_proxies: Vec<String>,

    // upper bound for a single upstream request
    #[clap(long, env, default_value = "30")]
    pub upstream_timeout_secs: u64,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 8888,
            api_password: None,
            cors_origin: "*".to_string(),
            trusted_proxies: Vec::new(),
            upstream_timeout_secs: 30,
            sentry_dsn: None,
        }
    }
}

impl AppConfig {
    pub fn trusts_proxy(&self, peer: IpAddr) -> bool {
        self.trusted_proxies.iter().map(|entry| entry.trim()).any(|entry| {
            entry == "*"
                || entry
                    .parse::<IpAddr>()
                    .is_ok_and(|trusted| trusted.to_canonical() == peer.to_canonical())
        })
    }
}
