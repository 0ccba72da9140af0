use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use validator::Validate;

use crate::server::{
    dtos::url_dto::{GenerateMultiUrlResponse, MAX_TOKEN_LIFETIME_SECS, UrlItem},
    services::UrlGenerator,
};

/// offline proxy url generation, same rules as the generate endpoints
#[derive(Parser, Debug)]
#[command(name = "mediaflow-urls", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// print a single proxy url
    GenerateUrl(GenerateUrlArgs),
    /// print `{"urls": [...]}` for every item of a json file
    GenerateUrls(GenerateUrlsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GeneratorArgs {
    #[arg(long)]
    pub mediaflow_proxy_url: String,

    #[arg(long)]
    pub api_password: Option<String>,

    // seconds the url stays valid, token mode only
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_TOKEN_LIFETIME_SECS))]
    pub expiration: Option<u64>,

    #[arg(long)]
    pub ip: Option<IpAddr>,
}

#[derive(Args, Debug)]
pub struct GenerateUrlArgs {
    #[command(flatten)]
    pub generator: GeneratorArgs,

    #[arg(long)]
    pub endpoint: Option<String>,

    #[arg(long)]
    pub destination_url: String,

    // json object, e.g. '{"User-Agent": "vlc"}'
    #[arg(long)]
    pub query_params: Option<String>,

    #[arg(long)]
    pub request_headers: Option<String>,

    #[arg(long)]
    pub response_headers: Option<String>,

    #[arg(long)]
    pub filename: Option<String>,
}

#[derive(Args, Debug)]
pub struct GenerateUrlsArgs {
    /// json array of url items
    pub file: PathBuf,

    #[command(flatten)]
    pub generator: GeneratorArgs,
}

impl GeneratorArgs {
    fn generator(&self) -> UrlGenerator {
        UrlGenerator::new(
            self.mediaflow_proxy_url.clone(),
            self.api_password.clone(),
            self.expiration,
            self.ip.map(|ip| ip.to_string()),
        )
    }
}

/// runs one command and returns what should be printed
pub fn run(cli: Cli) -> anyhow::Result<String> {
    match cli.command {
        Command::GenerateUrl(args) => {
            let item = UrlItem {
                endpoint: args.endpoint,
                destination_url: args.destination_url,
                query_params: parse_json_map("query-params", args.query_params.as_deref())?,
                request_headers: parse_json_map(
                    "request-headers",
                    args.request_headers.as_deref(),
                )?,
                response_headers: parse_json_map(
                    "response-headers",
                    args.response_headers.as_deref(),
                )?,
                filename: args.filename,
            };

            item.validate().context("invalid url item")?;
            let url = args
                .generator
                .generator()
                .generate(&item)
                .context("failed to generate url")?;

            Ok(url)
        }
        Command::GenerateUrls(args) => {
            let raw = std::fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read {}", args.file.display()))?;

            generate_urls_from_json(&args.generator.generator(), &raw)
        }
    }
}

/// `raw` is a json array of url items, the result is pretty printed
pub fn generate_urls_from_json(generator: &UrlGenerator, raw: &str) -> anyhow::Result<String> {
    let items: Vec<UrlItem> =
        serde_json::from_str(raw).context("expected a json array of url items")?;

    for (index, item) in items.iter().enumerate() {
        item.validate()
            .with_context(|| format!("invalid url item at index {}", index))?;
    }

    let urls = generator
        .generate_all(&items)
        .context("failed to generate urls")?;

    serde_json::to_string_pretty(&GenerateMultiUrlResponse { urls })
        .context("failed to serialize urls")
}

fn parse_json_map(flag: &str, raw: Option<&str>) -> anyhow::Result<BTreeMap<String, String>> {
    let Some(raw) = raw else {
        return Ok(BTreeMap::new());
    };

    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("--{} is not valid json", flag))?;

    let serde_json::Value::Object(object) = value else {
        bail!("--{} must be a json object", flag);
    };

    object
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok((key, s)),
            serde_json::Value::Null => bail!("--{}: `{}` has no value", flag, key),
            other => Ok((key, other.to_string())),
        })
        .collect()
}
