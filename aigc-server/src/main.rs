use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aigc::api::ApiServer;
use aigc::cache::{TieredCache, TtlClass};
use aigc::gateway::Gateway;
use aigc::retry::RetryPolicy;
use aigc::session::SessionManager;
use aigc::upstream::{GeminiClient, GoogleSearchClient, HttpContentFetcher};
use aigc::Config;

#[derive(Parser, Debug)]
#[command(name = "aigc-server")]
#[command(about = "AIGC content-intelligence gateway")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "AIGC_CONFIG", default_value = "aigc.toml")]
    config: String,

    /// Host to bind to (overrides server.bind_addr)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides server.bind_addr)
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_tracing(format: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn bind_addr(config: &Config, args: &Args) -> String {
    let (default_host, default_port) = config
        .server
        .bind_addr
        .rsplit_once(':')
        .unwrap_or(("0.0.0.0", "8888"));
    let host = args.host.as_deref().unwrap_or(default_host);
    match args.port {
        Some(port) => format!("{}:{}", host, port),
        None => format!("{}:{}", host, default_port),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal
    let _ = dotenv::dotenv();

    let args = Args::parse();

    let mut config = Config::load_or_create(Path::new(&args.config))
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    config.apply_env_overrides()?;

    init_tracing(&config.observability.log_format, &config.observability.log_level);
    config.validate()?;

    tracing::info!("Config file: {}", args.config);

    let metrics = if config.observability.metrics_enabled {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        Some(handle)
    } else {
        None
    };

    let cache = Arc::new(TieredCache::from_config(&config.cache, &config.storage.data_dir)?);
    let retry = RetryPolicy::from_config(&config.retry);

    let fetcher = Arc::new(HttpContentFetcher::new(
        Duration::from_secs(config.fetch.timeout_secs),
        config.fetch.max_chars,
    )?);
    let sessions = Arc::new(SessionManager::new(
        cache.clone(),
        fetcher,
        retry.clone(),
        config.cache.ttl.ttl_for(TtlClass::Sessions),
        config.cache.ttl.ttl_for(TtlClass::Pages),
    ));

    let api_key = config
        .gemini
        .api_key
        .as_deref()
        .context("GEMINI_API_KEY is not set")?;
    let generator = Arc::new(GeminiClient::new(
        api_key,
        &config.gemini.model,
        config.gemini.base_url.as_deref(),
        Duration::from_secs(config.gemini.timeout_secs),
    )?);

    let mut gateway = Gateway::new(cache, sessions, generator, retry, config.cache.ttl.clone());
    match (&config.search.api_key, &config.search.engine_id) {
        (Some(key), Some(engine)) if config.search.is_configured() => {
            let search = GoogleSearchClient::new(key, engine, Duration::from_secs(config.search.timeout_secs))?;
            gateway = gateway.with_search(Arc::new(search));
            tracing::info!("Related-source search enabled");
        }
        _ => tracing::warn!("Search credentials missing, metadata sources will be empty"),
    }

    let mut server = ApiServer::with_config(Arc::new(gateway), config.server.clone());
    if let Some(handle) = metrics {
        server = server.with_metrics(Arc::new(move || handle.render()));
    }

    let addr = bind_addr(&config, &args);
    tracing::info!(
        model = %config.gemini.model,
        cache_backend = %config.cache.backend,
        "Starting AIGC gateway on {}",
        addr
    );

    server.serve(&addr).await?;

    Ok(())
}
