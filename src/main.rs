use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use akubra::config::Config;
use akubra::logging;
use akubra::metrics_server;
use akubra::proxy::{self, AppState};
use akubra::ring::Ring;
use akubra::sync_log;

/// A synchronous replicating reverse proxy for S3-compatible object stores.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "akubra.yaml", env = "AKUBRA_CONF")]
    conf: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::install();

    let cli = Cli::parse();

    tracing::info!("starting akubra");

    let config = Config::load(&cli.conf).with_context(|| {
        format!(
            "failed to load configuration from {}",
            cli.conf.display()
        )
    })?;

    let http_client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let sync_log_sender = sync_log::spawn(std::io::stdout());

    let sync_log_methods: std::collections::HashSet<Method> = config
        .sync_log_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    let additional_request_headers = Arc::new(to_header_map(&config.additional_request_headers));
    let additional_response_headers = Arc::new(to_header_map(&config.additional_response_headers));

    let ring = Arc::new(
        Ring::build(
            &config,
            http_client,
            config.conn_limit,
            config.connection_dial_timeout,
            config.connection_timeout,
            additional_request_headers,
            Arc::new(sync_log_methods),
            sync_log_sender,
        )
        .context("failed to build shards ring")?,
    );

    tracing::info!(client = ring.client_name(), "shards ring built");

    let cancel_token = tokio_util::sync::CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, shutting down");
        ctrl_c_token.cancel();
    });

    let metrics_listener = tokio::net::TcpListener::bind(&config.metrics_listen)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", config.metrics_listen))?;
    let metrics_router = metrics_server::build_router();
    let metrics_cancel = cancel_token.clone();
    tokio::spawn(async move {
        let _ = axum::serve(metrics_listener, metrics_router)
            .with_graceful_shutdown(async move { metrics_cancel.cancelled().await })
            .await;
    });

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    let app = proxy::router(AppState {
        ring,
        additional_response_headers,
        read_timeout: config.connection_timeout,
    });

    tracing::info!(addr = %config.listen, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await
        .context("server error")?;

    Ok(())
}

fn to_header_map(headers: &std::collections::HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) else {
            tracing::warn!(name, "skipping invalid additional header");
            continue;
        };
        map.insert(name, value);
    }
    map
}
