// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use toolrelay::config::{self, ConfigSource as _};
use toolrelay::engine;
use toolrelay::proxy;

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "toolrelay",
    about = "Anthropic Messages relay with tool-call repair and OpenAI translation"
)]
struct Cli {
    /// Path to the toolrelay.yaml config file
    #[arg(long, default_value = "toolrelay.yaml", env = "TOOLRELAY_CONFIG")]
    config: String,

    /// Port to listen on
    #[arg(long, default_value_t = proxy::BIND_ADDR.1, env = "TOOLRELAY_PORT")]
    port: u16,

    /// Log at debug level (also enabled by `server.verbose` in the config)
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let source = config::FileSource::new(&cli.config);
    // Loaded before the subscriber exists so `server.verbose` can pick the
    // level; a load failure is reported once logging is up.
    let loaded = config::load_config(&source);
    let verbose = cli.verbose
        || loaded
            .as_ref()
            .map(|c| c.server.verbose)
            .unwrap_or(false);

    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let config = match loaded {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!(source = %source.describe(), error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let addr = SocketAddr::from((proxy::BIND_ADDR.0, cli.port));
    tracing::info!(%addr, "toolrelay starting");

    tracing::info!(
        upstream = %config.upstream.base_url,
        format = %config.upstream.format,
        timeout_ms = config.upstream.timeout_ms,
        model_aliases = config.model_aliases.len(),
        validated_tools = config.required_params.len(),
        loop_threshold = config.loop_guard.threshold,
        config_hash = %config.config_hash,
        source = %source.describe(),
        "config loaded"
    );

    let max_body_bytes = config.server.max_body_bytes;
    let upstream: Arc<dyn proxy::UpstreamClient> = match engine::build_engine_client(config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!("failed to build upstream client: {e}");
            std::process::exit(1);
        }
    };

    let app = proxy::build_router(upstream, max_body_bytes);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "toolrelay listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
