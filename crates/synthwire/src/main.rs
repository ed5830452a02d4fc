use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use synthconf::SynthwireConfig;
use synthwire::{build_web_state, shutdown_sessions, telemetry, web};
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for sessions to release their processes.
const SHUTDOWN_LIMIT: Duration = Duration::from_secs(10);

/// WebRTC audio sessions backed by a supervised synth
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (replaces ./synthwire.toml in the search order)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides [bind] http_port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides [bind] host)
    #[arg(long)]
    host: Option<String>,

    /// Print the merged configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = SynthwireConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.infra.bind.http_port = port;
    }
    if let Some(host) = cli.host {
        config.infra.bind.host = host;
    }
    config.validate().context("Invalid configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml().context("Failed to render configuration")?);
        return Ok(());
    }

    telemetry::init(&config.infra.telemetry, config.environment)
        .context("Failed to initialize telemetry")?;

    tracing::info!(
        "⚙️ {} config, files: {:?}, env overrides: {:?}",
        config.environment,
        sources.files,
        sources.env_overrides
    );

    std::fs::create_dir_all(&config.infra.paths.log_dir).with_context(|| {
        format!(
            "Failed to create log directory {}",
            config.infra.paths.log_dir.display()
        )
    })?;

    let state = build_web_state(&config);
    let registry = state.registry.clone();
    let app_router = web::router(state);

    let addr = config.infra.bind.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("🌐 listening on http://{}", addr);

    let shutdown_token = CancellationToken::new();
    let shutdown_token_srv = shutdown_token.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app_router)
            .with_graceful_shutdown(async move {
                shutdown_token_srv.cancelled().await;
                tracing::info!("Server shutdown signal received");
            })
            .await
    });

    tracing::info!("🎵 synthwire ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = sigterm() => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    shutdown_sessions(&registry, SHUTDOWN_LIMIT).await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Server shutdown with error: {:?}", e),
        Err(e) => tracing::error!("Server task failed: {:?}", e),
    }

    tracing::info!("Shutdown complete");
    telemetry::shutdown();
    Ok(())
}

async fn sigterm() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
