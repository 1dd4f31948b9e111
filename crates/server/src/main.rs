use anyhow::Result;
use axum::serve;
use pulse_core::{config::AppConfig, runtime::PulseRuntime};
use rustls::crypto::{ring::default_provider, CryptoProvider};
use server::router::{self, AppState};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Bound on in-flight snapshot requests served concurrently.
const MAX_CONCURRENT_SNAPSHOTS: usize = 256;

/// Initializes the logging system based on the configuration.
///
/// `RUST_LOG` wins over `logging.level` when set.
fn init_logging(config: &AppConfig) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(env_filter) if env_filter == "debug" || env_filter == "trace" => {
            EnvFilter::new(format!("warn,pulse_core={env_filter},server={env_filter}"))
        }
        Ok(_) => EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
            EnvFilter::new("warn,pulse_core=debug,server=debug,tower_http=debug")
        }),
        Err(_) => {
            let level = &config.logging.level;
            EnvFilter::try_new(format!("warn,pulse_core={level},server={level}"))
                .unwrap_or_else(|_| EnvFilter::new("warn,pulse_core=info,server=info"))
        }
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer().json();
        registry.with(fmt_layer).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CryptoProvider::install_default(default_provider())
        .map_err(|e| anyhow::anyhow!("Failed to install crypto provider: {e:?}"))?;

    let config = AppConfig::load()?;

    init_logging(&config);
    info!("starting pulse server");
    debug!(
        upstreams_count = config.upstreams.len(),
        bind_port = config.server.bind_port,
        health_enabled = config.health.enabled,
        "configuration loaded"
    );

    let addr = config.socket_addr().map_err(anyhow::Error::msg)?;

    let mut builder = PulseRuntime::builder().with_config(config.clone());
    if config.health.enabled {
        builder = builder.enable_health_reporter();
    }
    let runtime = builder.build()?;

    let app = router::create_app(AppState::from_runtime(&runtime), MAX_CONCURRENT_SNAPSHOTS);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "pulse server listening");

    if let Err(e) = serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "server error occurred");
    }

    runtime.shutdown().await;
    info!("server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, starting graceful shutdown");
}
