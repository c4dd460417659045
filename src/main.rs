//! POS Realtime server entry point.
//!
//! WebSocket server distributing tenant-scoped events to POS, kitchen and
//! dashboard clients.

use std::sync::Arc;

use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pos_realtime::adapters::{
    realtime_router, InMemoryBackplane, JwtConfig, JwtTokenVerifier, RedisBackplane,
    RedisBackplaneConfig, WebSocketState,
};
use pos_realtime::application::{
    Broadcaster, ConnectionLifecycle, ConnectionRegistry, HandlerRegistry,
};
use pos_realtime::config::{AppConfig, LogFormat, ServerConfig};
use pos_realtime::ports::{Backplane, InstanceId};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config.server);
    config.validate()?;

    info!(
        environment = ?config.server.environment,
        namespace = %config.realtime.cluster_namespace,
        "Starting POS realtime server"
    );

    // Backplane: Redis when configured, otherwise single-instance in-memory
    let (backplane_tx, backplane_rx) = mpsc::unbounded_channel();
    let backplane: Arc<dyn Backplane> = match config.redis.url.as_deref().filter(|_| config.redis.is_enabled()) {
        Some(url) => {
            info!("Using Redis backplane");
            Arc::new(RedisBackplane::start(
                RedisBackplaneConfig {
                    url: url.to_string(),
                    backoff_initial: config.realtime.backoff_initial(),
                    backoff_max: config.realtime.backoff_max(),
                },
                backplane_tx,
            )?)
        }
        None => {
            warn!("No Redis URL configured, running as a single instance");
            Arc::new(InMemoryBackplane::standalone(backplane_tx))
        }
    };

    let instance = InstanceId::generate("pos-rt");
    info!(instance = %instance, backplane = backplane.name(), "Instance identity assigned");

    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = Arc::new(Broadcaster::new(
        backplane,
        Arc::clone(&registry),
        config.realtime.cluster_namespace.clone(),
        instance,
    ));
    let receiver = broadcaster.spawn_receiver(backplane_rx);

    let mut jwt = JwtConfig::new(config.auth.jwt_secret.clone());
    jwt.leeway_secs = config.auth.leeway_secs;
    if let Some(issuer) = &config.auth.issuer {
        jwt = jwt.with_issuer(issuer);
    }
    if let Some(audience) = &config.auth.audience {
        jwt = jwt.with_audience(audience);
    }

    let lifecycle = Arc::new(ConnectionLifecycle::new(
        registry,
        Arc::clone(&broadcaster),
        Arc::new(JwtTokenVerifier::new(jwt)),
        HandlerRegistry::with_defaults(),
        config.lifecycle(),
    ));
    let sweeper = lifecycle.spawn_sweeper();

    let app = realtime_router()
        .with_state(WebSocketState::new(Arc::clone(&lifecycle)))
        .layer(cors_layer(&config.server))
        .layer(TraceLayer::new_for_http());

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let shutdown_lifecycle = Arc::clone(&lifecycle);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_lifecycle.shutdown().await;
        })
        .await?;

    sweeper.abort();
    receiver.abort();
    info!("POS realtime server stopped");
    Ok(())
}

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&server.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match server.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                error!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
