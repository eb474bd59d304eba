use anyhow::Result;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clickmap::analytics::{Aggregator, GeoResolver, LocationNames, VisitRecorder};
use clickmap::api;
use clickmap::auth::AuthService;
use clickmap::config::{AuthMode, Config};
use clickmap::redirect;
use clickmap::storage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    info!("Initializing database...");
    let storage = storage::connect(&config.database).await?;
    info!("Database initialized successfully");

    let auth_service = Arc::new(AuthService::new(&config.auth, Arc::clone(&storage))?);
    match config.auth.mode {
        AuthMode::None => {
            info!("🔓 Authentication is disabled - all API requests act as an administrator");
        }
        AuthMode::Token => {
            info!(
                "🔐 Token authentication enabled (bearer header or '{}' cookie)",
                config.auth.cookie_name
            );
        }
    }

    let names = LocationNames::new();
    let aggregator = Aggregator::new(names.clone(), config.analytics.viewer_timezone());

    let recorder = if config.analytics.enabled {
        let geo = GeoResolver::from_config(&config.analytics, names)?;
        info!(
            "📊 Visit analytics enabled (geolocation: {}, queue: {})",
            geo.provider_name(),
            config.analytics.recorder_buffer_size
        );
        Some(Arc::new(VisitRecorder::new(
            Arc::clone(&storage),
            geo,
            config.analytics.recorder_buffer_size,
        )))
    } else {
        info!("📊 Visit analytics disabled");
        None
    };

    // Create routers
    let api_router = api::create_api_router(Arc::clone(&storage), auth_service, aggregator);
    let redirect_router = redirect::create_redirect_router(
        Arc::clone(&storage),
        recorder.clone(),
        config.analytics.clone(),
    );

    // Start API server
    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);
    info!("   - API endpoints available at http://{}/api/...", api_addr);

    // Start redirect server
    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr).await?;
    info!("🚀 Redirect server listening on http://{}", redirect_addr);

    // Run both servers until ctrl-c
    tokio::try_join!(
        axum::serve(api_listener, api_router)
            .with_graceful_shutdown(shutdown_signal())
            .into_future(),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .into_future(),
    )?;

    if let Some(recorder) = recorder {
        info!("Flushing queued visits before exit...");
        recorder.shutdown().await;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
