//! ComfyUIMini Engine - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use comfyui_mini_engine::infrastructure::{
    backend_socket::TungsteniteConnector, clock::SystemClock, comfyui::ComfyUIClient,
};
use comfyui_mini_engine::{api, App, EngineConfig};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the engine is usually run from `crates/engine`).
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyui_mini_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ComfyUIMini Engine");

    // Load configuration
    let config = EngineConfig::from_env();
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        comfyui_ws_url = %config.comfyui_ws_url,
        proxy_prefix = %config.proxy_prefix,
        "Backend configured"
    );
    tracing::info!(
        "History lookups configured with retry: max_retries={}, delay_ms={}",
        config.history_retry.max_retries,
        config.history_retry.delay.as_millis()
    );

    // Create infrastructure clients
    let backend = Arc::new(ComfyUIClient::new(&config.comfyui_url));
    let connector = Arc::new(TungsteniteConnector::new(
        config.comfyui_ws_url.clone(),
        config.ws_connect_timeout,
    ));
    let clock = Arc::new(SystemClock);

    let addr: SocketAddr = config.socket_addr()?;
    let cors = build_cors_layer(config.cors_allowed_origins.as_deref());

    // Create application
    let app = Arc::new(App::new(config, backend, connector, clock));

    let mut router = api::router(app).layer(TraceLayer::new_for_http());
    if let Some(cors) = cors {
        router = router.layer(cors);
    }

    // Start server
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}

fn build_cors_layer(allowed_origins: Option<&str>) -> Option<CorsLayer> {
    let allowed_origins = allowed_origins.map(str::trim).filter(|s| !s.is_empty())?;

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    if allowed_origins == "*" {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();

        if origins.is_empty() {
            return None;
        }

        cors = cors.allow_origin(origins);
    }

    Some(cors)
}
