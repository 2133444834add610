//! HTTP server initialization and lifecycle management
//!
//! This module handles all server setup:
//! - Tracing and metrics initialization
//! - Provider selection (OpenAI when configured, in-process otherwise)
//! - Router composition with rate limiting, metrics and tracing layers
//! - Graceful shutdown on Ctrl+C / SIGTERM

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};
use core_config::{
    env_optional,
    tracing::{init_tracing, install_color_eyre},
};
use domain_rag::{
    CompletionProvider, EmbeddingProvider, HashingEmbeddingProvider, InMemoryVectorStore,
    OpenAIChatProvider, OpenAIEmbeddingProvider, RagApiDoc, RagService,
    ScriptedCompletionProvider, handlers,
};
use eyre::{Result, WrapErr};
use observability::{init_metrics, metrics_handler, metrics_middleware};
use serde_json::json;
use tokio::signal;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, error, info, warn};
use utoipa::OpenApi;

use crate::config::Config;
use crate::rate_limit::{ClientRateLimiter, rate_limit};

const OFFLINE_ANSWER: &str =
    "No completion provider is configured. Set OPENAI_API_KEY to enable answers.";

/// How often idle rate-limit buckets are dropped
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

type Providers = (Arc<dyn EmbeddingProvider>, Arc<dyn CompletionProvider>);

/// OpenAI providers when `OPENAI_API_KEY` is set, in-process ones otherwise.
///
/// Production refuses to start without a real provider.
fn build_providers(config: &Config) -> Result<Providers> {
    if env_optional("OPENAI_API_KEY").is_some() {
        let embedder = OpenAIEmbeddingProvider::from_env()
            .wrap_err("Failed to configure OpenAI embeddings")?;
        let completion =
            OpenAIChatProvider::from_env().wrap_err("Failed to configure OpenAI chat")?;
        info!(
            embedding_model = %embedder.model(),
            chat_model = %completion.model(),
            "OpenAI providers configured"
        );
        return Ok((Arc::new(embedder), Arc::new(completion)));
    }

    if config.environment.is_production() {
        eyre::bail!("OPENAI_API_KEY is required in production");
    }

    warn!("No OpenAI API key found, using in-process hashing embeddings and a fixed answer");
    Ok((
        Arc::new(HashingEmbeddingProvider::default()),
        Arc::new(ScriptedCompletionProvider::new([OFFLINE_ANSWER])),
    ))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn openapi_handler() -> impl IntoResponse {
    Json(RagApiDoc::openapi())
}

/// Compose the full application router.
///
/// API routes are rate limited per client; `/health`, `/metrics` and the
/// OpenAPI document are not.
pub fn app(service: Arc<RagService>, config: &Config, limiter: ClientRateLimiter) -> Router {
    let api = handlers::router(service)
        .layer(middleware::from_fn_with_state(limiter, rate_limit));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api-docs/openapi.json", get(openapi_handler))
        .merge(api)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.server.request_timeout,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully");
        },
    }
}

/// Run the HTTP server
///
/// This is the main entry point for server initialization. It:
/// 1. Installs color-eyre and structured logging (JSON for prod, pretty for dev)
/// 2. Loads configuration from the environment
/// 3. Installs the Prometheus recorder
/// 4. Selects embedding and completion providers
/// 5. Serves the RAG API until Ctrl+C / SIGTERM
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - Provider configuration fails
/// - Server binding fails
/// - Server runtime encounters an error
pub async fn run() -> Result<()> {
    install_color_eyre();

    let config = Config::from_env().wrap_err("Failed to load configuration")?;
    init_tracing(&config.environment);
    init_metrics();

    let (embedder, completion) = build_providers(&config)?;
    let service = Arc::new(RagService::new(
        config.rag.clone(),
        Arc::new(InMemoryVectorStore::new()),
        embedder,
        completion,
    ));

    let limiter = ClientRateLimiter::new(config.rate_limit);
    let sweeper = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                limiter.retain_recent();
            }
        })
    };

    let router = app(service, &config, limiter);

    let listener = tokio::net::TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.server.address()))?;
    info!(
        address = %listener.local_addr()?,
        per_minute = config.rate_limit.per_minute.get(),
        burst = config.rate_limit.burst.get(),
        "RAG service listening"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .wrap_err("HTTP server failed")?;

    sweeper.abort();
    info!("RAG service shutdown complete");
    Ok(())
}
