//! Application startup and lifecycle management.

use crate::config::{DuesConfig, StorageBackend};
use crate::handlers::{admin, cashier, dues, health, history};
use crate::services::{
    init_metrics, Database, DuesEngine, DuesStore, MemoryStore, ReferencePolicy,
    ReferenceSweeper,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: DuesConfig,
    pub engine: DuesEngine,
}

/// Build the HTTP router over an engine.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(health::status))
        // Admin
        .route("/admin/residents", post(admin::register_resident))
        .route("/admin/residents/:resident_id", get(admin::get_resident))
        .route(
            "/admin/residents/:resident_id/deactivate",
            post(admin::deactivate_resident),
        )
        .route(
            "/admin/generate-monthly-dues",
            post(admin::generate_monthly_dues),
        )
        .route("/admin/references/expire", post(admin::expire_references))
        // Residents
        .route("/dues/:resident_id", get(dues::get_outstanding_debt))
        .route("/dues/:resident_id/reference", post(dues::issue_reference))
        .route(
            "/dues/:resident_id/reference/:code/cancel",
            post(dues::cancel_reference),
        )
        // Cashier
        .route("/cashier/search", post(cashier::search_reference))
        .route("/cashier/confirm", post(cashier::confirm_payment))
        // History
        .route("/history/:resident_id", get(history::get_payment_history));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .nest("/api/v1", api)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    shutdown_token: CancellationToken,
}

impl Application {
    /// Build the application with the storage backend named in `config`.
    pub async fn build(config: DuesConfig) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn DuesStore> = match (config.storage, &config.database) {
            (StorageBackend::Postgres, Some(database)) => {
                let db = Database::new(
                    &database.url,
                    database.max_connections,
                    database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    AppError::DatabaseError(e.into())
                })?;

                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    AppError::DatabaseError(e.into())
                })?;

                Arc::new(db)
            }
            (StorageBackend::Postgres, None) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "PostgreSQL storage selected without database settings"
                )));
            }
            (StorageBackend::Memory, _) => {
                tracing::warn!("Using in-memory storage, records are lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let policy = ReferencePolicy {
            ttl: config.references.ttl(),
            max_issue_attempts: config.references.max_issue_attempts,
        };
        let engine = DuesEngine::with_system_clock(store, policy);

        Self::build_with_engine(config, engine).await
    }

    /// Build the application around an existing engine.
    /// Tests use this to share a store and a manual clock with the server.
    pub async fn build_with_engine(
        config: DuesConfig,
        engine: DuesEngine,
    ) -> Result<Self, AppError> {
        init_metrics();

        let addr: SocketAddr = format!("{}:{}", config.common.host, config.common.port)
            .parse()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid listen address: {}", e))
            })?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, storage = ?config.storage, "Dues service listener bound");

        Ok(Self {
            port,
            listener,
            state: AppState { config, engine },
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Token that stops the server and the reference sweeper when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let sweeper = ReferenceSweeper::new(
            self.state.engine.clone(),
            self.state.config.references.sweep_interval(),
            self.shutdown_token.child_token(),
        )
        .spawn();

        let app = router(self.state);

        tracing::info!(
            service = "dues-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let shutdown = self.shutdown_token.clone();
        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.shutdown_token.cancel();
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "Reference sweeper task ended abnormally");
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
