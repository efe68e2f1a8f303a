//! Application startup and lifecycle management.

use crate::config::ServiceConfig;
use crate::handlers;
use crate::services::{
    init_metrics, ChallanLookup, Database, InMemoryStore, LedgerService, LedgerStore,
    RazorpayClient,
};
use crate::workers::Reconciler;
use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use challan_core::error::AppError;
use challan_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub ledger: LedgerService,
    pub challans: ChallanLookup,
}

pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    config: ServiceConfig,
    state: AppState,
}

impl Application {
    /// Connect the configured ledger store and bind the listener.
    ///
    /// Without `DATABASE_URL` the service runs on an in-memory store seeded
    /// with demo vehicles.
    pub async fn build(config: ServiceConfig) -> Result<Self, AppError> {
        let store: Arc<dyn LedgerStore> = match &config.database {
            Some(db_config) => {
                let db = Database::new(
                    db_config.url.expose_secret(),
                    db_config.max_connections,
                    db_config.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;
                Arc::new(db)
            }
            None => {
                tracing::warn!("DATABASE_URL not set - using in-memory ledger store with demo data");
                Arc::new(InMemoryStore::with_demo_data())
            }
        };

        Self::build_with_store(config, store).await
    }

    pub async fn build_with_store(
        config: ServiceConfig,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let razorpay = RazorpayClient::new(config.razorpay.clone()).map_err(|e| {
            tracing::error!(error = %e, "Failed to build Razorpay client");
            AppError::ConfigError(e)
        })?;
        if razorpay.is_configured() {
            tracing::info!("Razorpay client initialized");
        } else {
            tracing::warn!("Razorpay credentials not configured - order creation will fail");
        }

        let state = AppState {
            ledger: LedgerService::new(store.clone(), razorpay),
            challans: ChallanLookup::new(store.clone()),
            store,
        };

        let http_addr = config.common.bind_addr()?;
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Challan service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            config,
            state,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn store(&self) -> Arc<dyn LedgerStore> {
        self.state.store.clone()
    }

    /// Serve HTTP and run the reconciler until the server exits or
    /// `shutdown` is cancelled.
    pub async fn run_until_stopped(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let reconciler = Reconciler::new(self.config.reconciler.clone(), self.state.store.clone());
        let reconciler_token = reconciler.shutdown_token();
        let reconciler_handle = reconciler.start();

        let router = router(self.state, &self.config.cors_allowed_origins);

        tracing::info!(
            service = "challan-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.http_listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;

        reconciler_token.cancel();
        if let Some(handle) = reconciler_handle {
            let _ = handle.await;
        }

        if let Err(e) = &result {
            tracing::error!(error = %e, "HTTP server error");
        }
        result
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/health", get(handlers::api_health))
        .route(
            "/api/payment/create-order",
            post(handlers::payment::create_order),
        )
        .route("/api/payment/verify", post(handlers::payment::verify_payment))
        .route(
            "/api/payment/receipt/:receipt_number",
            get(handlers::payment::get_receipt),
        )
        .route(
            "/api/payment/receipt/by-payment/:gateway_payment_id",
            get(handlers::payment::get_receipt_by_payment),
        )
        .route(
            "/api/payment/user-receipts",
            get(handlers::payment::user_receipts),
        )
        .route(
            "/api/challan/:vehicle_number",
            get(handlers::challan::get_challans),
        )
        .route(
            "/api/vehicle/:vehicle_number",
            get(handlers::challan::get_vehicle),
        )
        .layer(from_fn(metrics_middleware))
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
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}
