//! HTTP layer - axum router over the core workflow operations
//!
//! Handlers extract the authenticated [`Principal`](crate::core::access::Principal),
//! decode the request, call one core operation, and serialize its result. Status codes
//! come from [`Error::status_code`](crate::errors::Error::status_code).

/// Bearer-token authentication and the principal extractor
pub mod auth;
/// Error to response mapping
pub mod error;

mod admin;
mod appointments;
mod collections;
mod segregation;
mod testing;

use crate::{config::settings::Settings, core::notification::Dispatcher};
use axum::{
    Router,
    routing::{get, patch, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state available to every handler
#[derive(Debug)]
pub struct AppState {
    /// Database connection pool
    pub db: DatabaseConnection,
    /// Outbound notification dispatcher
    pub dispatcher: Dispatcher,
    /// Settings loaded at startup
    pub settings: Settings,
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Appointments
        .route(
            "/appointments",
            post(appointments::request).get(appointments::list_for_centre),
        )
        .route("/appointments/mine", get(appointments::list_mine))
        .route(
            "/appointments/:id",
            patch(appointments::update_status).delete(appointments::cancel),
        )
        // Collections
        .route(
            "/collections",
            post(collections::create).get(collections::list),
        )
        .route("/collections/:id", get(collections::get_one))
        // Testing: PATCH addresses the collection, GET addresses the test record
        .route("/testing", get(testing::list))
        .route("/testing/:id", get(testing::get_one).patch(testing::update))
        // Segregation: POST addresses the collection, GET addresses the segregated component
        .route("/segregation", get(segregation::list))
        .route(
            "/segregation/:id",
            get(segregation::get_one).post(segregation::segregate),
        )
        // Inventory and notifications
        .route("/inventory", get(admin::list_inventory))
        .route("/notifications", get(admin::list_notifications))
        .route("/notifications/dispatch", post(admin::dispatch_notifications))
        // Health
        .route("/health", get(admin::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Resolves once the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
