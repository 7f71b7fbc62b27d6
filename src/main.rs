use donation_workflow::{
    api::{self, AppState},
    config::{database, settings},
    core::notification::{Dispatcher, dispatch_pending_notifications},
    errors::{Error, Result},
};
use dotenvy::dotenv;
use std::{env, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load the application settings
    let settings = settings::load_default_settings()
        .inspect_err(|e| error!("Critical error loading settings: {}", e))?;

    // 4. Connect and make sure the schema exists
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database schema ready."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    let dispatcher = Dispatcher::from_settings(&settings.notifications);

    if env::args().nth(1).as_deref() == Some("dispatch-notifications") {
        let summary = dispatch_pending_notifications(&db, &dispatcher).await?;
        info!(
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Notification dispatch pass finished"
        );
        return Ok(());
    }

    // 5. Serve HTTP
    // JWT_SECRET is loaded here, directly before use, not stored in Settings
    let jwt_secret = env::var("JWT_SECRET")
        .inspect_err(|e| error!("JWT_SECRET not found: {}", e))
        .map_err(|_| Error::Config {
            message: "JWT_SECRET must be set".to_string(),
        })?;

    let bind_addr = settings.server.bind_addr.clone();
    let state = Arc::new(AppState {
        db,
        dispatcher,
        settings,
        jwt_secret,
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(api::shutdown_signal())
        .await?;

    info!("Server stopped.");
    Ok(())
}
