use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use super::waitlist::WaitlistRequest;

mod entries;

#[derive(Clone)]
pub struct AppState {
    waitlist_channel: mpsc::Sender<WaitlistRequest>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub fn router(waitlist_channel: mpsc::Sender<WaitlistRequest>) -> Router {
    let app_state = AppState { waitlist_channel };

    Router::new()
        .route("/signup", post(entries::signup))
        .route("/api/join", post(entries::signup))
        .route(
            "/user/{referral_code}",
            get(entries::get_entry).delete(entries::remove_entry),
        )
        .route(
            "/api/user/{referral_code}",
            get(entries::get_entry).delete(entries::remove_entry),
        )
        .route("/stats", get(entries::stats))
        .route("/health", get(health))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(
    listen: &str,
    waitlist_channel: mpsc::Sender<WaitlistRequest>,
) -> Result<(), anyhow::Error> {
    let app = router(waitlist_channel);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("HTTP server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received.");
}
