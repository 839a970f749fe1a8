use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tokio::sync::mpsc;

use crate::ranking::JumpBounds;
use crate::repositories::entries::{EntryStore, StoreError};
use crate::repositories::mail::NotificationSender;
use crate::settings::Settings;

pub mod followup;
pub mod http;
pub mod notifications;
pub mod waitlist;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Entry not found")]
    NotFound,
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => ServiceError::NotFound,
            StoreError::Unavailable(reason) => ServiceError::StoreUnavailable(reason),
            StoreError::Conflict(field) => {
                ServiceError::Internal(format!("Unresolved conflict on {:?}", field))
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServiceError::Validation(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            ServiceError::NotFound => (StatusCode::NOT_FOUND, "Entry not found".to_string()),
            _ => {
                log::error!("Request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Starts the notification and waitlist services and returns the channel the
/// HTTP layer talks to.
pub fn start_core_services(
    store: Arc<dyn EntryStore>,
    sender: Arc<dyn NotificationSender>,
    jump_bounds: JumpBounds,
    queue_capacity: usize,
) -> mpsc::Sender<waitlist::WaitlistRequest> {
    let (notification_tx, mut notification_rx) = mpsc::channel(queue_capacity);
    let (waitlist_tx, mut waitlist_rx) = mpsc::channel(queue_capacity);

    let mut notification_service = notifications::NotificationService::new();
    let mut waitlist_service = waitlist::WaitlistService::new();

    log::info!("Starting notification service.");
    tokio::spawn(async move {
        notification_service
            .run(
                notifications::NotificationRequestHandler::new(sender),
                &mut notification_rx,
            )
            .await;
    });

    log::info!("Starting waitlist service.");
    tokio::spawn(async move {
        waitlist_service
            .run(
                waitlist::WaitlistRequestHandler::new(store, notification_tx, jump_bounds),
                &mut waitlist_rx,
            )
            .await;
    });

    waitlist_tx
}

pub async fn start_services(
    store: Arc<dyn EntryStore>,
    sender: Arc<dyn NotificationSender>,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let jump_bounds = JumpBounds::new(
        settings.ranking.next_jump_min,
        settings.ranking.next_jump_max,
    );

    let waitlist_tx = start_core_services(
        store.clone(),
        sender.clone(),
        jump_bounds,
        settings.queues.capacity,
    );

    if settings.followup.enabled {
        log::info!("Starting follow-up sweep.");
        followup::FollowUpSweep::new(
            store,
            sender,
            settings.followup.delay(),
            settings.followup.interval(),
        )
        .start();
    } else {
        log::info!("Follow-up sweep disabled.");
    }

    log::info!("Starting HTTP server.");
    http::start_http_server(&settings.http.listen, waitlist_tx).await?;

    Ok(())
}
