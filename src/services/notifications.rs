use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use super::{RequestHandler, Service};
use crate::models::notifications::Notification;
use crate::repositories::mail::NotificationSender;

/// Mails in flight at once. Anything beyond this waits in the channel, and
/// once the channel is full new mails are dropped by the producer.
pub const CONCURRENT_SENDS: usize = 4;

pub enum NotificationRequest {
    Send(Notification),
}

#[derive(Clone)]
pub struct NotificationRequestHandler {
    sender: Arc<dyn NotificationSender>,
}

impl NotificationRequestHandler {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    async fn send(&self, notification: Notification) {
        if !self.sender.send(&notification).await {
            log::warn!(
                "{:?} notification for {} was not delivered.",
                notification.kind,
                notification.email
            );
        }
    }
}

#[async_trait]
impl RequestHandler<NotificationRequest> for NotificationRequestHandler {
    async fn handle_request(&self, request: NotificationRequest) {
        match request {
            NotificationRequest::Send(notification) => self.send(notification).await,
        }
    }
}

pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        NotificationService {}
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Service<NotificationRequest, NotificationRequestHandler> for NotificationService {
    async fn run(
        &mut self,
        handler: NotificationRequestHandler,
        receiver: &mut mpsc::Receiver<NotificationRequest>,
    ) {
        stream::unfold(receiver, |receiver| async move {
            receiver.recv().await.map(|request| (request, receiver))
        })
        .for_each_concurrent(CONCURRENT_SENDS, |request| handler.handle_request(request))
        .await;
    }
}
