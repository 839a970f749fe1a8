use async_trait::async_trait;
use serde_json::json;

use crate::models::notifications::{Notification, NotificationKind};
use crate::settings;

/// Delivers waitlist mails. Never fails past this boundary: the result only
/// says whether the provider accepted the message.
#[async_trait]
pub trait NotificationSender: Send + Sync + 'static {
    async fn send(&self, notification: &Notification) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub html: String,
}

pub fn referral_link(base_url: &str, referral_code: &str) -> String {
    format!("{}/?ref={}", base_url.trim_end_matches('/'), referral_code)
}

fn places(jump: u64) -> &'static str {
    if jump == 1 {
        "place"
    } else {
        "places"
    }
}

pub fn render(notification: &Notification, base_url: &str) -> RenderedMail {
    let link = referral_link(base_url, &notification.referral_code);
    let rank = notification.people_ahead + 1;
    let ahead = notification.people_ahead;
    let jump_line = notification
        .jump
        .map(|jump| {
            format!(
                "<p>Your next signup through your link: <strong>+{jump} {}</strong></p>",
                places(jump)
            )
        })
        .unwrap_or_default();

    let (subject, headline) = match notification.kind {
        NotificationKind::Welcome => ("Welcome to the waitlist!", "You're on the list."),
        NotificationKind::PositionUpdate => (
            "You moved up the waitlist!",
            "Someone joined with your link.",
        ),
        NotificationKind::FollowUp => (
            "Secure your early access - update",
            "Here is your current status.",
        ),
    };

    let html = format!(
        r#"<h1>{headline}</h1>
<p>Your position: <strong>#{rank}</strong> ({ahead} people ahead of you)</p>
{jump_line}
<p>Share your personal link to move up: <a href="{link}">{link}</a></p>"#
    );

    RenderedMail {
        subject: subject.to_string(),
        html,
    }
}

pub struct BrevoSender {
    url: String,
    api_key: Option<String>,
    sender_name: String,
    sender_email: String,
    base_url: String,
    client: reqwest::Client,
}

impl BrevoSender {
    pub fn new(settings: &settings::Brevo) -> Self {
        Self {
            url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|key| !key.is_empty()),
            sender_name: settings.sender_name.clone(),
            sender_email: settings.sender_email.clone(),
            base_url: settings.base_url.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn deliver(&self, api_key: &str, notification: &Notification) -> Result<(), anyhow::Error> {
        let mail = render(notification, &self.base_url);
        let payload = json!({
            "sender": { "name": self.sender_name, "email": self.sender_email },
            "to": [{ "email": notification.email }],
            "subject": mail.subject,
            "htmlContent": mail.html,
        });

        let response = self
            .client
            .post(format!("{}/smtp/email", self.url))
            .header("api-key", api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Brevo rejected mail with {}: {}", status, body);
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationSender for BrevoSender {
    async fn send(&self, notification: &Notification) -> bool {
        let Some(api_key) = self.api_key.as_deref() else {
            log::warn!(
                "No Brevo API key configured, not sending {:?} mail to {}",
                notification.kind,
                notification.email
            );
            return false;
        };

        match self.deliver(api_key, notification).await {
            Ok(()) => {
                log::info!(
                    "Sent {:?} mail to {} (position {})",
                    notification.kind,
                    notification.email,
                    notification.people_ahead + 1
                );
                true
            }
            Err(e) => {
                log::error!(
                    "Failed to send {:?} mail to {}: {}",
                    notification.kind,
                    notification.email,
                    e
                );
                false
            }
        }
    }
}
