use std::sync::Arc;

use futures_util::stream::{self, StreamExt};

use crate::models::entries::Entry;
use crate::models::notifications::{Notification, NotificationKind};
use crate::ranking;
use crate::repositories::entries::{EntryStore, StoreError};
use crate::repositories::mail::NotificationSender;

const CONCURRENT_FOLLOWUPS: usize = 4;

/// Periodically mails entries that joined more than `delay` ago and have not
/// had their follow-up yet. The flag is only set after the provider accepted
/// the mail, so an entry is retried on the next tick until it goes through
/// and is never mailed twice once it has.
#[derive(Clone)]
pub struct FollowUpSweep {
    store: Arc<dyn EntryStore>,
    sender: Arc<dyn NotificationSender>,
    delay: chrono::Duration,
    interval: std::time::Duration,
}

impl FollowUpSweep {
    pub fn new(
        store: Arc<dyn EntryStore>,
        sender: Arc<dyn NotificationSender>,
        delay: chrono::Duration,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            sender,
            delay,
            interval,
        }
    }

    pub fn start(self) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(0) => log::debug!("Follow-up sweep found nothing to send."),
                    Ok(sent) => log::info!("Follow-up sweep sent {} mails.", sent),
                    Err(e) => log::error!("Follow-up sweep failed: {}", e),
                }
            }
        });

        log::info!("Follow-up sweep started");
    }

    /// Returns how many follow-ups were confirmed in this pass.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let pending = self.store.list_unnotified(self.delay).await?;

        let confirmed = stream::iter(pending)
            .map(|entry| self.follow_up(entry))
            .buffer_unordered(CONCURRENT_FOLLOWUPS)
            .filter(|sent| futures_util::future::ready(*sent))
            .count()
            .await;

        Ok(confirmed)
    }

    async fn follow_up(&self, entry: Entry) -> bool {
        let standing = match ranking::standing(self.store.as_ref(), &entry).await {
            Ok(standing) => standing,
            Err(e) => {
                log::error!("Could not rank {} for follow-up: {}", entry.referral_code, e);
                return false;
            }
        };

        let notification = Notification {
            kind: NotificationKind::FollowUp,
            email: entry.email.clone(),
            referral_code: entry.referral_code.clone(),
            people_ahead: standing.people_ahead,
            jump: None,
        };

        if !self.sender.send(&notification).await {
            log::warn!("Follow-up for {} not delivered, will retry.", entry.email);
            return false;
        }

        match self.store.mark_followup_sent(&entry.email).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Could not flag follow-up for {}: {}", entry.email, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::repositories::entries::MemoryEntryStore;
    use crate::services::notifications::testing::RecordingSender;

    fn sweep(store: &MemoryEntryStore, sender: Arc<RecordingSender>) -> FollowUpSweep {
        FollowUpSweep::new(
            Arc::new(store.clone()),
            sender,
            Duration::hours(24),
            std::time::Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn sends_each_follow_up_once() {
        let store = MemoryEntryStore::new();
        let now = Utc::now();
        store
            .insert_at("old@example.com", "old", None, now - Duration::hours(48))
            .unwrap();
        store
            .insert_at("fresh@example.com", "fresh", None, now)
            .unwrap();
        let sender = Arc::new(RecordingSender::new(true));
        let sweep = sweep(&store, sender.clone());

        assert_eq!(sweep.run_once().await.unwrap(), 1);
        assert_eq!(sweep.run_once().await.unwrap(), 0);

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::FollowUp);
        assert_eq!(sent[0].email, "old@example.com");
        assert_eq!(sent[0].people_ahead, 0);
        assert_eq!(sent[0].jump, None);

        let old = store.find_by_email("old@example.com").await.unwrap().unwrap();
        assert!(old.followup_sent);
        let fresh = store.find_by_email("fresh@example.com").await.unwrap().unwrap();
        assert!(!fresh.followup_sent);
    }

    #[tokio::test]
    async fn failed_delivery_leaves_entry_pending() {
        let store = MemoryEntryStore::new();
        store
            .insert_at("old@example.com", "old", None, Utc::now() - Duration::hours(48))
            .unwrap();
        let sender = Arc::new(RecordingSender::new(false));
        let sweep = sweep(&store, sender.clone());

        assert_eq!(sweep.run_once().await.unwrap(), 0);
        assert_eq!(sweep.run_once().await.unwrap(), 0);

        assert_eq!(sender.sent().len(), 2);
        let old = store.find_by_email("old@example.com").await.unwrap().unwrap();
        assert!(!old.followup_sent);
    }
}
