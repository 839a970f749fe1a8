use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::notifications::NotificationRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::entries::{Entry, EntryDetails, SignupOutcome, WaitlistStats};
use crate::models::notifications::{Notification, NotificationKind};
use crate::ranking::{self, JumpBounds};
use crate::repositories::entries::{EntryStore, StoreError, UniqueField};

const MAX_EMAIL_LENGTH: usize = 254;
const REFERRAL_CODE_ATTEMPTS: usize = 3;

pub enum WaitlistRequest {
    Signup {
        email: String,
        referral_code: Option<String>,
        response: oneshot::Sender<Result<SignupOutcome, ServiceError>>,
    },
    GetEntry {
        referral_code: String,
        response: oneshot::Sender<Result<EntryDetails, ServiceError>>,
    },
    RemoveEntry {
        referral_code: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    Stats {
        response: oneshot::Sender<Result<WaitlistStats, ServiceError>>,
    },
}

enum Insertion {
    Created(Entry),
    AlreadyJoined(Entry),
}

pub fn validate_email(raw: &str) -> Result<String, ServiceError> {
    let email = raw.trim();

    if email.is_empty() {
        return Err(ServiceError::Validation("Email address is required".to_string()));
    }
    if email.len() > MAX_EMAIL_LENGTH || email.chars().any(char::is_whitespace) {
        return Err(ServiceError::Validation("Invalid email address".to_string()));
    }

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(email.to_string())
        }
        _ => Err(ServiceError::Validation("Invalid email address".to_string())),
    }
}

#[derive(Clone)]
pub struct WaitlistRequestHandler {
    store: Arc<dyn EntryStore>,
    notification_channel: mpsc::Sender<NotificationRequest>,
    jump_bounds: JumpBounds,
}

impl WaitlistRequestHandler {
    pub fn new(
        store: Arc<dyn EntryStore>,
        notification_channel: mpsc::Sender<NotificationRequest>,
        jump_bounds: JumpBounds,
    ) -> Self {
        WaitlistRequestHandler {
            store,
            notification_channel,
            jump_bounds,
        }
    }

    /// Looks the email up and creates the entry if it is new. A known email
    /// returns the existing entry without any referral side effects.
    pub async fn signup(
        &self,
        email: &str,
        referral_code: Option<String>,
    ) -> Result<SignupOutcome, ServiceError> {
        let email = validate_email(email)?;
        let referred_by = referral_code
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty());

        if let Some(existing) = self.store.find_by_email(&email).await? {
            log::info!("{} already joined the waitlist.", email);
            return Ok(SignupOutcome {
                entry: existing,
                already_joined: true,
            });
        }

        let entry = match self.insert_entry(&email, referred_by.as_deref()).await? {
            Insertion::Created(entry) => entry,
            Insertion::AlreadyJoined(existing) => {
                return Ok(SignupOutcome {
                    entry: existing,
                    already_joined: true,
                })
            }
        };
        log::info!("{} joined the waitlist with code {}.", entry.email, entry.referral_code);

        let referrer = match entry.referred_by.as_deref() {
            Some(code) => self.attribute_referral(code).await?,
            None => None,
        };

        self.notify_welcome(&entry).await;
        if let Some(referrer) = referrer {
            self.notify_referrer(&referrer).await;
        }

        Ok(SignupOutcome {
            entry,
            already_joined: false,
        })
    }

    /// The store's unique constraints are the source of truth: a concurrent
    /// signup for the same email surfaces here as a conflict and resolves to
    /// the entry that won.
    async fn insert_entry(
        &self,
        email: &str,
        referred_by: Option<&str>,
    ) -> Result<Insertion, ServiceError> {
        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            let referral_code = Uuid::new_v4().hyphenated().to_string();

            match self.store.insert(email, &referral_code, referred_by).await {
                Ok(entry) => return Ok(Insertion::Created(entry)),
                Err(StoreError::Conflict(UniqueField::Email)) => {
                    if let Some(existing) = self.store.find_by_email(email).await? {
                        return Ok(Insertion::AlreadyJoined(existing));
                    }
                }
                Err(StoreError::Conflict(UniqueField::ReferralCode)) => {
                    log::warn!("Referral code collision, generating a new one.");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::Internal(
            "Could not allocate a unique referral code".to_string(),
        ))
    }

    async fn attribute_referral(&self, code: &str) -> Result<Option<Entry>, ServiceError> {
        let referrer = self.store.increment_referral_count(code).await?;

        match &referrer {
            Some(referrer) => log::info!(
                "Credited referral to {} ({} referrals).",
                referrer.referral_code,
                referrer.referral_count
            ),
            None => log::warn!("Unknown referral code {}, skipping attribution.", code),
        }

        Ok(referrer)
    }

    async fn notify_welcome(&self, entry: &Entry) {
        match ranking::standing(self.store.as_ref(), entry).await {
            Ok(standing) => self.submit(Notification {
                kind: NotificationKind::Welcome,
                email: entry.email.clone(),
                referral_code: entry.referral_code.clone(),
                people_ahead: standing.people_ahead,
                jump: Some(standing.potential_jump),
            }),
            Err(e) => log::error!(
                "Could not rank {} for the welcome mail: {}",
                entry.referral_code,
                e
            ),
        }
    }

    async fn notify_referrer(&self, referrer: &Entry) {
        let standing = ranking::standing(self.store.as_ref(), referrer).await;
        let next_jump =
            ranking::referrer_next_jump(self.store.as_ref(), referrer, self.jump_bounds).await;

        match (standing, next_jump) {
            (Ok(standing), Ok(next_jump)) => self.submit(Notification {
                kind: NotificationKind::PositionUpdate,
                email: referrer.email.clone(),
                referral_code: referrer.referral_code.clone(),
                people_ahead: standing.people_ahead,
                jump: Some(next_jump),
            }),
            (Err(e), _) | (_, Err(e)) => log::error!(
                "Could not rank referrer {} for the update mail: {}",
                referrer.referral_code,
                e
            ),
        }
    }

    /// Queues without waiting; a full queue drops the mail.
    fn submit(&self, notification: Notification) {
        if let Err(e) = self
            .notification_channel
            .try_send(NotificationRequest::Send(notification))
        {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "service stopped",
            };
            log::warn!("Dropped notification: {}.", reason);
        }
    }

    pub async fn get_entry(&self, referral_code: &str) -> Result<EntryDetails, ServiceError> {
        let entry = self
            .store
            .find_by_referral_code(referral_code)
            .await?
            .ok_or(ServiceError::NotFound)?;
        let standing = ranking::standing(self.store.as_ref(), &entry).await?;

        Ok(EntryDetails { entry, standing })
    }

    pub async fn remove_entry(&self, referral_code: &str) -> Result<(), ServiceError> {
        self.store.delete(referral_code).await?;
        log::info!("Removed entry with code {}.", referral_code);

        Ok(())
    }

    pub async fn stats(&self) -> Result<WaitlistStats, ServiceError> {
        Ok(self.store.stats().await?)
    }
}

#[async_trait]
impl RequestHandler<WaitlistRequest> for WaitlistRequestHandler {
    async fn handle_request(&self, request: WaitlistRequest) {
        match request {
            WaitlistRequest::Signup {
                email,
                referral_code,
                response,
            } => {
                let result = self.signup(&email, referral_code).await;
                let _ = response.send(result);
            }
            WaitlistRequest::GetEntry {
                referral_code,
                response,
            } => {
                let result = self.get_entry(&referral_code).await;
                let _ = response.send(result);
            }
            WaitlistRequest::RemoveEntry {
                referral_code,
                response,
            } => {
                let result = self.remove_entry(&referral_code).await;
                let _ = response.send(result);
            }
            WaitlistRequest::Stats { response } => {
                let _ = response.send(self.stats().await);
            }
        }
    }
}

pub struct WaitlistService;

impl WaitlistService {
    pub fn new() -> Self {
        WaitlistService {}
    }
}

impl Default for WaitlistService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Service<WaitlistRequest, WaitlistRequestHandler> for WaitlistService {}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::repositories::entries::MemoryEntryStore;

    fn handler_with(
        store: MemoryEntryStore,
        capacity: usize,
    ) -> (WaitlistRequestHandler, mpsc::Receiver<NotificationRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handler = WaitlistRequestHandler::new(Arc::new(store), tx, JumpBounds::default());
        (handler, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<NotificationRequest>) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Ok(NotificationRequest::Send(notification)) = rx.try_recv() {
            notifications.push(notification);
        }
        notifications
    }

    #[test]
    fn email_validation() {
        assert_eq!(validate_email("  ada@example.com ").unwrap(), "ada@example.com");
        for bad in ["", "   ", "ada", "@example.com", "ada@", "a b@example.com", "a@b@c"] {
            assert!(
                matches!(validate_email(bad), Err(ServiceError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn signup_creates_entry_and_queues_welcome() {
        let store = MemoryEntryStore::new();
        let (handler, mut rx) = handler_with(store.clone(), 16);

        handler.signup("first@example.com", None).await.unwrap();
        let outcome = handler.signup("second@example.com", None).await.unwrap();

        assert!(!outcome.already_joined);
        assert_eq!(outcome.entry.referral_count, 0);
        assert!(outcome.entry.referred_by.is_none());

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].kind, NotificationKind::Welcome);
        assert_eq!(sent[1].email, "second@example.com");
        assert_eq!(sent[1].people_ahead, 1);
        assert_eq!(sent[1].jump, Some(1));
    }

    #[tokio::test]
    async fn signing_up_twice_is_idempotent() {
        let store = MemoryEntryStore::new();
        let (handler, mut rx) = handler_with(store.clone(), 16);

        let referrer = handler.signup("ref@example.com", None).await.unwrap();
        let code = referrer.entry.referral_code.clone();

        let first = handler
            .signup("ada@example.com", Some(code.clone()))
            .await
            .unwrap();
        drain(&mut rx);

        let second = handler
            .signup("ada@example.com", Some(code.clone()))
            .await
            .unwrap();

        assert!(second.already_joined);
        assert_eq!(first.entry.referral_code, second.entry.referral_code);
        assert_eq!(store.len(), 2);

        let referrer = store.find_by_referral_code(&code).await.unwrap().unwrap();
        assert_eq!(referrer.referral_count, 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn referral_credits_referrer_and_queues_position_update() {
        let store = MemoryEntryStore::new();
        let (handler, mut rx) = handler_with(store.clone(), 16);

        handler.signup("early@example.com", None).await.unwrap();
        let referrer = handler.signup("ref@example.com", None).await.unwrap();
        drain(&mut rx);

        let outcome = handler
            .signup(
                "friend@example.com",
                Some(referrer.entry.referral_code.clone()),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.entry.referred_by.as_deref(),
            Some(referrer.entry.referral_code.as_str())
        );

        let updated = store
            .find_by_referral_code(&referrer.entry.referral_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.referral_count, 1);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, NotificationKind::Welcome);
        assert_eq!(sent[0].people_ahead, 2);

        let update = &sent[1];
        assert_eq!(update.kind, NotificationKind::PositionUpdate);
        assert_eq!(update.email, "ref@example.com");
        assert_eq!(update.people_ahead, 0);
        // Both zero-referral entries are below the referrer now.
        assert_eq!(update.jump, Some(2));
    }

    #[tokio::test]
    async fn unknown_referral_code_is_ignored() {
        let store = MemoryEntryStore::new();
        let (handler, mut rx) = handler_with(store.clone(), 16);

        let outcome = handler
            .signup("ada@example.com", Some("no-such-code".to_string()))
            .await
            .unwrap();

        assert_eq!(outcome.entry.referred_by.as_deref(), Some("no-such-code"));
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Welcome);
    }

    #[tokio::test]
    async fn blank_referral_code_is_treated_as_absent() {
        let store = MemoryEntryStore::new();
        let (handler, _rx) = handler_with(store, 16);

        let outcome = handler
            .signup("ada@example.com", Some("   ".to_string()))
            .await
            .unwrap();
        assert!(outcome.entry.referred_by.is_none());
    }

    #[tokio::test]
    async fn invalid_email_is_rejected_without_writing() {
        let store = MemoryEntryStore::new();
        let (handler, _rx) = handler_with(store.clone(), 16);

        let result = handler.signup("not-an-email", None).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_referred_signups_are_all_counted() {
        let store = MemoryEntryStore::new();
        let (handler, _rx) = handler_with(store.clone(), 1024);
        let referrer = handler.signup("ref@example.com", None).await.unwrap();
        let code = referrer.entry.referral_code.clone();

        let mut tasks = Vec::new();
        for i in 0..50 {
            let handler = handler.clone();
            let code = code.clone();
            tasks.push(tokio::spawn(async move {
                handler
                    .signup(&format!("friend{i}@example.com"), Some(code))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let referrer = store.find_by_referral_code(&code).await.unwrap().unwrap();
        assert_eq!(referrer.referral_count, 50);
        assert_eq!(store.len(), 51);
    }

    #[tokio::test]
    async fn concurrent_signups_for_one_email_create_one_entry() {
        let store = MemoryEntryStore::new();
        let (handler, _rx) = handler_with(store.clone(), 1024);

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                handler.signup("same@example.com", None).await.unwrap()
            }));
        }

        let mut codes = Vec::new();
        for task in tasks {
            codes.push(task.await.unwrap().entry.referral_code);
        }
        codes.dedup();

        assert_eq!(codes.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn full_notification_queue_does_not_block_signups() {
        let store = MemoryEntryStore::new();
        let (handler, _rx) = handler_with(store.clone(), 1);

        for i in 0..5 {
            handler
                .signup(&format!("user{i}@example.com"), None)
                .await
                .unwrap();
        }

        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn get_entry_reports_position_and_jump() {
        let store = MemoryEntryStore::new();
        let now = Utc::now();
        store.insert_at("a@x.io", "a", None, now).unwrap();
        store.insert_at("b@x.io", "b", None, now + Duration::seconds(1)).unwrap();
        store.insert_at("c@x.io", "c", None, now + Duration::seconds(2)).unwrap();
        store.increment_referral_count("c").await.unwrap();
        store.increment_referral_count("c").await.unwrap();
        let (handler, _rx) = handler_with(store.clone(), 16);

        let c = handler.get_entry("c").await.unwrap();
        let a = handler.get_entry("a").await.unwrap();
        let b = handler.get_entry("b").await.unwrap();
        assert_eq!(c.standing.people_ahead, 0);
        assert_eq!(a.standing.people_ahead, 1);
        assert_eq!(a.standing.potential_jump, 0);
        assert_eq!(b.standing.people_ahead, 2);
        assert_eq!(b.standing.potential_jump, 1);
        assert_eq!(c.entry.referral_count, 2);

        handler.remove_entry("a").await.unwrap();
        let b = handler.get_entry("b").await.unwrap();
        assert_eq!(b.standing.people_ahead, 1);
        assert_eq!(b.standing.potential_jump, 0);
    }

    #[tokio::test]
    async fn removal_of_unknown_code_is_not_found() {
        let store = MemoryEntryStore::new();
        let (handler, _rx) = handler_with(store.clone(), 16);

        assert!(matches!(
            handler.remove_entry("missing").await,
            Err(ServiceError::NotFound)
        ));

        let outcome = handler.signup("ada@example.com", None).await.unwrap();
        let code = outcome.entry.referral_code;
        handler.remove_entry(&code).await.unwrap();

        assert!(matches!(
            handler.get_entry(&code).await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn referrer_removal_leaves_referrals_dangling() {
        let store = MemoryEntryStore::new();
        let (handler, _rx) = handler_with(store.clone(), 16);

        let referrer = handler.signup("ref@example.com", None).await.unwrap();
        let code = referrer.entry.referral_code;
        let friend = handler
            .signup("friend@example.com", Some(code.clone()))
            .await
            .unwrap();
        handler.remove_entry(&code).await.unwrap();

        let friend = handler.get_entry(&friend.entry.referral_code).await.unwrap();
        assert_eq!(friend.entry.referred_by.as_deref(), Some(code.as_str()));

        let late = handler
            .signup("late@example.com", Some(code))
            .await
            .unwrap();
        assert!(!late.already_joined);
    }
}
