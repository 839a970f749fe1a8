use async_trait::async_trait;
use chrono::Duration;

use crate::models::entries::{Entry, WaitlistStats};
use crate::ranking::RankPredicate;

mod memory;
mod postgres;

pub use memory::MemoryEntryStore;
pub use postgres::PgEntryStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    ReferralCode,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Conflict on unique field {0:?}")]
    Conflict(UniqueField),
    #[error("Entry not found")]
    NotFound,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable table of waitlist entries.
///
/// Implementations enforce uniqueness of `email` and `referral_code` inside
/// `insert` itself and apply `increment_referral_count` atomically, so
/// concurrent signups never produce duplicates or lose increments.
#[async_trait]
pub trait EntryStore: Send + Sync + 'static {
    async fn find_by_email(&self, email: &str) -> Result<Option<Entry>, StoreError>;

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Entry>, StoreError>;

    async fn insert(
        &self,
        email: &str,
        referral_code: &str,
        referred_by: Option<&str>,
    ) -> Result<Entry, StoreError>;

    /// Credits one referral to the entry owning `code` and returns it with the
    /// updated count, or `None` when no entry owns the code.
    async fn increment_referral_count(&self, code: &str) -> Result<Option<Entry>, StoreError>;

    async fn count_where(&self, predicate: RankPredicate) -> Result<u64, StoreError>;

    async fn delete(&self, code: &str) -> Result<(), StoreError>;

    async fn mark_followup_sent(&self, email: &str) -> Result<(), StoreError>;

    /// Entries still waiting for their follow-up and created at least
    /// `older_than` ago, oldest first.
    async fn list_unnotified(&self, older_than: Duration) -> Result<Vec<Entry>, StoreError>;

    async fn stats(&self) -> Result<WaitlistStats, StoreError>;
}
