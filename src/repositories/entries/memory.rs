use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;

use super::{EntryStore, StoreError, UniqueField};
use crate::models::entries::{Entry, WaitlistStats};
use crate::ranking::RankPredicate;

/// In-process store. Entries are keyed by referral code with a second map
/// from email to code; `insert` holds the email slot while claiming the code
/// slot, which makes both uniqueness checks part of the insert.
#[derive(Clone, Default)]
pub struct MemoryEntryStore {
    entries: Arc<DashMap<String, Entry>>,
    emails: Arc<DashMap<String, String>>,
    last_id: Arc<AtomicI64>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts with an explicit creation time.
    pub fn insert_at(
        &self,
        email: &str,
        referral_code: &str,
        referred_by: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<Entry, StoreError> {
        let email_slot = match self.emails.entry(email.to_string()) {
            Slot::Occupied(_) => return Err(StoreError::Conflict(UniqueField::Email)),
            Slot::Vacant(slot) => slot,
        };
        let code_slot = match self.entries.entry(referral_code.to_string()) {
            Slot::Occupied(_) => return Err(StoreError::Conflict(UniqueField::ReferralCode)),
            Slot::Vacant(slot) => slot,
        };

        let entry = Entry {
            id: self.last_id.fetch_add(1, Ordering::SeqCst) + 1,
            email: email.to_string(),
            referral_code: referral_code.to_string(),
            referred_by: referred_by.map(str::to_string),
            created_at,
            referral_count: 0,
            followup_sent: false,
        };

        code_slot.insert(entry.clone());
        email_slot.insert(referral_code.to_string());

        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Entry>, StoreError> {
        let code = match self.emails.get(email) {
            Some(code) => code.value().clone(),
            None => return Ok(None),
        };

        Ok(self.entries.get(&code).map(|entry| entry.value().clone()))
    }

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Entry>, StoreError> {
        Ok(self.entries.get(code).map(|entry| entry.value().clone()))
    }

    async fn insert(
        &self,
        email: &str,
        referral_code: &str,
        referred_by: Option<&str>,
    ) -> Result<Entry, StoreError> {
        self.insert_at(email, referral_code, referred_by, Utc::now())
    }

    async fn increment_referral_count(&self, code: &str) -> Result<Option<Entry>, StoreError> {
        Ok(self.entries.get_mut(code).map(|mut entry| {
            entry.referral_count += 1;
            entry.value().clone()
        }))
    }

    async fn count_where(&self, predicate: RankPredicate) -> Result<u64, StoreError> {
        let count = self
            .entries
            .iter()
            .filter(|entry| predicate.matches(&entry.rank_key()))
            .count();

        Ok(count as u64)
    }

    async fn delete(&self, code: &str) -> Result<(), StoreError> {
        let email = self
            .entries
            .get(code)
            .map(|entry| entry.email.clone())
            .ok_or(StoreError::NotFound)?;

        // Same lock order as `insert_at`: the email slot is held until the
        // entry is gone, so a mapped email always resolves to an entry.
        match self.emails.entry(email) {
            Slot::Occupied(slot) if slot.get().as_str() == code => {
                let removed = self.entries.remove(code);
                slot.remove();
                removed.map(|_| ()).ok_or(StoreError::NotFound)
            }
            _ => self
                .entries
                .remove(code)
                .map(|_| ())
                .ok_or(StoreError::NotFound),
        }
    }

    async fn mark_followup_sent(&self, email: &str) -> Result<(), StoreError> {
        let code = self
            .emails
            .get(email)
            .map(|code| code.value().clone())
            .ok_or(StoreError::NotFound)?;

        match self.entries.get_mut(&code) {
            Some(mut entry) => {
                entry.followup_sent = true;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_unnotified(&self, older_than: Duration) -> Result<Vec<Entry>, StoreError> {
        let cutoff = Utc::now() - older_than;
        let mut pending: Vec<Entry> = self
            .entries
            .iter()
            .filter(|entry| !entry.followup_sent && entry.created_at <= cutoff)
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|entry| (entry.created_at, entry.id));

        Ok(pending)
    }

    async fn stats(&self) -> Result<WaitlistStats, StoreError> {
        let mut stats = WaitlistStats::default();
        for entry in self.entries.iter() {
            stats.total_entries += 1;
            if entry.referral_count > 0 {
                stats.entries_with_referrals += 1;
            }
            stats.max_referrals = stats.max_referrals.max(entry.referral_count);
        }

        Ok(stats)
    }
}
