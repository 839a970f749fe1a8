//! Rank computation over the waitlist.
//!
//! Entries are totally ordered by `(referral_count desc, created_at asc, id asc)`.
//! Everything here is a read: the functions count entries matching a
//! [`RankPredicate`] and never mutate the store, so they can run concurrently
//! without coordination. Results are snapshot values and may be stale by the
//! time they are displayed.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::models::entries::{Entry, Standing};
use crate::repositories::entries::{EntryStore, StoreError};

/// The part of an entry that decides its place in the list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RankKey {
    pub referral_count: i32,
    pub created_at: DateTime<Utc>,
    pub id: i64,
}

impl Ord for RankKey {
    /// `Less` means "ahead of".
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .referral_count
            .cmp(&self.referral_count)
            .then_with(|| self.tie_break(other))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl RankKey {
    fn tie_break(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }

    pub fn is_ahead_of(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Less
    }
}

/// Filters a store can count. Each backend evaluates them natively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankPredicate {
    /// Entries strictly ahead of the key in the total order.
    AheadOf(RankKey),
    /// Entries with the same referral count that win the tie-break.
    TiedAheadOf(RankKey),
    /// Entries with a lower referral count, or the same count and an
    /// earlier `(created_at, id)`.
    OvertakableBy(RankKey),
}

impl RankPredicate {
    pub fn matches(&self, candidate: &RankKey) -> bool {
        match self {
            RankPredicate::AheadOf(target) => candidate.is_ahead_of(target),
            RankPredicate::TiedAheadOf(target) => {
                candidate.referral_count == target.referral_count
                    && candidate.tie_break(target) == Ordering::Less
            }
            RankPredicate::OvertakableBy(target) => {
                candidate.referral_count < target.referral_count
                    || (candidate.referral_count == target.referral_count
                        && candidate.tie_break(target) == Ordering::Less)
            }
        }
    }
}

/// Display bounds for the referrer's "next jump".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JumpBounds {
    pub min: u64,
    pub max: u64,
}

impl Default for JumpBounds {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

impl JumpBounds {
    pub fn new(min: u64, max: u64) -> Self {
        Self {
            min: min.min(max),
            max,
        }
    }

    pub fn clamp(&self, value: u64) -> u64 {
        value.max(self.min).min(self.max)
    }
}

pub fn people_ahead<'a>(target: &RankKey, keys: impl IntoIterator<Item = &'a RankKey>) -> u64 {
    count_matching(RankPredicate::AheadOf(*target), keys)
}

pub fn potential_jump<'a>(target: &RankKey, keys: impl IntoIterator<Item = &'a RankKey>) -> u64 {
    count_matching(RankPredicate::TiedAheadOf(*target), keys)
}

/// Display heuristic for the position-update mail, not a rank: the number of
/// entries the referrer could pass with one more referral, clamped to
/// `bounds` so the figure is always positive and never implausibly large.
pub fn next_jump<'a>(
    target: &RankKey,
    keys: impl IntoIterator<Item = &'a RankKey>,
    bounds: JumpBounds,
) -> u64 {
    bounds.clamp(count_matching(RankPredicate::OvertakableBy(*target), keys))
}

fn count_matching<'a>(predicate: RankPredicate, keys: impl IntoIterator<Item = &'a RankKey>) -> u64 {
    keys.into_iter().filter(|key| predicate.matches(key)).count() as u64
}

/// Rank and potential jump of `entry` against the current store contents.
/// The entry must exist in the store.
pub async fn standing(store: &dyn EntryStore, entry: &Entry) -> Result<Standing, StoreError> {
    let key = entry.rank_key();
    let people_ahead = store.count_where(RankPredicate::AheadOf(key)).await?;
    let potential_jump = store.count_where(RankPredicate::TiedAheadOf(key)).await?;

    Ok(Standing {
        people_ahead,
        potential_jump,
    })
}

pub async fn referrer_next_jump(
    store: &dyn EntryStore,
    entry: &Entry,
    bounds: JumpBounds,
) -> Result<u64, StoreError> {
    let overtakable = store
        .count_where(RankPredicate::OvertakableBy(entry.rank_key()))
        .await?;

    Ok(bounds.clamp(overtakable))
}
