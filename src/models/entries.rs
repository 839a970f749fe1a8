use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ranking::RankKey;

/// One waitlist participant, as stored in the `waitinglist` table.
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct Entry {
    pub id: i64,
    pub email: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub referral_count: i32,
    pub followup_sent: bool,
}

impl Entry {
    pub fn rank_key(&self) -> RankKey {
        RankKey {
            referral_count: self.referral_count,
            created_at: self.created_at,
            id: self.id,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSignup {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// Where an entry currently sits in the list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Standing {
    /// Zero-based: 0 means first place.
    pub people_ahead: u64,
    pub potential_jump: u64,
}

#[derive(Clone, Debug)]
pub struct SignupOutcome {
    pub entry: Entry,
    pub already_joined: bool,
}

#[derive(Clone, Debug)]
pub struct EntryDetails {
    pub entry: Entry,
    pub standing: Standing,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistStats {
    pub total_entries: i64,
    pub entries_with_referrals: i64,
    pub max_referrals: i32,
}
