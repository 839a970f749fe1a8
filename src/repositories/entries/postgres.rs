use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{EntryStore, StoreError, UniqueField};
use crate::models::entries::{Entry, WaitlistStats};
use crate::ranking::{RankKey, RankPredicate};

const ENTRY_COLUMNS: &str =
    "id, email, referral_code, referred_by, created_at, referral_count, followup_sent";

#[derive(Clone)]
pub struct PgEntryStore {
    conn: PgPool,
}

impl PgEntryStore {
    pub fn new(conn: PgPool) -> Self {
        PgEntryStore { conn }
    }

    pub async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::migrate!("./migrations").run(&self.conn).await?;
        Ok(())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            if db_error.is_unique_violation() {
                let field = match db_error.constraint() {
                    Some(constraint) if constraint.contains("referral_code") => {
                        UniqueField::ReferralCode
                    }
                    _ => UniqueField::Email,
                };
                return StoreError::Conflict(field);
            }
        }

        StoreError::Unavailable(error.to_string())
    }
}

fn push_tie_break(builder: &mut QueryBuilder<'_, Postgres>, key: &RankKey) {
    builder
        .push("(created_at < ")
        .push_bind(key.created_at)
        .push(" OR (created_at = ")
        .push_bind(key.created_at)
        .push(" AND id < ")
        .push_bind(key.id)
        .push("))");
}

/// Appends the `WHERE` clause equivalent of `RankPredicate::matches`, wrapped
/// in parentheses so it can be combined with other conditions.
fn push_predicate(builder: &mut QueryBuilder<'_, Postgres>, predicate: &RankPredicate) {
    match predicate {
        RankPredicate::AheadOf(key) => {
            builder
                .push("(referral_count > ")
                .push_bind(key.referral_count)
                .push(" OR (referral_count = ")
                .push_bind(key.referral_count)
                .push(" AND ");
            push_tie_break(builder, key);
            builder.push("))");
        }
        RankPredicate::TiedAheadOf(key) => {
            builder
                .push("(referral_count = ")
                .push_bind(key.referral_count)
                .push(" AND ");
            push_tie_break(builder, key);
            builder.push(")");
        }
        RankPredicate::OvertakableBy(key) => {
            builder
                .push("(referral_count < ")
                .push_bind(key.referral_count)
                .push(" OR (referral_count = ")
                .push_bind(key.referral_count)
                .push(" AND ");
            push_tie_break(builder, key);
            builder.push("))");
        }
    }
}

fn count_query(predicate: &RankPredicate) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(1) FROM waitinglist WHERE ");
    push_predicate(&mut builder, predicate);
    builder
}

#[async_trait]
impl EntryStore for PgEntryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Entry>, StoreError> {
        let entry = sqlx::query_as::<_, Entry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM waitinglist WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.conn)
        .await?;

        Ok(entry)
    }

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Entry>, StoreError> {
        let entry = sqlx::query_as::<_, Entry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM waitinglist WHERE referral_code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.conn)
        .await?;

        Ok(entry)
    }

    async fn insert(
        &self,
        email: &str,
        referral_code: &str,
        referred_by: Option<&str>,
    ) -> Result<Entry, StoreError> {
        let entry = sqlx::query_as::<_, Entry>(&format!(
            r#"
                INSERT INTO waitinglist (email, referral_code, referred_by)
                VALUES ($1, $2, $3)
                RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(referral_code)
        .bind(referred_by)
        .fetch_one(&self.conn)
        .await?;

        Ok(entry)
    }

    async fn increment_referral_count(&self, code: &str) -> Result<Option<Entry>, StoreError> {
        let entry = sqlx::query_as::<_, Entry>(&format!(
            r#"
                UPDATE waitinglist SET referral_count = referral_count + 1
                WHERE referral_code = $1
                RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(code)
        .fetch_optional(&self.conn)
        .await?;

        Ok(entry)
    }

    async fn count_where(&self, predicate: RankPredicate) -> Result<u64, StoreError> {
        let mut builder = count_query(&predicate);
        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.conn)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn delete(&self, code: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM waitinglist WHERE referral_code = $1")
            .bind(code)
            .execute(&self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }

    async fn mark_followup_sent(&self, email: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE waitinglist SET followup_sent = TRUE WHERE email = $1")
            .bind(email)
            .execute(&self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }

    async fn list_unnotified(&self, older_than: Duration) -> Result<Vec<Entry>, StoreError> {
        let cutoff = Utc::now() - older_than;
        let entries = sqlx::query_as::<_, Entry>(&format!(
            r#"
                SELECT {ENTRY_COLUMNS} FROM waitinglist
                WHERE followup_sent = FALSE AND created_at <= $1
                ORDER BY created_at, id
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.conn)
        .await?;

        Ok(entries)
    }

    async fn stats(&self) -> Result<WaitlistStats, StoreError> {
        let stats = sqlx::query_as::<_, WaitlistStats>(
            r#"
                SELECT
                    COUNT(1) AS total_entries,
                    COUNT(1) FILTER (WHERE referral_count > 0) AS entries_with_referrals,
                    COALESCE(MAX(referral_count), 0) AS max_referrals
                FROM waitinglist
            "#,
        )
        .fetch_one(&self.conn)
        .await?;

        Ok(stats)
    }
}
