use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
    /// Empty means the in-memory store is used instead of a database.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Server-side `statement_timeout` set on every pooled connection.
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Http {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Brevo {
    #[serde(default = "default_brevo_url")]
    pub url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
    #[serde(default = "default_sender_email")]
    pub sender_email: String,
    /// Public address of the waitlist page, used to build referral links.
    pub base_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Ranking {
    #[serde(default = "default_next_jump_min")]
    pub next_jump_min: u64,
    #[serde(default = "default_next_jump_max")]
    pub next_jump_max: u64,
}

/// Longest follow-up delay accepted: ten years.
pub const MAX_FOLLOWUP_DELAY_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Clone, Debug, Deserialize)]
pub struct FollowUp {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_followup_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_followup_delay")]
    pub delay_secs: u64,
}

impl FollowUp {
    /// Age an entry must reach before its follow-up is due.
    pub fn delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.delay_secs.min(MAX_FOLLOWUP_DELAY_SECS) as i64)
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Queues {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub http: Http,
    pub brevo: Brevo,
    pub ranking: Ranking,
    pub followup: FollowUp,
    pub queues: Queues,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("postgres.max_connections", default_max_connections() as u64)?
            .set_default("postgres.statement_timeout_ms", default_statement_timeout())?
            .set_default("http.listen", default_listen())?
            .set_default("brevo.base_url", "http://localhost:3003")?
            .set_default("ranking.next_jump_min", default_next_jump_min())?
            .set_default("ranking.next_jump_max", default_next_jump_max())?
            .set_default("followup.enabled", false)?
            .set_default("followup.interval_secs", default_followup_interval())?
            .set_default("followup.delay_secs", default_followup_delay())?
            .set_default("queues.capacity", default_queue_capacity() as u64)?
            .add_source(File::with_name(path).required(true))
            .add_source(
                Environment::with_prefix("WAITLIST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ranking.next_jump_min > self.ranking.next_jump_max {
            return Err(ConfigError::Message(format!(
                "ranking.next_jump_min ({}) must not exceed ranking.next_jump_max ({})",
                self.ranking.next_jump_min, self.ranking.next_jump_max
            )));
        }

        if self.postgres.statement_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "postgres.statement_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.followup.interval_secs == 0 {
            return Err(ConfigError::Message(
                "followup.interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.followup.delay_secs > MAX_FOLLOWUP_DELAY_SECS {
            return Err(ConfigError::Message(format!(
                "followup.delay_secs ({}) must not exceed {}",
                self.followup.delay_secs, MAX_FOLLOWUP_DELAY_SECS
            )));
        }

        if self.queues.capacity == 0 {
            return Err(ConfigError::Message(
                "queues.capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_statement_timeout() -> u64 {
    5_000
}

fn default_listen() -> String {
    "0.0.0.0:3003".to_string()
}

fn default_brevo_url() -> String {
    "https://api.brevo.com/v3".to_string()
}

fn default_sender_name() -> String {
    "Waitlist".to_string()
}

fn default_sender_email() -> String {
    "noreply@example.com".to_string()
}

fn default_next_jump_min() -> u64 {
    1
}

fn default_next_jump_max() -> u64 {
    10
}

fn default_followup_interval() -> u64 {
    60 * 60
}

fn default_followup_delay() -> u64 {
    24 * 60 * 60
}

fn default_queue_capacity() -> usize {
    512
}
