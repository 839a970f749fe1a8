use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use waitlist::repositories::entries::{EntryStore, MemoryEntryStore, PgEntryStore};
use waitlist::repositories::mail::{BrevoSender, NotificationSender};
use waitlist::{services, settings};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "waitlist.toml")]
    config: String,
    #[arg(short, long)]
    listen: Option<String>,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let mut settings = settings::Settings::load(&args.config)?;
    if let Some(listen) = args.listen {
        settings.http.listen = listen;
    }

    init_logging(&args.log4rs)?;
    log::info!("Starting waitlist service.");

    let store: Arc<dyn EntryStore> = if settings.postgres.url.is_empty() {
        log::warn!("No Postgres URL configured, entries are kept in memory only.");
        Arc::new(MemoryEntryStore::new())
    } else {
        let options = PgConnectOptions::from_str(&settings.postgres.url)?.options([(
            "statement_timeout",
            settings.postgres.statement_timeout_ms.to_string(),
        )]);
        let conn = PgPoolOptions::new()
            .max_connections(settings.postgres.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect_with(options)
            .await?;
        let store = PgEntryStore::new(conn);
        store.migrate().await?;
        log::info!("Connected to Postgres.");
        Arc::new(store)
    };

    let sender: Arc<dyn NotificationSender> = Arc::new(BrevoSender::new(&settings.brevo));

    services::start_services(store, sender, settings).await
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
