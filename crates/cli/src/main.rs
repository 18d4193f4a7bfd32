use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_core::config::{self, Settings};
use relay_core::types::FanoutJob;
use relay_core::{Broadcaster, HttpPushTransport, SignedTokenProvider};
use relay_db::PgStore;
use relay_queue::postgres::PostgresStorage;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "relay")]
#[command(about = "Broadcast channel operator tool", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database schema and the job queue table.
    Migrate,
    /// Get or create a subscriber and print it.
    Subscribe {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        name: String,
    },
    /// Print a valid session token for a subscriber.
    Token {
        #[arg(long)]
        subscriber: String,
        #[arg(long)]
        force: bool,
    },
    /// Queue a message for every subscriber of a channel.
    Send {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        on_timeout: Option<String>,
    },
    /// Send a message to one subscriber immediately.
    SendTo {
        #[arg(long)]
        subscriber: String,
        #[arg(long)]
        message: String,
    },
    /// Record a probe acknowledgment.
    Pong {
        #[arg(long)]
        subscriber: String,
    },
}

/// Messages are taken as JSON when they parse, otherwise as a plain string.
fn parse_message(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let args = Args::parse();
    if let Command::Migrate = args.command {
        let database_url = config::database_url().context("DATABASE_URL is not set")?;
        return migrate(&database_url).await;
    }

    let settings = Settings::from_env().context("invalid configuration")?;
    let db = relay_db::connect(&settings.database_url)
        .await
        .context("failed to connect to database")?;
    let queue = PostgresStorage::<FanoutJob>::from_pool(db.clone());

    let broadcaster = Broadcaster::new(
        Arc::new(PgStore::new(db)),
        Arc::new(SignedTokenProvider::new(settings.token_secret.clone())),
        Arc::new(HttpPushTransport::new(&settings.push_url, settings.push_timeout())?),
        Arc::new(queue),
    )
    .with_defaults(settings.channel_defaults());

    run(&broadcaster, args.command).await
}

/// Needs only the database URL; the token secret and push settings are not read.
async fn migrate(database_url: &str) -> Result<()> {
    let db = relay_db::connect(database_url)
        .await
        .context("failed to connect to database")?;
    relay_db::migrate(&db).await.context("migration failed")?;
    PostgresStorage::<FanoutJob>::from_pool(db).setup().await?;
    info!("schema up to date");
    Ok(())
}

async fn run(broadcaster: &Broadcaster, command: Command) -> Result<()> {
    match command {
        Command::Migrate => Ok(()),
        Command::Subscribe { channel, name } => {
            let channel = broadcaster.channel(&channel).await?;
            let subscriber = broadcaster.create_subscriber(&channel, &name).await?;
            println!("{}", serde_json::to_string_pretty(&subscriber)?);
            Ok(())
        }
        Command::Token { subscriber, force } => {
            let mut subscriber = broadcaster.subscriber(&subscriber).await?;
            println!("{}", broadcaster.get_token(&mut subscriber, force).await?);
            Ok(())
        }
        Command::Send {
            channel,
            message,
            on_timeout,
        } => {
            let channel = broadcaster.channel(&channel).await?;
            let job_id = broadcaster
                .send_message(&channel, &parse_message(&message), on_timeout.as_deref())
                .await?;
            println!("{}", job_id);
            Ok(())
        }
        Command::SendTo {
            subscriber,
            message,
        } => {
            let mut subscriber = broadcaster.subscriber(&subscriber).await?;
            let alive = broadcaster
                .send_to_subscriber(&mut subscriber, &parse_message(&message))
                .await?;
            println!("{}", if alive { "delivered" } else { "timed out, removed" });
            Ok(())
        }
        Command::Pong { subscriber } => {
            let mut subscriber = broadcaster.subscriber(&subscriber).await?;
            broadcaster.pong(&mut subscriber).await?;
            Ok(())
        }
    }
}
