use std::io::Read;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use burrow_db::{MessageStore, StoreConfig};
use burrow_sync::{IncomingPacket, OutgoingMessage, SyncConfig, SyncDriver};
use burrow_types::models::{SearchQuery, now};

#[derive(Parser)]
#[command(name = "burrow")]
#[command(about = "Encrypted local message store", long_about = None)]
struct Cli {
    /// Store file (overrides BURROW_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue an outgoing message
    Send {
        conversation: String,
        body: String,

        /// Message id (random when omitted)
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        sender: Option<String>,

        /// Seconds until the message deletes itself
        #[arg(long)]
        ttl: Option<i64>,

        /// Go online and flush the queue after queueing
        #[arg(long)]
        deliver: bool,
    },

    /// Show the latest messages of a conversation
    History {
        conversation: String,

        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Search message bodies
    Search {
        keyword: String,

        #[arg(long)]
        conversation: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// List conversations, most recent first
    Conversations,

    /// Store a JSON packet read from stdin
    Receive,

    /// Delete a message
    Delete { id: String },

    /// Run one expiry and retention sweep
    Sweep,

    /// Keep the store open, printing events until interrupted
    Run {
        /// Start online
        #[arg(long)]
        online: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "burrow=info,burrow_db=info,burrow_sync=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Config
    let mut config = StoreConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }
    if config.key.is_empty() {
        return Err(anyhow!("BURROW_KEY is not set"));
    }

    let store = MessageStore::open(config)?;
    let driver = SyncDriver::new(store.clone(), SyncConfig::default());

    match cli.command {
        Commands::Send {
            conversation,
            body,
            id,
            sender,
            ttl,
            deliver,
        } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let message = OutgoingMessage {
                sender_id: sender,
                body: Some(body),
                created_at: Some(now()),
                ttl_seconds: ttl,
                message_type: None,
            };
            let mut queued = driver.queue_outgoing_message(&conversation, &id, message)?;
            if deliver {
                driver.set_online(true);
                tokio::task::yield_now().await;
                queued = store.get_message(&id)?.unwrap_or(queued);
            }
            print_json(&queued)?;
        }
        Commands::History {
            conversation,
            limit,
        } => {
            print_json(&store.fetch_history(&conversation, limit, None, None)?)?;
        }
        Commands::Search {
            keyword,
            conversation,
            limit,
        } => {
            let mut query = SearchQuery::new(keyword);
            query.conversation_id = conversation;
            query.limit = limit;
            print_json(&store.search_messages(&query)?)?;
        }
        Commands::Conversations => {
            print_json(&store.list_conversations()?)?;
        }
        Commands::Receive => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            let packet = IncomingPacket::from_json(&raw)?;
            match driver.apply_incoming_packet(&packet)? {
                Some(message) => print_json(&message)?,
                None => return Err(anyhow!("packet has no message_id or conversation_id")),
            }
        }
        Commands::Delete { id } => {
            if !store.delete_message(&id)? {
                return Err(anyhow!("no message with id {}", id));
            }
            println!("deleted {}", id);
        }
        Commands::Sweep => {
            let report = store.run_sweep(now())?;
            println!(
                "expired: {}, retention: {}",
                report.expired, report.retention
            );
        }
        Commands::Run { online } => {
            let mut events = store.subscribe();
            driver.start();
            driver.set_online(online);
            info!("Burrow running (online: {}), Ctrl-C to stop", online);

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => println!("{}", serde_json::to_string(&event)?),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Dropped {} events", n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            driver.stop();
            info!("Shutting down");
        }
    }

    store.close();
    Ok(())
}
