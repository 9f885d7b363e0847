//! # tally
//!
//! `tally serve` runs the unread-counter server; `tally watch` follows one
//! user's counters from the client side and logs every change.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tally_client::{ClientConfig, UnreadClient};
use tally_core::logging::init_subscriber;
use tally_server::config::ServerConfig;
use tally_server::metrics::install_recorder;
use tally_server::server::TallyServer;
use tally_settings::{StoreBackend, StoreSettings, TallySettings};
use tally_store::{
    ConnectionConfig, ConversationRegistry, CounterStore, MemoryCounterStore, SqliteCounterStore,
};

/// How long open sessions get to close after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Real-time unread counters.
#[derive(Parser, Debug)]
#[command(name = "tally", about = "Real-time unread counters")]
struct Cli {
    /// Settings file (defaults to `~/.tally/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the counter server.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
        /// `SQLite` database file; selects the sqlite backend.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Follow a user's unread counters.
    Watch {
        /// User to follow.
        #[arg(long)]
        user: String,
        /// Server base URL.
        #[arg(long)]
        server_url: Option<String>,
    },
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Fold `serve` flags over loaded settings.
fn apply_serve_args(
    settings: &mut TallySettings,
    host: Option<String>,
    port: Option<u16>,
    db_path: Option<PathBuf>,
) {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    if let Some(path) = db_path {
        settings.store.backend = StoreBackend::Sqlite;
        settings.store.db_path = Some(path.to_string_lossy().into_owned());
    }
}

fn open_store(settings: &StoreSettings) -> Result<Arc<dyn CounterStore>> {
    match settings.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryCounterStore::new())),
        StoreBackend::Sqlite => {
            let path = settings
                .db_path
                .as_deref()
                .context("store.dbPath is required for the sqlite backend")?;
            ensure_parent_dir(Path::new(path))?;
            let config = ConnectionConfig {
                pool_size: settings.pool_size,
                ..ConnectionConfig::default()
            };
            let pool = tally_store::new_file(path, &config).context("Failed to open database")?;
            let store = SqliteCounterStore::new(pool).context("Failed to run migrations")?;
            tracing::info!(path, "sqlite counter store opened");
            Ok(Arc::new(store))
        }
    }
}

async fn serve(settings: TallySettings) -> Result<()> {
    let metrics = install_recorder();
    let store = open_store(&settings.store)?;
    let conversations = Arc::new(ConversationRegistry::new());

    let server = TallyServer::new(ServerConfig::from(&settings), store, conversations, metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(backend = ?settings.store.backend, "tally listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.shutdown(Some(SHUTDOWN_TIMEOUT)).await {
        tracing::warn!(timeout_secs = SHUTDOWN_TIMEOUT.as_secs(), "sessions did not drain in time");
    }
    let _ = handle.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn watch(settings: &TallySettings, user: String) -> Result<()> {
    let client = UnreadClient::connect_http(user.into(), ClientConfig::from(settings))
        .context("Failed to start client")?;
    let mut view = client.view();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                tracing::info!(
                    user = %current.user,
                    total = current.total,
                    unread_conversations = current.conversations_with_unread,
                    channel = current.channel_state.as_str(),
                    per_conversation = ?current.per_conversation,
                    "unread counters"
                );
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(tally_settings::settings_path);
    let mut settings = tally_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    init_subscriber(&settings.logging.level, settings.logging.format());

    match cli.command {
        Command::Serve {
            host,
            port,
            db_path,
        } => {
            apply_serve_args(&mut settings, host, port, db_path);
            serve(settings).await
        }
        Command::Watch { user, server_url } => {
            if let Some(url) = server_url {
                settings.client.server_url = url;
            }
            watch(&settings, user).await
        }
    }
}
