use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use ringcast::CancelToken;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tidecast::config::Config;
use tidecast::program::engine::{self, EngineConfig};
use tidecast::record::{LogStore, Registry};
use tidecast::transport::{websocket, QueryIdentity};
use tidecast::world::chat::{ChatMsg, ChatWorld, CHAT_MSG_TYPE};

#[derive(Parser, Debug)]
#[command(name = "tidecast", about = "Multi-user terminal application server")]
struct Cli {
    /// Address for the WebSocket terminal listener.
    #[arg(long)]
    listen: Option<String>,

    /// Path of the append-only event log.
    #[arg(long)]
    store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::from_env().apply(cli.listen, cli.store);

    let mut registry = Registry::new();
    registry.register::<ChatMsg>(CHAT_MSG_TYPE);
    let store = LogStore::open(&config.store_path, registry)?;
    info!(
        target = "tidecast",
        store = %config.store_path.display(),
        records = store.len(),
        "event log open"
    );

    let root = CancelToken::new();
    let engine = engine::spawn(
        ChatWorld::new(),
        store,
        EngineConfig::default(),
        root.clone(),
    );

    let shutdown = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target = "tidecast", "interrupt received; shutting down");
            shutdown.cancel();
        }
    });

    let listener = TcpListener::bind(&config.listen).await?;
    websocket::serve(listener, engine, Arc::new(QueryIdentity::default()), root).await
}
