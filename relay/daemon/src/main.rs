//! Relay Daemon - Console Chat Relay
//!
//! Entry point for the chat relay. It loads configuration, opens storage,
//! connects to the generation backend and restores saved conversations.
//! After that it drives the relay from a console front-end: every line on
//! stdin is a chat message or a slash command, and replies go to stdout.
//! Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (config from ~/.config/chat-relay/relay.toml)
//! relay-daemon
//!
//! # Explicit config file and database
//! relay-daemon --config ./relay.toml --database ./relay.db
//!
//! # Different backend and model
//! relay-daemon --host http://gpu-box --port 11434 --model qwen2.5
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Shutdown
//!
//! End of input, `/quit` or Ctrl-C stop the relay. In-flight generations are
//! cancelled and every conversation is written to storage.

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use relay_core::{
    default_config_path, load_config_from_path, ChatBackend, Conductor, ConfigOverrides,
    MemoryStore, OllamaBackend, Sender, SessionPersistence, SqliteStore,
};

use console::{Console, ConsoleDelivery};

/// Relay Daemon - chat relay for an Ollama backend
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend host, e.g. http://localhost
    #[arg(long, value_name = "URL")]
    host: Option<String>,

    /// Backend port
    #[arg(long)]
    port: Option<u16>,

    /// Default model
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// SQLite database path (in-memory storage if unset)
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Show partial replies while they are generated
    #[arg(long)]
    stream_previews: bool,

    /// User id the relay itself posts as
    #[arg(long, default_value_t = 0)]
    bot_id: i64,

    /// User id of the console user
    #[arg(long, default_value_t = 1)]
    user_id: i64,

    /// Display name of the console user
    #[arg(long, default_value = "Console")]
    user_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(host) = &self.host {
            overrides = overrides.with_host(host.clone());
        }
        if let Some(port) = self.port {
            overrides = overrides.with_port(port);
        }
        if let Some(model) = &self.model {
            overrides = overrides.with_default_model(model.clone());
        }
        if let Some(path) = &self.database {
            overrides = overrides.with_database_path(path.clone());
        }
        if self.stream_previews {
            overrides = overrides.with_stream_previews(true);
        }
        overrides
    }
}

/// Initialize logging with the specified level
///
/// Stdout belongs to the console, so logs are written to stderr.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Open the configured store, or fall back to process-local storage
async fn open_storage(path: Option<&PathBuf>) -> Result<Arc<dyn SessionPersistence>> {
    match path {
        Some(path) => {
            let store = SqliteStore::open(path)
                .await
                .with_context(|| format!("Failed to open database: {}", path.display()))?;
            info!(path = %path.display(), "Opened database");
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database configured, conversations will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Relay daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path)
        .await
        .context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    info!(
        source = %config.source(),
        backend = %config.backend.base_url(),
        model = %config.default_model,
        "Configuration loaded"
    );

    let persistence = open_storage(config.database_path.as_ref()).await?;

    let backend = OllamaBackend::new(&config.backend).context("Failed to create backend client")?;
    if !backend.health_check().await {
        warn!(url = %config.backend.base_url(), "Backend is not reachable yet");
    }

    let delivery = Arc::new(ConsoleDelivery::new(tokio::io::stdout()));
    let conductor = Arc::new(
        Conductor::from_config(backend, &config, args.bot_id, persistence, delivery.clone())
            .context("Invalid configuration")?,
    );
    let restored = conductor
        .restore()
        .await
        .context("Failed to restore saved state")?;
    info!(sessions = restored, "Relay ready");

    let user = Sender {
        id: args.user_id,
        first_name: args.user_name.clone(),
        last_name: None,
        is_bot: false,
    };
    let mut console = Console::new(Arc::clone(&conductor), delivery, user);
    let input = BufReader::new(tokio::io::stdin());

    let result = tokio::select! {
        result = console.run(input) => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Received interrupt, initiating shutdown");
            Ok(())
        }
    };

    info!("Shutting down...");
    conductor
        .shutdown()
        .await
        .context("Failed to save relay state")?;

    match result {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Relay daemon stopped with error");
            Err(e)
        }
    }
}
