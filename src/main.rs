//! CLI for queuebus
//!
//! Subcommands:
//! - `relay`: run the WebSocket channel relay
//! - `monitor`: connect to a relay and log every envelope on some channels
//! - `token`: issue a relay bearer token from `relay.jwt_secret`

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use queuebus::broker::{LogObserver, MessageBroker};
use queuebus::config::{Settings, load_config};
use queuebus::policies::Backoff;
use queuebus::relay::{RelayServer, auth::issue_token};
use queuebus::transport::{Credentials, WebSocketTransport};
use queuebus::utils::error::QueuebusError;
use queuebus::utils::logging;

#[derive(Parser)]
#[command(name = "queuebus")]
enum Command {
    /// Run the channel relay
    Relay,
    /// Log every envelope published on the given channels
    Monitor {
        /// Channel to watch; repeatable
        #[arg(long = "channel", required = true)]
        channels: Vec<String>,
        /// Relay URL (defaults to `transport.url`)
        #[arg(long)]
        url: Option<String>,
    },
    /// Print a bearer token for the relay
    Token {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value_t = 3600)]
        ttl_secs: i64,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    let settings = load_config();
    let level = settings
        .as_ref()
        .map(|s| s.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    logging::init(&level);

    let result = match settings {
        Ok(settings) => run(cmd, settings).await,
        Err(e) => Err(QueuebusError::from(e)),
    };
    if let Err(e) = result {
        error!("queuebus failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cmd: Command, settings: Settings) -> Result<(), QueuebusError> {
    match cmd {
        Command::Relay => run_relay(&settings).await,
        Command::Monitor { channels, url } => run_monitor(settings, channels, url).await,
        Command::Token { subject, ttl_secs } => {
            let secret = settings
                .relay
                .jwt_secret
                .as_deref()
                .ok_or(QueuebusError::MissingSetting("relay.jwt_secret"))?;
            let token = issue_token(secret, &subject, chrono::Duration::seconds(ttl_secs))?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn run_relay(settings: &Settings) -> Result<(), QueuebusError> {
    if settings.relay.jwt_secret.is_none() {
        warn!("relay.jwt_secret is not set; clients are not authenticated");
    }
    let handle = RelayServer::bind(&settings.relay).await?.spawn()?;
    info!("relay ready at {}", handle.url());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown signal received. Exiting gracefully.");
    handle.shutdown().await;
    Ok(())
}

async fn run_monitor(
    mut settings: Settings,
    channels: Vec<String>,
    url: Option<String>,
) -> Result<(), QueuebusError> {
    if let Some(url) = url {
        settings.transport.url = url;
    }
    let transport = Arc::new(WebSocketTransport::from_settings(&settings.transport));
    let broker = MessageBroker::new(transport, settings.broker.clone());

    let mut credentials = Credentials::new(settings.transport.client_name.clone());
    if let Some(token) = &settings.transport.token {
        credentials = credentials.with_token(token.clone());
    }

    let backoff = Backoff::reconnect(
        Duration::from_millis(settings.transport.reconnect_base_ms),
        Duration::from_millis(settings.transport.reconnect_max_ms),
    );
    let mut attempt = 0;
    loop {
        match broker.start(&credentials).await {
            Ok(_) => break,
            Err(e) => {
                let delay = backoff.delay(attempt);
                warn!("could not reach {}: {e}; retrying in {delay:?}", settings.transport.url);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = tokio::signal::ctrl_c() => {
                        broker.shutdown().await;
                        return Ok(());
                    }
                }
            }
        }
    }

    let monitor = broker.monitor();
    for channel in &channels {
        monitor.watch(channel, Arc::new(LogObserver))?;
        info!("watching {channel}");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    broker.shutdown().await;
    Ok(())
}
