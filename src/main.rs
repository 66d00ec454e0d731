//! ROUNDBET — Martingale betting agent for on-chain prediction rounds
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects the chain gateway and price feed, optionally attaches the
//! Telegram remote control, and runs the tick loop with graceful
//! shutdown.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use roundbet::chain::bsc::BscGateway;
use roundbet::config::AppConfig;
use roundbet::engine::betting::BettingEngine;
use roundbet::feed::binance::BinanceFeed;
use roundbet::telegram::{Notifier, NullNotifier, TelegramClient};

const BANNER: &str = r#"
 ____   ___  _   _ _   _ ____  ____  _____ _____
|  _ \ / _ \| | | | \ | |  _ \| __ )| ____|_   _|
| |_) | | | | | | |  \| | | | |  _ \|  _|   | |
|  _ <| |_| | |_| | |\  | |_| | |_) | |___  | |
|_| \_\\___/ \___/|_| \_|____/|____/|_____| |_|

  Martingale agent for on-chain up/down prediction rounds
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        bot_name = %cfg.bot.name,
        tick_interval_secs = cfg.bot.tick_interval_secs,
        asset = %cfg.bot.asset_symbol,
        "ROUNDBET starting up"
    );

    // -- Components ------------------------------------------------------

    let private_key = SecretString::new(
        AppConfig::resolve_env(&cfg.chain.private_key_env)?,
    );
    let gateway = BscGateway::connect(
        &cfg.chain.rpc_endpoint,
        &cfg.chain.contract_address,
        private_key,
        Duration::from_secs(cfg.chain.confirmation_timeout_secs),
    )
    .await?;

    let feed = BinanceFeed::new(&cfg.bot.asset_symbol)?;

    // Telegram is optional: without it the agent runs headless and the
    // only controls are config.toml and Ctrl+C.
    let (notifier, telegram): (Arc<dyn Notifier>, Option<TelegramClient>) =
        match (&cfg.telegram.bot_token_env, &cfg.telegram.chat_id_env) {
            (Some(token_env), Some(chat_env)) => {
                let token = SecretString::new(AppConfig::resolve_env(token_env)?);
                let chat_id: i64 = AppConfig::resolve_env(chat_env)?
                    .parse()
                    .context("Telegram chat id must be an integer")?;
                let client = TelegramClient::new(token, chat_id)?;
                info!(chat_id, "Telegram remote control enabled");
                (Arc::new(client.clone()), Some(client))
            }
            _ => {
                warn!("No Telegram configuration, running headless");
                (Arc::new(NullNotifier), None)
            }
        };

    let settings = cfg.settings();
    info!(%settings, "Strategy settings loaded");

    let mut engine = BettingEngine::new(gateway, feed, notifier.clone(), settings);

    if cfg.bot.auto_start {
        engine.start();
        info!("Auto-start enabled, engine running");
    }

    // -- Command channel -------------------------------------------------

    let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<String>(32);
    if let Some(client) = telegram {
        tokio::spawn(async move {
            client.poll_commands(command_tx).await;
        });
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.bot.tick_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.bot.tick_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = engine.tick().await {
                    error!(error = %e, "Tick failed, continuing on next interval");
                    let _ = notifier.send(&format!("Tick failed: {e}")).await;
                }
            }
            Some(text) = command_rx.recv() => {
                // Commands apply between ticks only.
                let reply = engine.handle_command(&text).await;
                if let Err(e) = notifier.send(&reply).await {
                    warn!(error = %e, "Failed to send command reply");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let state = engine.state();
    info!(
        bets = state.total_bets,
        wins = state.wins,
        losses = state.losses,
        total_wagered = %state.total_wagered,
        "ROUNDBET shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("roundbet=info"));

    let json_logging = std::env::var("ROUNDBET_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
