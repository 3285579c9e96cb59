mod config;
mod dispatch;
mod filter;
mod listings;
mod notify;
mod platform;
mod render;
mod scheduler;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dispatch::ListingDispatcher;
use crate::listings::coinmarketcap::CoinMarketCapSource;
use crate::platform::telegram::{BotState, TelegramNotifier};
use crate::scheduler::Scheduler;
use crate::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,coinwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Listings API: {}", config.listings.base_url);
    info!("  Database: {}", config.storage.database_path.display());
    info!("  Allowed chats: {:?}", config.telegram.allowed_chat_ids);

    let store = Store::open(&config.storage.database_path)?;
    if let Some(chat_id) = &config.telegram.default_chat_id {
        store.ensure_subscriber(chat_id).await?;
        info!("  Default subscriber: {}", chat_id);
    }

    let bot = Bot::new(&config.telegram.bot_token);
    let source = Arc::new(CoinMarketCapSource::new(config.listings.clone())?);
    let notifier = Arc::new(TelegramNotifier::new(bot.clone()));
    let dispatcher = Arc::new(ListingDispatcher::new(source, notifier, store.clone()));

    // Start the poller
    let mut scheduler = Scheduler::new().await?;
    scheduler::tasks::register_poll_task(&scheduler, Arc::clone(&dispatcher), &config.poller)
        .await?;
    scheduler.start().await?;

    if config.poller.poll_on_startup {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            scheduler::tasks::poll_once(&dispatcher).await;
        });
    }

    let state = Arc::new(BotState {
        store,
        dispatcher,
        allowed_chat_ids: config.telegram.allowed_chat_ids.clone(),
    });

    info!("Bot is starting...");
    platform::telegram::run(bot, state).await?;

    scheduler.shutdown().await?;
    Ok(())
}
