use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, Recipient};
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info, warn};

use crate::dispatch::ListingDispatcher;
use crate::notify::{DeliveryError, NotifySink};
use crate::render::{ActionLink, Notification};
use crate::store::subscribers::ProfileError;
use crate::store::Store;

const FILTER_USAGE: &str = "Usage:\n\
    /filter age <hours> - only alert on listings younger than this\n\
    /filter telegram on|off - require a Telegram link\n\
    /filter twitter on|off - require an X/Twitter link";

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Subscribe this chat to new listing alerts")]
    Start,
    #[command(description = "Show your filters and poller status")]
    Status,
    #[command(description = "Change a filter. Usage: /filter age 3, /filter telegram on")]
    Filter(String),
    #[command(description = "Show help")]
    Help,
}

/// Shared state for command handlers
pub struct BotState {
    pub store: Store,
    pub dispatcher: Arc<ListingDispatcher>,
    /// Empty means every chat may subscribe.
    pub allowed_chat_ids: Vec<i64>,
}

impl BotState {
    pub fn is_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chat_ids.is_empty() || self.allowed_chat_ids.contains(&chat_id)
    }
}

/// Sends alerts as plain messages with one URL button per social link.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl NotifySink for TelegramNotifier {
    async fn deliver(
        &self,
        subscriber_id: &str,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        let recipient = parse_recipient(subscriber_id)?;

        let mut request = self
            .bot
            .send_message(recipient, notification.text.clone());
        if let Some(keyboard) = link_keyboard(&notification.links) {
            request = request.reply_markup(keyboard);
        }
        request.await?;

        debug!("Alert delivered to chat {}", subscriber_id);
        Ok(())
    }
}

/// Numeric chat ids and `@channelusername` are both valid targets.
fn parse_recipient(subscriber_id: &str) -> Result<Recipient, DeliveryError> {
    let id = subscriber_id.trim();
    let invalid = || DeliveryError::InvalidRecipient(subscriber_id.to_string());

    if let Some(username) = id.strip_prefix('@') {
        let valid = !username.is_empty()
            && username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        return if valid {
            Ok(Recipient::ChannelUsername(id.to_string()))
        } else {
            Err(invalid())
        };
    }

    id.parse::<i64>()
        .map(|chat_id| Recipient::Id(ChatId(chat_id)))
        .map_err(|_| invalid())
}

/// Parse a link, retrying with an https scheme for bare hosts like `t.me/x`.
fn parse_link(url: &str) -> Option<reqwest::Url> {
    let url = url.trim();
    reqwest::Url::parse(url)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https" | "tg"))
        .or_else(|| reqwest::Url::parse(&format!("https://{}", url)).ok())
}

fn link_keyboard(links: &[ActionLink]) -> Option<InlineKeyboardMarkup> {
    let rows: Vec<Vec<InlineKeyboardButton>> = links
        .iter()
        .filter_map(|link| match parse_link(&link.url) {
            Some(url) => Some(vec![InlineKeyboardButton::url(link.label.clone(), url)]),
            None => {
                warn!("Dropping unparseable {} link: {}", link.label, link.url);
                None
            }
        })
        .collect();

    if rows.is_empty() {
        None
    } else {
        Some(InlineKeyboardMarkup::new(rows))
    }
}

/// Run the Telegram command handler until Ctrl-C.
pub async fn run(bot: Bot, state: Arc<BotState>) -> Result<()> {
    info!("Starting Telegram command handler...");

    let gate = Arc::clone(&state);
    let handler = Update::filter_message()
        .filter_map(move |msg: Message| {
            if gate.is_allowed(msg.chat.id.0) {
                Some(msg)
            } else {
                None
            }
        })
        .filter_command::<Command>()
        .endpoint(handle_command);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0.to_string();
    info!("Command from chat {}: {:?}", chat_id, cmd);

    let reply = match respond(&state, &chat_id, cmd).await {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to handle command from chat {}: {:#}", chat_id, e);
            "Something went wrong on our side. Please try again later.".to_string()
        }
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Build the reply for a command. Only storage failures are returned as errors;
/// bad input becomes a reply.
pub async fn respond(state: &BotState, chat_id: &str, cmd: Command) -> Result<String> {
    match cmd {
        Command::Start => {
            let profile = state.store.ensure_subscriber(chat_id).await?;
            Ok(format!(
                "Welcome! This chat will now receive alerts for newly listed tokens.\n\n\
                 Current filters:\n{}\n\n\
                 Use /help to see available commands.",
                profile
            ))
        }

        Command::Status => {
            let profile = state.store.ensure_subscriber(chat_id).await?;
            let subscribers = state.store.subscriber_count().await?;
            let processed = state.store.processed_count().await?;
            let last_poll = match state.dispatcher.last_tick().await {
                Some(summary) => summary.to_string(),
                None => "not run yet".to_string(),
            };
            Ok(format!(
                "Your filters:\n{}\n\n\
                 Subscribers: {}\n\
                 Listings seen: {}\n\
                 Last poll: {}",
                profile, subscribers, processed, last_poll
            ))
        }

        Command::Filter(args) => {
            let mut parts = args.split_whitespace();
            let (field, value) = match (parts.next(), parts.next(), parts.next()) {
                (Some(field), Some(value), None) => (field, value),
                _ => return Ok(FILTER_USAGE.to_string()),
            };

            match state.store.update_profile(chat_id, field, value).await {
                Ok(profile) => Ok(format!("Filter updated.\n\n{}", profile)),
                Err(ProfileError::Invalid(e)) => Ok(format!("{}\n\n{}", e, FILTER_USAGE)),
                Err(ProfileError::Storage(e)) => Err(e),
            }
        }

        Command::Help => Ok(Command::descriptions().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listings::{FetchError, ListingRecord, ListingSource};

    struct NoListings;

    #[async_trait]
    impl ListingSource for NoListings {
        async fn fetch_recent_listings(&self) -> Result<Vec<ListingRecord>, FetchError> {
            Ok(Vec::new())
        }
    }

    struct NullSink;

    #[async_trait]
    impl NotifySink for NullSink {
        async fn deliver(
            &self,
            _subscriber_id: &str,
            _notification: &Notification,
        ) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn state(allowed_chat_ids: Vec<i64>) -> BotState {
        let store = Store::open_in_memory().unwrap();
        let dispatcher = Arc::new(ListingDispatcher::new(
            Arc::new(NoListings),
            Arc::new(NullSink),
            store.clone(),
        ));
        BotState {
            store,
            dispatcher,
            allowed_chat_ids,
        }
    }

    #[tokio::test]
    async fn test_start_registers_chat() {
        let state = state(vec![]);
        let reply = respond(&state, "555", Command::Start).await.unwrap();

        assert!(reply.contains("Max age: 3h"));
        assert_eq!(state.store.list_subscribers().await.unwrap(), vec!["555"]);
    }

    #[tokio::test]
    async fn test_filter_updates_profile() {
        let state = state(vec![]);
        let reply = respond(&state, "555", Command::Filter("age 12".to_string()))
            .await
            .unwrap();
        assert!(reply.contains("Max age: 12h"));

        respond(&state, "555", Command::Filter("telegram on".to_string()))
            .await
            .unwrap();
        let profile = state.store.get_profile("555").await.unwrap().unwrap();
        assert_eq!(profile.max_age_hours, 12);
        assert!(profile.require_telegram);
    }

    #[tokio::test]
    async fn test_filter_rejects_bad_values() {
        let state = state(vec![]);
        respond(&state, "555", Command::Start).await.unwrap();

        let reply = respond(&state, "555", Command::Filter("age soon".to_string()))
            .await
            .unwrap();
        assert!(reply.contains("whole number of hours"));

        let reply = respond(&state, "555", Command::Filter("volume 5".to_string()))
            .await
            .unwrap();
        assert!(reply.contains("Unknown filter 'volume'"));

        let reply = respond(&state, "555", Command::Filter(String::new()))
            .await
            .unwrap();
        assert_eq!(reply, FILTER_USAGE);

        let profile = state.store.get_profile("555").await.unwrap().unwrap();
        assert_eq!(profile.max_age_hours, 3);
    }

    #[tokio::test]
    async fn test_status_reports_last_poll() {
        let state = state(vec![]);
        let reply = respond(&state, "1", Command::Status).await.unwrap();
        assert!(reply.contains("Last poll: not run yet"));
        assert!(reply.contains("Subscribers: 1"));

        state.dispatcher.on_tick(chrono::Utc::now()).await.unwrap();
        let reply = respond(&state, "1", Command::Status).await.unwrap();
        assert!(reply.contains("0 fetched"));
    }

    #[test]
    fn test_allowed_chats() {
        assert!(state(vec![]).is_allowed(42));

        let restricted = state(vec![7]);
        assert!(restricted.is_allowed(7));
        assert!(!restricted.is_allowed(42));
    }

    #[test]
    fn test_recipient_accepts_ids_and_channel_usernames() {
        assert!(matches!(
            parse_recipient("-1001234567890"),
            Ok(Recipient::Id(ChatId(-1001234567890)))
        ));
        assert!(matches!(
            parse_recipient(" 555 "),
            Ok(Recipient::Id(ChatId(555)))
        ));
        match parse_recipient("@mychannel") {
            Ok(Recipient::ChannelUsername(name)) => assert_eq!(name, "@mychannel"),
            other => panic!("expected channel username, got {:?}", other),
        }
    }

    #[test]
    fn test_recipient_rejects_garbage() {
        for id in ["", "@", "chat", "@my channel", "12abc"] {
            assert!(
                matches!(parse_recipient(id), Err(DeliveryError::InvalidRecipient(_))),
                "{:?} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_parse_link_adds_scheme() {
        assert_eq!(
            parse_link("t.me/coin").map(|u| u.to_string()),
            Some("https://t.me/coin".to_string())
        );
        assert_eq!(
            parse_link("https://x.com/coin").map(|u| u.to_string()),
            Some("https://x.com/coin".to_string())
        );
    }

    #[test]
    fn test_keyboard_one_button_per_row() {
        let links = vec![
            ActionLink {
                label: "Telegram".to_string(),
                url: "https://t.me/coin".to_string(),
            },
            ActionLink {
                label: "X".to_string(),
                url: "https://x.com/coin".to_string(),
            },
        ];
        let keyboard = link_keyboard(&links).unwrap();
        assert_eq!(keyboard.inline_keyboard.len(), 2);
        assert_eq!(keyboard.inline_keyboard[0][0].text, "Telegram");
        assert_eq!(keyboard.inline_keyboard[1][0].text, "X");

        assert!(link_keyboard(&[]).is_none());
    }
}
