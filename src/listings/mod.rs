pub mod coinmarketcap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Social channels a listing may advertise, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialChannel {
    Telegram,
    Twitter,
}

impl SocialChannel {
    pub const ALL: [SocialChannel; 2] = [SocialChannel::Telegram, SocialChannel::Twitter];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocialChannel::Telegram => "telegram",
            SocialChannel::Twitter => "twitter",
        }
    }
}

impl std::fmt::Display for SocialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Socials {
    pub telegram: Option<String>,
    pub twitter: Option<String>,
}

impl Socials {
    pub fn get(&self, channel: SocialChannel) -> Option<&str> {
        match channel {
            SocialChannel::Telegram => self.telegram.as_deref(),
            SocialChannel::Twitter => self.twitter.as_deref(),
        }
    }

    /// Present and not blank.
    pub fn has(&self, channel: SocialChannel) -> bool {
        self.get(channel).is_some_and(|url| !url.trim().is_empty())
    }
}

/// One token listing as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRecord {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub added_at: DateTime<Utc>,
    pub socials: Socials,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Listings request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Listings API returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Listings API error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("Malformed listings payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Source of the latest listings snapshot, newest first.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_recent_listings(&self) -> Result<Vec<ListingRecord>, FetchError>;
}
