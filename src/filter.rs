//! Per-subscriber alert filters.
//!
//! A [`FilterProfile`] holds one subscriber's preferences; [`evaluate`] decides
//! whether a listing passes them at a given instant.

use chrono::{DateTime, Duration, Utc};
use std::str::FromStr;
use thiserror::Error;

use crate::listings::{ListingRecord, SocialChannel};

pub const DEFAULT_MAX_AGE_HOURS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterProfile {
    pub max_age_hours: u32,
    pub require_telegram: bool,
    pub require_twitter: bool,
}

impl Default for FilterProfile {
    fn default() -> Self {
        Self {
            max_age_hours: DEFAULT_MAX_AGE_HOURS,
            require_telegram: false,
            require_twitter: false,
        }
    }
}

impl FilterProfile {
    pub fn requires(&self, channel: SocialChannel) -> bool {
        match channel {
            SocialChannel::Telegram => self.require_telegram,
            SocialChannel::Twitter => self.require_twitter,
        }
    }

    pub fn apply(&mut self, update: FilterUpdate) {
        match update {
            FilterUpdate::MaxAge(hours) => self.max_age_hours = hours,
            FilterUpdate::RequireTelegram(on) => self.require_telegram = on,
            FilterUpdate::RequireTwitter(on) => self.require_twitter = on,
        }
    }
}

impl std::fmt::Display for FilterProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let toggle = |on: bool| if on { "on" } else { "off" };
        write!(
            f,
            "Max age: {}h\nRequire Telegram: {}\nRequire X/Twitter: {}",
            self.max_age_hours,
            toggle(self.require_telegram),
            toggle(self.require_twitter)
        )
    }
}

/// Why a listing was held back for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooOld,
    MissingSocial(SocialChannel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

/// Decide whether `listing` should be sent to a subscriber with `profile` at `now`.
pub fn evaluate(listing: &ListingRecord, profile: &FilterProfile, now: DateTime<Utc>) -> Verdict {
    let age = now - listing.added_at;
    if age > Duration::hours(i64::from(profile.max_age_hours)) {
        return Verdict::Reject(RejectReason::TooOld);
    }

    for channel in SocialChannel::ALL {
        if profile.requires(channel) && !listing.socials.has(channel) {
            return Verdict::Reject(RejectReason::MissingSocial(channel));
        }
    }

    Verdict::Accept
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown filter '{0}'. Use one of: age, telegram, twitter")]
    UnknownField(String),
    #[error("Age must be a whole number of hours (0 or more), got '{0}'")]
    InvalidAge(String),
    #[error("{field} must be 'on' or 'off', got '{value}'")]
    InvalidToggle { field: FilterField, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Age,
    Telegram,
    Twitter,
}

impl FromStr for FilterField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "age" => Ok(FilterField::Age),
            "telegram" => Ok(FilterField::Telegram),
            "twitter" => Ok(FilterField::Twitter),
            _ => Err(ValidationError::UnknownField(s.trim().to_string())),
        }
    }
}

impl std::fmt::Display for FilterField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterField::Age => f.write_str("age"),
            FilterField::Telegram => f.write_str("telegram"),
            FilterField::Twitter => f.write_str("twitter"),
        }
    }
}

/// A validated change to one profile field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterUpdate {
    MaxAge(u32),
    RequireTelegram(bool),
    RequireTwitter(bool),
}

impl FilterUpdate {
    pub fn parse(field: &str, value: &str) -> Result<Self, ValidationError> {
        let field: FilterField = field.parse()?;
        let value = value.trim();

        match field {
            FilterField::Age => value
                .parse::<u32>()
                .map(FilterUpdate::MaxAge)
                .map_err(|_| ValidationError::InvalidAge(value.to_string())),
            FilterField::Telegram => parse_toggle(field, value).map(FilterUpdate::RequireTelegram),
            FilterField::Twitter => parse_toggle(field, value).map(FilterUpdate::RequireTwitter),
        }
    }
}

fn parse_toggle(field: FilterField, value: &str) -> Result<bool, ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(ValidationError::InvalidToggle {
            field,
            value: value.to_string(),
        }),
    }
}
