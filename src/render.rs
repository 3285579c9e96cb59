use crate::listings::{ListingRecord, SocialChannel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionLink {
    pub label: String,
    pub url: String,
}

/// A rendered alert, ready for any transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub links: Vec<ActionLink>,
}

fn channel_label(channel: SocialChannel) -> &'static str {
    match channel {
        SocialChannel::Telegram => "Telegram",
        SocialChannel::Twitter => "X",
    }
}

pub fn render(listing: &ListingRecord) -> Notification {
    let text = format!(
        "🚀 New Memecoin Detected!\n\nName: {}\nSymbol: {}\nListed: {}",
        listing.name,
        listing.symbol,
        listing.added_at.format("%Y-%m-%d %H:%M UTC")
    );

    let links = SocialChannel::ALL
        .into_iter()
        .filter_map(|channel| {
            listing
                .socials
                .get(channel)
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(|url| ActionLink {
                    label: channel_label(channel).to_string(),
                    url: url.to_string(),
                })
        })
        .collect();

    Notification { text, links }
}
