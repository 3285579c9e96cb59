use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{FetchError, ListingRecord, ListingSource, Socials};
use crate::config::ListingsConfig;

#[derive(Debug, Deserialize)]
struct ListingsResponse {
    #[serde(default)]
    status: Option<ApiStatus>,
    #[serde(default)]
    data: Vec<RawListing>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawListing {
    id: serde_json::Value,
    name: String,
    symbol: String,
    #[serde(default)]
    date_added: Option<String>,
    #[serde(default)]
    urls: Option<RawUrls>,
}

/// Channels may be missing, empty, or explicitly `null`.
#[derive(Debug, Default, Deserialize)]
struct RawUrls {
    #[serde(default)]
    telegram: Option<Vec<String>>,
    #[serde(default)]
    twitter: Option<Vec<String>>,
}

/// CoinMarketCap `listings/latest` client, sorted by date added.
pub struct CoinMarketCapSource {
    client: reqwest::Client,
    config: ListingsConfig,
}

impl CoinMarketCapSource {
    pub fn new(config: ListingsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build listings HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ListingSource for CoinMarketCapSource {
    async fn fetch_recent_listings(&self) -> Result<Vec<ListingRecord>, FetchError> {
        let url = format!(
            "{}/v1/cryptocurrency/listings/latest",
            self.config.base_url.trim_end_matches('/')
        );
        let limit = self.config.limit.to_string();

        debug!("Fetching listings from {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-CMC_PRO_API_KEY", &self.config.api_key)
            .header("Accept", "application/json")
            .query(&[
                ("start", "1"),
                ("limit", limit.as_str()),
                ("sort", "date_added"),
                ("sort_dir", "desc"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Status { status, body });
        }

        parse_listings(&body)
    }
}

/// Decode a `listings/latest` payload into records, newest first.
/// Entries without a usable `date_added` are dropped.
pub(crate) fn parse_listings(body: &str) -> Result<Vec<ListingRecord>, FetchError> {
    let response: ListingsResponse = serde_json::from_str(body)?;

    if let Some(status) = response.status {
        if status.error_code != 0 {
            return Err(FetchError::Api {
                code: status.error_code,
                message: status.error_message.unwrap_or_default(),
            });
        }
    }

    let mut records: Vec<ListingRecord> = response
        .data
        .into_iter()
        .filter_map(|raw| {
            let id = match &raw.id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let added_at = match raw.date_added.as_deref().map(parse_timestamp) {
                Some(Some(ts)) => ts,
                _ => {
                    debug!("Skipping listing {} ({}): no usable date_added", id, raw.symbol);
                    return None;
                }
            };
            let urls = raw.urls.unwrap_or_default();
            Some(ListingRecord {
                id,
                name: raw.name,
                symbol: raw.symbol,
                added_at,
                socials: Socials {
                    telegram: first_url(urls.telegram.as_deref()),
                    twitter: first_url(urls.twitter.as_deref()),
                },
            })
        })
        .collect();

    records.sort_by(|a, b| b.added_at.cmp(&a.added_at));
    Ok(records)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    // Some payloads omit the offset; treat those as UTC.
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn first_url(urls: Option<&[String]>) -> Option<String> {
    urls.unwrap_or_default()
        .iter()
        .map(|u| u.trim())
        .find(|u| !u.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PAYLOAD: &str = r#"{
        "status": { "error_code": 0, "error_message": null },
        "data": [
            {
                "id": 101,
                "name": "Older Coin",
                "symbol": "OLD",
                "date_added": "2024-05-01T08:00:00.000Z",
                "urls": { "telegram": [], "twitter": ["https://twitter.com/old"] }
            },
            {
                "id": 102,
                "name": "Fresh Coin",
                "symbol": "FRSH",
                "date_added": "2024-05-01T10:30:00.000Z",
                "urls": { "telegram": ["", "https://t.me/fresh"] }
            },
            {
                "id": 103,
                "name": "Undated",
                "symbol": "UND"
            },
            {
                "id": 104,
                "name": "Naive Time",
                "symbol": "NAIV",
                "date_added": "2024-05-01T09:00:00"
            }
        ]
    }"#;

    #[test]
    fn test_parse_sorts_newest_first_and_skips_undated() {
        let records = parse_listings(PAYLOAD).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["102", "104", "101"]);
        assert_eq!(
            records[0].added_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_takes_first_non_blank_url() {
        let records = parse_listings(PAYLOAD).unwrap();
        let fresh = records.iter().find(|r| r.symbol == "FRSH").unwrap();
        assert_eq!(fresh.socials.telegram.as_deref(), Some("https://t.me/fresh"));
        assert_eq!(fresh.socials.twitter, None);

        let old = records.iter().find(|r| r.symbol == "OLD").unwrap();
        assert_eq!(old.socials.telegram, None);
        assert_eq!(old.socials.twitter.as_deref(), Some("https://twitter.com/old"));
    }

    #[test]
    fn test_parse_api_error() {
        let body = r#"{"status": {"error_code": 1002, "error_message": "API key missing."}}"#;
        match parse_listings(body) {
            Err(FetchError::Api { code, message }) => {
                assert_eq!(code, 1002);
                assert_eq!(message, "API key missing.");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_payload() {
        assert!(matches!(
            parse_listings("<html>bad gateway</html>"),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn test_null_socials_mean_no_link() {
        let body = r#"{
            "data": [
                {
                    "id": 201,
                    "name": "Good Coin",
                    "symbol": "GOOD",
                    "date_added": "2024-05-01T10:00:00.000Z",
                    "urls": { "telegram": ["https://t.me/good"], "twitter": ["https://x.com/good"] }
                },
                {
                    "id": 202,
                    "name": "Quiet Coin",
                    "symbol": "QUIET",
                    "date_added": "2024-05-01T09:00:00.000Z",
                    "urls": { "telegram": null, "twitter": null }
                },
                {
                    "id": 203,
                    "name": "No Urls",
                    "symbol": "NURL",
                    "date_added": "2024-05-01T08:00:00.000Z",
                    "urls": null
                }
            ]
        }"#;

        let records = parse_listings(body).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["201", "202", "203"]);
        assert_eq!(records[0].socials.twitter.as_deref(), Some("https://x.com/good"));
        for quiet in &records[1..] {
            assert_eq!(quiet.socials.telegram, None);
            assert_eq!(quiet.socials.twitter, None);
        }
    }

    #[test]
    fn test_empty_data_is_not_an_error() {
        let records = parse_listings(r#"{"data": []}"#).unwrap();
        assert!(records.is_empty());
    }
}
