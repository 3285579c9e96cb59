use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::filter::{self, Verdict};
use crate::listings::{ListingRecord, ListingSource};
use crate::notify::NotifySink;
use crate::render;
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickStats {
    pub fetched: usize,
    pub already_processed: usize,
    pub new_listings: usize,
    pub delivered: usize,
    pub filtered_out: usize,
    pub failed_deliveries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickStats),
    /// Listings could not be fetched; nothing was changed.
    FetchFailed(String),
    /// Another tick was still running.
    Skipped,
    /// Storage failed mid-tick; listings handled before the failure stay processed.
    StorageFailed(String),
}

#[derive(Debug, Clone)]
pub struct TickSummary {
    pub at: DateTime<Utc>,
    pub outcome: TickOutcome,
}

impl std::fmt::Display for TickSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let at = self.at.format("%Y-%m-%d %H:%M:%S UTC");
        match &self.outcome {
            TickOutcome::Completed(stats) => write!(
                f,
                "{}: {} fetched, {} new, {} alerts sent, {} failed",
                at, stats.fetched, stats.new_listings, stats.delivered, stats.failed_deliveries
            ),
            TickOutcome::FetchFailed(reason) => write!(f, "{}: fetch failed ({})", at, reason),
            TickOutcome::Skipped => write!(f, "{}: skipped (previous poll still running)", at),
            TickOutcome::StorageFailed(reason) => write!(f, "{}: storage error ({})", at, reason),
        }
    }
}

/// Turns listing snapshots into per-subscriber alerts.
///
/// Dedup is per listing: once a listing has been through a tick it is never
/// looked at again, even for subscribers who join or change filters later.
pub struct ListingDispatcher {
    source: Arc<dyn ListingSource>,
    sink: Arc<dyn NotifySink>,
    store: Store,
    running: Mutex<()>,
    last_tick: RwLock<Option<TickSummary>>,
}

impl ListingDispatcher {
    pub fn new(source: Arc<dyn ListingSource>, sink: Arc<dyn NotifySink>, store: Store) -> Self {
        Self {
            source,
            sink,
            store,
            running: Mutex::new(()),
            last_tick: RwLock::new(None),
        }
    }

    pub async fn last_tick(&self) -> Option<TickSummary> {
        self.last_tick.read().await.clone()
    }

    /// Run one poll cycle. Fetch and delivery failures are absorbed; storage
    /// failures abort the tick and are returned.
    pub async fn on_tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Previous listing poll still running, skipping this tick");
            return Ok(TickOutcome::Skipped);
        };

        let outcome = match self.source.fetch_recent_listings().await {
            Ok(listings) => match self.dispatch(&listings, now).await {
                Ok(stats) => TickOutcome::Completed(stats),
                Err(e) => {
                    self.record(now, TickOutcome::StorageFailed(format!("{:#}", e)))
                        .await;
                    return Err(e);
                }
            },
            Err(e) => {
                warn!("Failed to fetch listings: {}", e);
                TickOutcome::FetchFailed(e.to_string())
            }
        };

        self.record(now, outcome.clone()).await;
        Ok(outcome)
    }

    async fn record(&self, at: DateTime<Utc>, outcome: TickOutcome) {
        *self.last_tick.write().await = Some(TickSummary { at, outcome });
    }

    async fn dispatch(&self, listings: &[ListingRecord], now: DateTime<Utc>) -> Result<TickStats> {
        let mut stats = TickStats {
            fetched: listings.len(),
            ..Default::default()
        };

        for listing in listings {
            if self.store.is_processed(&listing.id).await? {
                stats.already_processed += 1;
                continue;
            }

            stats.new_listings += 1;
            info!(
                "New listing {} ({}) id={}",
                listing.name, listing.symbol, listing.id
            );
            self.notify_subscribers(listing, now, &mut stats).await?;
            self.store.mark_processed(&listing.id).await?;
        }

        info!(
            "Poll complete: {} fetched, {} new, {} delivered, {} filtered, {} failed",
            stats.fetched,
            stats.new_listings,
            stats.delivered,
            stats.filtered_out,
            stats.failed_deliveries
        );
        Ok(stats)
    }

    async fn notify_subscribers(
        &self,
        listing: &ListingRecord,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) -> Result<()> {
        let mut notification = None;

        for subscriber_id in self.store.list_subscribers().await? {
            let Some(profile) = self.store.get_profile(&subscriber_id).await? else {
                continue;
            };

            if let Verdict::Reject(reason) = filter::evaluate(listing, &profile, now) {
                debug!(
                    "Listing {} filtered for {}: {:?}",
                    listing.id, subscriber_id, reason
                );
                stats.filtered_out += 1;
                continue;
            }

            let rendered = notification.get_or_insert_with(|| render::render(listing));
            match self.sink.deliver(&subscriber_id, rendered).await {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    warn!(
                        "Failed to deliver listing {} to {}: {}",
                        listing.id, subscriber_id, e
                    );
                    stats.failed_deliveries += 1;
                }
            }
        }

        Ok(())
    }
}
