use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::error;

use super::{JobSchedule, Scheduler};
use crate::config::PollerConfig;
use crate::dispatch::ListingDispatcher;

/// Register the listings poll on the configured schedule.
pub async fn register_poll_task(
    scheduler: &Scheduler,
    dispatcher: Arc<ListingDispatcher>,
    poller: &PollerConfig,
) -> Result<()> {
    let schedule = JobSchedule::from_config(poller);
    scheduler
        .add_job(&schedule, "listing-poll", move || {
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move {
                poll_once(&dispatcher).await;
            })
        })
        .await
}

/// Run a single tick. Storage failures end up here and are logged as errors;
/// everything else is already handled inside the tick.
pub async fn poll_once(dispatcher: &ListingDispatcher) {
    if let Err(e) = dispatcher.on_tick(Utc::now()).await {
        error!("Listing poll aborted: {:#}", e);
    }
}
