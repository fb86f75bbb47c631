use rollcall_core::{Clock, Pipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Slack after midnight so the clock is firmly on the new day when we wake.
const WAKE_SLACK: Duration = Duration::from_millis(250);

/// Rebuild the attendance cache at every local midnight.
///
/// Requests also roll the cache lazily, so a late wake-up only delays the
/// eager rebuild.
pub fn spawn_rollover(pipeline: Arc<Pipeline>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = next_wake(pipeline.clock());
            tracing::debug!(secs = wait.as_secs(), "next day rollover scheduled");
            tokio::time::sleep(wait).await;
            roll(&pipeline).await;
        }
    })
}

fn next_wake(clock: &dyn Clock) -> Duration {
    clock.until_next_midnight().to_std().unwrap_or(Duration::ZERO) + WAKE_SLACK
}

async fn roll(pipeline: &Pipeline) {
    match pipeline.rollover().await {
        Ok(true) => tracing::info!(day = %pipeline.cache().day(), "attendance cache rolled over"),
        Ok(false) => tracing::debug!("cache already on the current day"),
        Err(e) => tracing::warn!(error = %e, "day rollover failed; requests will retry lazily"),
    }
}
