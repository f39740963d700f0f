//! Background eviction of expired idle resources.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::manager::Manager;
use crate::pool::Shared;

/// Reaper loop: every `interval`, evict idle resources past their expiry.
///
/// Holds only a weak reference so an abandoned pool is not kept alive; runs
/// until `shutdown` fires (on close or when the last pool handle drops).
/// Destructor failures go to the pool's error sink and never stop the loop.
pub(crate) async fn run<M: Manager>(
    shared: Weak<Shared<M>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(interval_ms = interval.as_millis() as u64, "Reaper started");

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.reap().await;
    }

    tracing::debug!("Reaper stopped");
}
