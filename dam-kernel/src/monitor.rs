use crate::aggregator::StatusAggregator;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::{self, JoinHandle};
use tracing::{info, warn};

/// Surveille périodiquement les modules et passe en TIMEOUT ceux qui
/// n'ont plus envoyé de heartbeat depuis `timeout`.
pub fn spawn_staleness_monitor(aggregator: StatusAggregator, timeout: Duration) -> JoinHandle<()> {
    let period = (timeout / 2).max(Duration::from_millis(50));
    info!("[monitor] starting device monitoring (timeout: {}s)", timeout.as_secs_f32());

    task::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let expired = aggregator.mark_stale(timeout, OffsetDateTime::now_utc());
            for device_id in expired {
                warn!("[monitor] device {device_id} silent for more than {}s, marked TIMEOUT", timeout.as_secs());
            }
        }
    })
}
