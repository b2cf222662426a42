//! Long-running background task that nudges every in-transit volunteer
//! toward its destination once per tick.

use std::sync::Arc;
use std::time::Duration;

use foodbridge_core::{LifecycleManager, Store};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Run the tick loop until `shutdown` is cancelled.
///
/// A failed tick is logged and the loop carries on; postings that lost a
/// race against a user action are picked up on the next tick.
pub async fn run<S: Store + 'static>(
    manager: Arc<LifecycleManager<S>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    info!("Simulator starting, tick every {}ms", interval.as_millis());

    loop {
        match manager.simulate_tick().await {
            Ok(report) if report.moved > 0 || !report.skipped.is_empty() => {
                debug!(
                    "Tick moved {} postings, skipped {:?}",
                    report.moved, report.skipped
                );
            }
            Ok(_) => {}
            Err(e) => error!("Simulator tick failed: {e}"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Simulator stopped");
}
