//! Periodic sweep of half-open slots

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use vncrepeater_relay::{Endpoint, Shutdown, SlotTable};

/// Sweep `registry` every `interval` until shutdown. A poisoned registry
/// brings the whole repeater down.
pub(crate) async fn run_reaper<C: Endpoint>(
    registry: Arc<SlotTable<C>>,
    interval: Duration,
    shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                match registry.sweep_stale() {
                    Ok(0) => {}
                    Ok(reclaimed) => {
                        info!("Reclaimed {} stale slot(s)", reclaimed);
                        if let (Ok(stats), Ok(oldest)) = (registry.stats(), registry.oldest_pending()) {
                            debug!(
                                "Slots: {} pending, {} paired, capacity {}, oldest pending {:?}",
                                stats.pending,
                                stats.paired,
                                stats.capacity,
                                oldest.unwrap_or_default()
                            );
                        }
                    }
                    Err(e) => {
                        error!("Reaper stopping: {}", e);
                        shutdown.trigger();
                        break;
                    }
                }
            }
        }
    }
    debug!("Reaper stopped");
}
