use chrono::Duration as ChronoDuration;
use log::*;
use payrec_engine::{Reconciler, SqliteDatabase};
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::integrations::gateway::HttpGatewayClient;

/// Starts the backfill sweep worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// The loop awaits each sweep before asking for the next tick, and missed ticks are delayed rather than bursted,
/// so there is never more than one sweep in flight. A sweep that overruns the interval simply pushes the next one
/// out.
pub fn start_sweep_worker(
    reconciler: Reconciler<SqliteDatabase, HttpGatewayClient>,
    interval: std::time::Duration,
    stale_threshold: ChronoDuration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("🕰️ Backfill sweep worker started ({}s interval)", interval.as_secs());
        loop {
            timer.tick().await;
            debug!("🕰️ Running backfill sweep");
            match reconciler.sweep_stale(stale_threshold).await {
                Ok(result) if result.checked == 0 => {
                    debug!("🕰️ No stale transactions found");
                },
                Ok(result) => {
                    info!(
                        "🕰️ Sweep checked {} stale transaction(s): {} accepted, {} superseded, {} rejected, {} \
                         failed",
                        result.checked, result.accepted, result.superseded, result.rejected, result.failures
                    );
                },
                Err(e) => {
                    error!("🕰️ Error running backfill sweep: {e}");
                },
            }
        }
    })
}
