use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::gate::SafetyGate;

/// Periodically expire pending approvals whose window has closed. Reads
/// already expire lazily; the sweep makes sure expiry is audited and
/// announced even when nobody is looking.
pub fn spawn_expiry_sweeper(gate: Arc<SafetyGate>, every: Duration) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "expiry sweeper started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match gate.sweep_expired() {
                Ok(expired) if !expired.is_empty() => {
                    info!(count = expired.len(), "sweeper expired approvals");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "expiry sweep failed"),
            }
        }
    })
}
