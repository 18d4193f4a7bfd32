use relay_core::types::FanoutJob;
use relay_core::BroadcastError;
use std::time::Duration;
use tracing::{info, warn};

use crate::WorkerState;

/// Backoff before re-running a failed fan-out. A broadcast is only useful
/// while it is fresh, so the schedule tops out at ten minutes.
pub fn retry_policy(attempt: u32) -> Duration {
    match attempt {
        0 => Duration::from_secs(0),
        1 => Duration::from_secs(5),
        2 => Duration::from_secs(30),
        3 => Duration::from_secs(120),
        _ => Duration::from_secs(600),
    }
}

pub async fn handle_fanout_job(state: &WorkerState, job: FanoutJob) -> anyhow::Result<()> {
    match state.broadcaster.run_fanout(&job).await {
        Ok(report) => {
            info!(
                channel_id = %job.channel_id,
                subscribers = report.subscribers,
                delivered = report.delivered,
                probed = report.probed,
                evicted = report.evicted.len(),
                skipped = report.skipped.len(),
                "fan-out complete"
            );
            Ok(())
        }
        Err(BroadcastError::ChannelNotFound(channel_id)) => {
            warn!(channel_id = %channel_id, "dropping fan-out for unknown channel");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
