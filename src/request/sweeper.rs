//! Background task expiring requests that outlived their deadline.

use std::{sync::Arc, time::Duration};

use tokio::{runtime::Handle, time::Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

use super::PendingRequests;

/// Spawn the expiry sweep for `requests` on `runtime`.
///
/// The task wakes at the earliest pending deadline, or after `interval` when
/// nothing is due sooner, and cancels every expired entry. A new registration
/// wakes it early so a short timeout is never stuck behind a long sleep. It
/// exits when `shutdown` is cancelled.
pub(crate) fn spawn_sweeper(
    requests: Arc<PendingRequests>,
    interval: Duration,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
    runtime: &Handle,
) {
    tracker.spawn_on(sweep_loop(requests, interval, shutdown), runtime);
}

async fn sweep_loop(requests: Arc<PendingRequests>, interval: Duration, shutdown: CancellationToken) {
    loop {
        let now = Instant::now();
        let periodic = now + interval;
        let wake_at = requests
            .next_expiry()
            .map_or(periodic, |expiry| expiry.min(periodic));

        tokio::select! {
            biased;

            () = shutdown.cancelled() => break,
            () = tokio::time::sleep_until(wake_at) => {
                let expired = requests.sweep_expired(Instant::now());
                if expired > 0 {
                    debug!(expired, remaining = requests.len(), "expired pending requests");
                }
            }
            () = requests.registered() => {}
        }
    }
    debug!("request sweeper stopped");
}
