use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// Longest wait handed to a single sleep, the same ceiling a 32-bit
/// millisecond timer has (about 24.8 days)
pub(crate) const MAX_TIMER_DELAY: Duration = Duration::from_millis(i32::MAX as u64);

/// Runs `task` once `delay` has elapsed.
///
/// Waits longer than `max_step` are split into a chain of sleeps no longer
/// than `max_step` each. Aborting the returned handle before the delay is up
/// means `task` never runs.
pub(crate) fn schedule_after<F>(delay: Duration, max_step: Duration, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let max_step = max_step.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut remaining = delay;

        while !remaining.is_zero() {
            let step = remaining.min(max_step);
            tokio::time::sleep(step).await;
            remaining -= step;

            if !remaining.is_zero() {
                trace!(remaining_ms = remaining.as_millis() as u64, "re-arming timer");
            }
        }

        task.await;
    })
}
