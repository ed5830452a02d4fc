//! Bounded polling for state that nobody announces.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// The probe never produced a value before the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimeout {
    pub waited: Duration,
}

/// Run `probe` every `interval` until it yields `Some`, or fail once
/// `timeout` has elapsed.
///
/// The probe runs immediately, then after each interval. The last sleep is
/// clamped to the deadline, so a timeout is reported no earlier than
/// `timeout` and no later than `timeout + interval`.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut probe: F,
) -> Result<T, PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        if let Some(value) = probe().await {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollTimeout {
                waited: now - started,
            });
        }
        sleep(interval.min(deadline - now)).await;
    }
}
