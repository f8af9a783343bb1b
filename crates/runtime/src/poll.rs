use std::fmt;
use std::time::Duration;

use tokio::time::{Instant, sleep};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PollTimeout {
    pub timeout: Duration,
}

impl fmt::Display for PollTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "condition not met within {} ms", self.timeout.as_millis())
    }
}

impl std::error::Error for PollTimeout {}

/// Evaluates `check` every `interval` until it yields a value or `timeout`
/// elapses. The first check happens immediately.
pub async fn poll_until<T>(
    interval: Duration,
    timeout: Duration,
    mut check: impl FnMut() -> Option<T>,
) -> Result<T, PollTimeout> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return Ok(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PollTimeout { timeout });
        }
        sleep(interval.min(deadline - now)).await;
    }
}
