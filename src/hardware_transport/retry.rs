use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TransportError;

/// Bounded retry for transient ioctl failures.
///
/// Attempt `n` (1-based) that fails with a retryable errno sleeps
/// `backoff * n` before the next attempt. Any other failure propagates at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(rename = "backoff_ms", with = "millis")]
    pub backoff: Duration,
    pub retry_errnos: Vec<i32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(150),
            retry_errnos: vec![libc::EBUSY, libc::EAGAIN],
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts, same errno set.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    pub fn is_retryable(&self, err: &TransportError) -> bool {
        err.errno()
            .is_some_and(|errno| self.retry_errnos.contains(&errno))
    }

    pub fn run<T>(
        &self,
        mut op: impl FnMut() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && self.is_retryable(&err) => {
                    let delay = self.delay_after(attempt);
                    debug!(attempt, ?delay, error = %err, "transient hardware error, retrying");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
