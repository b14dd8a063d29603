//! Global request spacing
//!
//! Every request to the index servers and the archive goes through one shared
//! `Throttler`. Calls are spaced at least `interval` apart, measured from the
//! start of the previous call.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces the starts of operations by a minimum interval
///
/// The lock covers only the spacing decision; the guarded operation runs after
/// it has been released.
#[derive(Debug)]
pub struct Throttler {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttler {
    /// Creates a throttler with the given minimum spacing
    ///
    /// A zero interval disables spacing entirely.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: Mutex::new(None),
        }
    }

    /// Creates a throttler allowing at most `rps` call starts per second
    ///
    /// Non-positive or non-finite values disable spacing.
    pub fn per_second(rps: f64) -> Self {
        if rps.is_finite() && rps > 0.0 {
            Self::new(Duration::from_secs_f64(1.0 / rps))
        } else {
            Self::disabled()
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until a new call may start and records that start
    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }

        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                let deficit = self.interval - elapsed;
                tracing::trace!(wait_ms = deficit.as_millis() as u64, "Throttling request");
                tokio::time::sleep(deficit).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Runs `operation` once its start slot is reached
    ///
    /// # Arguments
    ///
    /// * `operation` - The future to run; it is polled only after spacing is enforced
    ///
    /// # Returns
    ///
    /// Whatever `operation` resolves to
    pub async fn throttle<F, T>(&self, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        self.wait().await;
        operation.await
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Self::disabled()
    }
}
