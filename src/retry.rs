//! Retry coordination for proposer re-attempts.
//!
//! A coordinator turns a stream of try-permission triggers into a
//! delayed stream. The initial firing is never a retry: every
//! implementation passes emission 0 through immediately.

use std::time::Duration;

use futures::{Stream, StreamExt};

/// Schedules the delay applied to each trigger emission.
pub trait RetryCoordinator: Send + Sync + 'static {
    /// Delay applied to the nth emission. Emission 0 is the initial
    /// firing and must map to [`Duration::ZERO`].
    fn delay(&self, emission: u32) -> Duration;

    /// Transform a trigger stream into a delayed trigger stream.
    fn coordinate<'a, S>(&'a self, trigger: S) -> impl Stream<Item = S::Item> + Send + 'a
    where
        S: Stream + Send + 'a,
        S::Item: Send,
    {
        trigger.enumerate().then(move |(n, item)| {
            let delay = self.delay(u32::try_from(n).unwrap_or(u32::MAX));
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                item
            }
        })
    }
}

/// Identity transform: every emission fires immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRetry;

impl RetryCoordinator for NoopRetry {
    fn delay(&self, _emission: u32) -> Duration {
        Duration::ZERO
    }
}

/// Geometric backoff: the nth retry is delayed by
/// `initial * multiplier^(n-1)`.
#[derive(Debug, Clone)]
pub struct IncrementalBackoff {
    /// Delay of the first retry.
    pub initial: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
}

impl IncrementalBackoff {
    /// Create a coordinator with the given base delay and factor.
    #[must_use]
    pub fn new(initial: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            multiplier,
        }
    }
}

impl RetryCoordinator for IncrementalBackoff {
    fn delay(&self, emission: u32) -> Duration {
        let Some(retry) = emission.checked_sub(1) else {
            return Duration::ZERO;
        };
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(retry.cast_signed());
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Power-of-two backoff: the nth retry is delayed by `2^(n-1) * 100ms`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialBackoff;

impl RetryCoordinator for ExponentialBackoff {
    fn delay(&self, emission: u32) -> Duration {
        let Some(retry) = emission.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        Duration::from_millis(100u64.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[test]
    fn noop_never_delays() {
        assert_eq!(NoopRetry.delay(0), Duration::ZERO);
        assert_eq!(NoopRetry.delay(7), Duration::ZERO);
    }

    #[test]
    fn first_emission_is_not_a_retry() {
        let incremental = IncrementalBackoff::new(Duration::from_millis(50), 3.0);
        assert_eq!(incremental.delay(0), Duration::ZERO);
        assert_eq!(ExponentialBackoff.delay(0), Duration::ZERO);
    }

    #[test]
    fn incremental_grows_geometrically() {
        let backoff = IncrementalBackoff::new(Duration::from_millis(10), 2.0);
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(20));
        assert_eq!(backoff.delay(3), Duration::from_millis(40));
    }

    #[test]
    fn exponential_doubles_from_100ms() {
        assert_eq!(ExponentialBackoff.delay(1), Duration::from_millis(100));
        assert_eq!(ExponentialBackoff.delay(2), Duration::from_millis(200));
        assert_eq!(ExponentialBackoff.delay(4), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn coordinate_delays_only_retries() {
        let start = tokio::time::Instant::now();
        let backoff = ExponentialBackoff;
        let delayed: Vec<u32> = backoff.coordinate(stream::iter([1, 2, 3])).collect().await;
        assert_eq!(delayed, vec![1, 2, 3]);

        // 0 + 100ms + 200ms of schedule elapsed on the paused clock.
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
