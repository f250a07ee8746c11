//! Reconnection Policy
//!
//! Fixed-delay reconnection for the stream clients. A stream client runs one
//! session per call; this loop owns the retry, forever, at a constant rate.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::connection::StreamError;
use crate::infrastructure::health::FeedState;
use crate::infrastructure::metrics::record_reconnect;

/// Default delay between sessions.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Fixed-delay reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
    attempt_count: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Create a policy with a fixed delay.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt. Counts the attempt.
    pub const fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.delay
    }

    /// Reset the attempt counter after a successful session.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}

/// Run `session` until cancelled, sleeping a fixed delay after each failure.
///
/// A session returning `Ok(())` means it observed cancellation. Returns once
/// `cancel` fires, either during a session or during the delay.
pub async fn run_with_reconnect<F, Fut>(
    mut policy: ReconnectPolicy,
    feed_state: &FeedState,
    cancel: &CancellationToken,
    mut session: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StreamError>>,
{
    let feed = feed_state.feed();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match session().await {
            Ok(()) => break,
            Err(e) => {
                // Reaching `streaming` zeroes the feed counter.
                if feed_state.reconnect_attempts() == 0 {
                    policy.reset();
                }
                feed_state.record_failure(e.to_string());

                let delay = policy.next_delay();
                tracing::warn!(
                    feed = feed.as_str(),
                    error = %e,
                    attempt = policy.attempt_count(),
                    delay_secs = delay.as_secs(),
                    "Stream session ended, reconnecting"
                );
                record_reconnect(feed);
                feed_state.record_reconnect_attempt();

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    tracing::info!(feed = feed.as_str(), "Stream task stopped");
}
