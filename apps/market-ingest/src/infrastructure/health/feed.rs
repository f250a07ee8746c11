//! Per-stream connection tracking shared by a stream client and `/health`.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::infrastructure::metrics::{Feed, set_stream_connected};

/// Where a stream client is in its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Idle between sessions.
    #[default]
    Disconnected,
    /// Dialing.
    Connecting,
    /// Waiting on the login verdict.
    Authenticating,
    /// Waiting on the subscription echo.
    Subscribing,
    /// Data is flowing.
    Streaming,
}

#[derive(Debug, Default)]
struct Session {
    state: ConnectionState,
    last_connected_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Session state plus counters for one upstream feed.
///
/// Reaching [`ConnectionState::Streaming`] clears the last error and the
/// reconnect count and mirrors the up/down flag into metrics.
#[derive(Debug)]
pub struct FeedState {
    feed: Feed,
    session: RwLock<Session>,
    reconnect_attempts: AtomicU64,
    messages_received: AtomicU64,
}

impl FeedState {
    /// Fresh, disconnected state for `feed`.
    #[must_use]
    pub fn new(feed: Feed) -> Self {
        Self {
            feed,
            session: RwLock::new(Session::default()),
            reconnect_attempts: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    /// Which feed this tracks.
    #[must_use]
    pub const fn feed(&self) -> Feed {
        self.feed
    }

    /// Move to `state`.
    pub fn set_state(&self, state: ConnectionState) {
        let streaming = state == ConnectionState::Streaming;
        {
            let mut session = self.session.write();
            session.state = state;
            if streaming {
                session.last_connected_at = Some(Utc::now());
                session.last_error = None;
            }
        }
        if streaming {
            self.reconnect_attempts.store(0, Ordering::Relaxed);
        }
        set_stream_connected(self.feed, streaming);
    }

    /// Drop to disconnected and remember why.
    pub fn record_failure(&self, reason: String) {
        {
            let mut session = self.session.write();
            session.state = ConnectionState::Disconnected;
            session.last_error = Some(reason);
        }
        set_stream_connected(self.feed, false);
    }

    /// Count a redial.
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a data message.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.read().state
    }

    /// Data messages since startup.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Redials since the feed last reached streaming.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub(super) fn report(&self) -> FeedReport {
        let session = self.session.read();
        FeedReport {
            state: session.state,
            streaming: session.state == ConnectionState::Streaming,
            messages_received: self.messages_received(),
            reconnect_attempts: self.reconnect_attempts(),
            last_connected_at: session.last_connected_at,
            last_error: session.last_error.clone(),
        }
    }
}

/// `/health` view of one feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedReport {
    /// Session state.
    pub state: ConnectionState,
    /// `state == streaming`.
    pub streaming: bool,
    /// Data messages since startup.
    pub messages_received: u64,
    /// Redials since the last good session.
    pub reconnect_attempts: u64,
    /// When streaming was last reached.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Why the last session ended, cleared on success.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_is_kept_until_the_next_good_session() {
        let feed = FeedState::new(Feed::News);
        feed.set_state(ConnectionState::Connecting);
        feed.record_failure("dial refused".to_string());
        feed.record_reconnect_attempt();
        feed.record_reconnect_attempt();

        let report = feed.report();
        assert_eq!(report.state, ConnectionState::Disconnected);
        assert_eq!(report.last_error.as_deref(), Some("dial refused"));
        assert_eq!(report.reconnect_attempts, 2);
        assert!(report.last_connected_at.is_none());

        feed.set_state(ConnectionState::Streaming);
        let report = feed.report();
        assert!(report.streaming);
        assert!(report.last_error.is_none());
        assert_eq!(report.reconnect_attempts, 0);
        assert!(report.last_connected_at.is_some());
    }

    #[test]
    fn message_count_survives_reconnects() {
        let feed = FeedState::new(Feed::Stocks);
        feed.record_message();
        feed.record_failure("closed".to_string());
        feed.set_state(ConnectionState::Streaming);
        feed.record_message();
        assert_eq!(feed.messages_received(), 2);
    }

    #[test]
    fn states_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(ConnectionState::Authenticating).unwrap(),
            "authenticating"
        );
    }
}
