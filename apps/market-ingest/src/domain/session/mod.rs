//! Trading Session Classification
//!
//! Maps a UTC instant to a coarse session label using New York civil time:
//!
//! | Local time       | Session      |
//! |------------------|--------------|
//! | before 09:30     | `pre_open`   |
//! | 09:30 to 15:59   | `regular`    |
//! | 16:00 and later  | `post_close` |
//!
//! The calendar is ignored: weekends and exchange holidays classify by clock
//! time alone. Downstream consumers already account for this.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::America::New_York;
use serde::Serialize;

/// Minutes after local midnight at which the regular session opens (09:30).
const REGULAR_OPEN_MINUTE: u32 = 9 * 60 + 30;

/// Minutes after local midnight at which the regular session closes (16:00).
const REGULAR_CLOSE_MINUTE: u32 = 16 * 60;

/// Coarse trading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    /// Before the regular open.
    PreOpen,
    /// Regular trading hours.
    Regular,
    /// At or after the regular close.
    PostClose,
}

impl Session {
    /// Classify an instant.
    #[must_use]
    pub fn classify(at: DateTime<Utc>) -> Self {
        let local = at.with_timezone(&New_York);
        let minute = local.hour() * 60 + local.minute();

        if minute < REGULAR_OPEN_MINUTE {
            Self::PreOpen
        } else if minute < REGULAR_CLOSE_MINUTE {
            Self::Regular
        } else {
            Self::PostClose
        }
    }

    /// Classify the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::classify(Utc::now())
    }

    /// Wire label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PreOpen => "pre_open",
            Self::Regular => "regular",
            Self::PostClose => "post_close",
        }
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
