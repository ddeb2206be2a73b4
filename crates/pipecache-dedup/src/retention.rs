//! Keep-until retention references.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default time a published identifier is guaranteed to outlive its upload
pub const DEFAULT_KEEP_UNTIL: Duration = Duration::from_secs(24 * 60 * 60);

/// Point in time until which the store must retain an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeepUntil(pub DateTime<Utc>);

impl KeepUntil {
    /// `duration` from now
    pub fn from_now(duration: Duration) -> Self {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        Self(Utc::now().checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// True once `now` has passed the reference
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.0
    }

    /// The later of two references
    pub fn max(self, other: KeepUntil) -> KeepUntil {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }
}

impl Default for KeepUntil {
    fn default() -> Self {
        Self::from_now(DEFAULT_KEEP_UNTIL)
    }
}
