//! Simulation epoch.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::Duration;

/// Universal time: seconds elapsed since the universe's epoch zero.
///
/// Stored as a [`Duration`] so long runs accumulate whole seconds exactly.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UT(Duration);

impl UT {
    pub const ZERO: UT = UT(Duration::ZERO);

    pub fn new_seconds(sec: f64) -> UT {
        UT(Duration::seconds_f64(sec))
    }

    pub fn as_seconds_f64(self) -> f64 {
        self.0.as_seconds_f64()
    }

    /// Advance by a floating-point number of seconds, saturating at the
    /// representable range.
    #[must_use]
    pub fn advanced(self, seconds: f64) -> Self {
        UT(self.0.saturating_add(Duration::saturating_seconds_f64(seconds)))
    }

    /// Advance by `seconds`, or `None` if the result is not representable.
    pub fn checked_advanced(self, seconds: f64) -> Option<Self> {
        Duration::checked_seconds_f64(seconds)
            .and_then(|d| self.0.checked_add(d))
            .map(UT)
    }

    /// Seconds from `self` until `later` (negative if `later` is earlier).
    pub fn seconds_until(self, later: UT) -> f64 {
        (later.0 - self.0).as_seconds_f64()
    }
}

impl fmt::Display for UT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.whole_seconds();
        write!(
            f,
            "UT({}d {:02}:{:02}:{:02})",
            secs.div_euclid(86_400),
            secs.rem_euclid(86_400) / 3600,
            secs.rem_euclid(3600) / 60,
            secs.rem_euclid(60)
        )
    }
}

impl fmt::Debug for UT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UT({}s)", self.0.as_seconds_f64())
    }
}
