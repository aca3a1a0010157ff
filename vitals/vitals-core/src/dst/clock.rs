//! SimClock - Simulated Time
//!
//! TigerStyle: Deterministic, controllable time for simulation. Clones
//! share one timeline, so a test can hold a handle and move time under a
//! store that stamps records with it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::constants::{DST_TIME_ADVANCE_MS_MAX, TIME_MS_PER_SEC};

/// A simulated wall clock.
///
/// TigerStyle:
/// - Time only moves forward
/// - All time operations are explicit
/// - No reliance on system time
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    /// Milliseconds since the Unix epoch
    current_ms: Arc<AtomicU64>,
}

impl SimClock {
    /// Create a clock starting at the Unix epoch.
    ///
    /// # Example
    /// ```
    /// use vitals_core::dst::SimClock;
    /// let clock = SimClock::new();
    /// assert_eq!(clock.now_ms(), 0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at the given time.
    #[must_use]
    pub fn at_ms(start_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Create a clock starting at `start`.
    ///
    /// # Panics
    /// Panics if `start` is before the Unix epoch.
    #[must_use]
    pub fn at(start: DateTime<Utc>) -> Self {
        let ms = start.timestamp_millis();
        // Precondition
        assert!(ms >= 0, "start must not precede the epoch: {start}");
        Self::at_ms(ms.unsigned_abs())
    }

    /// Current time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }

    /// Current time in seconds (truncated).
    #[must_use]
    pub fn now_secs(&self) -> u64 {
        self.now_ms() / TIME_MS_PER_SEC
    }

    /// Current time as a UTC timestamp.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        let ms = i64::try_from(self.now_ms()).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Advance time by the given milliseconds.
    ///
    /// # Panics
    /// Panics if ms exceeds `DST_TIME_ADVANCE_MS_MAX`.
    ///
    /// # Returns
    /// The new current time.
    pub fn advance_ms(&self, ms: u64) -> u64 {
        // Precondition
        assert!(
            ms <= DST_TIME_ADVANCE_MS_MAX,
            "advance_ms({ms}) exceeds max ({DST_TIME_ADVANCE_MS_MAX})"
        );

        let old_time = self.current_ms.fetch_add(ms, Ordering::SeqCst);
        let new_time = old_time.saturating_add(ms);

        // Postcondition
        assert!(new_time >= old_time, "time must not go backwards");

        new_time
    }

    /// Advance time by whole seconds.
    ///
    /// # Panics
    /// Panics if the advance exceeds `DST_TIME_ADVANCE_MS_MAX`.
    pub fn advance_secs(&self, secs: u64) -> u64 {
        self.advance_ms(secs.saturating_mul(TIME_MS_PER_SEC))
    }
}
