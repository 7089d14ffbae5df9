/// Virtual time for the coexistence simulation.
///
/// A tick is one microsecond of simulated time. Nothing here reads the
/// wall clock: time advances only when the scheduler dispatches events.

/// Number of ticks in one simulated second.
pub const TICKS_PER_SEC: u64 = 1_000_000;

/// Convert a (non-negative) number of seconds into ticks, rounding to the
/// nearest microsecond. Negative and NaN inputs clamp to zero.
#[inline]
pub fn secs_to_ticks(secs: f64) -> u64 {
    if secs.is_nan() || secs <= 0.0 {
        return 0;
    }
    (secs * TICKS_PER_SEC as f64).round() as u64
}

/// Convert milliseconds into ticks.
#[inline]
pub fn millis_to_ticks(ms: f64) -> u64 {
    secs_to_ticks(ms / 1_000.0)
}

/// A point in simulated time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize,
)]
pub struct VirtualTime(u64);

impl VirtualTime {
    /// The zero-point of simulation time.
    pub const ZERO: VirtualTime = VirtualTime(0);

    /// Create a `VirtualTime` from a raw tick (µs) value.
    #[inline]
    pub fn new(ticks: u64) -> Self {
        VirtualTime(ticks)
    }

    /// Create a `VirtualTime` from seconds.
    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        VirtualTime(secs_to_ticks(secs))
    }

    /// Return the raw tick value.
    #[inline]
    pub fn ticks(self) -> u64 {
        self.0
    }

    /// Seconds since simulation start, as carried in heartbeat payloads.
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_SEC as f64
    }

    /// Advance time by `delta` ticks. `None` on overflow.
    #[inline]
    pub fn advance(self, delta: u64) -> Option<VirtualTime> {
        self.0.checked_add(delta).map(VirtualTime)
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: VirtualTime) -> bool {
        self.0 < other.0
    }

    /// Ticks elapsed between `other` and `self`; `None` if `other` is later.
    #[inline]
    pub fn duration_since(self, other: VirtualTime) -> Option<u64> {
        self.0.checked_sub(other.0)
    }
}

impl std::fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero() {
        assert_eq!(VirtualTime::ZERO.ticks(), 0);
        assert_eq!(VirtualTime::ZERO.as_secs_f64(), 0.0);
    }

    #[test]
    fn test_seconds_round_trip() {
        let t = VirtualTime::from_secs_f64(16.5);
        assert_eq!(t.ticks(), 16_500_000);
        assert_eq!(t.as_secs_f64(), 16.5);
    }

    #[test]
    fn test_secs_to_ticks_clamps_negative() {
        assert_eq!(secs_to_ticks(-1.0), 0);
        assert_eq!(secs_to_ticks(f64::NAN), 0);
        assert_eq!(millis_to_ticks(15.36), 15_360);
    }

    #[test]
    fn test_ordering() {
        let t1 = VirtualTime::new(10);
        let t2 = VirtualTime::new(20);
        assert!(t1 < t2);
        assert!(t1.is_before(t2));
        assert!(!t2.is_before(t1));
    }

    #[test]
    fn test_advance_overflow() {
        assert_eq!(VirtualTime::new(100).advance(50), Some(VirtualTime::new(150)));
        assert!(VirtualTime::new(u64::MAX).advance(1).is_none());
    }

    #[test]
    fn test_duration_since() {
        let t1 = VirtualTime::new(10);
        let t2 = VirtualTime::new(30);
        assert_eq!(t2.duration_since(t1), Some(20));
        assert_eq!(t1.duration_since(t2), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(VirtualTime::from_secs_f64(1.25).to_string(), "1.250000s");
    }
}
