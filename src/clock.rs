//! Time and segment types for output scheduling.
//!
//! This module provides:
//! - [`ClockTime`]: a nanosecond timestamp (8 bytes, Copy) with a NONE
//!   sentinel for unknown/unset times
//! - [`Segment`]: a (start, stop, rate, position) descriptor mapping buffer
//!   timestamps to running time, including reverse playback

use std::time::Duration;

// ============================================================================
// ClockTime
// ============================================================================

/// Time in nanoseconds (8 bytes, Copy).
///
/// Represents time since an arbitrary epoch (usually stream start).
///
/// # Special Values
///
/// - `ClockTime::ZERO`: zero time
/// - `ClockTime::NONE`: invalid/unset time (sentinel, sorts last)
/// - `ClockTime::MAX`: maximum representable valid time
///
/// Because the NONE sentinel is `u64::MAX`, ordering comparisons treat an
/// unset time as "later than everything", which is exactly what unbounded
/// window ends need.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Maximum representable valid time (one less than the NONE sentinel).
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Invalid/unset time.
    pub const NONE: Self = Self(u64::MAX);

    /// One second.
    pub const SECOND: Self = Self(1_000_000_000);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1_000_000_000))
    }

    /// Get as nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Get as milliseconds (truncated).
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Get as seconds (truncated).
    #[inline]
    pub const fn secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Check if this is the NONE sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Check if this is a valid time (not NONE).
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// Convert to `Option`, mapping the NONE sentinel to `None`.
    #[inline]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_none() { None } else { Some(self) }
    }

    /// Saturating addition. NONE is absorbing.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        let v = self.0.saturating_add(rhs.0);
        if v == u64::MAX { Self::MAX } else { Self(v) }
    }

    /// Saturating subtraction. NONE is absorbing.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Checked subtraction. `None` on NONE operands or underflow.
    #[inline]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        if self.is_none() || rhs.is_none() {
            return None;
        }
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Signed difference `self - other` in nanoseconds.
    ///
    /// Returns `None` if either operand is NONE. Used for QoS jitter, where
    /// the sign matters.
    #[inline]
    pub const fn signed_diff(self, other: Self) -> Option<i64> {
        if self.is_none() || other.is_none() {
            return None;
        }
        Some(self.0 as i64 - other.0 as i64)
    }

    /// The smaller of two times, treating NONE as "unbounded" (+inf).
    #[inline]
    pub fn min_valid(self, other: Self) -> Self {
        self.min(other)
    }

    /// The larger of two valid times; NONE operands are ignored.
    #[inline]
    pub fn max_valid(self, other: Self) -> Self {
        match (self.is_none(), other.is_none()) {
            (true, true) => Self::NONE,
            (true, false) => other,
            (false, true) => self,
            (false, false) => self.max(other),
        }
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::AddAssign for ClockTime {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for ClockTime {
    #[inline]
    fn from(d: Duration) -> Self {
        Self(d.as_nanos().min(u64::MAX as u128 - 1) as u64)
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "{}.{:03}s", self.secs(), (self.0 / 1_000_000) % 1000)
        }
    }
}

// ============================================================================
// Segment
// ============================================================================

/// A playback segment mapping buffer timestamps to running time.
///
/// `start`/`stop` bound the valid timestamp range (`stop` may be NONE for an
/// unbounded segment), `rate` is the playback rate (negative for reverse
/// playback), and `position` tracks the current playback position in
/// timestamp units.
///
/// Running time is the elapsed output time since playback start: for a
/// forward segment `(ts - start) / |rate|`, for a reverse segment
/// `(stop - ts) / |rate|`. It is what makes buffers from ports with
/// independent timestamp origins comparable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    /// First valid timestamp.
    pub start: ClockTime,
    /// One past the last valid timestamp (NONE = unbounded).
    pub stop: ClockTime,
    /// Playback rate. Negative plays the segment backwards.
    pub rate: f64,
    /// Current playback position in timestamp units (NONE = not started).
    pub position: ClockTime,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            start: ClockTime::ZERO,
            stop: ClockTime::NONE,
            rate: 1.0,
            position: ClockTime::NONE,
        }
    }
}

impl Segment {
    /// Create a forward segment covering `[start, stop)`.
    pub fn new(start: ClockTime, stop: ClockTime) -> Self {
        Self {
            start,
            stop,
            ..Self::default()
        }
    }

    /// Create a segment with an explicit rate.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Whether this segment plays in reverse.
    #[inline]
    pub fn is_reverse(&self) -> bool {
        self.rate < 0.0
    }

    /// Map a timestamp to running time.
    ///
    /// Returns NONE if `ts` is NONE or lies outside the segment bounds.
    pub fn to_running_time(&self, ts: ClockTime) -> ClockTime {
        if ts.is_none() {
            return ClockTime::NONE;
        }
        if ts < self.start || (self.stop.is_some() && ts > self.stop) {
            return ClockTime::NONE;
        }
        let base = if self.rate >= 0.0 {
            ts - self.start
        } else {
            // Reverse: running time counts down from stop.
            if self.stop.is_none() {
                return ClockTime::NONE;
            }
            self.stop - ts
        };
        scale_by_rate(base, self.rate)
    }

    /// Map a timestamp to stream time (position within the stream,
    /// independent of rate).
    pub fn to_stream_time(&self, ts: ClockTime) -> ClockTime {
        if ts.is_none() || ts < self.start {
            return ClockTime::NONE;
        }
        ts - self.start
    }

    /// Clip a `[start, end)` timestamp range to the segment bounds.
    ///
    /// Returns `None` if the range lies entirely outside the segment.
    /// An unknown (`NONE`) `end` is preserved as unbounded.
    pub fn clip(&self, start: ClockTime, end: ClockTime) -> Option<(ClockTime, ClockTime)> {
        if start.is_some() && self.stop.is_some() && start >= self.stop {
            return None;
        }
        if end.is_some() && end < self.start {
            return None;
        }
        let clipped_start = start.max_valid(self.start);
        let clipped_end = end.min_valid(self.stop);
        Some((clipped_start, clipped_end))
    }
}

/// Scale a time span by the magnitude of a playback rate.
fn scale_by_rate(span: ClockTime, rate: f64) -> ClockTime {
    if span.is_none() {
        return ClockTime::NONE;
    }
    let abs = rate.abs();
    if abs == 1.0 || abs == 0.0 {
        return span;
    }
    ClockTime::from_nanos((span.nanos() as f64 / abs).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_time_sentinel() {
        assert!(ClockTime::NONE.is_none());
        assert!(ClockTime::MAX.is_some());
        assert_eq!(ClockTime::NONE.to_option(), None);
        assert_eq!(ClockTime::from_secs(1).to_option(), Some(ClockTime::SECOND));
        // NONE absorbs arithmetic
        assert!((ClockTime::NONE + ClockTime::SECOND).is_none());
        assert!((ClockTime::SECOND - ClockTime::NONE).is_none());
        // NONE sorts after every valid time
        assert!(ClockTime::NONE > ClockTime::MAX);
    }

    #[test]
    fn test_clock_time_signed_diff() {
        let a = ClockTime::from_millis(100);
        let b = ClockTime::from_millis(150);
        assert_eq!(a.signed_diff(b), Some(-50_000_000));
        assert_eq!(b.signed_diff(a), Some(50_000_000));
        assert_eq!(a.signed_diff(ClockTime::NONE), None);
    }

    #[test]
    fn test_running_time_forward() {
        let seg = Segment::new(ClockTime::from_secs(10), ClockTime::from_secs(20));
        assert_eq!(
            seg.to_running_time(ClockTime::from_secs(12)),
            ClockTime::from_secs(2)
        );
        // Outside the segment
        assert!(seg.to_running_time(ClockTime::from_secs(5)).is_none());
        assert!(seg.to_running_time(ClockTime::from_secs(25)).is_none());
    }

    #[test]
    fn test_running_time_reverse() {
        let seg =
            Segment::new(ClockTime::ZERO, ClockTime::from_secs(10)).with_rate(-1.0);
        // Reverse playback: running time counts down from stop
        assert_eq!(
            seg.to_running_time(ClockTime::from_secs(10)),
            ClockTime::ZERO
        );
        assert_eq!(
            seg.to_running_time(ClockTime::from_secs(7)),
            ClockTime::from_secs(3)
        );
    }

    #[test]
    fn test_running_time_rate_scaling() {
        let seg = Segment::new(ClockTime::ZERO, ClockTime::NONE).with_rate(2.0);
        assert_eq!(
            seg.to_running_time(ClockTime::from_secs(4)),
            ClockTime::from_secs(2)
        );
    }

    #[test]
    fn test_clip() {
        let seg = Segment::new(ClockTime::from_secs(1), ClockTime::from_secs(5));
        // Fully inside
        assert_eq!(
            seg.clip(ClockTime::from_secs(2), ClockTime::from_secs(3)),
            Some((ClockTime::from_secs(2), ClockTime::from_secs(3)))
        );
        // Overlapping the start
        assert_eq!(
            seg.clip(ClockTime::ZERO, ClockTime::from_secs(2)),
            Some((ClockTime::from_secs(1), ClockTime::from_secs(2)))
        );
        // Entirely before / after
        assert_eq!(seg.clip(ClockTime::ZERO, ClockTime::from_millis(500)), None);
        assert_eq!(
            seg.clip(ClockTime::from_secs(6), ClockTime::from_secs(7)),
            None
        );
        // Unknown end stays unbounded up to stop
        assert_eq!(
            seg.clip(ClockTime::from_secs(2), ClockTime::NONE),
            Some((ClockTime::from_secs(2), ClockTime::from_secs(5)))
        );
    }

    #[test]
    fn test_stream_time() {
        let seg = Segment::new(ClockTime::from_secs(2), ClockTime::NONE);
        assert_eq!(
            seg.to_stream_time(ClockTime::from_secs(3)),
            ClockTime::from_secs(1)
        );
        assert!(seg.to_stream_time(ClockTime::from_secs(1)).is_none());
    }
}
