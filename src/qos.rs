//! Quality-of-service tracking.
//!
//! Downstream reports how far behind (or ahead) rendering is running; the
//! controller folds those observations into an "earliest acceptable time"
//! and decides, before any conversion or compositing work is spent, whether
//! the frame at the head of the output window should be produced or dropped.

use crate::clock::ClockTime;

/// QoS observation state and frame counters.
#[derive(Debug, Clone)]
pub struct QosState {
    proportion: f64,
    earliest_time: ClockTime,
    live: bool,
    processed: u64,
    dropped: u64,
}

impl Default for QosState {
    fn default() -> Self {
        Self {
            proportion: 0.5,
            earliest_time: ClockTime::NONE,
            live: false,
            processed: 0,
            dropped: 0,
        }
    }
}

impl QosState {
    /// Create QoS state for a live or non-live pipeline.
    pub fn new(live: bool) -> Self {
        Self {
            live,
            ..Self::default()
        }
    }

    /// Fold a downstream QoS event into the observation.
    ///
    /// `diff` is the reported jitter in nanoseconds (positive = late),
    /// `timestamp` the running time the report refers to. For a non-live
    /// pipeline a late report projects the earliest acceptable time further
    /// ahead (`timestamp + 2·diff + frame_duration`) so the engine skips
    /// enough frames to actually catch up; live pipelines use the report
    /// as-is.
    pub fn update(
        &mut self,
        proportion: f64,
        diff: i64,
        timestamp: ClockTime,
        frame_duration: ClockTime,
    ) {
        tracing::debug!(
            proportion,
            diff,
            %timestamp,
            "updating QoS observation"
        );
        self.proportion = proportion;

        if timestamp.is_none() {
            self.earliest_time = ClockTime::NONE;
            return;
        }

        self.earliest_time = if !self.live && diff > 0 {
            let ahead = ClockTime::from_nanos(2 * diff as u64);
            let frame = if frame_duration.is_some() {
                frame_duration
            } else {
                ClockTime::ZERO
            };
            timestamp + ahead + frame
        } else if diff >= 0 {
            timestamp + ClockTime::from_nanos(diff as u64)
        } else {
            timestamp.saturating_sub(ClockTime::from_nanos(diff.unsigned_abs()))
        };
    }

    /// Jitter of `running_time` against the earliest acceptable time.
    ///
    /// Returns `None` when there is no usable observation (always process);
    /// otherwise `earliest_time − running_time`, positive meaning the frame
    /// is late and should be dropped.
    pub fn jitter(&self, running_time: ClockTime) -> Option<i64> {
        if running_time.is_none() {
            tracing::trace!("no valid timestamp, cannot do QoS");
            return None;
        }
        let earliest = self.earliest_time.to_option()?;
        earliest.signed_diff(running_time)
    }

    /// Record a produced frame.
    pub fn record_processed(&mut self) {
        self.processed += 1;
    }

    /// Record a dropped frame and build the report to send upstream.
    pub fn record_dropped(
        &mut self,
        jitter: i64,
        timestamp: ClockTime,
        duration: ClockTime,
    ) -> QosReport {
        self.dropped += 1;
        QosReport {
            jitter,
            proportion: self.proportion,
            processed: self.processed,
            dropped: self.dropped,
            timestamp,
            duration,
            live: self.live,
        }
    }

    /// Frames produced so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Frames dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forget the current observation but keep the counters.
    ///
    /// Called on segment boundaries: old reports refer to the old timeline.
    pub fn reset_observation(&mut self) {
        self.proportion = 0.5;
        self.earliest_time = ClockTime::NONE;
    }

    /// Full reset (flush/stop): observation and counters.
    pub fn reset(&mut self) {
        let live = self.live;
        *self = Self::new(live);
    }
}

/// Message emitted upstream when a frame is dropped for QoS reasons.
#[derive(Debug, Clone, PartialEq)]
pub struct QosReport {
    /// How late the dropped frame was, in nanoseconds.
    pub jitter: i64,
    /// Latest proportion reported by downstream.
    pub proportion: f64,
    /// Cumulative frames produced.
    pub processed: u64,
    /// Cumulative frames dropped.
    pub dropped: u64,
    /// Stream time of the dropped frame.
    pub timestamp: ClockTime,
    /// Duration of the dropped frame.
    pub duration: ClockTime,
    /// Whether the pipeline is live.
    pub live: bool,
}
