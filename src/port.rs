//! Input ports.
//!
//! An [`InputPort`] is one independently-timed video input: a producer
//! pushes timestamped buffers and format changes into it from its own
//! thread, and the aggregation cycle decides per output window which of the
//! queued buffers becomes the port's *current* buffer.
//!
//! Locking: each port carries its own fine-grained lock so producers never
//! contend with the whole engine, only with the brief per-port inspection
//! the cycle performs. The engine's coarse cycle lock is always taken
//! before any port lock, never the other way around.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::{VideoBuffer, VideoFrame};
use crate::clock::{ClockTime, Segment};
use crate::convert::{ConvertBackend, ConvertPool, ConverterConfig, FrameConverter, PendingFrame};
use crate::error::{Error, Result};
use crate::format::VideoInfo;

/// Identifier of an input port, unique within its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

/// Per-port configuration.
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Stacking position in the composited output (lower = further back).
    pub zorder: u32,
    /// Keep repeating the last buffer after this input reaches
    /// end-of-stream.
    pub repeat_after_eos: bool,
    /// Longest a stale buffer may keep being repeated past its end time
    /// before the port stops contributing (NONE = forever for repeating
    /// ports, immediately for the duration-less case).
    pub max_last_buffer_repeat: ClockTime,
    /// Force the negotiated output format to carry an alpha channel.
    pub needs_alpha: bool,
    /// Opaque configuration forwarded to the conversion backend.
    pub converter_config: ConverterConfig,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            zorder: 0,
            repeat_after_eos: false,
            max_last_buffer_repeat: ClockTime::NONE,
            needs_alpha: false,
            converter_config: ConverterConfig::default(),
        }
    }
}

impl PortConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the z-order.
    pub fn with_zorder(mut self, zorder: u32) -> Self {
        self.zorder = zorder;
        self
    }

    /// Repeat the last buffer after end-of-stream.
    pub fn with_repeat_after_eos(mut self, repeat: bool) -> Self {
        self.repeat_after_eos = repeat;
        self
    }

    /// Bound how long a stale buffer may be repeated.
    pub fn with_max_last_buffer_repeat(mut self, max: ClockTime) -> Self {
        self.max_last_buffer_repeat = max;
        self
    }

    /// Require an alpha-capable negotiated output format.
    pub fn with_needs_alpha(mut self, needs_alpha: bool) -> Self {
        self.needs_alpha = needs_alpha;
        self
    }

    /// Set the conversion backend configuration.
    pub fn with_converter_config(mut self, config: ConverterConfig) -> Self {
        self.converter_config = config;
        self
    }
}

/// Result of one port's queue-fill step for an output window.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FillOutcome {
    /// The port holds or expects data at/after this window; blocks
    /// overall end-of-stream.
    pub alive: bool,
    /// Upstream signalled end-of-stream on this port.
    pub is_eos: bool,
    /// The port is configured to repeat after end-of-stream.
    pub repeats: bool,
    /// An end-of-stream repeat port is re-using its previous buffer.
    pub repeat_eos: bool,
    /// The port cannot contribute to this window yet.
    pub need_more_data: bool,
    /// A pending format change became active; output caps must be
    /// renegotiated before compositing.
    pub need_reconfigure: bool,
}

/// Queue entries: format changes travel in order with the buffers, so a
/// buffer produced under the old format is never interpreted under the new
/// one.
enum QueueItem {
    Buffer(VideoBuffer),
    Caps(VideoInfo),
}

#[derive(Default)]
struct PortState {
    segment: Segment,
    queue: VecDeque<QueueItem>,
    eos: bool,
    info: Option<VideoInfo>,
    pending_info: Option<VideoInfo>,
    reported_duration: ClockTime,
    config: PortConfig,
    converter: Option<FrameConverter>,
    converter_dirty: bool,
    current: Option<VideoBuffer>,
    start_time: ClockTime,
    end_time: ClockTime,
    pending_frame: Option<PendingFrame>,
}

/// One video input of the aggregation engine.
///
/// Created by [`VideoAggregator::add_port`](crate::engine::VideoAggregator::add_port);
/// the returned handle is what the producing side holds on to.
pub struct InputPort {
    id: PortId,
    /// Set when something this port did requires output renegotiation.
    /// Shared with the owning engine instead of a back-reference.
    reconfigure: Arc<AtomicBool>,
    state: Mutex<PortState>,
}

impl InputPort {
    pub(crate) fn new(id: PortId, config: PortConfig, reconfigure: Arc<AtomicBool>) -> Self {
        Self {
            id,
            reconfigure,
            state: Mutex::new(PortState {
                start_time: ClockTime::NONE,
                end_time: ClockTime::NONE,
                reported_duration: ClockTime::NONE,
                config,
                ..PortState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// This port's identifier.
    pub fn id(&self) -> PortId {
        self.id
    }

    // ------------------------------------------------------------------
    // Producer API
    // ------------------------------------------------------------------

    /// Queue a buffer from the producing side.
    ///
    /// Fails after [`mark_eos`](Self::mark_eos).
    pub fn push(&self, buffer: VideoBuffer) -> Result<()> {
        let mut s = self.lock();
        if s.eos {
            return Err(Error::Port(format!("port {:?} already at eos", self.id)));
        }
        s.queue.push_back(QueueItem::Buffer(buffer));
        Ok(())
    }

    /// Apply a format change from upstream.
    ///
    /// The first format is applied immediately; later changes travel
    /// through the queue and only become active when the first buffer
    /// following them is taken, so a buffer produced under the old format
    /// is never composed under the new one.
    pub fn set_caps(&self, info: VideoInfo) {
        let mut s = self.lock();
        if s.info.is_none() {
            tracing::debug!(port = self.id.0, format = %info.format, "first caps, applying");
            s.info = Some(info);
            s.converter_dirty = true;
            self.reconfigure.store(true, Ordering::Release);
        } else {
            tracing::debug!(port = self.id.0, format = %info.format, "delaying caps change");
            s.queue.push_back(QueueItem::Caps(info));
        }
    }

    /// Update the playback segment mapping this port's timestamps to
    /// running time.
    pub fn set_segment(&self, segment: Segment) {
        self.lock().segment = segment;
    }

    /// Signal that upstream will push no further buffers.
    pub fn mark_eos(&self) {
        self.lock().eos = true;
    }

    /// Report the total duration of this input, for duration queries.
    pub fn set_reported_duration(&self, duration: ClockTime) {
        self.lock().reported_duration = duration;
    }

    /// Change the stacking position. Ports are re-sorted before the next
    /// compositing pass.
    pub fn set_zorder(&self, zorder: u32) {
        self.lock().config.zorder = zorder;
    }

    /// Change the repeat-after-eos behavior.
    pub fn set_repeat_after_eos(&self, repeat: bool) {
        self.lock().config.repeat_after_eos = repeat;
    }

    /// Bound how long a stale buffer may keep being repeated.
    pub fn set_max_last_buffer_repeat(&self, max: ClockTime) {
        self.lock().config.max_last_buffer_repeat = max;
    }

    /// Require (or stop requiring) an alpha-capable output format.
    pub fn set_needs_alpha(&self, needs_alpha: bool) {
        let mut s = self.lock();
        if s.config.needs_alpha != needs_alpha {
            s.config.needs_alpha = needs_alpha;
            self.reconfigure.store(true, Ordering::Release);
        }
    }

    /// Replace the conversion backend configuration; marks the cached
    /// converter dirty so it is rebuilt before the next use.
    pub fn set_converter_config(&self, config: ConverterConfig) {
        let mut s = self.lock();
        s.config.converter_config = config;
        s.converter_dirty = true;
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Current z-order.
    pub fn zorder(&self) -> u32 {
        self.lock().config.zorder
    }

    /// The currently active (non-pending) format, if negotiated.
    pub fn info(&self) -> Option<VideoInfo> {
        self.lock().info
    }

    /// Whether the port holds a current buffer for the output window.
    pub fn has_current_buffer(&self) -> bool {
        self.lock().current.is_some()
    }

    /// The current buffer, if any.
    pub fn current_buffer(&self) -> Option<VideoBuffer> {
        self.lock().current.clone()
    }

    /// Whether a converter has been constructed for this port.
    pub fn has_converter(&self) -> bool {
        self.lock().converter.is_some()
    }

    /// Whether upstream has finished this input.
    pub fn is_eos(&self) -> bool {
        self.lock().eos
    }

    pub(crate) fn reported_duration(&self) -> ClockTime {
        self.lock().reported_duration
    }

    pub(crate) fn needs_alpha(&self) -> bool {
        self.lock().config.needs_alpha
    }

    /// Mark the cached converter dirty (output format changed).
    pub(crate) fn mark_converter_dirty(&self) {
        self.lock().converter_dirty = true;
    }

    /// Drop all held data. Used on detach and engine reset.
    pub(crate) fn clear(&self) {
        let mut s = self.lock();
        s.queue.clear();
        s.current = None;
        s.pending_frame = None;
        s.converter = None;
        s.start_time = ClockTime::NONE;
        s.end_time = ClockTime::NONE;
    }

    // ------------------------------------------------------------------
    // Queue fill
    // ------------------------------------------------------------------

    /// Decide this port's contribution to the output window `[t0, t1)`
    /// (running time; `t1` may be NONE for an unbounded window).
    ///
    /// Adopts, discards or holds queued buffers per the windowing contract;
    /// in `timeout` mode stale buffers are drained as far as possible
    /// instead of aborting at the first one.
    pub(crate) fn fill_for_window(
        &self,
        t0: ClockTime,
        t1: ClockTime,
        timeout: bool,
    ) -> Result<FillOutcome> {
        let mut s = self.lock();
        let mut out = FillOutcome {
            is_eos: s.eos,
            repeats: s.config.repeat_after_eos,
            ..FillOutcome::default()
        };

        let mut first = true;
        loop {
            let front = match s.queue.front() {
                None => {
                    if first {
                        self.fill_without_queued(&mut s, &mut out, t0);
                    }
                    break;
                }
                Some(QueueItem::Caps(_)) => {
                    // A format change reached the head of the queue: it
                    // becomes pending and activates with the next buffer.
                    let Some(QueueItem::Caps(info)) = s.queue.pop_front() else {
                        unreachable!("peeked caps item");
                    };
                    s.pending_info = Some(info);
                    continue;
                }
                Some(QueueItem::Buffer(buffer)) => buffer,
            };
            first = false;

            if front.pts.is_none() {
                tracing::error!(port = self.id.0, "need timestamped buffers");
                return Err(Error::MissingTimestamp);
            }

            let segment = s.segment;
            let pts = front.pts;
            let duration = front.duration;

            if duration.is_none() {
                // Unknown duration: compare by start time only.
                let start_rt = segment.to_running_time(pts.max_valid(segment.start));
                if start_rt.is_none() {
                    s.queue.pop_front();
                    out.need_more_data = true;
                    continue;
                }
                if start_rt >= t1 {
                    tracing::trace!(port = self.id.0, %start_rt, "duration-less buffer held");
                    out.alive = true;
                    break;
                }
                let stale = start_rt < t0;
                let Some(QueueItem::Buffer(buf)) = s.queue.pop_front() else {
                    unreachable!("peeked buffer item");
                };
                Self::activate_pending(&mut s, &mut out);
                s.current = Some(buf);
                s.start_time = start_rt;
                s.end_time = ClockTime::NONE;
                out.alive = true;
                if stale {
                    out.need_more_data = true;
                    if timeout {
                        continue;
                    }
                }
                break;
            }

            let Some((cstart, cend)) = segment.clip(pts, pts + duration) else {
                tracing::debug!(port = self.id.0, %pts, "buffer outside the segment, discarding");
                s.queue.pop_front();
                out.need_more_data = true;
                continue;
            };
            let (start_rt, end_rt) = if segment.is_reverse() {
                (
                    segment.to_running_time(cend),
                    segment.to_running_time(cstart),
                )
            } else {
                (
                    segment.to_running_time(cstart),
                    segment.to_running_time(cend),
                )
            };
            if start_rt.is_none() || end_rt.is_none() {
                s.queue.pop_front();
                out.need_more_data = true;
                continue;
            }

            // Earlier than what this port already presented.
            if s.end_time.is_some() && s.end_time > end_rt {
                tracing::debug!(port = self.id.0, %end_rt, "buffer from the past, dropping");
                s.queue.pop_front();
                continue;
            }

            if end_rt > t0 && start_rt < t1 {
                // Adopt: the buffer's window intersects the output window.
                let Some(QueueItem::Buffer(buf)) = s.queue.pop_front() else {
                    unreachable!("peeked buffer item");
                };
                if buf.is_gap() {
                    tracing::debug!(port = self.id.0, "consuming gap, keeping previous picture");
                } else {
                    s.current = Some(buf);
                }
                Self::activate_pending(&mut s, &mut out);
                s.start_time = start_rt;
                s.end_time = end_rt;
                out.alive = true;
                break;
            } else if start_rt >= t1 {
                // Hold: entirely at/after the window, keep queued.
                tracing::trace!(port = self.id.0, %start_rt, "holding buffer until its window");
                out.alive = true;
                break;
            } else {
                // Stale: entirely at/before the window start.
                tracing::debug!(port = self.id.0, %end_rt, "stale buffer, discarding");
                s.queue.pop_front();
                Self::activate_pending(&mut s, &mut out);
                out.need_more_data = true;
                if timeout {
                    continue;
                }
                break;
            }
        }

        Ok(out)
    }

    /// Handle a port whose queue is empty for this window.
    fn fill_without_queued(&self, s: &mut PortState, out: &mut FillOutcome, t0: ClockTime) {
        if s.eos && s.config.repeat_after_eos {
            // Keep showing the last picture, bounded by the repeat limit.
            let reference = if s.end_time.is_some() {
                s.end_time
            } else {
                s.start_time
            };
            let max = s.config.max_last_buffer_repeat;
            if max.is_some()
                && reference.is_some()
                && t0.saturating_sub(reference) > max
            {
                tracing::debug!(port = self.id.0, "last-buffer repeat window elapsed");
                s.current = None;
                s.start_time = ClockTime::NONE;
                s.end_time = ClockTime::NONE;
            }
            out.repeat_eos = true;
            return;
        }

        if s.end_time.is_some() {
            if s.end_time <= t0 {
                if !s.eos {
                    let max = s.config.max_last_buffer_repeat;
                    if max.is_some() {
                        if t0.saturating_sub(s.end_time) > max {
                            s.current = None;
                            s.start_time = ClockTime::NONE;
                            s.end_time = ClockTime::NONE;
                        }
                    } else {
                        s.start_time = ClockTime::NONE;
                        s.end_time = ClockTime::NONE;
                    }
                    out.need_more_data = true;
                } else {
                    s.current = None;
                    s.start_time = ClockTime::NONE;
                    s.end_time = ClockTime::NONE;
                }
            } else if s.eos {
                // End-of-stream, but the held buffer still covers this
                // window.
                out.alive = true;
            }
        } else if s.eos {
            s.current = None;
        } else if s.start_time.is_some() {
            // Duration-less current buffer: the repeat bound counts from
            // its start time.
            let max = s.config.max_last_buffer_repeat;
            if s.start_time <= t0 && max.is_some() && t0.saturating_sub(s.start_time) > max {
                s.current = None;
                s.start_time = ClockTime::NONE;
                s.end_time = ClockTime::NONE;
            }
        } else {
            // No usable data for this window and more is expected.
            out.need_more_data = true;
        }
    }

    fn activate_pending(s: &mut PortState, out: &mut FillOutcome) {
        if let Some(info) = s.pending_info.take() {
            tracing::debug!(format = %info.format, "activating pending caps");
            s.info = Some(info);
            s.converter_dirty = true;
            out.need_reconfigure = true;
        }
    }

    // ------------------------------------------------------------------
    // Frame preparation
    // ------------------------------------------------------------------

    /// Start preparing this port's current buffer for compositing against
    /// `output`. Rebuilds the cached converter first if it was marked
    /// dirty. With a pool, the conversion runs asynchronously.
    pub(crate) fn prepare_start(
        &self,
        output: &VideoInfo,
        backend: &Arc<dyn ConvertBackend>,
        pool: Option<&ConvertPool>,
    ) -> Result<()> {
        let mut s = self.lock();
        s.pending_frame = None;

        let Some(info) = s.info else {
            return Ok(());
        };
        let Some(current) = s.current.clone() else {
            return Ok(());
        };
        if current.is_gap() {
            return Ok(());
        }

        if s.converter_dirty {
            s.converter = FrameConverter::for_port(
                Arc::clone(backend),
                &info,
                output,
                &s.config.converter_config,
            )?;
            s.converter_dirty = false;
        }

        let frame = VideoFrame::map(&current, &info)?;
        s.pending_frame = Some(PendingFrame::start(frame, s.converter.as_ref(), pool)?);
        Ok(())
    }

    /// Finish this port's preparation, blocking on any in-flight
    /// conversion. Returns `None` for ports without a current picture.
    pub(crate) fn prepare_finish(&self) -> Result<Option<VideoFrame>> {
        let pending = self.lock().pending_frame.take();
        match pending {
            Some(pending) => pending.finish().map(Some),
            None => Ok(None),
        }
    }

    /// Release any preparation state left behind by an aborted cycle.
    pub(crate) fn clean_frame(&self) {
        self.lock().pending_frame = None;
    }
}

impl std::fmt::Debug for InputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.lock();
        f.debug_struct("InputPort")
            .field("id", &self.id)
            .field("zorder", &s.config.zorder)
            .field("queued", &s.queue.len())
            .field("eos", &s.eos)
            .field("has_current", &s.current.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;

    fn make_port(config: PortConfig) -> InputPort {
        let port = InputPort::new(PortId(0), config, Arc::new(AtomicBool::new(false)));
        port.set_caps(VideoInfo::new(PixelFormat::Rgb24, 4, 4));
        port
    }

    fn buf(pts_ms: u64, dur_ms: u64) -> VideoBuffer {
        VideoBuffer::new(vec![0u8; 48], ClockTime::from_millis(pts_ms))
            .with_duration(ClockTime::from_millis(dur_ms))
    }

    const T0: ClockTime = ClockTime::from_millis(100);
    const T1: ClockTime = ClockTime::from_millis(140);

    #[test]
    fn test_adopt_intersecting_buffer() {
        let port = make_port(PortConfig::new());
        port.push(buf(100, 40)).unwrap();

        let out = port.fill_for_window(T0, T1, false).unwrap();
        assert!(out.alive);
        assert!(!out.need_more_data);
        assert!(port.has_current_buffer());
    }

    #[test]
    fn test_hold_future_buffer() {
        let port = make_port(PortConfig::new());
        port.push(buf(140, 40)).unwrap();

        let out = port.fill_for_window(T0, T1, false).unwrap();
        assert!(out.alive);
        assert!(!out.need_more_data);
        // Still queued, not adopted
        assert!(!port.has_current_buffer());
    }

    #[test]
    fn test_stale_buffer_discarded() {
        let port = make_port(PortConfig::new());
        port.push(buf(20, 40)).unwrap();

        let out = port.fill_for_window(T0, T1, false).unwrap();
        assert!(out.need_more_data);
        assert!(!port.has_current_buffer());
    }

    #[test]
    fn test_timeout_drains_stale_buffers() {
        let port = make_port(PortConfig::new());
        port.push(buf(0, 40)).unwrap();
        port.push(buf(40, 40)).unwrap();
        port.push(buf(100, 40)).unwrap();

        let out = port.fill_for_window(T0, T1, true).unwrap();
        // Drained past the stale ones and adopted the matching buffer
        assert!(out.alive);
        assert_eq!(
            port.current_buffer().unwrap().pts,
            ClockTime::from_millis(100)
        );
    }

    #[test]
    fn test_missing_timestamp_is_fatal() {
        let port = make_port(PortConfig::new());
        port.push(VideoBuffer::new(vec![0u8; 48], ClockTime::NONE))
            .unwrap();
        assert!(matches!(
            port.fill_for_window(T0, T1, false),
            Err(Error::MissingTimestamp)
        ));
    }

    #[test]
    fn test_outside_segment_discarded() {
        let port = make_port(PortConfig::new());
        port.set_segment(Segment::new(
            ClockTime::from_secs(10),
            ClockTime::from_secs(20),
        ));
        port.push(buf(100, 40)).unwrap();

        let out = port.fill_for_window(T0, T1, false).unwrap();
        assert!(out.need_more_data);
        assert!(!port.has_current_buffer());
    }

    #[test]
    fn test_unknown_duration_adopted_by_start() {
        let port = make_port(PortConfig::new());
        port.push(VideoBuffer::new(
            vec![0u8; 48],
            ClockTime::from_millis(110),
        ))
        .unwrap();

        let out = port.fill_for_window(T0, T1, false).unwrap();
        assert!(out.alive);
        assert!(port.has_current_buffer());

        // A later one starting past the window is held
        port.push(VideoBuffer::new(
            vec![0u8; 48],
            ClockTime::from_millis(200),
        ))
        .unwrap();
        let out = port.fill_for_window(T0, T1, false).unwrap();
        assert!(out.alive);
        assert_eq!(
            port.current_buffer().unwrap().pts,
            ClockTime::from_millis(110)
        );
    }

    #[test]
    fn test_gap_keeps_previous_picture() {
        let port = make_port(PortConfig::new());
        port.push(buf(100, 40)).unwrap();
        port.fill_for_window(T0, T1, false).unwrap();
        let first = port.current_buffer().unwrap();

        port.push(VideoBuffer::gap(
            ClockTime::from_millis(140),
            ClockTime::from_millis(40),
        ))
        .unwrap();
        let out = port
            .fill_for_window(T1, ClockTime::from_millis(180), false)
            .unwrap();
        assert!(out.alive);
        // Gap consumed, old picture kept
        assert_eq!(port.current_buffer().unwrap().pts, first.pts);
    }

    #[test]
    fn test_pending_caps_applied_on_adoption() {
        let port = make_port(PortConfig::new());
        // Second set_caps is deferred
        port.set_caps(VideoInfo::new(PixelFormat::Bgra, 8, 8));
        assert_eq!(port.info().unwrap().format, PixelFormat::Rgb24);

        port.push(buf(100, 40)).unwrap();
        let out = port.fill_for_window(T0, T1, false).unwrap();
        assert!(out.need_reconfigure);
        assert_eq!(port.info().unwrap().format, PixelFormat::Bgra);
    }

    #[test]
    fn test_repeat_after_eos_with_limit() {
        let port = make_port(
            PortConfig::new()
                .with_repeat_after_eos(true)
                .with_max_last_buffer_repeat(ClockTime::from_secs(2)),
        );
        port.push(buf(100, 40)).unwrap();
        port.fill_for_window(T0, T1, false).unwrap();
        port.mark_eos();

        // Within two seconds of the buffer's end: keeps repeating
        let out = port
            .fill_for_window(ClockTime::from_secs(1), ClockTime::from_millis(1040), false)
            .unwrap();
        assert!(out.repeat_eos);
        assert!(port.has_current_buffer());

        // Past the bound: the buffer is cleared
        let out = port
            .fill_for_window(ClockTime::from_secs(3), ClockTime::from_millis(3040), false)
            .unwrap();
        assert!(out.repeat_eos);
        assert!(!port.has_current_buffer());
    }

    #[test]
    fn test_eos_without_repeat_clears_stale_buffer() {
        let port = make_port(PortConfig::new());
        port.push(buf(100, 40)).unwrap();
        port.fill_for_window(T0, T1, false).unwrap();
        port.mark_eos();

        let out = port
            .fill_for_window(T1, ClockTime::from_millis(180), false)
            .unwrap();
        assert!(out.is_eos);
        assert!(!out.alive);
        assert!(!port.has_current_buffer());
    }

    #[test]
    fn test_eos_buffer_still_covering_window() {
        let port = make_port(PortConfig::new());
        port.push(buf(100, 200)).unwrap();
        port.fill_for_window(T0, T1, false).unwrap();
        port.mark_eos();

        // Window still inside the buffer's coverage
        let out = port
            .fill_for_window(ClockTime::from_millis(150), ClockTime::from_millis(190), false)
            .unwrap();
        assert!(out.alive);
        assert!(port.has_current_buffer());
    }

    #[test]
    fn test_push_after_eos_fails() {
        let port = make_port(PortConfig::new());
        port.mark_eos();
        assert!(port.push(buf(0, 40)).is_err());
    }

    #[test]
    fn test_buffer_from_past_dropped() {
        let port = make_port(PortConfig::new());
        port.push(buf(100, 40)).unwrap();
        port.fill_for_window(T0, T1, false).unwrap();

        // Next buffer ends before what we already presented
        port.push(buf(60, 40)).unwrap();
        port.push(buf(140, 40)).unwrap();
        let out = port
            .fill_for_window(T1, ClockTime::from_millis(180), false)
            .unwrap();
        assert!(out.alive);
        assert_eq!(
            port.current_buffer().unwrap().pts,
            ClockTime::from_millis(140)
        );
    }
}
