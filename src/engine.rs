//! The aggregation engine.
//!
//! [`VideoAggregator`] owns an arbitrary number of [`InputPort`]s, each fed
//! by its own producer thread, and turns them into a single stream of
//! composited output buffers. Per scheduling tick it: renegotiates the
//! output format if anything changed, fills each port's current-buffer slot
//! for the output window, asks QoS whether the frame is worth producing,
//! converts mismatched inputs (optionally in parallel), hands the prepared
//! frames to the [`FrameCompositor`] strategy, and advances the output
//! position.
//!
//! # Locking
//!
//! Two locks, both part of the public contract:
//!
//! - the **cycle lock** serializes whole aggregation cycles — only one
//!   negotiate/fill/convert/composite/emit sequence is ever in flight;
//! - **fine-grained locks** (per port, plus one for the shared engine
//!   state) let producers deliver buffers and QoS events without blocking
//!   a running cycle for more than a queue inspection.
//!
//! Acquisition order is always cycle lock first, fine locks second, never
//! the reverse.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::{OutputFrame, VideoBuffer, VideoFrame};
use crate::clock::{ClockTime, Segment};
use crate::convert::{ConvertBackend, ConvertPool, SoftwareConvert};
use crate::error::{Error, Result};
use crate::format::{Framerate, PixelFormat, VideoCaps, VideoInfo};
use crate::negotiate::{self, PortFormat};
use crate::port::{InputPort, PortConfig, PortId};
use crate::qos::{QosReport, QosState};

// ============================================================================
// Compositor strategy
// ============================================================================

/// One port's prepared (possibly converted) frame, handed to the
/// compositing step. Slices are ordered back-to-front by z-order.
#[derive(Debug, Clone)]
pub struct PortFrame {
    /// The contributing port.
    pub id: PortId,
    /// Its stacking position.
    pub zorder: u32,
    /// The frame, already in the negotiated output format.
    pub frame: VideoFrame,
}

/// The pixel-compositing strategy plugged into the engine.
///
/// The engine decides *which* frames belong together and *in what format*;
/// implementations of this trait do the actual combining math.
pub trait FrameCompositor: Send {
    /// Allocate the output buffer for one frame.
    ///
    /// The default allocates a zeroed frame; override to draw from a pool.
    /// An allocation failure aborts the current frame only.
    fn create_output_buffer(&mut self, info: &VideoInfo) -> Result<OutputFrame> {
        OutputFrame::alloc(info)
    }

    /// Combine the prepared frames into `out`.
    ///
    /// `frames` contains one entry per port that holds a picture for this
    /// window, sorted back-to-front; ports without data are absent.
    fn aggregate_frames(&mut self, frames: &[PortFrame], out: &mut OutputFrame) -> Result<()>;

    /// Optional override of the best-format search. Return `None` to use
    /// the engine's default weighting; a returned descriptor is still
    /// fixated against the inputs and downstream caps.
    fn find_best_format(
        &mut self,
        ports: &[PortFormat],
        downstream: &VideoCaps,
    ) -> Option<VideoInfo> {
        let _ = (ports, downstream);
        None
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Static engine configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Pixel formats the compositing step handles natively, in preference
    /// order. Also the fallback scan order during negotiation.
    pub supported_formats: Vec<PixelFormat>,
    /// Alpha-capable format used when a port requires alpha but no attached
    /// format carries it.
    pub fallback_alpha_format: PixelFormat,
    /// Convert mismatched ports in parallel on a shared worker pool sized
    /// to the available processing units.
    pub parallel_convert: bool,
    /// Whether the pipeline is live (affects QoS projection).
    pub live: bool,
    /// Never report end-of-stream; keep producing from repeating/stale
    /// state (live sources that may come back).
    pub force_live: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            supported_formats: vec![
                PixelFormat::Bgra,
                PixelFormat::Argb,
                PixelFormat::Rgba,
                PixelFormat::Rgb24,
                PixelFormat::Bgr24,
                PixelFormat::Gray8,
                PixelFormat::I420,
                PixelFormat::Nv12,
            ],
            fallback_alpha_format: PixelFormat::Argb,
            parallel_convert: false,
            live: false,
            force_live: false,
        }
    }
}

impl AggregatorConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the natively supported formats.
    pub fn with_supported_formats(mut self, formats: Vec<PixelFormat>) -> Self {
        self.supported_formats = formats;
        self
    }

    /// Set the alpha fallback format.
    pub fn with_fallback_alpha(mut self, format: PixelFormat) -> Self {
        self.fallback_alpha_format = format;
        self
    }

    /// Enable parallel conversion.
    pub fn with_parallel_convert(mut self, parallel: bool) -> Self {
        self.parallel_convert = parallel;
        self
    }

    /// Mark the pipeline live.
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Never report end-of-stream.
    pub fn with_force_live(mut self, force_live: bool) -> Self {
        self.force_live = force_live;
        self
    }
}

/// Result of one aggregation tick.
#[derive(Debug)]
pub enum AggregateOutcome {
    /// A composited buffer, stamped with the output window.
    Produced(VideoBuffer),
    /// Not enough input to decide this window; nothing was mutated.
    NeedData,
    /// Every (non-repeating) input has finished.
    Eos,
    /// QoS decided to skip this frame; position advanced, the report goes
    /// upstream.
    Dropped(QosReport),
}

// ============================================================================
// Engine
// ============================================================================

/// State mutated only under the cycle lock.
struct CycleCore<C> {
    compositor: C,
    segment: Segment,
    nframes: u64,
    ts_offset: ClockTime,
}

/// State shared with producer-side calls, behind the fine engine lock.
/// The negotiated output format lives here because caps renegotiation can
/// be triggered by an input port concurrently with an in-progress cycle.
struct EngineShared {
    output_info: Option<VideoInfo>,
    downstream: VideoCaps,
    qos: QosState,
}

/// A multi-input video aggregation engine.
///
/// See the [module docs](self) for the cycle structure and locking rules.
pub struct VideoAggregator<C: FrameCompositor> {
    config: AggregatorConfig,
    backend: Arc<dyn ConvertBackend>,
    pool: Option<ConvertPool>,
    /// Set whenever output caps must be renegotiated before compositing.
    reconfigure: Arc<AtomicBool>,
    next_port_id: AtomicU32,
    ports: Mutex<Vec<Arc<InputPort>>>,
    shared: Mutex<EngineShared>,
    cycle: Mutex<CycleCore<C>>,
}

impl<C: FrameCompositor> VideoAggregator<C> {
    /// Create an engine with the default software conversion backend.
    pub fn new(config: AggregatorConfig, compositor: C) -> Self {
        Self::with_backend(config, compositor, Arc::new(SoftwareConvert))
    }

    /// Create an engine with a custom conversion backend.
    pub fn with_backend(
        config: AggregatorConfig,
        compositor: C,
        backend: Arc<dyn ConvertBackend>,
    ) -> Self {
        let pool = config.parallel_convert.then(ConvertPool::new);
        Self {
            backend,
            pool,
            reconfigure: Arc::new(AtomicBool::new(false)),
            next_port_id: AtomicU32::new(0),
            ports: Mutex::new(Vec::new()),
            shared: Mutex::new(EngineShared {
                output_info: None,
                downstream: VideoCaps::any(),
                qos: QosState::new(config.live),
            }),
            cycle: Mutex::new(CycleCore {
                compositor,
                segment: Segment::default(),
                nframes: 0,
                ts_offset: ClockTime::ZERO,
            }),
            config,
        }
    }

    fn lock_shared(&self) -> MutexGuard<'_, EngineShared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Port management
    // ------------------------------------------------------------------

    /// Attach a new input. The returned handle is what the producing side
    /// pushes buffers and format changes into.
    pub fn add_port(&self, config: PortConfig) -> Arc<InputPort> {
        let id = PortId(self.next_port_id.fetch_add(1, Ordering::Relaxed));
        let port = Arc::new(InputPort::new(id, config, Arc::clone(&self.reconfigure)));
        self.ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&port));
        tracing::debug!(port = id.0, "port attached");
        port
    }

    /// Detach an input. Its held buffer is released and the output format
    /// renegotiated without it.
    pub fn release_port(&self, id: PortId) -> bool {
        let mut ports = self.ports.lock().unwrap_or_else(|e| e.into_inner());
        let Some(idx) = ports.iter().position(|p| p.id() == id) else {
            return false;
        };
        let port = ports.remove(idx);
        let last = ports.is_empty();
        drop(ports);
        port.clear();
        self.reconfigure.store(true, Ordering::Release);
        tracing::debug!(port = id.0, "port released");
        if last {
            self.reset();
        }
        true
    }

    /// The attached ports sorted back-to-front by (z-order, id).
    fn sorted_ports(&self) -> Vec<Arc<InputPort>> {
        let mut ports = self
            .ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        ports.sort_by_key(|p| (p.zorder(), p.id()));
        ports
    }

    // ------------------------------------------------------------------
    // Downstream-facing surface
    // ------------------------------------------------------------------

    /// Declare the capability set downstream accepts. Triggers
    /// renegotiation before the next produced frame.
    pub fn set_downstream_caps(&self, caps: VideoCaps) {
        self.lock_shared().downstream = caps;
        self.reconfigure.store(true, Ordering::Release);
    }

    /// The currently negotiated output format, if any.
    pub fn negotiated_info(&self) -> Option<VideoInfo> {
        self.lock_shared().output_info
    }

    /// Feed a downstream QoS event (proportion, jitter in ns, running-time
    /// timestamp) into the controller.
    pub fn update_qos(&self, proportion: f64, diff: i64, timestamp: ClockTime) {
        let mut shared = self.lock_shared();
        let frame_duration = shared
            .output_info
            .map(|i| i.framerate.frame_duration())
            .unwrap_or(ClockTime::NONE);
        shared.qos.update(proportion, diff, timestamp, frame_duration);
    }

    /// Forget the current QoS observation (input segment boundary); the
    /// processed/dropped counters survive.
    pub fn reset_qos_observation(&self) {
        self.lock_shared().qos.reset_observation();
    }

    /// Cumulative (processed, dropped) frame counters.
    pub fn qos_stats(&self) -> (u64, u64) {
        let shared = self.lock_shared();
        (shared.qos.processed(), shared.qos.dropped())
    }

    /// Replace the output segment (position is reset).
    pub fn set_segment(&self, segment: Segment) {
        let mut core = self.lock_cycle();
        core.segment = segment;
    }

    /// The current output segment.
    pub fn segment(&self) -> Segment {
        self.lock_cycle().segment
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Total duration: the maximum over all inputs' reported durations,
    /// NONE when any input cannot tell.
    pub fn duration(&self) -> ClockTime {
        let ports = self.ports.lock().unwrap_or_else(|e| e.into_inner());
        if ports.is_empty() {
            return ClockTime::NONE;
        }
        let mut max = ClockTime::ZERO;
        for port in ports.iter() {
            let d = port.reported_duration();
            if d.is_none() {
                return ClockTime::NONE;
            }
            max = max.max(d);
        }
        max
    }

    /// Current output position in stream time.
    pub fn position(&self) -> ClockTime {
        let core = self.lock_cycle();
        core.segment.to_stream_time(core.segment.position)
    }

    /// Latency introduced by aggregation: one negotiated frame duration.
    pub fn latency(&self) -> ClockTime {
        self.lock_shared()
            .output_info
            .map(|i| i.framerate.frame_duration())
            .unwrap_or(ClockTime::NONE)
    }

    /// Drop all timeline state: position, frame counter, timestamp offset
    /// and QoS. Held port buffers are kept (their windows are re-derived).
    pub fn flush(&self) {
        let mut core = self.lock_cycle();
        core.segment.position = ClockTime::NONE;
        core.ts_offset = ClockTime::ZERO;
        core.nframes = 0;
        self.lock_shared().qos.reset();
    }

    /// Full reset: flush plus forgetting the negotiated output format and
    /// every port's held state.
    fn reset(&self) {
        self.flush();
        self.lock_shared().output_info = None;
        for port in self.sorted_ports() {
            port.clear();
        }
    }

    fn lock_cycle(&self) -> MutexGuard<'_, CycleCore<C>> {
        self.cycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------

    /// Re-run output negotiation from the current port formats.
    ///
    /// Returns `Ok(None)` while no input has declared a format yet.
    fn negotiate_now(&self, core: &mut CycleCore<C>) -> Result<Option<VideoInfo>> {
        let ports = self.sorted_ports();
        let views: Vec<PortFormat> = ports
            .iter()
            .filter_map(|p| {
                p.info().map(|info| PortFormat {
                    id: p.id(),
                    info,
                    needs_alpha: p.needs_alpha(),
                })
            })
            .collect();
        if views.is_empty() {
            return Ok(None);
        }

        let downstream = self.lock_shared().downstream.clone();

        let info = match core.compositor.find_best_format(&views, &downstream) {
            Some(best) => negotiate::fixate_output(&views, &best, &downstream),
            None => negotiate::negotiate(
                &views,
                &self.config.supported_formats,
                self.config.fallback_alpha_format,
                &downstream,
            )?,
        };

        self.lock_shared().output_info = Some(info);
        // The conversion target changed for every port.
        for port in &ports {
            port.mark_converter_dirty();
        }
        Ok(Some(info))
    }

    // ------------------------------------------------------------------
    // The aggregation cycle
    // ------------------------------------------------------------------

    /// Run one aggregation tick.
    ///
    /// `timeout` signals that the scheduling driver does not expect fresh
    /// data soon: stale buffers are drained best-effort and the position
    /// keeps moving instead of waiting for "need more data" to resolve.
    ///
    /// Calling this with no new input and no timeout is idempotent: it
    /// returns [`AggregateOutcome::NeedData`] without mutating any port's
    /// held buffer or the output position.
    pub fn aggregate(&self, timeout: bool) -> Result<AggregateOutcome> {
        let mut core = self.lock_cycle();

        // Negotiating: (re)run if anything was marked dirty or we never
        // succeeded.
        if self.reconfigure.swap(false, Ordering::AcqRel)
            || self.lock_shared().output_info.is_none()
        {
            match self.negotiate_now(&mut core) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    // Unnegotiated: no port has caps yet. On a timeout keep
                    // the clock moving by one assumed frame.
                    if timeout {
                        self.advance_on_timeout(&mut core);
                    }
                    return Ok(AggregateOutcome::NeedData);
                }
                Err(e) => {
                    self.reconfigure.store(true, Ordering::Release);
                    return Err(e);
                }
            }
        }
        let Some(info) = self.lock_shared().output_info else {
            return Ok(AggregateOutcome::NeedData);
        };

        let segment = core.segment;
        if segment.is_reverse() && segment.stop.is_none() {
            return Err(Error::InvalidSegment(
                "unknown segment stop for reverse rate".into(),
            ));
        }

        // Derive the output window [T0, T1).
        let output_start = if segment.is_reverse() {
            if segment.position.is_none() || segment.position > segment.stop {
                segment.stop
            } else {
                segment.position
            }
        } else if segment.position.is_none() || segment.position < segment.start {
            segment.start
        } else {
            segment.position
        };

        if core.nframes == 0 {
            core.ts_offset = output_start;
            tracing::debug!(%output_start, "new ts offset");
        }

        // The end is derived from the frame counter in one step so rounding
        // does not accumulate; unknown framerate leaves it unbounded.
        let mut output_end = if info.framerate.is_known() {
            let dur = info.framerate.duration_of(core.nframes + 1);
            if segment.is_reverse() {
                core.ts_offset.checked_sub(dur).unwrap_or(ClockTime::ZERO)
            } else {
                core.ts_offset + dur
            }
        } else {
            ClockTime::NONE
        };
        output_end = if segment.is_reverse() {
            output_end.max_valid(segment.start)
        } else {
            output_end.min_valid(segment.stop)
        };

        if output_end == output_start {
            return Ok(AggregateOutcome::Eos);
        }

        // For a reverse segment the mapping itself flips the ordering, so
        // start maps to the window's running-time start either way.
        let rt0 = segment.to_running_time(output_start);
        let rt1 = segment.to_running_time(output_end);

        // FillingQueues.
        let ports = self.sorted_ports();
        let mut eos = !self.config.force_live;
        let mut need_more_data = false;
        let mut need_reconfigure = false;
        let mut repeat_pad_eos = false;
        let mut has_no_repeat_pads = false;

        for port in &ports {
            let outcome = port.fill_for_window(rt0, rt1, timeout)?;
            if !outcome.is_eos {
                eos = false;
            }
            if outcome.alive {
                eos = false;
            }
            if !outcome.repeats {
                has_no_repeat_pads = true;
            }
            repeat_pad_eos |= outcome.repeat_eos;
            need_more_data |= outcome.need_more_data;
            need_reconfigure |= outcome.need_reconfigure;
        }

        if need_reconfigure {
            self.reconfigure.store(true, Ordering::Release);
        }

        if need_more_data && !timeout {
            tracing::debug!("need more data for decisions");
            return Ok(AggregateOutcome::NeedData);
        }
        if eos && !has_no_repeat_pads && repeat_pad_eos {
            eos = false;
        }
        if eos {
            tracing::debug!("all inputs are eos, forwarding");
            return Ok(AggregateOutcome::Eos);
        }

        // A port's pending format became active mid-fill: renegotiate
        // before compositing with stale output configuration.
        if self.reconfigure.load(Ordering::Acquire) {
            tracing::debug!("need reconfigure");
            return Ok(AggregateOutcome::NeedData);
        }

        tracing::debug!(%output_start, %output_end, %rt0, %rt1, "producing buffer");

        // QoSCheck.
        let jitter = {
            let shared = self.lock_shared();
            shared.qos.jitter(rt0)
        };
        if let Some(jitter) = jitter {
            if jitter > 0 {
                tracing::debug!(jitter, "we are late, dropping frame");
                let report = self.lock_shared().qos.record_dropped(
                    jitter,
                    segment.to_stream_time(output_start),
                    output_end.saturating_sub(output_start),
                );
                self.advance(&mut core, output_end);
                return Ok(AggregateOutcome::Dropped(report));
            }
        }

        // Preparing → Converting → Compositing.
        let buffer = self.produce_frame(&mut core, &ports, &info, output_start, output_end)?;
        self.lock_shared().qos.record_processed();

        // AdvancingPosition.
        self.advance(&mut core, output_end);
        Ok(AggregateOutcome::Produced(buffer))
    }

    /// Prepare every port's frame (all starts before any finish), run the
    /// compositing step, and clean up on every exit path.
    fn produce_frame(
        &self,
        core: &mut CycleCore<C>,
        ports: &[Arc<InputPort>],
        info: &VideoInfo,
        output_start: ClockTime,
        output_end: ClockTime,
    ) -> Result<VideoBuffer> {
        let out_frame = core.compositor.create_output_buffer(info)?;

        let segment = core.segment;
        let (pts, duration) = if segment.is_reverse() {
            (output_end, output_start.saturating_sub(output_end))
        } else {
            (output_start, output_end.saturating_sub(output_start))
        };

        let result = self.prepare_and_composite(core, ports, info, out_frame);
        for port in ports {
            port.clean_frame();
        }
        match result {
            Ok(out_frame) => Ok(out_frame.into_buffer(pts, duration)),
            Err(e) => {
                if matches!(e, Error::NoConversionPath { .. }) {
                    // Same as a negotiation failure for this configuration.
                    self.reconfigure.store(true, Ordering::Release);
                }
                Err(e)
            }
        }
    }

    fn prepare_and_composite(
        &self,
        core: &mut CycleCore<C>,
        ports: &[Arc<InputPort>],
        info: &VideoInfo,
        mut out_frame: OutputFrame,
    ) -> Result<OutputFrame> {
        // Start phase: issue every conversion before waiting on any, so
        // independent ports overlap on the worker pool.
        let mut started: Vec<&Arc<InputPort>> = Vec::with_capacity(ports.len());
        for port in ports {
            if let Err(e) = port.prepare_start(info, &self.backend, self.pool.as_ref()) {
                // Every started port must still be finished exactly once.
                for s in &started {
                    let _ = s.prepare_finish();
                }
                return Err(e);
            }
            started.push(port);
        }

        // Finish phase: collect the prepared frames back-to-front.
        let mut frames = Vec::with_capacity(ports.len());
        let mut first_err = None;
        for port in ports {
            match port.prepare_finish() {
                Ok(Some(frame)) => frames.push(PortFrame {
                    id: port.id(),
                    zorder: port.zorder(),
                    frame,
                }),
                Ok(None) => {}
                Err(e) => first_err = first_err.or(Some(e)),
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        core.compositor.aggregate_frames(&frames, &mut out_frame)?;
        Ok(out_frame)
    }

    fn advance(&self, core: &mut CycleCore<C>, output_end: ClockTime) {
        core.segment.position = output_end;
        core.nframes += 1;
    }

    /// Keep a live pipeline's clock moving while nothing is negotiated yet:
    /// advance by one assumed frame duration.
    fn advance_on_timeout(&self, core: &mut CycleCore<C>) {
        let segment = &mut core.segment;
        if segment.position.is_none() {
            segment.position = if segment.is_reverse() {
                segment.stop
            } else {
                segment.start
            };
        }
        let frame = Framerate::FALLBACK.frame_duration();
        if segment.is_reverse() {
            segment.position = segment.position.saturating_sub(frame);
        } else {
            segment.position += frame;
        }
        core.nframes += 1;
    }
}

impl<C: FrameCompositor> std::fmt::Debug for VideoAggregator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoAggregator")
            .field("ports", &self.ports.lock().map(|p| p.len()).unwrap_or(0))
            .field("negotiated", &self.negotiated_info().is_some())
            .field("parallel_convert", &self.pool.is_some())
            .finish()
    }
}
