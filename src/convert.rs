//! Per-port format conversion.
//!
//! When a port's native format differs from the negotiated output format —
//! by pixel format, colorimetry, or chroma siting — its frames are converted
//! before compositing. The pixel math itself lives behind the
//! [`ConvertBackend`] trait; this module owns everything around it: deriving
//! the conversion target, caching one converter per port (invalidated by an
//! explicit dirty flag), and the start/finish split that lets independent
//! per-port conversions overlap on a shared worker pool.
//!
//! Geometry is never touched: a conversion target keeps the port's own
//! width and height.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::BytesMut;

use crate::buffer::VideoFrame;
use crate::error::{Error, Result};
use crate::format::{PixelFormat, VideoInfo};

// ============================================================================
// Converter configuration
// ============================================================================

/// A value in a converter configuration bag.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// String value.
    Str(String),
}

/// Opaque key/value configuration forwarded to the conversion backend.
///
/// The engine does not interpret the contents; changing the bag marks the
/// port's converter dirty so it is rebuilt before the next use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConverterConfig(BTreeMap<String, ConfigValue>);

impl ConverterConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key.
    pub fn set(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.0.insert(key.into(), value);
    }

    /// Builder-style set.
    pub fn with(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.set(key, value);
        self
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// Backend boundary
// ============================================================================

/// The boundary to the colorspace-conversion math.
///
/// Implementations declare which pixel-format pairs they can handle;
/// converter construction fails for unsupported pairs, which the engine
/// treats the same as a negotiation failure.
pub trait ConvertBackend: Send + Sync {
    /// Whether a conversion path exists between two pixel formats.
    fn supports(&self, from: PixelFormat, to: PixelFormat) -> bool;

    /// Convert one frame into `dst` format. The destination keeps the source
    /// geometry.
    fn convert(
        &self,
        src: &VideoFrame,
        dst: &VideoInfo,
        config: &ConverterConfig,
    ) -> Result<VideoFrame>;
}

/// Software backend covering the packed byte-oriented formats
/// (RGB/BGR/RGBA/BGRA/ARGB/GRAY8).
///
/// Enough to exercise the conversion pipeline end to end; heavier paths
/// (YUV subsampling, SIMD) belong to external backends.
#[derive(Debug, Default)]
pub struct SoftwareConvert;

impl SoftwareConvert {
    /// Byte layout of a packed format as (r, g, b, alpha) offsets.
    fn layout(format: PixelFormat) -> Option<([usize; 3], Option<usize>, usize)> {
        match format {
            PixelFormat::Rgb24 => Some(([0, 1, 2], None, 3)),
            PixelFormat::Bgr24 => Some(([2, 1, 0], None, 3)),
            PixelFormat::Rgba => Some(([0, 1, 2], Some(3), 4)),
            PixelFormat::Bgra => Some(([2, 1, 0], Some(3), 4)),
            PixelFormat::Argb => Some(([1, 2, 3], Some(0), 4)),
            _ => None,
        }
    }
}

impl ConvertBackend for SoftwareConvert {
    fn supports(&self, from: PixelFormat, to: PixelFormat) -> bool {
        let packed = |f| Self::layout(f).is_some() || f == PixelFormat::Gray8;
        from == to || (packed(from) && packed(to))
    }

    fn convert(
        &self,
        src: &VideoFrame,
        dst: &VideoInfo,
        _config: &ConverterConfig,
    ) -> Result<VideoFrame> {
        let src_info = *src.info();
        if src_info.format == dst.format {
            // Colorimetry/chroma retag only; packed RGB bytes are unchanged.
            return Ok(VideoFrame::from_parts(*dst, src.data().to_vec().into()));
        }

        let pixels = src_info.width as usize * src_info.height as usize;
        let mut out = BytesMut::zeroed(dst.frame_size());
        let input = src.plane(0);

        match (
            Self::layout(src_info.format),
            Self::layout(dst.format),
            src_info.format,
            dst.format,
        ) {
            (Some((sr, sa, sbpp)), Some((dr, da, dbpp)), _, _) => {
                for i in 0..pixels {
                    let sp = &input[i * sbpp..];
                    let dp = &mut out[i * dbpp..i * dbpp + dbpp];
                    dp[dr[0]] = sp[sr[0]];
                    dp[dr[1]] = sp[sr[1]];
                    dp[dr[2]] = sp[sr[2]];
                    if let Some(d) = da {
                        dp[d] = sa.map_or(0xff, |s| sp[s]);
                    }
                }
            }
            (Some((sr, _, sbpp)), None, _, PixelFormat::Gray8) => {
                // ITU-R BT.601 luma weights
                for i in 0..pixels {
                    let sp = &input[i * sbpp..];
                    let y = 299 * sp[sr[0]] as u32 + 587 * sp[sr[1]] as u32 + 114 * sp[sr[2]] as u32;
                    out[i] = (y / 1000) as u8;
                }
            }
            (None, Some((dr, da, dbpp)), PixelFormat::Gray8, _) => {
                for i in 0..pixels {
                    let y = input[i];
                    let dp = &mut out[i * dbpp..i * dbpp + dbpp];
                    dp[dr[0]] = y;
                    dp[dr[1]] = y;
                    dp[dr[2]] = y;
                    if let Some(d) = da {
                        dp[d] = 0xff;
                    }
                }
            }
            _ => {
                return Err(Error::NoConversionPath {
                    from: src_info.format,
                    to: dst.format,
                });
            }
        }

        Ok(VideoFrame::from_parts(*dst, out.freeze()))
    }
}

// ============================================================================
// Per-port converter
// ============================================================================

/// Derive the conversion target for a port, or `None` when the port's
/// frames can be used directly.
///
/// The target takes the output's pixel format, colorimetry and chroma siting
/// but keeps the port's geometry, aspect ratio, framerate and interlacing.
pub fn conversion_info(port: &VideoInfo, output: &VideoInfo) -> Option<VideoInfo> {
    if port.conversion_equal(output) {
        return None;
    }
    Some(VideoInfo {
        format: output.format,
        colorimetry: output.colorimetry,
        chroma_site: output.chroma_site,
        ..*port
    })
}

/// A cached, lazily-built converter from a port's native format to the
/// negotiated output format.
#[derive(Clone)]
pub struct FrameConverter {
    backend: Arc<dyn ConvertBackend>,
    src: VideoInfo,
    dst: VideoInfo,
    config: ConverterConfig,
}

impl std::fmt::Debug for FrameConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameConverter")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FrameConverter {
    /// Build a converter for a port, or `None` when no conversion is needed
    /// and the configuration bag is empty.
    ///
    /// Fails with [`Error::NoConversionPath`] when the backend has no path
    /// between the two formats; the engine treats that as not-negotiated.
    pub fn for_port(
        backend: Arc<dyn ConvertBackend>,
        port: &VideoInfo,
        output: &VideoInfo,
        config: &ConverterConfig,
    ) -> Result<Option<Self>> {
        let dst = match conversion_info(port, output) {
            Some(dst) => dst,
            // A non-empty config bag forces the conversion path even for
            // matching formats, so backend options still apply.
            None if config.is_empty() => return Ok(None),
            None => *port,
        };

        if !backend.supports(port.format, dst.format) {
            tracing::warn!(from = %port.format, to = %dst.format, "no conversion path");
            return Err(Error::NoConversionPath {
                from: port.format,
                to: dst.format,
            });
        }

        tracing::debug!(from = %port.format, to = %dst.format, "port will be converted");
        Ok(Some(Self {
            backend,
            src: *port,
            dst,
            config: config.clone(),
        }))
    }

    /// The source format this converter was built for.
    pub fn src_info(&self) -> &VideoInfo {
        &self.src
    }

    /// The conversion target.
    pub fn dst_info(&self) -> &VideoInfo {
        &self.dst
    }

    /// Run the conversion for one frame.
    pub fn run(&self, frame: &VideoFrame) -> Result<VideoFrame> {
        self.backend.convert(frame, &self.dst, &self.config)
    }
}

// ============================================================================
// Worker pool and the start/finish split
// ============================================================================

type Job = Box<dyn FnOnce() + Send>;

/// Shared worker pool for parallel per-port conversion.
///
/// Sized to the number of available processing units. Jobs are independent;
/// the only synchronization point is each job's result channel.
pub struct ConvertPool {
    tx: Option<kanal::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ConvertPool {
    /// Create a pool with one worker per available processing unit.
    pub fn new() -> Self {
        let n = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::with_workers(n)
    }

    /// Create a pool with an explicit worker count.
    pub fn with_workers(n: usize) -> Self {
        let (tx, rx) = kanal::unbounded::<Job>();
        let workers = (0..n.max(1))
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("montage-convert-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("spawning converter worker")
            })
            .collect();
        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    fn submit(&self, job: Job) {
        if let Some(tx) = &self.tx {
            // Unbounded channel: send only fails when the pool is shutting
            // down, in which case the job result channel reports the loss.
            let _ = tx.send(job);
        }
    }
}

impl Default for ConvertPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConvertPool {
    fn drop(&mut self) {
        self.tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// An in-flight frame preparation.
///
/// Created by the start phase; [`finish`](PendingFrame::finish) must be
/// called exactly once per started port before its frame is read, and blocks
/// until any dispatched conversion completes.
pub enum PendingFrame {
    /// Frame usable directly, no conversion dispatched.
    Ready(VideoFrame),
    /// Conversion running on the worker pool.
    InFlight(kanal::Receiver<Result<VideoFrame>>),
}

impl PendingFrame {
    /// Start preparing a frame: convert inline, dispatch to the pool, or
    /// pass the frame through untouched.
    pub fn start(
        frame: VideoFrame,
        converter: Option<&FrameConverter>,
        pool: Option<&ConvertPool>,
    ) -> Result<Self> {
        let Some(converter) = converter else {
            return Ok(Self::Ready(frame));
        };
        match pool {
            Some(pool) => {
                let (tx, rx) = kanal::bounded(1);
                let converter = converter.clone();
                pool.submit(Box::new(move || {
                    let _ = tx.send(converter.run(&frame));
                }));
                Ok(Self::InFlight(rx))
            }
            None => Ok(Self::Ready(converter.run(&frame)?)),
        }
    }

    /// Block until the prepared frame is available.
    pub fn finish(self) -> Result<VideoFrame> {
        match self {
            Self::Ready(frame) => Ok(frame),
            Self::InFlight(rx) => rx
                .recv()
                .map_err(|_| Error::AllocationFailed("conversion worker vanished".into()))?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VideoBuffer;
    use crate::clock::ClockTime;
    use crate::format::{ChromaSite, Colorimetry};

    fn frame(format: PixelFormat, w: u32, h: u32, fill: u8) -> VideoFrame {
        let info = VideoInfo::new(format, w, h);
        let buf = VideoBuffer::new(vec![fill; info.frame_size()], ClockTime::ZERO);
        VideoFrame::map(&buf, &info).unwrap()
    }

    fn backend() -> Arc<dyn ConvertBackend> {
        Arc::new(SoftwareConvert)
    }

    #[test]
    fn test_conversion_info_matching_formats() {
        let port = VideoInfo::new(PixelFormat::I420, 640, 480);
        let out = VideoInfo::new(PixelFormat::I420, 1280, 720);
        // Same format/colorimetry/chroma: no conversion despite geometry
        assert!(conversion_info(&port, &out).is_none());
    }

    #[test]
    fn test_conversion_info_keeps_geometry() {
        let port = VideoInfo::new(PixelFormat::Rgb24, 640, 480);
        let out = VideoInfo::new(PixelFormat::Bgra, 1280, 720)
            .with_colorimetry(Colorimetry::Bt601)
            .with_chroma_site(ChromaSite::Cosited);
        let target = conversion_info(&port, &out).unwrap();
        assert_eq!(target.format, PixelFormat::Bgra);
        assert_eq!(target.width, 640);
        assert_eq!(target.height, 480);
        assert_eq!(target.colorimetry, Colorimetry::Bt601);
        assert_eq!(target.chroma_site, ChromaSite::Cosited);
    }

    #[test]
    fn test_no_converter_when_equal_and_unconfigured() {
        let info = VideoInfo::new(PixelFormat::Rgb24, 320, 240);
        let conv =
            FrameConverter::for_port(backend(), &info, &info, &ConverterConfig::new()).unwrap();
        assert!(conv.is_none());
    }

    #[test]
    fn test_config_forces_converter() {
        let info = VideoInfo::new(PixelFormat::Rgb24, 320, 240);
        let config = ConverterConfig::new().with("dither", ConfigValue::Bool(true));
        let conv = FrameConverter::for_port(backend(), &info, &info, &config).unwrap();
        assert!(conv.is_some());
    }

    #[test]
    fn test_unsupported_pair_fails_construction() {
        let port = VideoInfo::new(PixelFormat::I420, 320, 240);
        let out = VideoInfo::new(PixelFormat::Rgb24, 320, 240);
        let err = FrameConverter::for_port(backend(), &port, &out, &ConverterConfig::new())
            .unwrap_err();
        assert!(matches!(err, Error::NoConversionPath { .. }));
    }

    #[test]
    fn test_rgb_to_bgra_swizzle() {
        let port = VideoInfo::new(PixelFormat::Rgb24, 2, 1);
        let out = VideoInfo::new(PixelFormat::Bgra, 2, 1);
        let conv = FrameConverter::for_port(backend(), &port, &out, &ConverterConfig::new())
            .unwrap()
            .unwrap();

        let buf = VideoBuffer::new(vec![10u8, 20, 30, 40, 50, 60], ClockTime::ZERO);
        let src = VideoFrame::map(&buf, &port).unwrap();
        let dst = conv.run(&src).unwrap();
        assert_eq!(dst.info().format, PixelFormat::Bgra);
        assert_eq!(&dst.data()[..8], &[30, 20, 10, 0xff, 60, 50, 40, 0xff]);
    }

    #[test]
    fn test_gray_roundtrip() {
        let gray = frame(PixelFormat::Gray8, 2, 2, 100);
        let out = VideoInfo::new(PixelFormat::Argb, 2, 2);
        let conv = FrameConverter::for_port(
            backend(),
            gray.info(),
            &out,
            &ConverterConfig::new(),
        )
        .unwrap()
        .unwrap();
        let argb = conv.run(&gray).unwrap();
        // A=255, R=G=B=100
        assert_eq!(&argb.data()[..4], &[0xff, 100, 100, 100]);
    }

    #[test]
    fn test_pending_frame_inline() {
        let src = frame(PixelFormat::Rgb24, 2, 2, 7);
        let pending = PendingFrame::start(src.clone(), None, None).unwrap();
        let out = pending.finish().unwrap();
        assert_eq!(out.data(), src.data());
    }

    #[test]
    fn test_pending_frame_on_pool() {
        let pool = ConvertPool::with_workers(2);
        let port = VideoInfo::new(PixelFormat::Rgb24, 2, 2);
        let out = VideoInfo::new(PixelFormat::Bgr24, 2, 2);
        let conv = FrameConverter::for_port(backend(), &port, &out, &ConverterConfig::new())
            .unwrap()
            .unwrap();

        // All starts issued before any finish
        let pendings: Vec<PendingFrame> = (0..4)
            .map(|i| {
                let src = frame(PixelFormat::Rgb24, 2, 2, i as u8);
                PendingFrame::start(src, Some(&conv), Some(&pool)).unwrap()
            })
            .collect();

        for (i, pending) in pendings.into_iter().enumerate() {
            let done = pending.finish().unwrap();
            assert_eq!(done.info().format, PixelFormat::Bgr24);
            assert_eq!(done.data()[0], i as u8);
        }
    }
}
