//! Buffers and frame handles.
//!
//! [`VideoBuffer`] is the unit producers push into a port queue: a cheaply
//! clonable byte payload plus timing metadata. [`VideoFrame`] and
//! [`OutputFrame`] are ownership-typed frame handles: a frame is acquired by
//! pairing a payload with the [`VideoInfo`] it was produced under, and its
//! resources are released when the handle is dropped, on every exit path.

use bytes::{Bytes, BytesMut};

use crate::clock::ClockTime;
use crate::error::{Error, Result};
use crate::format::{PixelFormat, VideoInfo};

/// Flags indicating buffer properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Buffer is a gap marker: it occupies time on the timeline but carries
    /// no picture. The engine consumes gaps without replacing a port's held
    /// picture.
    pub gap: bool,
}

/// A timestamped video buffer.
///
/// Clone is cheap (the payload is reference counted); the data itself is
/// immutable once pushed. Ownership of a buffer transfers between the
/// structures that reference it — a port's queue, a port's current slot, or
/// the output — it is never shared mutably.
#[derive(Debug, Clone)]
pub struct VideoBuffer {
    data: Bytes,
    /// Presentation timestamp. NONE means untimestamped, which is fatal when
    /// the buffer reaches the aggregation window logic.
    pub pts: ClockTime,
    /// Duration, or NONE when unknown.
    pub duration: ClockTime,
    /// Buffer flags.
    pub flags: BufferFlags,
}

impl VideoBuffer {
    /// Create a buffer with a timestamp and unknown duration.
    pub fn new(data: impl Into<Bytes>, pts: ClockTime) -> Self {
        Self {
            data: data.into(),
            pts,
            duration: ClockTime::NONE,
            flags: BufferFlags::default(),
        }
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: ClockTime) -> Self {
        self.duration = duration;
        self
    }

    /// Create an empty gap buffer covering `[pts, pts + duration)`.
    pub fn gap(pts: ClockTime, duration: ClockTime) -> Self {
        Self {
            data: Bytes::new(),
            pts,
            duration,
            flags: BufferFlags { gap: true },
        }
    }

    /// The payload bytes.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this is a zero-sized gap marker.
    #[inline]
    pub fn is_gap(&self) -> bool {
        self.flags.gap && self.data.is_empty()
    }

    /// End timestamp (`pts + duration`), or NONE when either is unknown.
    #[inline]
    pub fn end_time(&self) -> ClockTime {
        self.pts.saturating_add(self.duration)
    }
}

/// A read-mapped frame: a buffer payload bound to the format it was
/// negotiated under, with validated size and per-plane access.
///
/// Acquiring the handle validates the payload against the format; dropping
/// it releases the underlying reference. Clone is an Arc bump.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    info: VideoInfo,
    data: Bytes,
}

impl VideoFrame {
    /// Map a buffer for reading under `info`.
    ///
    /// Fails if the payload is smaller than one frame of `info`.
    pub fn map(buffer: &VideoBuffer, info: &VideoInfo) -> Result<Self> {
        let needed = info.frame_size();
        if buffer.len() < needed {
            return Err(Error::InvalidBuffer(format!(
                "{} frame needs {} bytes, buffer has {}",
                info.format,
                needed,
                buffer.len()
            )));
        }
        Ok(Self {
            info: *info,
            data: buffer.data().clone(),
        })
    }

    /// Wrap raw frame data that is already known to match `info`.
    pub(crate) fn from_parts(info: VideoInfo, data: Bytes) -> Self {
        debug_assert!(data.len() >= info.frame_size());
        Self { info, data }
    }

    /// The format this frame was mapped under.
    #[inline]
    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// The full frame bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Byte range of plane `idx` within the frame.
    fn plane_range(&self, idx: usize) -> (usize, usize) {
        let w = self.info.width as usize;
        let h = self.info.height as usize;
        let luma = w * h;
        match (self.info.format, idx) {
            (PixelFormat::I420, 0) => (0, luma),
            (PixelFormat::I420, 1) => (luma, luma / 4),
            (PixelFormat::I420, 2) => (luma + luma / 4, luma / 4),
            (PixelFormat::Nv12, 0) => (0, luma),
            (PixelFormat::Nv12, 1) => (luma, luma / 2),
            (PixelFormat::I422, 0) => (0, luma),
            (PixelFormat::I422, 1) => (luma, luma / 2),
            (PixelFormat::I422, 2) => (luma + luma / 2, luma / 2),
            (PixelFormat::I444, p) if p < 3 => (p * luma, luma),
            (_, 0) => (0, self.info.frame_size()),
            (f, p) => panic!("plane {p} out of range for {f}"),
        }
    }

    /// Data of plane `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= info().format.plane_count()`.
    pub fn plane(&self, idx: usize) -> &[u8] {
        let (offset, len) = self.plane_range(idx);
        &self.data[offset..offset + len]
    }
}

/// A writable output frame, allocated for the negotiated output format.
///
/// Produced by the compositor's output-buffer step, filled by the
/// compositing math, and frozen into the emitted [`VideoBuffer`].
#[derive(Debug)]
pub struct OutputFrame {
    info: VideoInfo,
    data: BytesMut,
}

impl OutputFrame {
    /// Allocate a zero-filled frame for `info`.
    pub fn alloc(info: &VideoInfo) -> Result<Self> {
        let size = info.frame_size();
        if size == 0 {
            return Err(Error::AllocationFailed(format!(
                "zero-sized output frame for {}x{}",
                info.width, info.height
            )));
        }
        Ok(Self {
            info: *info,
            data: BytesMut::zeroed(size),
        })
    }

    /// The output format.
    #[inline]
    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// Mutable frame bytes.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Freeze into an immutable buffer stamped with the given window.
    pub(crate) fn into_buffer(self, pts: ClockTime, duration: ClockTime) -> VideoBuffer {
        VideoBuffer::new(self.data.freeze(), pts).with_duration(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_buffer(format: PixelFormat, w: u32, h: u32) -> (VideoBuffer, VideoInfo) {
        let info = VideoInfo::new(format, w, h);
        let buf = VideoBuffer::new(vec![0u8; info.frame_size()], ClockTime::ZERO)
            .with_duration(ClockTime::from_millis(40));
        (buf, info)
    }

    #[test]
    fn test_end_time() {
        let buf = VideoBuffer::new(Bytes::new(), ClockTime::from_millis(100))
            .with_duration(ClockTime::from_millis(40));
        assert_eq!(buf.end_time(), ClockTime::from_millis(140));

        let no_dur = VideoBuffer::new(Bytes::new(), ClockTime::from_millis(100));
        assert!(no_dur.end_time().is_none());
    }

    #[test]
    fn test_gap_buffer() {
        let gap = VideoBuffer::gap(ClockTime::ZERO, ClockTime::from_millis(40));
        assert!(gap.is_gap());
        assert!(gap.is_empty());
        assert_eq!(gap.end_time(), ClockTime::from_millis(40));
    }

    #[test]
    fn test_frame_map_validates_size() {
        let info = VideoInfo::new(PixelFormat::Rgba, 4, 4);
        let short = VideoBuffer::new(vec![0u8; 10], ClockTime::ZERO);
        assert!(VideoFrame::map(&short, &info).is_err());

        let (buf, info) = make_buffer(PixelFormat::Rgba, 4, 4);
        assert!(VideoFrame::map(&buf, &info).is_ok());
    }

    #[test]
    fn test_i420_planes() {
        let (buf, info) = make_buffer(PixelFormat::I420, 4, 4);
        let frame = VideoFrame::map(&buf, &info).unwrap();
        assert_eq!(frame.plane(0).len(), 16);
        assert_eq!(frame.plane(1).len(), 4);
        assert_eq!(frame.plane(2).len(), 4);
    }

    #[test]
    fn test_nv12_planes() {
        let (buf, info) = make_buffer(PixelFormat::Nv12, 4, 4);
        let frame = VideoFrame::map(&buf, &info).unwrap();
        assert_eq!(frame.plane(0).len(), 16);
        assert_eq!(frame.plane(1).len(), 8);
    }

    #[test]
    fn test_output_frame_freeze() {
        let info = VideoInfo::new(PixelFormat::Gray8, 8, 8);
        let mut out = OutputFrame::alloc(&info).unwrap();
        out.data_mut()[0] = 0xff;
        let buf = out.into_buffer(ClockTime::ZERO, ClockTime::from_millis(40));
        assert_eq!(buf.len(), 64);
        assert_eq!(buf.data()[0], 0xff);
        assert_eq!(buf.duration, ClockTime::from_millis(40));
    }
}
