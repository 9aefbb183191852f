//! Video format descriptions and capability constraints.
//!
//! [`VideoInfo`] is the fully-fixed format descriptor negotiated for a port
//! or for the output. [`VideoCaps`] expresses the constraints a downstream
//! consumer declares acceptable, using [`CapsValue`] per field.
//!
//! The caps system supports constraint-based negotiation:
//!
//! ```rust
//! use montage::format::{CapsValue, VideoCaps, PixelFormat, Framerate};
//!
//! // Downstream accepts I420 or BGRA, up to 1080p
//! let downstream = VideoCaps {
//!     format: CapsValue::List(vec![PixelFormat::I420, PixelFormat::Bgra]),
//!     width: CapsValue::Range { min: 16, max: 1920 },
//!     height: CapsValue::Range { min: 16, max: 1080 },
//!     framerate: CapsValue::Any,
//! };
//! assert!(downstream.accepts_format(PixelFormat::I420));
//! ```

use smallvec::SmallVec;

use crate::clock::ClockTime;

// ============================================================================
// Fractions
// ============================================================================

/// An exact unsigned fraction (pixel-aspect-ratio and friends).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fraction {
    /// Numerator.
    pub num: u32,
    /// Denominator.
    pub den: u32,
}

impl Fraction {
    /// 1/1.
    pub const ONE: Self = Self::new(1, 1);

    /// Create a new fraction.
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Self::ONE
    }
}

/// Frame rate as an exact fraction (frames per second).
///
/// A fraction represents common broadcast rates exactly, e.g. 29.97 fps is
/// `30000/1001`. A numerator of zero means the rate is unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Framerate {
    /// Frames.
    pub num: u32,
    /// Time units.
    pub den: u32,
}

impl Framerate {
    /// The engine-wide fallback rate used when no input declares one.
    pub const FALLBACK: Self = Self::new(25, 1);

    /// Unknown rate.
    pub const UNKNOWN: Self = Self::new(0, 1);

    /// Create a new framerate.
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Whether the rate is known (numerator non-zero).
    #[inline]
    pub const fn is_known(&self) -> bool {
        self.num != 0
    }

    /// Duration of one frame, or NONE when the rate is unknown.
    #[inline]
    pub const fn frame_duration(&self) -> ClockTime {
        if self.num == 0 {
            return ClockTime::NONE;
        }
        ClockTime::from_nanos((self.den as u64 * 1_000_000_000) / self.num as u64)
    }

    /// Duration covered by `n` frames, or NONE when the rate is unknown.
    ///
    /// Computed as one multiplication so per-frame rounding error does not
    /// accumulate across a long run.
    #[inline]
    pub const fn duration_of(&self, n: u64) -> ClockTime {
        if self.num == 0 {
            return ClockTime::NONE;
        }
        ClockTime::from_nanos(n * self.den as u64 * 1_000_000_000 / self.num as u64)
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl PartialOrd for Framerate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Framerate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Compare as fractions: a/b vs c/d => a*d vs c*b
        let lhs = self.num as u64 * other.den.max(1) as u64;
        let rhs = other.num as u64 * self.den.max(1) as u64;
        lhs.cmp(&rhs)
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ============================================================================
// Pixel formats and colorimetry
// ============================================================================

/// Pixel formats (color space and memory layout).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PixelFormat {
    /// YUV 4:2:0 planar (Y plane, then U plane, then V plane).
    I420,
    /// YUV 4:2:0 semi-planar (Y plane, then interleaved UV plane).
    Nv12,
    /// YUV 4:2:2 planar.
    I422,
    /// YUV 4:4:4 planar.
    I444,
    /// YUV 4:2:2 packed (Y0 U Y1 V).
    Yuyv,
    /// RGB 8-bit per channel, packed (24 bits/pixel).
    Rgb24,
    /// BGR 8-bit per channel, packed (24 bits/pixel).
    Bgr24,
    /// RGBA 8-bit per channel, packed (32 bits/pixel).
    Rgba,
    /// BGRA 8-bit per channel, packed (32 bits/pixel).
    Bgra,
    /// ARGB 8-bit per channel, packed (32 bits/pixel).
    Argb,
    /// 8-bit grayscale.
    Gray8,
}

impl PixelFormat {
    /// Whether this format carries an alpha channel.
    #[inline]
    pub const fn has_alpha(&self) -> bool {
        matches!(self, Self::Rgba | Self::Bgra | Self::Argb)
    }

    /// Number of image planes.
    pub const fn plane_count(&self) -> usize {
        match self {
            Self::I420 | Self::I422 | Self::I444 => 3,
            Self::Nv12 => 2,
            _ => 1,
        }
    }

    /// Frame size in bytes for the given dimensions.
    pub const fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::I420 | Self::Nv12 => pixels * 3 / 2,
            Self::I422 | Self::Yuyv => pixels * 2,
            Self::I444 | Self::Rgb24 | Self::Bgr24 => pixels * 3,
            Self::Rgba | Self::Bgra | Self::Argb => pixels * 4,
            Self::Gray8 => pixels,
        }
    }

    /// Canonical name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::I420 => "I420",
            Self::Nv12 => "NV12",
            Self::I422 => "I422",
            Self::I444 => "I444",
            Self::Yuyv => "YUYV",
            Self::Rgb24 => "RGB",
            Self::Bgr24 => "BGR",
            Self::Rgba => "RGBA",
            Self::Bgra => "BGRA",
            Self::Argb => "ARGB",
            Self::Gray8 => "GRAY8",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How color values are to be interpreted for a pixel format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Colorimetry {
    /// BT.601 (SD video).
    Bt601,
    /// BT.709 (HD video).
    #[default]
    Bt709,
    /// BT.2020 (UHD video).
    Bt2020,
    /// sRGB.
    Srgb,
}

impl Colorimetry {
    /// Canonical name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bt601 => "bt601",
            Self::Bt709 => "bt709",
            Self::Bt2020 => "bt2020",
            Self::Srgb => "srgb",
        }
    }
}

/// Chroma subsampling siting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ChromaSite {
    /// Unknown siting.
    #[default]
    Unknown,
    /// Chroma cosited with luma samples.
    Cosited,
    /// Chroma between luma samples (MPEG-2 style).
    Interstitial,
}

/// Interlacing of the video frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum InterlaceMode {
    /// Progressive frames.
    #[default]
    Progressive,
    /// Interleaved fields.
    Interleaved,
}

// ============================================================================
// VideoInfo
// ============================================================================

/// A fully-fixed video format descriptor.
///
/// This is what a port negotiates with its upstream and what the engine
/// negotiates for its output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    /// Pixel format.
    pub format: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel aspect ratio.
    pub par: Fraction,
    /// Frame rate (may be unknown).
    pub framerate: Framerate,
    /// Interlacing.
    pub interlace: InterlaceMode,
    /// Color interpretation.
    pub colorimetry: Colorimetry,
    /// Chroma siting.
    pub chroma_site: ChromaSite,
}

impl VideoInfo {
    /// Create a progressive, square-pixel descriptor with defaults for the
    /// color fields.
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            par: Fraction::ONE,
            framerate: Framerate::UNKNOWN,
            interlace: InterlaceMode::Progressive,
            colorimetry: Colorimetry::default(),
            chroma_site: ChromaSite::default(),
        }
    }

    /// Set the framerate.
    pub fn with_framerate(mut self, framerate: Framerate) -> Self {
        self.framerate = framerate;
        self
    }

    /// Set the colorimetry.
    pub fn with_colorimetry(mut self, colorimetry: Colorimetry) -> Self {
        self.colorimetry = colorimetry;
        self
    }

    /// Set the chroma siting.
    pub fn with_chroma_site(mut self, chroma_site: ChromaSite) -> Self {
        self.chroma_site = chroma_site;
        self
    }

    /// Number of pixels per frame, used as the negotiation weight.
    #[inline]
    pub const fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Frame size in bytes.
    #[inline]
    pub const fn frame_size(&self) -> usize {
        self.format.frame_size(self.width, self.height)
    }

    /// Whether a frame in this format can be fed to a consumer expecting
    /// `other` without conversion: pixel format, colorimetry and chroma
    /// siting must all match. Geometry is deliberately ignored — the engine
    /// never rescales.
    #[inline]
    pub fn conversion_equal(&self, other: &Self) -> bool {
        self.format == other.format
            && self.colorimetry == other.colorimetry
            && self.chroma_site == other.chroma_site
    }
}

// ============================================================================
// CapsValue - constraint value for negotiation
// ============================================================================

/// A constraint on a single format parameter: fixed, range, list, or any.
///
/// Supports intersection (finding common ground) and fixation (choosing a
/// value, optionally nearest to a preferred target).
#[derive(Clone, Debug, PartialEq, Default)]
pub enum CapsValue<T> {
    /// Exact value (fully constrained).
    Fixed(T),
    /// Range of acceptable values (inclusive).
    Range {
        /// Minimum acceptable value.
        min: T,
        /// Maximum acceptable value.
        max: T,
    },
    /// List of acceptable values (ordered by preference, first is best).
    List(Vec<T>),
    /// Any value accepted (unconstrained).
    #[default]
    Any,
}

impl<T: Clone + Ord> CapsValue<T> {
    /// Check if a value satisfies this constraint.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => value >= min && value <= max,
            Self::List(values) => values.contains(value),
            Self::Any => true,
        }
    }

    /// Intersect two constraints, finding common values.
    ///
    /// Returns `None` if there is no overlap.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Any, other) => Some(other.clone()),
            (this, Self::Any) => Some(this.clone()),

            (Self::Fixed(a), Self::Fixed(b)) => (a == b).then(|| Self::Fixed(a.clone())),

            (Self::Fixed(v), constraint) | (constraint, Self::Fixed(v)) => {
                constraint.accepts(v).then(|| Self::Fixed(v.clone()))
            }

            (
                Self::Range {
                    min: min1,
                    max: max1,
                },
                Self::Range {
                    min: min2,
                    max: max2,
                },
            ) => {
                let min = min1.max(min2).clone();
                let max = max1.min(max2).clone();
                (min <= max).then_some(Self::Range { min, max })
            }

            (Self::Range { min, max }, Self::List(list))
            | (Self::List(list), Self::Range { min, max }) => {
                let common: Vec<T> = list
                    .iter()
                    .filter(|v| *v >= min && *v <= max)
                    .cloned()
                    .collect();
                (!common.is_empty()).then_some(Self::List(common))
            }

            (Self::List(a), Self::List(b)) => {
                let common: Vec<T> = a.iter().filter(|v| b.contains(v)).cloned().collect();
                (!common.is_empty()).then_some(Self::List(common))
            }
        }
    }

    /// Fixate: choose the preferred value (first in list, min of range).
    ///
    /// Returns `None` for `Any` (cannot fixate without a default).
    pub fn fixate(&self) -> Option<T> {
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { min, .. } => Some(min.clone()),
            Self::List(values) => values.first().cloned(),
            Self::Any => None,
        }
    }
}

impl<T: Clone + Ord + Scalar> CapsValue<T> {
    /// Fixate to the accepted value nearest to `target`.
    ///
    /// Ranges clamp the target; lists pick the member with the smallest
    /// distance (earlier entries win ties); `Any` returns the target itself.
    pub fn fixate_nearest(&self, target: T) -> T {
        match self {
            Self::Fixed(v) => v.clone(),
            Self::Range { min, max } => target.clamp(min.clone(), max.clone()),
            Self::List(values) => values
                .iter()
                .min_by_key(|v| v.distance(&target))
                .cloned()
                .unwrap_or(target),
            Self::Any => target,
        }
    }
}

/// Values with a notion of distance, for nearest-value fixation.
pub trait Scalar {
    /// Absolute distance between two values.
    fn distance(&self, other: &Self) -> u64;
}

impl Scalar for u32 {
    fn distance(&self, other: &Self) -> u64 {
        self.abs_diff(*other) as u64
    }
}

impl Scalar for Framerate {
    fn distance(&self, other: &Self) -> u64 {
        // Cross-multiplied difference keeps the comparison exact.
        let lhs = self.num as u64 * other.den.max(1) as u64;
        let rhs = other.num as u64 * self.den.max(1) as u64;
        lhs.abs_diff(rhs)
    }
}

// ============================================================================
// VideoCaps
// ============================================================================

/// Constraints a downstream consumer declares acceptable.
///
/// Only the fields the engine negotiates are constrained here; colorimetry,
/// chroma siting, aspect ratio and interlacing follow the winning input.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct VideoCaps {
    /// Acceptable pixel formats.
    pub format: CapsValue<PixelFormat>,
    /// Acceptable widths.
    pub width: CapsValue<u32>,
    /// Acceptable heights.
    pub height: CapsValue<u32>,
    /// Acceptable framerates.
    pub framerate: CapsValue<Framerate>,
}

impl VideoCaps {
    /// Caps that accept any video format.
    pub fn any() -> Self {
        Self::default()
    }

    /// Caps restricted to the given pixel formats (any geometry/rate).
    pub fn formats(formats: impl Into<Vec<PixelFormat>>) -> Self {
        Self {
            format: CapsValue::List(formats.into()),
            ..Self::default()
        }
    }

    /// Check whether a pixel format is acceptable.
    pub fn accepts_format(&self, format: PixelFormat) -> bool {
        self.format.accepts(&format)
    }

    /// Check whether a fully-fixed descriptor satisfies these caps.
    ///
    /// Only pixel format is checked for intersection purposes: geometry and
    /// rate are fixated (with nearest rounding) rather than rejected, which
    /// mirrors how the output is built from per-input formats.
    pub fn accepts_info(&self, info: &VideoInfo) -> bool {
        self.accepts_format(info.format)
    }

    /// Pixel formats with an alpha channel accepted by these caps, if any.
    pub fn accepts_alpha(&self) -> bool {
        const ALPHA: [PixelFormat; 3] =
            [PixelFormat::Rgba, PixelFormat::Bgra, PixelFormat::Argb];
        ALPHA.iter().any(|f| self.accepts_format(*f))
    }

    /// Candidate formats accepted by both these caps and `supported`,
    /// preserving the order of `supported`.
    pub fn accepted_of(&self, supported: &[PixelFormat]) -> SmallVec<[PixelFormat; 4]> {
        supported
            .iter()
            .copied()
            .filter(|f| self.accepts_format(*f))
            .collect()
    }
}
