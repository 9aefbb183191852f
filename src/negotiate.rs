//! Output format negotiation.
//!
//! Produces a single output format descriptor acceptable to every attached
//! input's conversion capability and to the downstream-declared capability
//! set. Pixel format selection weighs each candidate by the pixel count of
//! the ports natively producing it; geometry and framerate are fixated from
//! the inputs against downstream's constraints.

use crate::error::{Error, Result};
use crate::format::{Framerate, PixelFormat, VideoCaps, VideoInfo};
use crate::port::PortId;

/// One attached input's contribution to negotiation.
#[derive(Debug, Clone, Copy)]
pub struct PortFormat {
    /// The port.
    pub id: PortId,
    /// Its currently active format.
    pub info: VideoInfo,
    /// Whether the port requires an alpha-capable output format.
    pub needs_alpha: bool,
}

/// Find the best output format across all negotiated ports.
///
/// Each port whose native format is in `supported` accumulates a weight
/// equal to its pixel count; the format with the greatest accumulated
/// weight wins. The first port requiring alpha forces the winner to be
/// alpha-capable, falling back to `fallback_alpha` when no attached format
/// carries alpha. If the winner does not intersect `downstream`, the
/// supported list is scanned in declaration order (alpha-capable entries
/// preferred when alpha is required) for one that does.
///
/// Ports are visited in the order given; an equal-weight tie keeps the
/// earlier port's format, which makes the result deterministic for the
/// engine's (zorder, id)-sorted port list.
///
/// Returns the chosen descriptor (geometry still the winning port's, not
/// yet fixated) and whether any attached format carries alpha.
pub fn find_best_format(
    ports: &[PortFormat],
    supported: &[PixelFormat],
    fallback_alpha: PixelFormat,
    downstream: &VideoCaps,
) -> (Option<VideoInfo>, bool) {
    let mut at_least_one_alpha = false;
    let mut need_alpha = false;
    let mut best: Option<VideoInfo> = None;
    let mut best_weight: u64 = 0;
    // Accumulated weight per supported format, indexed like `supported`.
    let mut weights = vec![0u64; supported.len()];

    for port in ports {
        let info = port.info;
        if info.format.has_alpha() {
            at_least_one_alpha = true;
        }
        // Once alpha is required, formats without it are out of the running.
        if need_alpha && !info.format.has_alpha() {
            continue;
        }

        let weight = match supported.iter().position(|f| *f == info.format) {
            Some(idx) => {
                weights[idx] += info.pixel_count();
                weights[idx]
            }
            None => 0,
        };

        if !need_alpha && port.needs_alpha && !info.format.has_alpha() {
            // First port demanding alpha while producing none: fall back to
            // the configured alpha format, keeping this port's other fields.
            need_alpha = true;
            best = Some(VideoInfo {
                format: fallback_alpha,
                ..info
            });
            // Weight deliberately not taken over; an actual alpha-carrying
            // port can still override this fallback.
        } else if !need_alpha && info.format.has_alpha() {
            need_alpha = true;
            best = Some(info);
            best_weight = weight;
        } else if weight > best_weight {
            best = Some(info);
            best_weight = weight;
        }
    }

    if let Some(candidate) = best {
        if supported.contains(&candidate.format) && downstream.accepts_format(candidate.format) {
            return (Some(candidate), at_least_one_alpha);
        }
    }

    // Nothing both supported and downstream-acceptable won: scan the
    // declared list in order.
    for format in downstream.accepted_of(supported) {
        if need_alpha && !format.has_alpha() {
            continue;
        }
        let base = best.or_else(|| ports.first().map(|p| p.info));
        if let Some(base) = base {
            tracing::info!(%format, "using supported fallback format");
            return (Some(VideoInfo { format, ..base }), at_least_one_alpha);
        }
    }

    tracing::warn!("nothing compatible with downstream caps");
    (None, at_least_one_alpha)
}

/// Fixate the final output descriptor.
///
/// Width and height default to the maximum seen across the ports, the
/// framerate to the fastest known input rate (25/1 when none is known);
/// each is then rounded to the nearest value downstream accepts.
/// Colorimetry, chroma siting and the remaining fields come from the
/// winning port's descriptor.
pub fn fixate_output(
    ports: &[PortFormat],
    best: &VideoInfo,
    downstream: &VideoCaps,
) -> VideoInfo {
    let mut best_width = 0u32;
    let mut best_height = 0u32;
    let mut best_fps = Framerate::UNKNOWN;

    for port in ports {
        let info = port.info;
        if info.width == 0 || info.height == 0 {
            continue;
        }
        best_width = best_width.max(info.width);
        best_height = best_height.max(info.height);
        if info.framerate.is_known() && info.framerate > best_fps {
            best_fps = info.framerate;
        }
    }

    if !best_fps.is_known() {
        best_fps = Framerate::FALLBACK;
    }

    VideoInfo {
        width: downstream.width.fixate_nearest(best_width),
        height: downstream.height.fixate_nearest(best_height),
        framerate: downstream.framerate.fixate_nearest(best_fps),
        ..*best
    }
}

/// Run the full negotiation: best-format search plus fixation.
pub fn negotiate(
    ports: &[PortFormat],
    supported: &[PixelFormat],
    fallback_alpha: PixelFormat,
    downstream: &VideoCaps,
) -> Result<VideoInfo> {
    if ports.is_empty() {
        return Err(Error::NotNegotiated("no negotiated input formats".into()));
    }

    let (best, _) = find_best_format(ports, supported, fallback_alpha, downstream);
    let best = best.ok_or_else(|| {
        Error::NotNegotiated("no format acceptable to all ports and downstream".into())
    })?;

    let fixated = fixate_output(ports, &best, downstream);
    tracing::debug!(
        format = %fixated.format,
        width = fixated.width,
        height = fixated.height,
        framerate = %fixated.framerate,
        "negotiated output format"
    );
    Ok(fixated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CapsValue, Colorimetry};

    const SUPPORTED: [PixelFormat; 3] =
        [PixelFormat::I420, PixelFormat::Bgra, PixelFormat::Rgb24];

    fn port(id: u32, format: PixelFormat, w: u32, h: u32) -> PortFormat {
        PortFormat {
            id: PortId(id),
            info: VideoInfo::new(format, w, h),
            needs_alpha: false,
        }
    }

    #[test]
    fn test_weight_favors_larger_port() {
        // Two ports in the same supported format: the larger one decides
        // the geometry, the shared format wins, nothing needs conversion.
        let ports = [
            port(0, PixelFormat::I420, 640, 480),
            port(1, PixelFormat::I420, 1280, 720),
        ];
        let out = negotiate(&ports, &SUPPORTED, PixelFormat::Bgra, &VideoCaps::any()).unwrap();
        assert_eq!(out.format, PixelFormat::I420);
        assert_eq!((out.width, out.height), (1280, 720));
    }

    #[test]
    fn test_weight_across_formats() {
        let ports = [
            port(0, PixelFormat::Rgb24, 320, 240),
            port(1, PixelFormat::I420, 1920, 1080),
        ];
        let (best, _) =
            find_best_format(&ports, &SUPPORTED, PixelFormat::Bgra, &VideoCaps::any());
        assert_eq!(best.unwrap().format, PixelFormat::I420);
    }

    #[test]
    fn test_equal_weight_tie_keeps_first_port() {
        let ports = [
            port(0, PixelFormat::Rgb24, 640, 480),
            port(1, PixelFormat::I420, 640, 480),
        ];
        let (best, _) =
            find_best_format(&ports, &SUPPORTED, PixelFormat::Bgra, &VideoCaps::any());
        assert_eq!(best.unwrap().format, PixelFormat::Rgb24);
    }

    #[test]
    fn test_alpha_port_forces_alpha_format() {
        let ports = [
            port(0, PixelFormat::I420, 1920, 1080),
            port(1, PixelFormat::Bgra, 320, 240),
        ];
        let (best, any_alpha) =
            find_best_format(&ports, &SUPPORTED, PixelFormat::Bgra, &VideoCaps::any());
        assert!(any_alpha);
        assert_eq!(best.unwrap().format, PixelFormat::Bgra);
    }

    #[test]
    fn test_needs_alpha_flag_uses_fallback() {
        let mut flagged = port(0, PixelFormat::I420, 640, 480);
        flagged.needs_alpha = true;
        let ports = [flagged, port(1, PixelFormat::I420, 1920, 1080)];
        let (best, any_alpha) =
            find_best_format(&ports, &SUPPORTED, PixelFormat::Bgra, &VideoCaps::any());
        assert!(!any_alpha);
        assert_eq!(best.unwrap().format, PixelFormat::Bgra);
    }

    #[test]
    fn test_downstream_fallback_scan() {
        // Downstream only takes RGB; the I420-heavy input can't win.
        let downstream = VideoCaps::formats(vec![PixelFormat::Rgb24]);
        let ports = [port(0, PixelFormat::I420, 1920, 1080)];
        let (best, _) =
            find_best_format(&ports, &SUPPORTED, PixelFormat::Bgra, &downstream);
        assert_eq!(best.unwrap().format, PixelFormat::Rgb24);
    }

    #[test]
    fn test_nothing_compatible() {
        let downstream = VideoCaps::formats(vec![PixelFormat::Nv12]);
        let ports = [port(0, PixelFormat::I420, 640, 480)];
        assert!(matches!(
            negotiate(&ports, &SUPPORTED, PixelFormat::Bgra, &downstream),
            Err(Error::NotNegotiated(_))
        ));
    }

    #[test]
    fn test_framerate_fastest_wins_and_fallback() {
        let mut a = port(0, PixelFormat::I420, 640, 480);
        a.info.framerate = Framerate::new(30, 1);
        let mut b = port(1, PixelFormat::I420, 640, 480);
        b.info.framerate = Framerate::new(30000, 1001);
        let out = negotiate(&[a, b], &SUPPORTED, PixelFormat::Bgra, &VideoCaps::any()).unwrap();
        assert_eq!(out.framerate, Framerate::new(30, 1));

        // No known rate anywhere: 25/1
        let out = negotiate(
            &[port(0, PixelFormat::I420, 640, 480)],
            &SUPPORTED,
            PixelFormat::Bgra,
            &VideoCaps::any(),
        )
        .unwrap();
        assert_eq!(out.framerate, Framerate::FALLBACK);
    }

    #[test]
    fn test_downstream_nearest_rounding() {
        let downstream = VideoCaps {
            width: CapsValue::Range { min: 100, max: 1000 },
            height: CapsValue::List(vec![480, 1080]),
            ..VideoCaps::any()
        };
        let ports = [port(0, PixelFormat::I420, 1920, 900)];
        let out = negotiate(&ports, &SUPPORTED, PixelFormat::Bgra, &downstream).unwrap();
        assert_eq!(out.width, 1000); // clamped into the range
        assert_eq!(out.height, 1080); // nearest list entry
    }

    #[test]
    fn test_colorimetry_copied_from_winner() {
        let mut a = port(0, PixelFormat::I420, 1920, 1080);
        a.info.colorimetry = Colorimetry::Bt601;
        let ports = [a, port(1, PixelFormat::Rgb24, 320, 240)];
        let out = negotiate(&ports, &SUPPORTED, PixelFormat::Bgra, &VideoCaps::any()).unwrap();
        assert_eq!(out.colorimetry, Colorimetry::Bt601);
    }

    #[test]
    fn test_no_ports_is_not_negotiated() {
        assert!(negotiate(&[], &SUPPORTED, PixelFormat::Bgra, &VideoCaps::any()).is_err());
    }
}
