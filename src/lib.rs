//! # Montage
//!
//! A multi-input video aggregation engine.
//!
//! Montage accepts buffers from an arbitrary number of independently-timed
//! video inputs, decides frame by frame which buffers belong together in
//! output time, negotiates one common pixel format / resolution / framerate
//! across all inputs and downstream constraints, converts mismatched inputs
//! into that format (optionally in parallel), and emits time-accurate
//! composited output while reacting to quality-of-service pressure.
//!
//! The per-pixel compositing math is supplied by the caller through the
//! [`FrameCompositor`](engine::FrameCompositor) strategy trait; montage is
//! the engine that decides *which* frames to hand to that math and *in what
//! common format*.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use montage::prelude::*;
//!
//! let agg = VideoAggregator::new(AggregatorConfig::new(), MyCompositor);
//! let cam = agg.add_port(PortConfig::new().with_zorder(0));
//! let overlay = agg.add_port(PortConfig::new().with_zorder(1).with_needs_alpha(true));
//!
//! // Producer threads push into the port handles...
//! cam.set_caps(VideoInfo::new(PixelFormat::I420, 1280, 720));
//! cam.push(buffer)?;
//!
//! // ...while the scheduling driver ticks the cycle.
//! match agg.aggregate(false)? {
//!     AggregateOutcome::Produced(frame) => sink.render(frame),
//!     AggregateOutcome::NeedData => wait_for_input(),
//!     AggregateOutcome::Dropped(report) => upstream.notify(report),
//!     AggregateOutcome::Eos => finish(),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod clock;
pub mod convert;
pub mod engine;
pub mod error;
pub mod format;
pub mod negotiate;
pub mod port;
pub mod qos;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::buffer::{OutputFrame, VideoBuffer, VideoFrame};
    pub use crate::clock::{ClockTime, Segment};
    pub use crate::engine::{
        AggregateOutcome, AggregatorConfig, FrameCompositor, PortFrame, VideoAggregator,
    };
    pub use crate::error::{Error, Result};
    pub use crate::format::{Framerate, PixelFormat, VideoCaps, VideoInfo};
    pub use crate::port::{InputPort, PortConfig, PortId};
    pub use crate::qos::QosReport;
}

pub use error::{Error, Result};
