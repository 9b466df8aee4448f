//! ## Technical Overview
//!
//! Hardware H.264 decode-and-present pipeline for live game streaming.
//!
//! ### Data Flow
//!
//! The streaming transport hands over one decode unit per frame as a chain of
//! fragments. Units are linearized into a fixed elementary stream buffer,
//! with sequence parameter sets rewritten on the way so the hardware decoder
//! does not buffer frames for reordering. The decoder writes each output
//! picture into a single reusable texture that is then drawn with its
//! overlays and swapped to the display.
//!
//! ### Pacing
//!
//! A frame pacer task samples the display vblank counter once per second and
//! grows a drop quota whenever more frames were presented than the target
//! rate allows. The pipeline discards decoded frames while the quota is
//! positive.
//!
//! ### Resource Lifecycle
//!
//! All hardware resources belong to one [`process::lifecycle::VideoDecoder`]
//! and are acquired in seven ordered stages, then released in exact reverse
//! order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hwavc::config::{PacerSettings, VideoConfig};
//! use hwavc::hw::sim::SimBackend;
//! use hwavc::process::lifecycle::{DecodeStatus, SetupParams, VideoDecoder};
//! use hwavc::structs::decode_unit::{DecodeUnit, Fragment, FrameType};
//!
//! let sim = SimBackend::new();
//! let mut video = VideoDecoder::new(
//!     sim.hardware(),
//!     sim.renderer(),
//!     sim.platform(),
//!     VideoConfig::default(),
//!     PacerSettings::default(),
//! );
//! video.setup(&SetupParams::h264(1280, 720, 60))?;
//!
//! let idr = [0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21];
//! let unit = DecodeUnit::new(0, FrameType::Idr, vec![Fragment::ordinary(&idr)]);
//! assert_eq!(video.submit_decode_unit(&unit), DecodeStatus::Ok);
//!
//! video.teardown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Configuration consumed read-only by the pipeline.
pub mod config;

/// Hardware seams and the simulated backend.
///
/// - **Codec** ([`hw::AvcHardware`]): library, memory blocks, decoder instances
/// - **Display** ([`hw::Renderer`]): texture and double-buffered drawing
/// - **Platform** ([`hw::Platform`]): vblank counter, clock and task spawning
pub mod hw;

/// Processing stages of the pipeline.
///
/// 1. **Assembly** ([`process::assemble`]): fragment chains to contiguous units
/// 2. **Lifecycle** ([`process::lifecycle`]): staged resource acquisition
/// 3. **Presentation** ([`process::present`]): decode, drop or present
/// 4. **Pacing** ([`process::pacer`]): drop quota from measured throughput
pub mod process;

/// H.264 and stream data structures.
///
/// - **NAL units** ([`structs::nal`]): Annex B framing and emulation prevention
/// - **Parameter sets** ([`structs::sps`]): SPS model and the bitstream fix-up
/// - **Decode units** ([`structs::decode_unit`]): fragment chains
/// - **Geometry** ([`structs::geometry`]): hardware-legal dimensions
/// - **Indicator** ([`structs::indicator`]): poor-network blink animation
pub mod structs;

/// Bitstream I/O and error types.
pub mod utils;
