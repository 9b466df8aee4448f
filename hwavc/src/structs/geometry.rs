//! Output geometry negotiation for the hardware decoder.
//!
//! The codec library only accepts dimensions that are multiples of 16 with a
//! lower bound of 64 on either axis, up to 1920x1088.

use crate::hw::InitInfo;
use crate::utils::errors::SetupError;

pub const DECODER_DIMENSION_ALIGN: u32 = 16;
pub const DECODER_DIMENSION_MIN: u32 = 64;
pub const DECODER_MAX_WIDTH: u32 = 1920;
pub const DECODER_MAX_HEIGHT: u32 = 1088;

/// Reference frames the decoder is initialized for.
pub const NUM_REF_FRAMES: u32 = 5;
pub const NUM_STREAMS: u32 = 1;

/// Stream geometries whose vertical size must be overridden.
///
/// Library init rejects 960x540 and must be asked for 960x544 instead.
const VERTICAL_OVERRIDES: &[(u32, u32, u32)] = &[(960, 540, 544)];

/// Rounds a dimension up to the next legal hardware value.
///
/// Saturates to the largest aligned `u32` instead of overflowing.
pub const fn decoder_resolution(x: u32) -> u32 {
    let rounded = match x.div_ceil(DECODER_DIMENSION_ALIGN).checked_mul(DECODER_DIMENSION_ALIGN) {
        Some(rounded) => rounded,
        None => u32::MAX / DECODER_DIMENSION_ALIGN * DECODER_DIMENSION_ALIGN,
    };
    if rounded < DECODER_DIMENSION_MIN {
        DECODER_DIMENSION_MIN
    } else {
        rounded
    }
}

/// Negotiated geometry: what the stream carries and what the hardware gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub horizontal: u32,
    pub vertical: u32,
}

impl Geometry {
    pub fn negotiate(width: u32, height: u32) -> Result<Self, SetupError> {
        if width == 0 || height == 0 || width > DECODER_MAX_WIDTH || height > DECODER_MAX_HEIGHT {
            return Err(SetupError::UnsupportedGeometry { width, height });
        }

        let vertical = VERTICAL_OVERRIDES
            .iter()
            .find(|&&(w, h, _)| w == width && h == height)
            .map_or(height, |&(_, _, v)| v);

        Ok(Self {
            width,
            height,
            horizontal: decoder_resolution(width),
            vertical: decoder_resolution(vertical),
        })
    }

    pub fn init_info(&self) -> InitInfo {
        InitInfo {
            horizontal: self.horizontal,
            vertical: self.vertical,
            num_ref_frames: NUM_REF_FRAMES,
            num_streams: NUM_STREAMS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qhd_540_requests_544_lines() {
        let geometry = Geometry::negotiate(960, 540).unwrap();
        assert_eq!(geometry.horizontal, 960);
        assert_eq!(geometry.vertical, 544);
        assert_eq!(geometry.height, 540);
        assert_eq!(geometry.init_info().vertical, 544);
    }

    #[test]
    fn dimensions_round_to_hardware_multiples() {
        assert_eq!(decoder_resolution(1280), 1280);
        assert_eq!(decoder_resolution(1366), 1376);
        assert_eq!(decoder_resolution(1080), 1088);
        assert_eq!(decoder_resolution(725), 736);
        assert_eq!(decoder_resolution(721), 736);
        assert_eq!(decoder_resolution(20), 64);
        assert_eq!(decoder_resolution(1), 64);
    }

    #[test]
    fn oversized_or_empty_geometry_is_rejected() {
        assert!(Geometry::negotiate(3840, 2160).is_err());
        assert!(Geometry::negotiate(0, 720).is_err());
        assert!(Geometry::negotiate(1280, 1090).is_err());
        assert!(Geometry::negotiate(1921, 1080).is_err());
        assert!(Geometry::negotiate(u32::MAX, u32::MAX).is_err());

        let full_hd = Geometry::negotiate(1920, 1080).unwrap();
        assert_eq!((full_hd.horizontal, full_hd.vertical), (1920, 1088));
    }

    #[test]
    fn hardware_geometry_never_shrinks_the_stream() {
        for (width, height) in [(1366, 768), (1279, 719), (854, 480), (100, 60)] {
            let geometry = Geometry::negotiate(width, height).unwrap();
            assert!(geometry.horizontal >= width);
            assert!(geometry.vertical >= height);
            assert_eq!(geometry.horizontal % DECODER_DIMENSION_ALIGN, 0);
            assert_eq!(geometry.vertical % DECODER_DIMENSION_ALIGN, 0);
        }
        assert_eq!(decoder_resolution(u32::MAX), 0xFFFF_FFF0);
    }

    #[test]
    fn init_info_carries_fixed_decoder_parameters() {
        let init = Geometry::negotiate(1280, 720).unwrap().init_info();
        assert_eq!(init.num_ref_frames, 5);
        assert_eq!(init.num_streams, 1);
    }
}
