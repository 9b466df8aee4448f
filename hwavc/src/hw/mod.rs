//! Hardware seams of the decode pipeline.
//!
//! The pipeline talks to three collaborators:
//!
//! - [`AvcHardware`]: the global codec library, physically contiguous memory
//!   blocks and decoder instances, plus the decode call itself.
//! - [`Renderer`]: the presentation surface and double-buffered drawing.
//! - [`Platform`]: the display vblank counter, a monotonic clock and task
//!   spawning for the frame pacer.
//!
//! Resource handles ([`MemBlock`], [`DecoderHandle`], [`FrameTexture`]) are
//! move-only, so releasing one consumes it.

use std::fmt;
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub mod sim;

/// Codec type of the hardware AVC decoder.
pub const CODEC_TYPE_HW_AVCDEC: u32 = 0x1001;

/// Raw status returned by a failing hardware call.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("hardware status {0:#010X}")]
pub struct HwError(pub u32);

pub type HwResult<T> = Result<T, HwError>;

/// Codec library initialization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitInfo {
    pub horizontal: u32,
    pub vertical: u32,
    pub num_ref_frames: u32,
    pub num_streams: u32,
}

/// Decoder instance parameters, also used for the memory size query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderInfo {
    pub horizontal: u32,
    pub vertical: u32,
    pub num_ref_frames: u32,
}

impl From<&InitInfo> for DecoderInfo {
    fn from(init: &InitInfo) -> Self {
        Self {
            horizontal: init.horizontal,
            vertical: init.vertical,
            num_ref_frames: init.num_ref_frames,
        }
    }
}

/// A dedicated memory block owned by the caller until freed.
#[derive(Debug, PartialEq, Eq)]
pub struct MemBlock {
    uid: i32,
    size: usize,
}

impl MemBlock {
    pub fn new(uid: i32, size: usize) -> Self {
        Self { uid, size }
    }

    pub fn uid(&self) -> i32 {
        self.uid
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Frame memory handed to a decoder instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBuffer {
    pub base: usize,
    pub size: usize,
}

/// A live decoder instance.
#[derive(Debug, PartialEq, Eq)]
pub struct DecoderHandle(u32);

impl DecoderHandle {
    pub fn new(handle: u32) -> Self {
        Self(handle)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Split 64-bit decoder timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideodecTimestamp {
    pub upper: u32,
    pub lower: u32,
}

impl VideodecTimestamp {
    pub const UNKNOWN: Self = Self {
        upper: 0xFFFF_FFFF,
        lower: 0xFFFF_FFFF,
    };
}

/// One contiguous elementary stream unit submitted for decode.
#[derive(Debug, Clone, Copy)]
pub struct AccessUnit<'a> {
    pub es: &'a [u8],
    pub pts: VideodecTimestamp,
    pub dts: VideodecTimestamp,
}

impl<'a> AccessUnit<'a> {
    pub fn untimed(es: &'a [u8]) -> Self {
        Self {
            es,
            pts: VideodecTimestamp::UNKNOWN,
            dts: VideodecTimestamp::UNKNOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8 bits per channel, A in the high byte.
    Abgr8888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Abgr8888 => 4,
        }
    }

    /// Pixel type selector passed to the decoder for this output format.
    pub fn decoder_pixel_type(self) -> u32 {
        match self {
            PixelFormat::Abgr8888 => 0,
        }
    }
}

/// The fixed-size presentation surface decoded frames are written into.
pub struct FrameTexture {
    id: u32,
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl FrameTexture {
    pub fn new(id: u32, width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            id,
            width,
            height,
            format,
            pixels: vec![0; len],
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Decode target covering the whole texture with a pitch of one line.
    pub fn picture_target(&mut self) -> PictureTarget<'_> {
        PictureTarget {
            pixel_type: self.format.decoder_pixel_type(),
            frame_pitch: self.width,
            frame_width: self.width,
            frame_height: self.height,
            buffer: &mut self.pixels,
        }
    }
}

impl fmt::Debug for FrameTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTexture")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Where the decoder writes its output picture.
pub struct PictureTarget<'a> {
    pub pixel_type: u32,
    pub frame_pitch: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub buffer: &'a mut [u8],
}

/// 8-bit RGBA color used for overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn white(a: u8) -> Self {
        Self::new(0xFF, 0xFF, 0xFF, a)
    }
}

/// Hardware AVC decoder services.
pub trait AvcHardware: Send {
    fn init_library(&mut self, info: &InitInfo) -> HwResult<()>;
    fn term_library(&mut self);

    /// Returns the frame memory a decoder with these parameters needs.
    fn query_decoder_mem_size(&mut self, info: &DecoderInfo) -> HwResult<usize>;
    fn alloc_mem_block(&mut self, name: &str, size: usize) -> HwResult<MemBlock>;
    fn mem_block_base(&mut self, block: &MemBlock) -> HwResult<usize>;
    fn free_mem_block(&mut self, block: MemBlock);

    fn create_decoder(
        &mut self,
        frame_buf: FrameBuffer,
        info: &DecoderInfo,
    ) -> HwResult<DecoderHandle>;
    fn delete_decoder(&mut self, decoder: DecoderHandle);

    /// Decodes one unit and returns the number of output pictures written.
    fn decode(
        &mut self,
        decoder: &DecoderHandle,
        au: &AccessUnit<'_>,
        picture: &mut PictureTarget<'_>,
    ) -> HwResult<u32>;
}

/// Presentation surface and drawing services.
pub trait Renderer: Send {
    fn create_texture(&mut self, width: u32, height: u32, format: PixelFormat)
    -> Option<FrameTexture>;
    fn free_texture(&mut self, texture: FrameTexture);

    fn start_drawing(&mut self);
    fn draw_texture(&mut self, texture: &FrameTexture, x: f32, y: f32);
    fn draw_text(&mut self, x: i32, y: i32, color: Rgba, size: u32, text: &str);
    fn end_drawing(&mut self);
    fn wait_rendering_done(&mut self);
    fn swap_buffers(&mut self);

    fn set_vblank_wait(&mut self, enable: bool);
}

/// Display timing and scheduling services shared with the frame pacer.
pub trait Platform: Send + Sync {
    /// Number of vertical blanks since boot.
    fn vblank_count(&self) -> u64;

    /// Monotonic time since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Starts an independently scheduled task.
    fn spawn(
        &self,
        name: &str,
        stack_size: usize,
        task: Box<dyn FnOnce() + Send + 'static>,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_string())
            .stack_size(stack_size)
            .spawn(task)
    }
}
