//! Decoder lifecycle.
//!
//! [`VideoDecoder`] owns every hardware resource of a video session and walks
//! an explicit [`Stage`] ladder to acquire them. Each forward step acquires
//! one stage completely or not at all. Teardown walks the same ladder
//! backwards from wherever the decoder is, one stage at a time, so resources
//! are always released in reverse acquisition order.

use std::ops::BitOr;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::{PacerSettings, VideoConfig};
use crate::hw::{
    AvcHardware, DecoderHandle, DecoderInfo, FrameBuffer, FrameTexture, InitInfo, MemBlock,
    PixelFormat, Platform, Renderer,
};
use crate::process::assemble::{Assembler, DECODER_BUFFER_SIZE};
use crate::process::pacer::{FramePacer, PacerShared};
use crate::process::present::PipelineStats;
use crate::structs::decode_unit::DecodeUnit;
use crate::structs::geometry::Geometry;
use crate::structs::indicator::IndicatorStatus;
use crate::structs::sps::SpsFixup;
use crate::utils::errors::{SetupError, TeardownError, VIDEO_INIT_OK};

pub const VIDEO_FORMAT_H264: u32 = 0x0001;
pub const VIDEO_FORMAT_MASK_H264: u32 = 0x000F;

/// Presentation surface size. Decoded pictures are written at this size
/// whatever the stream geometry is.
pub const SCREEN_WIDTH: u32 = 960;
pub const SCREEN_HEIGHT: u32 = 544;

/// Allocation granularity of decoder memory blocks.
const MEM_BLOCK_ALIGN: usize = 0x10_0000;

const DECODER_MEM_BLOCK_NAME: &str = "decoder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Uninitialized,
    FormatReady,
    FrameBufferReady,
    CodecLibraryReady,
    DecoderMemoryReady,
    DecoderReady,
    PacerRunning,
}

impl Stage {
    const ORDER: [Stage; 7] = [
        Stage::Uninitialized,
        Stage::FormatReady,
        Stage::FrameBufferReady,
        Stage::CodecLibraryReady,
        Stage::DecoderMemoryReady,
        Stage::DecoderReady,
        Stage::PacerRunning,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Stage> {
        Self::ORDER.get(self.index() + 1).copied()
    }

    pub fn prev(self) -> Option<Stage> {
        self.index().checked_sub(1).map(|i| Self::ORDER[i])
    }
}

/// Arguments of the setup callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupParams {
    pub video_format: u32,
    pub width: u32,
    pub height: u32,
    pub redraw_rate: u32,
    pub dr_flags: u32,
}

impl SetupParams {
    pub fn h264(width: u32, height: u32, redraw_rate: u32) -> Self {
        Self {
            video_format: VIDEO_FORMAT_H264,
            width,
            height,
            redraw_rate,
            dr_flags: 0,
        }
    }
}

/// Capability bits advertised to the streaming collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const DIRECT_SUBMIT: Self = Self(0x1);

    pub const fn slices_per_frame(slices: u8) -> Self {
        Self((slices as u32) << 24)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn max_slices_per_frame(self) -> u8 {
        (self.0 >> 24) as u8
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Result of submitting one decode unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    Ok,
    /// The unit could not be decoded; the transport should request an IDR.
    NeedKeyframe,
}

/// Callback contract of a decoder/renderer as seen by the streaming side.
pub trait DecoderRenderer {
    fn capabilities(&self) -> Capabilities;
    fn setup(&mut self, params: &SetupParams) -> Result<(), SetupError>;
    fn submit_decode_unit(&mut self, unit: &DecodeUnit<'_>) -> DecodeStatus;
    fn cleanup(&mut self) -> Result<(), TeardownError>;
}

/// Maps a setup result onto the status code reported to the caller.
pub fn setup_status(result: &Result<(), SetupError>) -> u32 {
    match result {
        Ok(()) => VIDEO_INIT_OK,
        Err(err) => err.code(),
    }
}

/// Memory block bound to the decoder instance.
#[derive(Debug)]
pub(crate) struct DecoderMemory {
    block: MemBlock,
    frame_buf: FrameBuffer,
    info: DecoderInfo,
}

const fn round_up_mem_block(size: usize) -> usize {
    (size + MEM_BLOCK_ALIGN - 1) & !(MEM_BLOCK_ALIGN - 1)
}

/// Hardware H.264 decoder and presenter for one video session.
pub struct VideoDecoder {
    pub(crate) stage: Stage,
    pub(crate) config: VideoConfig,
    settings: PacerSettings,

    pub(crate) hw: Box<dyn AvcHardware>,
    pub(crate) renderer: Box<dyn Renderer>,
    platform: Arc<dyn Platform>,

    geometry: Option<Geometry>,
    init_info: Option<InitInfo>,
    pub(crate) fixup: Option<SpsFixup>,
    pub(crate) assembler: Option<Assembler>,
    pub(crate) texture: Option<FrameTexture>,
    decoder_memory: Option<DecoderMemory>,
    pub(crate) decoder: Option<DecoderHandle>,
    pacer: Option<FramePacer>,

    pub(crate) shared: Arc<PacerShared>,
    pub(crate) indicator: IndicatorStatus,
    pub(crate) stats: PipelineStats,
}

impl VideoDecoder {
    pub fn new(
        hw: Box<dyn AvcHardware>,
        renderer: Box<dyn Renderer>,
        platform: Arc<dyn Platform>,
        config: VideoConfig,
        settings: PacerSettings,
    ) -> Self {
        Self {
            stage: Stage::Uninitialized,
            config,
            settings,
            hw,
            renderer,
            platform,
            geometry: None,
            init_info: None,
            fixup: None,
            assembler: None,
            texture: None,
            decoder_memory: None,
            decoder: None,
            pacer: None,
            shared: Arc::new(PacerShared::default()),
            indicator: IndicatorStatus::default(),
            stats: PipelineStats::default(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage up to the running pacer has been acquired.
    pub fn is_initialized(&self) -> bool {
        self.stage == Stage::PacerRunning
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    /// Counters shared with the frame pacer.
    pub fn pacer_shared(&self) -> &Arc<PacerShared> {
        &self.shared
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Acquires every stage in order.
    ///
    /// On failure everything acquired so far is released again and the
    /// decoder is back at [`Stage::Uninitialized`].
    pub fn setup(&mut self, params: &SetupParams) -> Result<(), SetupError> {
        if self.stage != Stage::Uninitialized {
            return Err(SetupError::InvalidStage(self.stage));
        }

        info!(
            "Video setup: format {:#06X}, {}x{} @ {} Hz, flags {:#X}",
            params.video_format, params.width, params.height, params.redraw_rate, params.dr_flags
        );

        while let Some(next) = self.stage.next() {
            if let Err(err) = self.acquire(next, params) {
                error!("Video setup failed at {next:?}: {err} ({:#010X})", err.code());
                if let Err(teardown) = self.teardown() {
                    error!("Teardown after failed setup: {teardown}");
                }
                return Err(err);
            }

            debug!("Video stage {:?} -> {next:?}", self.stage);
            self.stage = next;
        }

        info!("Video setup complete");
        Ok(())
    }

    /// Releases every acquired stage, newest first.
    ///
    /// Tearing down an uninitialized decoder does nothing. A pacer that does
    /// not stop in time aborts the teardown with the decoder still at
    /// [`Stage::PacerRunning`].
    pub fn teardown(&mut self) -> Result<(), TeardownError> {
        while let Some(prev) = self.stage.prev() {
            self.release(self.stage)?;
            debug!("Video stage {:?} -> {prev:?}", self.stage);
            self.stage = prev;
        }

        Ok(())
    }

    fn acquire(&mut self, stage: Stage, params: &SetupParams) -> Result<(), SetupError> {
        match stage {
            Stage::Uninitialized => Ok(()),
            Stage::FormatReady => self.negotiate_format(params),
            Stage::FrameBufferReady => self.allocate_frame_buffer(),
            Stage::CodecLibraryReady => {
                let init = self.init_info.ok_or(SetupError::InvalidStage(self.stage))?;
                self.hw
                    .init_library(&init)
                    .map_err(SetupError::InitLibrary)?;
                info!(
                    "Codec library initialized for {}x{}, {} reference frames",
                    init.horizontal, init.vertical, init.num_ref_frames
                );
                Ok(())
            }
            Stage::DecoderMemoryReady => self.allocate_decoder_memory(),
            Stage::DecoderReady => {
                let memory = self
                    .decoder_memory
                    .as_ref()
                    .ok_or(SetupError::InvalidStage(self.stage))?;
                debug!("Decoder frame buffer base {:#010X}", memory.frame_buf.base);
                let decoder = self
                    .hw
                    .create_decoder(memory.frame_buf, &memory.info)
                    .map_err(SetupError::CreateDecoder)?;
                self.decoder = Some(decoder);
                Ok(())
            }
            Stage::PacerRunning => {
                let pacer = FramePacer::start(
                    Arc::clone(&self.platform),
                    Arc::clone(&self.shared),
                    &self.config,
                    &self.settings,
                )
                .map_err(SetupError::CreatePacerThread)?;
                self.pacer = Some(pacer);
                Ok(())
            }
        }
    }

    fn negotiate_format(&mut self, params: &SetupParams) -> Result<(), SetupError> {
        if params.video_format & VIDEO_FORMAT_MASK_H264 == 0 {
            return Err(SetupError::UnsupportedFormat(params.video_format));
        }

        let geometry = Geometry::negotiate(params.width, params.height)?;
        if geometry.vertical != params.height || geometry.horizontal != params.width {
            debug!(
                "Decoder geometry {}x{} for a {}x{} stream",
                geometry.horizontal, geometry.vertical, params.width, params.height
            );
        }

        if params.redraw_rate != self.config.fps {
            warn!(
                "Redraw rate {} Hz differs from the configured {} fps; pacing to {} fps",
                params.redraw_rate, self.config.fps, self.config.fps
            );
        }

        self.fixup = Some(SpsFixup::new(params.width, params.height));
        self.init_info = Some(geometry.init_info());
        self.geometry = Some(geometry);
        Ok(())
    }

    fn allocate_frame_buffer(&mut self) -> Result<(), SetupError> {
        let assembler = Assembler::with_capacity(DECODER_BUFFER_SIZE)
            .map_err(|_| SetupError::NoMemory("elementary stream buffer"))?;
        let texture = self
            .renderer
            .create_texture(SCREEN_WIDTH, SCREEN_HEIGHT, PixelFormat::Abgr8888)
            .ok_or(SetupError::NoMemory("frame texture"))?;

        debug!(
            "Frame buffer ready: {} byte stream buffer, {}x{} texture",
            assembler.capacity(),
            texture.width(),
            texture.height()
        );
        self.assembler = Some(assembler);
        self.texture = Some(texture);
        Ok(())
    }

    fn allocate_decoder_memory(&mut self) -> Result<(), SetupError> {
        let init = self.init_info.ok_or(SetupError::InvalidStage(self.stage))?;
        let info = DecoderInfo::from(&init);

        let required = self
            .hw
            .query_decoder_mem_size(&info)
            .map_err(SetupError::QueryDecoderMemSize)?;
        let size = round_up_mem_block(required);
        debug!("Allocating {size:#X} bytes of decoder memory ({required:#X} required)");

        let block = self
            .hw
            .alloc_mem_block(DECODER_MEM_BLOCK_NAME, size)
            .map_err(|source| SetupError::AllocMemory { size, source })?;

        let base = match self.hw.mem_block_base(&block) {
            Ok(base) => base,
            Err(err) => {
                self.hw.free_mem_block(block);
                return Err(SetupError::GetMemBase(err));
            }
        };

        self.decoder_memory = Some(DecoderMemory {
            block,
            frame_buf: FrameBuffer { base, size },
            info,
        });
        Ok(())
    }

    /// Releases what `stage` acquired.
    fn release(&mut self, stage: Stage) -> Result<(), TeardownError> {
        match stage {
            Stage::Uninitialized => {}
            Stage::FormatReady => {
                self.fixup = None;
                self.init_info = None;
                self.geometry = None;
            }
            Stage::FrameBufferReady => {
                if let Some(texture) = self.texture.take() {
                    self.renderer.free_texture(texture);
                }
                self.assembler = None;
            }
            Stage::CodecLibraryReady => self.hw.term_library(),
            Stage::DecoderMemoryReady => {
                if let Some(memory) = self.decoder_memory.take() {
                    self.hw.free_mem_block(memory.block);
                }
            }
            Stage::DecoderReady => {
                if let Some(decoder) = self.decoder.take() {
                    self.hw.delete_decoder(decoder);
                }
            }
            Stage::PacerRunning => {
                if let Some(pacer) = self.pacer.as_mut() {
                    pacer.stop(self.settings.shutdown_timeout)?;
                }
                self.pacer = None;
            }
        }

        Ok(())
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            error!("Video decoder dropped with a live pacer: {err}");
        }
    }
}

impl DecoderRenderer for VideoDecoder {
    fn capabilities(&self) -> Capabilities {
        Capabilities::slices_per_frame(2) | Capabilities::DIRECT_SUBMIT
    }

    fn setup(&mut self, params: &SetupParams) -> Result<(), SetupError> {
        VideoDecoder::setup(self, params)
    }

    fn submit_decode_unit(&mut self, unit: &DecodeUnit<'_>) -> DecodeStatus {
        VideoDecoder::submit_decode_unit(self, unit)
    }

    fn cleanup(&mut self) -> Result<(), TeardownError> {
        info!("Video cleanup from {:?}", self.stage);
        self.teardown()
    }
}
