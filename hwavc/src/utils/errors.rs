use std::time::Duration;

use crate::hw::HwError;
use crate::process::lifecycle::Stage;

/// Status reported when video setup completes.
pub const VIDEO_INIT_OK: u32 = 0;
pub const VIDEO_ERROR_NO_MEM: u32 = 0x8001_0001;
pub const VIDEO_ERROR_INIT_LIB: u32 = 0x8001_0002;
pub const VIDEO_ERROR_QUERY_DEC_MEMSIZE: u32 = 0x8001_0003;
pub const VIDEO_ERROR_ALLOC_MEM: u32 = 0x8001_0004;
pub const VIDEO_ERROR_GET_MEMBASE: u32 = 0x8001_0005;
pub const VIDEO_ERROR_CREATE_DEC: u32 = 0x8001_0006;
pub const VIDEO_ERROR_CREATE_PACER_THREAD: u32 = 0x8001_0007;
pub const VIDEO_ERROR_UNSUPPORTED_FORMAT: u32 = 0x8001_0008;
pub const VIDEO_ERROR_INVALID_STAGE: u32 = 0x8001_0009;

#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("Unsupported video format {0:#06X}, only H.264 can be decoded")]
    UnsupportedFormat(u32),

    #[error("Unsupported stream geometry {width}x{height}")]
    UnsupportedGeometry { width: u32, height: u32 },

    #[error("Not enough memory for the {0}")]
    NoMemory(&'static str),

    #[error("Codec library initialization failed: {0}")]
    InitLibrary(HwError),

    #[error("Decoder memory size query failed: {0}")]
    QueryDecoderMemSize(HwError),

    #[error("Decoder memory block allocation of {size} bytes failed: {source}")]
    AllocMemory { size: usize, source: HwError },

    #[error("Decoder memory block base lookup failed: {0}")]
    GetMemBase(HwError),

    #[error("Decoder creation failed: {0}")]
    CreateDecoder(HwError),

    #[error("Frame pacer could not be started: {0}")]
    CreatePacerThread(std::io::Error),

    #[error("Video setup requested while already at stage {0:?}")]
    InvalidStage(Stage),
}

impl SetupError {
    /// Status code reported to the streaming collaborator.
    pub fn code(&self) -> u32 {
        match self {
            SetupError::UnsupportedFormat(_) | SetupError::UnsupportedGeometry { .. } => {
                VIDEO_ERROR_UNSUPPORTED_FORMAT
            }
            SetupError::NoMemory(_) => VIDEO_ERROR_NO_MEM,
            SetupError::InitLibrary(_) => VIDEO_ERROR_INIT_LIB,
            SetupError::QueryDecoderMemSize(_) => VIDEO_ERROR_QUERY_DEC_MEMSIZE,
            SetupError::AllocMemory { .. } => VIDEO_ERROR_ALLOC_MEM,
            SetupError::GetMemBase(_) => VIDEO_ERROR_GET_MEMBASE,
            SetupError::CreateDecoder(_) => VIDEO_ERROR_CREATE_DEC,
            SetupError::CreatePacerThread(_) => VIDEO_ERROR_CREATE_PACER_THREAD,
            SetupError::InvalidStage(_) => VIDEO_ERROR_INVALID_STAGE,
        }
    }

    /// The stage whose acquisition failed.
    pub fn stage(&self) -> Stage {
        match self {
            SetupError::UnsupportedFormat(_) | SetupError::UnsupportedGeometry { .. } => {
                Stage::FormatReady
            }
            SetupError::NoMemory(_) => Stage::FrameBufferReady,
            SetupError::InitLibrary(_) => Stage::CodecLibraryReady,
            SetupError::QueryDecoderMemSize(_)
            | SetupError::AllocMemory { .. }
            | SetupError::GetMemBase(_) => Stage::DecoderMemoryReady,
            SetupError::CreateDecoder(_) => Stage::DecoderReady,
            SetupError::CreatePacerThread(_) => Stage::PacerRunning,
            SetupError::InvalidStage(stage) => *stage,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TeardownError {
    #[error("Frame pacer did not stop within {0:?}")]
    PacerShutdownTimeout(Duration),
}

#[derive(thiserror::Error, Debug)]
pub enum AssembleError {
    #[error("Decode unit too large: {length} > {capacity} bytes")]
    UnitTooLarge { length: usize, capacity: usize },

    #[error("Decode unit overflowed the {capacity} byte buffer while appending {needed} bytes")]
    BufferOverflow { needed: usize, capacity: usize },

    #[error("Parameter set fix-up failed: {0:#}")]
    Fixup(anyhow::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum SpsError {
    #[error("Parameter set fragment has no Annex B start code")]
    MissingStartCode,

    #[error("forbidden_zero_bit must be 0")]
    ForbiddenZeroBit,

    #[error("Expected a sequence parameter set NAL unit, got type {0}")]
    NotSps(u8),

    #[error("seq_parameter_set_id must be <= 31. Read {0}")]
    InvalidSpsId(u32),

    #[error("chroma_format_idc must be <= 3. Read {0}")]
    InvalidChromaFormat(u32),

    #[error("pic_order_cnt_type must be <= 2. Read {0}")]
    InvalidPocType(u32),

    #[error("num_ref_frames_in_pic_order_cnt_cycle must be <= 255. Read {0}")]
    PocCycleTooLong(u32),

    #[error("cpb_cnt_minus1 must be <= 31. Read {0}")]
    CpbCountTooLarge(u32),

    #[error("delta_scale must be in -128..=127. Read {0}")]
    DeltaScaleOutOfRange(i32),

    #[error("Picture of {width_in_mbs}x{height_in_map_units} macroblocks exceeds every level limit")]
    PictureTooLarge {
        width_in_mbs: u32,
        height_in_map_units: u32,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error("Hardware decoder rejected the unit: {0}")]
    Rejected(HwError),

    #[error("Decoder returned {0} pictures for a single unit")]
    TooManyPictures(u32),
}
