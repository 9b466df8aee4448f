//! Decode units as delivered by the streaming transport.
//!
//! A unit is an ordered chain of fragments plus the total length the
//! transport declares for it. Fragments borrow the transport's buffers; the
//! assembler copies them out before decode.

/// How a fragment must be treated during assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// Copied verbatim.
    Ordinary,
    /// Sequence parameter set, passed through the bitstream fix-up.
    FormatParameter,
}

#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    pub data: &'a [u8],
    pub kind: FragmentKind,
}

impl<'a> Fragment<'a> {
    pub fn ordinary(data: &'a [u8]) -> Self {
        Self {
            data,
            kind: FragmentKind::Ordinary,
        }
    }

    pub fn format_parameter(data: &'a [u8]) -> Self {
        Self {
            data,
            kind: FragmentKind::FormatParameter,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Picture that depends on earlier pictures.
    PFrame,
    /// Synchronization point carrying parameter sets and an IDR picture.
    Idr,
}

#[derive(Debug, Clone)]
pub struct DecodeUnit<'a> {
    pub frame_number: u32,
    pub frame_type: FrameType,
    /// Total payload length declared by the transport.
    pub full_length: usize,
    pub fragments: Vec<Fragment<'a>>,
}

impl<'a> DecodeUnit<'a> {
    /// Builds a unit whose declared length is the sum of its fragments.
    pub fn new(frame_number: u32, frame_type: FrameType, fragments: Vec<Fragment<'a>>) -> Self {
        let full_length = fragments.iter().map(Fragment::len).sum();
        Self {
            frame_number,
            frame_type,
            full_length,
            fragments,
        }
    }

    pub fn has_format_parameters(&self) -> bool {
        self.fragments
            .iter()
            .any(|f| f.kind == FragmentKind::FormatParameter)
    }
}
