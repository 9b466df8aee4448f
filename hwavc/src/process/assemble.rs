//! Decode-unit reassembly.
//!
//! Linearizes the fragment chain of a [`DecodeUnit`] into one contiguous
//! elementary stream buffer. The buffer is allocated once at its full
//! capacity and overwritten by every call.

use std::collections::TryReserveError;

use log::trace;

use crate::structs::decode_unit::{DecodeUnit, FragmentKind};
use crate::structs::sps::SpsFixup;
use crate::utils::errors::AssembleError;

/// Largest elementary stream unit the decoder is fed.
pub const DECODER_BUFFER_SIZE: usize = 92 * 1024;

#[derive(Debug)]
pub struct Assembler {
    buffer: Vec<u8>,
    capacity: usize,
}

impl Assembler {
    /// Reserves the whole buffer up front, reporting allocation failure.
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(capacity)?;

        Ok(Self { buffer, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written by the last successful or failed assembly.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Copies every fragment of `unit` into the buffer in order.
    ///
    /// Format-parameter fragments are replaced by their fixed-up form and the
    /// write cursor advances by the rewritten length. Nothing is ever written
    /// past [`capacity`](Self::capacity).
    pub fn assemble(
        &mut self,
        unit: &DecodeUnit<'_>,
        fixup: &mut SpsFixup,
    ) -> Result<&[u8], AssembleError> {
        self.buffer.clear();

        if unit.full_length > self.capacity {
            return Err(AssembleError::UnitTooLarge {
                length: unit.full_length,
                capacity: self.capacity,
            });
        }

        for fragment in &unit.fragments {
            match fragment.kind {
                FragmentKind::Ordinary => self.append(fragment.data)?,
                FragmentKind::FormatParameter => {
                    let fixed = fixup.fix(fragment.data).map_err(AssembleError::Fixup)?;
                    trace!(
                        "Frame {}: parameter set {} -> {} bytes",
                        unit.frame_number,
                        fragment.len(),
                        fixed.len()
                    );
                    self.append(fixed)?;
                }
            }
        }

        Ok(&self.buffer)
    }

    fn append(&mut self, data: &[u8]) -> Result<(), AssembleError> {
        if self.buffer.len() + data.len() > self.capacity {
            return Err(AssembleError::BufferOverflow {
                needed: data.len(),
                capacity: self.capacity,
            });
        }

        self.buffer.extend_from_slice(data);
        Ok(())
    }
}
