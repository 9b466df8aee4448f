//! NAL unit framing for H.264 Annex B byte streams.
//!
//! Start code detection, the one-byte NAL header, and conversion between the
//! escaped payload (EBSP) and the raw byte sequence payload (RBSP).

use anyhow::{Result, bail};

use crate::utils::errors::SpsError;

pub const NAL_TYPE_SLICE: u8 = 1;
pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SEI: u8 = 6;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;
pub const NAL_TYPE_AUD: u8 = 9;

/// Four-byte Annex B start code emitted in front of rewritten NAL units.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

const EMULATION_PREVENTION_BYTE: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub nal_ref_idc: u8,
    pub nal_unit_type: u8,
}

impl NalHeader {
    pub fn from_byte(byte: u8) -> Result<Self> {
        if byte & 0x80 != 0 {
            bail!(SpsError::ForbiddenZeroBit);
        }

        Ok(Self {
            nal_ref_idc: (byte >> 5) & 0x3,
            nal_unit_type: byte & 0x1F,
        })
    }

    pub fn to_byte(self) -> u8 {
        ((self.nal_ref_idc & 0x3) << 5) | (self.nal_unit_type & 0x1F)
    }

    /// Whether this unit carries coded picture data.
    pub fn is_vcl(self) -> bool {
        (NAL_TYPE_SLICE..=NAL_TYPE_IDR).contains(&self.nal_unit_type)
    }
}

/// Length of the start code at the front of `data`, if any.
pub fn start_code_len(data: &[u8]) -> Option<usize> {
    match data {
        [0x00, 0x00, 0x00, 0x01, ..] => Some(4),
        [0x00, 0x00, 0x01, ..] => Some(3),
        _ => None,
    }
}

/// Splits a NAL unit (with start code) into its header and escaped payload.
pub fn split_nal(nal: &[u8]) -> Result<(NalHeader, &[u8])> {
    let Some(prefix) = start_code_len(nal) else {
        bail!(SpsError::MissingStartCode);
    };

    let Some((&header, payload)) = nal[prefix..].split_first() else {
        bail!(SpsError::MissingStartCode);
    };

    Ok((NalHeader::from_byte(header)?, payload))
}

/// Removes emulation prevention bytes.
pub fn ebsp_to_rbsp(ebsp: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(ebsp.len());
    let mut zeros = 0;

    for &byte in ebsp {
        if zeros >= 2 && byte == EMULATION_PREVENTION_BYTE {
            zeros = 0;
            continue;
        }

        rbsp.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }

    rbsp
}

/// Appends `rbsp` to `out`, inserting emulation prevention bytes.
pub fn rbsp_to_ebsp(rbsp: &[u8], out: &mut Vec<u8>) {
    let mut zeros = 0;

    for &byte in rbsp {
        if zeros >= 2 && byte <= EMULATION_PREVENTION_BYTE {
            out.push(EMULATION_PREVENTION_BYTE);
            zeros = 0;
        }

        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
}

/// Iterator over the NAL units of an Annex B byte stream.
///
/// Each item keeps its leading start code. Bytes before the first start code
/// are skipped.
#[derive(Debug, Clone)]
pub struct AnnexBUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AnnexBUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let pos = find_start_code(data, 0).unwrap_or(data.len());
        Self { data, pos }
    }
}

impl<'a> Iterator for AnnexBUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        let payload = start + start_code_len(&self.data[start..]).unwrap_or(0);
        let end = find_start_code(self.data, payload).unwrap_or(self.data.len());
        self.pos = end;

        Some(&self.data[start..end])
    }
}

/// Offset of the next start code at or after `from`, including the leading
/// zero of a four-byte code.
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some(if i > from && data[i - 1] == 0 { i - 1 } else { i });
        }
        i += 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulation_prevention_is_removed_and_restored() {
        let ebsp = [0x64, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0xFF];
        let rbsp = ebsp_to_rbsp(&ebsp);
        assert_eq!(rbsp, vec![0x64, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xFF]);

        let mut escaped = Vec::new();
        rbsp_to_ebsp(&rbsp, &mut escaped);
        assert_eq!(escaped, ebsp);
    }

    #[test]
    fn escaping_leaves_large_bytes_alone() {
        let mut out = Vec::new();
        rbsp_to_ebsp(&[0x00, 0x00, 0x04, 0x00, 0x00], &mut out);
        assert_eq!(out, vec![0x00, 0x00, 0x04, 0x00, 0x00]);
    }

    #[test]
    fn annex_b_units_split_on_both_start_code_lengths() {
        let stream = [
            0xAA, // garbage before the first unit
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, //
            0x00, 0x00, 0x01, 0x68, 0xCE, //
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x80,
        ];

        let units: Vec<&[u8]> = AnnexBUnits::new(&stream).collect();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42]);
        assert_eq!(units[1], &[0x00, 0x00, 0x01, 0x68, 0xCE]);
        assert_eq!(units[2], &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x80]);

        let (header, payload) = split_nal(units[2]).unwrap();
        assert_eq!(header.nal_unit_type, NAL_TYPE_IDR);
        assert_eq!(header.nal_ref_idc, 3);
        assert!(header.is_vcl());
        assert_eq!(payload, &[0x88, 0x80]);
    }

    #[test]
    fn header_rejects_forbidden_bit() {
        assert!(NalHeader::from_byte(0xE7).is_err());
        assert_eq!(NalHeader::from_byte(0x67).unwrap().to_byte(), 0x67);
    }
}
