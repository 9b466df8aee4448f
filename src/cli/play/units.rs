//! Groups Annex B NAL units into per-picture decode units.

use anyhow::Result;
use hwavc::structs::decode_unit::{DecodeUnit, Fragment, FragmentKind, FrameType};
use hwavc::structs::nal::{self, NAL_TYPE_IDR, NAL_TYPE_SPS, NalHeader};

/// A decode unit that owns its NAL units.
#[derive(Debug, Clone)]
pub struct OwnedUnit {
    pub frame_number: u32,
    pub frame_type: FrameType,
    nals: Vec<(Vec<u8>, FragmentKind)>,
}

impl OwnedUnit {
    pub fn len(&self) -> usize {
        self.nals.iter().map(|(data, _)| data.len()).sum()
    }

    pub fn nal_count(&self) -> usize {
        self.nals.len()
    }

    pub fn as_decode_unit(&self) -> DecodeUnit<'_> {
        let fragments = self
            .nals
            .iter()
            .map(|(data, kind)| Fragment {
                data,
                kind: *kind,
            })
            .collect();
        DecodeUnit::new(self.frame_number, self.frame_type, fragments)
    }
}

/// Collects NAL units until the next access unit boundary.
#[derive(Debug, Default)]
pub struct UnitGrouper {
    next_frame_number: u32,
    nals: Vec<(Vec<u8>, FragmentKind)>,
    has_vcl: bool,
    has_idr: bool,
}

impl UnitGrouper {
    /// Adds one NAL unit (with start code) and returns the unit it completed.
    pub fn push(&mut self, nal: &[u8]) -> Result<Option<OwnedUnit>> {
        let (header, payload) = nal::split_nal(nal)?;

        let completed = if self.has_vcl && starts_access_unit(header, payload) {
            self.flush()
        } else {
            None
        };

        let kind = if header.nal_unit_type == NAL_TYPE_SPS {
            FragmentKind::FormatParameter
        } else {
            FragmentKind::Ordinary
        };

        self.has_vcl |= header.is_vcl();
        self.has_idr |= header.nal_unit_type == NAL_TYPE_IDR;
        self.nals.push((nal.to_vec(), kind));

        Ok(completed)
    }

    /// Returns whatever is still buffered at end of stream.
    pub fn finish(&mut self) -> Option<OwnedUnit> {
        self.flush()
    }

    fn flush(&mut self) -> Option<OwnedUnit> {
        if self.nals.is_empty() {
            return None;
        }

        let unit = OwnedUnit {
            frame_number: self.next_frame_number,
            frame_type: if self.has_idr {
                FrameType::Idr
            } else {
                FrameType::PFrame
            },
            nals: std::mem::take(&mut self.nals),
        };

        self.next_frame_number = self.next_frame_number.wrapping_add(1);
        self.has_vcl = false;
        self.has_idr = false;

        Some(unit)
    }
}

/// Whether a NAL unit following picture data opens a new access unit.
fn starts_access_unit(header: NalHeader, payload: &[u8]) -> bool {
    match header.nal_unit_type {
        // SEI, SPS, PPS, access unit delimiter and the reserved 14..=18
        6..=9 | 14..=18 => true,
        // first_mb_in_slice is ue(v); a leading 1 bit encodes zero
        1..=5 => payload.first().is_some_and(|&b| b & 0x80 != 0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1F];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xEE, 0x3C, 0x80];
    const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84];
    const P_FIRST: &[u8] = &[0, 0, 1, 0x41, 0x9A, 0x02];
    const P_SECOND_SLICE: &[u8] = &[0, 0, 1, 0x41, 0x42, 0x02];

    fn group(nals: &[&[u8]]) -> Vec<OwnedUnit> {
        let mut grouper = UnitGrouper::default();
        let mut units: Vec<_> = nals
            .iter()
            .filter_map(|nal| grouper.push(nal).unwrap())
            .collect();
        units.extend(grouper.finish());
        units
    }

    #[test]
    fn parameter_sets_open_the_next_unit() {
        let units = group(&[SPS, PPS, IDR, P_FIRST, SPS, PPS, IDR]);
        assert_eq!(units.len(), 3);

        assert_eq!(units[0].frame_type, FrameType::Idr);
        assert_eq!(units[0].nal_count(), 3);
        assert!(units[0].as_decode_unit().has_format_parameters());

        assert_eq!(units[1].frame_type, FrameType::PFrame);
        assert!(!units[1].as_decode_unit().has_format_parameters());

        assert_eq!(
            units.iter().map(|u| u.frame_number).collect::<Vec<_>>(),
            [0, 1, 2]
        );
    }

    #[test]
    fn later_slices_stay_in_their_picture() {
        let units = group(&[P_FIRST, P_SECOND_SLICE, P_FIRST]);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].nal_count(), 2);
        assert_eq!(units[0].len(), P_FIRST.len() + P_SECOND_SLICE.len());
    }

    #[test]
    fn declared_length_matches_fragments() {
        let units = group(&[SPS, PPS, IDR]);
        let unit = units[0].as_decode_unit();
        assert_eq!(unit.full_length, SPS.len() + PPS.len() + IDR.len());
        assert_eq!(unit.fragments[0].kind, FragmentKind::FormatParameter);
        assert_eq!(unit.fragments[1].kind, FragmentKind::Ordinary);
    }

    #[test]
    fn malformed_nal_is_rejected() {
        let mut grouper = UnitGrouper::default();
        assert!(grouper.push(&[0x65, 0x88]).is_err());
        assert!(grouper.finish().is_none());
    }
}
