//! H.264 sequence parameter set.
//!
//! ## Structure
//!
//! `seq_parameter_set_rbsp()` from ITU-T H.264 §7.3.2.1.1 including the
//! high-profile chroma and scaling list extension, all three picture order
//! count types, frame cropping, and the complete VUI (§E.1.1) with HRD
//! parameters.
//!
//! ## Fix-up
//!
//! [`SpsFixup`] rewrites the parameter set the encoder sends before it
//! reaches the hardware decoder. The stock encoder leaves out bitstream
//! restriction, so the decoder falls back to a deep reorder buffer and adds
//! several frames of latency. The fix-up declares zero reordering and a
//! decoded picture buffer no larger than the reference frame count, and pins
//! `level_idc` for the two common streaming geometries.

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::structs::nal::{self, NAL_TYPE_SPS, NalHeader, START_CODE};
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::SpsError;

/// `aspect_ratio_idc` value that signals an explicit sample aspect ratio.
pub const EXTENDED_SAR: u8 = 255;

/// Profiles that carry the chroma format and scaling list syntax.
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Range of `delta_scale` in a transmitted scaling list.
const DELTA_SCALE_RANGE: std::ops::RangeInclusive<i32> = -128..=127;

/// Largest picture dimension in macroblocks allowed by any level,
/// `sqrt(8 * MaxFS)` for level 6.2.
pub const MAX_PIC_SIZE_IN_MBS: u32 = 1055;

/// `level_idc` for 1280x720 streams: level 3.2.
pub const LEVEL_IDC_720P: u8 = 32;
/// `level_idc` for 1920x1080 streams: level 4.2.
pub const LEVEL_IDC_1080P: u8 = 42;

/// One transmitted scaling list, stored as the `delta_scale` values read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalingList {
    pub deltas: Vec<i32>,
}

impl ScalingList {
    fn read(reader: &mut BsIoSliceReader, size: usize) -> Result<Self> {
        let mut deltas = Vec::new();
        let mut last_scale = 8;
        let mut next_scale = 8;

        for _ in 0..size {
            if next_scale != 0 {
                let delta = reader.get_se()?;
                if !DELTA_SCALE_RANGE.contains(&delta) {
                    bail!(SpsError::DeltaScaleOutOfRange(delta));
                }
                deltas.push(delta);
                next_scale = (last_scale + delta + 256).rem_euclid(256);
            }
            if next_scale != 0 {
                last_scale = next_scale;
            }
        }

        Ok(Self { deltas })
    }

    fn write(&self, writer: &mut BitstreamIoWriter) -> Result<()> {
        for &delta in &self.deltas {
            writer.put_se(delta)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpbSpec {
    pub bit_rate_value_minus1: u32,
    pub cpb_size_value_minus1: u32,
    pub cbr_flag: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HrdParameters {
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,
    pub cpb: Vec<CpbSpec>,
    pub initial_cpb_removal_delay_length_minus1: u8,
    pub cpb_removal_delay_length_minus1: u8,
    pub dpb_output_delay_length_minus1: u8,
    pub time_offset_length: u8,
}

impl HrdParameters {
    fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let cpb_cnt_minus1 = reader.get_ue()?;
        if cpb_cnt_minus1 > 31 {
            bail!(SpsError::CpbCountTooLarge(cpb_cnt_minus1));
        }

        let bit_rate_scale = reader.get_n(4)?;
        let cpb_size_scale = reader.get_n(4)?;

        let mut cpb = Vec::with_capacity(cpb_cnt_minus1 as usize + 1);
        for _ in 0..=cpb_cnt_minus1 {
            cpb.push(CpbSpec {
                bit_rate_value_minus1: reader.get_ue()?,
                cpb_size_value_minus1: reader.get_ue()?,
                cbr_flag: reader.get()?,
            });
        }

        Ok(Self {
            bit_rate_scale,
            cpb_size_scale,
            cpb,
            initial_cpb_removal_delay_length_minus1: reader.get_n(5)?,
            cpb_removal_delay_length_minus1: reader.get_n(5)?,
            dpb_output_delay_length_minus1: reader.get_n(5)?,
            time_offset_length: reader.get_n(5)?,
        })
    }

    fn write(&self, writer: &mut BitstreamIoWriter) -> Result<()> {
        writer.put_ue(self.cpb.len().saturating_sub(1) as u32)?;
        writer.put_n(4, self.bit_rate_scale)?;
        writer.put_n(4, self.cpb_size_scale)?;

        for spec in &self.cpb {
            writer.put_ue(spec.bit_rate_value_minus1)?;
            writer.put_ue(spec.cpb_size_value_minus1)?;
            writer.put(spec.cbr_flag)?;
        }

        writer.put_n(5, self.initial_cpb_removal_delay_length_minus1)?;
        writer.put_n(5, self.cpb_removal_delay_length_minus1)?;
        writer.put_n(5, self.dpb_output_delay_length_minus1)?;
        writer.put_n(5, self.time_offset_length)?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AspectRatio {
    pub aspect_ratio_idc: u8,
    pub sar_width: u16,
    pub sar_height: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColourDescription {
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoSignalType {
    pub video_format: u8,
    pub video_full_range_flag: bool,
    pub colour_description: Option<ColourDescription>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub fixed_frame_rate_flag: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitstreamRestriction {
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_mb_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
    pub max_num_reorder_frames: u32,
    pub max_dec_frame_buffering: u32,
}

/// `vui_parameters()`; absent optional groups are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vui {
    pub aspect_ratio: Option<AspectRatio>,
    pub overscan_appropriate: Option<bool>,
    pub video_signal_type: Option<VideoSignalType>,
    pub chroma_sample_loc_type: Option<(u32, u32)>,
    pub timing_info: Option<TimingInfo>,
    pub nal_hrd: Option<HrdParameters>,
    pub vcl_hrd: Option<HrdParameters>,
    pub low_delay_hrd_flag: bool,
    pub pic_struct_present_flag: bool,
    pub bitstream_restriction: Option<BitstreamRestriction>,
}

impl Vui {
    fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let mut vui = Self::default();

        if reader.get()? {
            let aspect_ratio_idc = reader.get_n(8)?;
            let (sar_width, sar_height) = if aspect_ratio_idc == EXTENDED_SAR {
                (reader.get_n(16)?, reader.get_n(16)?)
            } else {
                (0, 0)
            };
            vui.aspect_ratio = Some(AspectRatio {
                aspect_ratio_idc,
                sar_width,
                sar_height,
            });
        }

        if reader.get()? {
            vui.overscan_appropriate = Some(reader.get()?);
        }

        if reader.get()? {
            let video_format = reader.get_n(3)?;
            let video_full_range_flag = reader.get()?;
            let colour_description = if reader.get()? {
                Some(ColourDescription {
                    colour_primaries: reader.get_n(8)?,
                    transfer_characteristics: reader.get_n(8)?,
                    matrix_coefficients: reader.get_n(8)?,
                })
            } else {
                None
            };
            vui.video_signal_type = Some(VideoSignalType {
                video_format,
                video_full_range_flag,
                colour_description,
            });
        }

        if reader.get()? {
            vui.chroma_sample_loc_type = Some((reader.get_ue()?, reader.get_ue()?));
        }

        if reader.get()? {
            vui.timing_info = Some(TimingInfo {
                num_units_in_tick: reader.get_n(32)?,
                time_scale: reader.get_n(32)?,
                fixed_frame_rate_flag: reader.get()?,
            });
        }

        if reader.get()? {
            vui.nal_hrd = Some(HrdParameters::read(reader)?);
        }
        if reader.get()? {
            vui.vcl_hrd = Some(HrdParameters::read(reader)?);
        }
        if vui.nal_hrd.is_some() || vui.vcl_hrd.is_some() {
            vui.low_delay_hrd_flag = reader.get()?;
        }

        vui.pic_struct_present_flag = reader.get()?;

        if reader.get()? {
            vui.bitstream_restriction = Some(BitstreamRestriction {
                motion_vectors_over_pic_boundaries_flag: reader.get()?,
                max_bytes_per_pic_denom: reader.get_ue()?,
                max_bits_per_mb_denom: reader.get_ue()?,
                log2_max_mv_length_horizontal: reader.get_ue()?,
                log2_max_mv_length_vertical: reader.get_ue()?,
                max_num_reorder_frames: reader.get_ue()?,
                max_dec_frame_buffering: reader.get_ue()?,
            });
        }

        Ok(vui)
    }

    fn write(&self, writer: &mut BitstreamIoWriter) -> Result<()> {
        writer.put(self.aspect_ratio.is_some())?;
        if let Some(ar) = &self.aspect_ratio {
            writer.put_n(8, ar.aspect_ratio_idc)?;
            if ar.aspect_ratio_idc == EXTENDED_SAR {
                writer.put_n(16, ar.sar_width)?;
                writer.put_n(16, ar.sar_height)?;
            }
        }

        writer.put(self.overscan_appropriate.is_some())?;
        if let Some(overscan) = self.overscan_appropriate {
            writer.put(overscan)?;
        }

        writer.put(self.video_signal_type.is_some())?;
        if let Some(signal) = &self.video_signal_type {
            writer.put_n(3, signal.video_format)?;
            writer.put(signal.video_full_range_flag)?;
            writer.put(signal.colour_description.is_some())?;
            if let Some(colour) = &signal.colour_description {
                writer.put_n(8, colour.colour_primaries)?;
                writer.put_n(8, colour.transfer_characteristics)?;
                writer.put_n(8, colour.matrix_coefficients)?;
            }
        }

        writer.put(self.chroma_sample_loc_type.is_some())?;
        if let Some((top, bottom)) = self.chroma_sample_loc_type {
            writer.put_ue(top)?;
            writer.put_ue(bottom)?;
        }

        writer.put(self.timing_info.is_some())?;
        if let Some(timing) = &self.timing_info {
            writer.put_n(32, timing.num_units_in_tick)?;
            writer.put_n(32, timing.time_scale)?;
            writer.put(timing.fixed_frame_rate_flag)?;
        }

        writer.put(self.nal_hrd.is_some())?;
        if let Some(hrd) = &self.nal_hrd {
            hrd.write(writer)?;
        }
        writer.put(self.vcl_hrd.is_some())?;
        if let Some(hrd) = &self.vcl_hrd {
            hrd.write(writer)?;
        }
        if self.nal_hrd.is_some() || self.vcl_hrd.is_some() {
            writer.put(self.low_delay_hrd_flag)?;
        }

        writer.put(self.pic_struct_present_flag)?;

        writer.put(self.bitstream_restriction.is_some())?;
        if let Some(br) = &self.bitstream_restriction {
            writer.put(br.motion_vectors_over_pic_boundaries_flag)?;
            writer.put_ue(br.max_bytes_per_pic_denom)?;
            writer.put_ue(br.max_bits_per_mb_denom)?;
            writer.put_ue(br.log2_max_mv_length_horizontal)?;
            writer.put_ue(br.log2_max_mv_length_vertical)?;
            writer.put_ue(br.max_num_reorder_frames)?;
            writer.put_ue(br.max_dec_frame_buffering)?;
        }

        Ok(())
    }
}

/// Picture order count syntax, selected by `pic_order_cnt_type`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PicOrderCnt {
    Type0 {
        log2_max_pic_order_cnt_lsb_minus4: u32,
    },
    Type1 {
        delta_pic_order_always_zero_flag: bool,
        offset_for_non_ref_pic: i32,
        offset_for_top_to_bottom_field: i32,
        offset_for_ref_frame: Vec<i32>,
    },
    #[default]
    Type2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCropping {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

/// Chroma format and scaling syntax present in high profiles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighProfileExt {
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma_minus8: u32,
    pub bit_depth_chroma_minus8: u32,
    pub qpprime_y_zero_transform_bypass_flag: bool,
    /// Present when `seq_scaling_matrix_present_flag` is set; one entry per
    /// list, `None` where `seq_scaling_list_present_flag` is clear.
    pub scaling_lists: Option<Vec<Option<ScalingList>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceParameterSet {
    pub profile_idc: u8,
    /// `constraint_set0_flag` in the high bit through the two reserved bits.
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u32,
    pub high_profile: Option<HighProfileExt>,
    pub log2_max_frame_num_minus4: u32,
    pub pic_order_cnt: PicOrderCnt,
    pub max_num_ref_frames: u32,
    pub gaps_in_frame_num_value_allowed_flag: bool,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_mbs_only_flag: bool,
    pub mb_adaptive_frame_field_flag: bool,
    pub direct_8x8_inference_flag: bool,
    pub frame_cropping: Option<FrameCropping>,
    pub vui: Option<Vui>,
}

impl SequenceParameterSet {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let mut sps = Self {
            profile_idc: reader.get_n(8)?,
            constraint_flags: reader.get_n(8)?,
            level_idc: reader.get_n(8)?,
            seq_parameter_set_id: reader.get_ue()?,
            ..Default::default()
        };

        if sps.seq_parameter_set_id > 31 {
            bail!(SpsError::InvalidSpsId(sps.seq_parameter_set_id));
        }

        if HIGH_PROFILES.contains(&sps.profile_idc) {
            sps.high_profile = Some(Self::read_high_profile(reader)?);
        }

        sps.log2_max_frame_num_minus4 = reader.get_ue()?;
        sps.pic_order_cnt = Self::read_pic_order_cnt(reader)?;

        sps.max_num_ref_frames = reader.get_ue()?;
        sps.gaps_in_frame_num_value_allowed_flag = reader.get()?;
        sps.pic_width_in_mbs_minus1 = reader.get_ue()?;
        sps.pic_height_in_map_units_minus1 = reader.get_ue()?;
        sps.frame_mbs_only_flag = reader.get()?;
        if sps.pic_width_in_mbs_minus1 >= MAX_PIC_SIZE_IN_MBS
            || sps.pic_height_in_map_units_minus1 >= MAX_PIC_SIZE_IN_MBS
        {
            bail!(SpsError::PictureTooLarge {
                width_in_mbs: sps.pic_width_in_mbs_minus1.saturating_add(1),
                height_in_map_units: sps.pic_height_in_map_units_minus1.saturating_add(1),
            });
        }
        if !sps.frame_mbs_only_flag {
            sps.mb_adaptive_frame_field_flag = reader.get()?;
        }
        sps.direct_8x8_inference_flag = reader.get()?;

        if reader.get()? {
            sps.frame_cropping = Some(FrameCropping {
                left: reader.get_ue()?,
                right: reader.get_ue()?,
                top: reader.get_ue()?,
                bottom: reader.get_ue()?,
            });
        }

        if reader.get()? {
            sps.vui = Some(Vui::read(reader)?);
        }

        trace!(
            "SPS {}: profile {} level {} {}x{}",
            sps.seq_parameter_set_id,
            sps.profile_idc,
            sps.level_idc,
            sps.width(),
            sps.height()
        );

        Ok(sps)
    }

    fn read_high_profile(reader: &mut BsIoSliceReader) -> Result<HighProfileExt> {
        let chroma_format_idc = reader.get_ue()?;
        if chroma_format_idc > 3 {
            bail!(SpsError::InvalidChromaFormat(chroma_format_idc));
        }

        let mut ext = HighProfileExt {
            chroma_format_idc,
            ..Default::default()
        };

        if chroma_format_idc == 3 {
            ext.separate_colour_plane_flag = reader.get()?;
        }
        ext.bit_depth_luma_minus8 = reader.get_ue()?;
        ext.bit_depth_chroma_minus8 = reader.get_ue()?;
        ext.qpprime_y_zero_transform_bypass_flag = reader.get()?;

        if reader.get()? {
            let count = if chroma_format_idc == 3 { 12 } else { 8 };
            let mut lists = Vec::with_capacity(count);
            for i in 0..count {
                let list = if reader.get()? {
                    Some(ScalingList::read(reader, if i < 6 { 16 } else { 64 })?)
                } else {
                    None
                };
                lists.push(list);
            }
            ext.scaling_lists = Some(lists);
        }

        Ok(ext)
    }

    fn read_pic_order_cnt(reader: &mut BsIoSliceReader) -> Result<PicOrderCnt> {
        let poc = match reader.get_ue()? {
            0 => PicOrderCnt::Type0 {
                log2_max_pic_order_cnt_lsb_minus4: reader.get_ue()?,
            },
            1 => {
                let delta_pic_order_always_zero_flag = reader.get()?;
                let offset_for_non_ref_pic = reader.get_se()?;
                let offset_for_top_to_bottom_field = reader.get_se()?;
                let cycle = reader.get_ue()?;
                if cycle > 255 {
                    bail!(SpsError::PocCycleTooLong(cycle));
                }
                let offset_for_ref_frame = (0..cycle)
                    .map(|_| reader.get_se())
                    .collect::<std::io::Result<Vec<_>>>()?;

                PicOrderCnt::Type1 {
                    delta_pic_order_always_zero_flag,
                    offset_for_non_ref_pic,
                    offset_for_top_to_bottom_field,
                    offset_for_ref_frame,
                }
            }
            2 => PicOrderCnt::Type2,
            other => bail!(SpsError::InvalidPocType(other)),
        };

        Ok(poc)
    }

    pub fn write(&self, writer: &mut BitstreamIoWriter) -> Result<()> {
        writer.put_n(8, self.profile_idc)?;
        writer.put_n(8, self.constraint_flags)?;
        writer.put_n(8, self.level_idc)?;
        writer.put_ue(self.seq_parameter_set_id)?;

        if let Some(ext) = &self.high_profile {
            writer.put_ue(ext.chroma_format_idc)?;
            if ext.chroma_format_idc == 3 {
                writer.put(ext.separate_colour_plane_flag)?;
            }
            writer.put_ue(ext.bit_depth_luma_minus8)?;
            writer.put_ue(ext.bit_depth_chroma_minus8)?;
            writer.put(ext.qpprime_y_zero_transform_bypass_flag)?;

            writer.put(ext.scaling_lists.is_some())?;
            for list in ext.scaling_lists.iter().flatten() {
                writer.put(list.is_some())?;
                if let Some(list) = list {
                    list.write(writer)?;
                }
            }
        }

        writer.put_ue(self.log2_max_frame_num_minus4)?;
        match &self.pic_order_cnt {
            PicOrderCnt::Type0 {
                log2_max_pic_order_cnt_lsb_minus4,
            } => {
                writer.put_ue(0)?;
                writer.put_ue(*log2_max_pic_order_cnt_lsb_minus4)?;
            }
            PicOrderCnt::Type1 {
                delta_pic_order_always_zero_flag,
                offset_for_non_ref_pic,
                offset_for_top_to_bottom_field,
                offset_for_ref_frame,
            } => {
                writer.put_ue(1)?;
                writer.put(*delta_pic_order_always_zero_flag)?;
                writer.put_se(*offset_for_non_ref_pic)?;
                writer.put_se(*offset_for_top_to_bottom_field)?;
                writer.put_ue(offset_for_ref_frame.len() as u32)?;
                for &offset in offset_for_ref_frame {
                    writer.put_se(offset)?;
                }
            }
            PicOrderCnt::Type2 => writer.put_ue(2)?,
        }

        writer.put_ue(self.max_num_ref_frames)?;
        writer.put(self.gaps_in_frame_num_value_allowed_flag)?;
        writer.put_ue(self.pic_width_in_mbs_minus1)?;
        writer.put_ue(self.pic_height_in_map_units_minus1)?;
        writer.put(self.frame_mbs_only_flag)?;
        if !self.frame_mbs_only_flag {
            writer.put(self.mb_adaptive_frame_field_flag)?;
        }
        writer.put(self.direct_8x8_inference_flag)?;

        writer.put(self.frame_cropping.is_some())?;
        if let Some(crop) = &self.frame_cropping {
            writer.put_ue(crop.left)?;
            writer.put_ue(crop.right)?;
            writer.put_ue(crop.top)?;
            writer.put_ue(crop.bottom)?;
        }

        writer.put(self.vui.is_some())?;
        if let Some(vui) = &self.vui {
            vui.write(writer)?;
        }

        writer.put_trailing_bits()?;

        Ok(())
    }

    /// Parses an SPS NAL unit including its start code.
    pub fn from_nal(nal: &[u8]) -> Result<(NalHeader, Self)> {
        let (header, payload) = nal::split_nal(nal)?;
        if header.nal_unit_type != NAL_TYPE_SPS {
            bail!(SpsError::NotSps(header.nal_unit_type));
        }

        let rbsp = nal::ebsp_to_rbsp(payload);
        let mut reader = BsIoSliceReader::from_slice(&rbsp);
        let sps = Self::read(&mut reader)?;

        Ok((header, sps))
    }

    /// Appends this SPS as a start code, NAL header and escaped payload.
    pub fn write_nal(&self, header: NalHeader, out: &mut Vec<u8>) -> Result<()> {
        let mut writer = BitstreamIoWriter::new();
        self.write(&mut writer)?;
        let rbsp = writer.into_bytes()?;

        out.extend_from_slice(&START_CODE);
        out.push(header.to_byte());
        nal::rbsp_to_ebsp(&rbsp, out);

        Ok(())
    }

    fn chroma_format_idc(&self) -> u32 {
        self.high_profile
            .as_ref()
            .map_or(1, |ext| ext.chroma_format_idc)
    }

    /// Crop unit sizes in luma samples, horizontal then vertical.
    fn crop_units(&self) -> (u32, u32) {
        let field_factor = if self.frame_mbs_only_flag { 1 } else { 2 };
        let separate = self
            .high_profile
            .as_ref()
            .is_some_and(|ext| ext.separate_colour_plane_flag);

        match (self.chroma_format_idc(), separate) {
            (0, _) | (3, true) => (1, field_factor),
            (1, _) => (2, 2 * field_factor),
            (2, _) => (2, field_factor),
            _ => (1, field_factor),
        }
    }

    /// Coded width in luma samples, before cropping.
    pub fn coded_width(&self) -> u32 {
        self.pic_width_in_mbs_minus1
            .saturating_add(1)
            .saturating_mul(16)
    }

    /// Coded height in luma samples, before cropping.
    pub fn coded_height(&self) -> u32 {
        let field_factor = if self.frame_mbs_only_flag { 1 } else { 2 };
        self.pic_height_in_map_units_minus1
            .saturating_add(1)
            .saturating_mul(16 * field_factor)
    }

    /// Display width after frame cropping.
    pub fn width(&self) -> u32 {
        let (unit_x, _) = self.crop_units();
        let crop = self
            .frame_cropping
            .map_or(0, |c| unit_x.saturating_mul(c.left.saturating_add(c.right)));
        self.coded_width().saturating_sub(crop)
    }

    /// Display height after frame cropping.
    pub fn height(&self) -> u32 {
        let (_, unit_y) = self.crop_units();
        let crop = self
            .frame_cropping
            .map_or(0, |c| unit_y.saturating_mul(c.top.saturating_add(c.bottom)));
        self.coded_height().saturating_sub(crop)
    }

    pub fn level(&self) -> f32 {
        f32::from(self.level_idc) / 10.0
    }
}

/// Rewrites sequence parameter sets for the hardware decoder.
///
/// Holds the geometry the session was set up with and a scratch buffer the
/// rewritten NAL unit is produced into.
#[derive(Debug)]
pub struct SpsFixup {
    initial_width: u32,
    initial_height: u32,
    bitstream_fixup: bool,
    output: Vec<u8>,
}

impl SpsFixup {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            initial_width: width,
            initial_height: height,
            bitstream_fixup: true,
            output: Vec::with_capacity(128),
        }
    }

    /// Enables or disables the bitstream restriction rewrite.
    pub fn with_bitstream_fixup(mut self, enabled: bool) -> Self {
        self.bitstream_fixup = enabled;
        self
    }

    /// Applies the fix-up to a parsed SPS in place.
    pub fn apply(&self, sps: &mut SequenceParameterSet) {
        match (self.initial_width, self.initial_height) {
            (1280, 720) => sps.level_idc = LEVEL_IDC_720P,
            (1920, 1080) => sps.level_idc = LEVEL_IDC_1080P,
            _ => {}
        }

        if !self.bitstream_fixup {
            if let Some(vui) = sps.vui.as_mut() {
                vui.bitstream_restriction = None;
            }
            return;
        }

        let max_num_ref_frames = sps.max_num_ref_frames;
        let vui = sps.vui.get_or_insert_with(Vui::default);
        let restriction = vui
            .bitstream_restriction
            .get_or_insert(BitstreamRestriction {
                motion_vectors_over_pic_boundaries_flag: true,
                max_bytes_per_pic_denom: 2,
                max_bits_per_mb_denom: 1,
                log2_max_mv_length_horizontal: 16,
                log2_max_mv_length_vertical: 16,
                max_num_reorder_frames: 0,
                max_dec_frame_buffering: max_num_ref_frames,
            });

        restriction.max_dec_frame_buffering = max_num_ref_frames;
        restriction.max_bytes_per_pic_denom = 2;
        restriction.max_bits_per_mb_denom = 1;
    }

    /// Rewrites one SPS fragment and returns the bytes to append in its place.
    pub fn fix(&mut self, fragment: &[u8]) -> Result<&[u8]> {
        let (header, mut sps) = SequenceParameterSet::from_nal(fragment)?;
        self.apply(&mut sps);

        self.output.clear();
        sps.write_nal(header, &mut self.output)?;

        debug!(
            "SPS fix-up: {} -> {} bytes, level_idc {}",
            fragment.len(),
            self.output.len(),
            sps.level_idc
        );

        Ok(self.output.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1280x720 high profile SPS in the shape the streaming encoder sends:
    /// VUI with timing info but no bitstream restriction.
    fn encoder_sps() -> SequenceParameterSet {
        SequenceParameterSet {
            profile_idc: 100,
            constraint_flags: 0,
            level_idc: 50,
            seq_parameter_set_id: 0,
            high_profile: Some(HighProfileExt {
                chroma_format_idc: 1,
                ..Default::default()
            }),
            log2_max_frame_num_minus4: 0,
            pic_order_cnt: PicOrderCnt::Type2,
            max_num_ref_frames: 1,
            gaps_in_frame_num_value_allowed_flag: false,
            pic_width_in_mbs_minus1: 79,
            pic_height_in_map_units_minus1: 44,
            frame_mbs_only_flag: true,
            mb_adaptive_frame_field_flag: false,
            direct_8x8_inference_flag: true,
            frame_cropping: None,
            vui: Some(Vui {
                video_signal_type: Some(VideoSignalType {
                    video_format: 5,
                    video_full_range_flag: false,
                    colour_description: Some(ColourDescription {
                        colour_primaries: 1,
                        transfer_characteristics: 1,
                        matrix_coefficients: 1,
                    }),
                }),
                timing_info: Some(TimingInfo {
                    num_units_in_tick: 1,
                    time_scale: 120,
                    fixed_frame_rate_flag: true,
                }),
                ..Default::default()
            }),
        }
    }

    fn nal_of(sps: &SequenceParameterSet) -> Vec<u8> {
        let mut out = Vec::new();
        sps.write_nal(NalHeader::from_byte(0x67).unwrap(), &mut out)
            .unwrap();
        out
    }

    #[test]
    fn parses_encoder_geometry() -> Result<()> {
        let (header, sps) = SequenceParameterSet::from_nal(&nal_of(&encoder_sps()))?;
        assert_eq!(header.nal_unit_type, NAL_TYPE_SPS);
        assert_eq!((sps.width(), sps.height()), (1280, 720));
        assert_eq!(sps, encoder_sps());
        Ok(())
    }

    #[test]
    fn cropping_trims_1088_to_1080() {
        let mut sps = encoder_sps();
        sps.pic_width_in_mbs_minus1 = 119;
        sps.pic_height_in_map_units_minus1 = 67;
        sps.frame_cropping = Some(FrameCropping {
            bottom: 4,
            ..Default::default()
        });
        assert_eq!(sps.coded_height(), 1088);
        assert_eq!((sps.width(), sps.height()), (1920, 1080));
    }

    #[test]
    fn fixup_adds_bitstream_restriction() -> Result<()> {
        let mut fixup = SpsFixup::new(1280, 720);
        let fixed = fixup.fix(&nal_of(&encoder_sps()))?.to_vec();

        assert_eq!(&fixed[..4], &START_CODE);
        let (_, sps) = SequenceParameterSet::from_nal(&fixed)?;
        assert_eq!(sps.level_idc, LEVEL_IDC_720P);

        let vui = sps.vui.as_ref().unwrap();
        let restriction = vui.bitstream_restriction.unwrap();
        assert!(restriction.motion_vectors_over_pic_boundaries_flag);
        assert_eq!(restriction.max_num_reorder_frames, 0);
        assert_eq!(restriction.max_dec_frame_buffering, 1);
        assert_eq!(restriction.max_bytes_per_pic_denom, 2);
        assert_eq!(restriction.max_bits_per_mb_denom, 1);
        assert_eq!(restriction.log2_max_mv_length_horizontal, 16);
        assert_eq!(restriction.log2_max_mv_length_vertical, 16);

        // Everything else survives the rewrite.
        assert_eq!(vui.timing_info, encoder_sps().vui.unwrap().timing_info);
        assert_eq!((sps.width(), sps.height()), (1280, 720));
        Ok(())
    }

    #[test]
    fn fixup_keeps_existing_restriction_but_caps_buffering() -> Result<()> {
        let mut original = encoder_sps();
        original.max_num_ref_frames = 4;
        original.vui.as_mut().unwrap().bitstream_restriction = Some(BitstreamRestriction {
            motion_vectors_over_pic_boundaries_flag: false,
            max_bytes_per_pic_denom: 0,
            max_bits_per_mb_denom: 0,
            log2_max_mv_length_horizontal: 9,
            log2_max_mv_length_vertical: 9,
            max_num_reorder_frames: 2,
            max_dec_frame_buffering: 16,
        });

        let mut sps = original.clone();
        SpsFixup::new(1024, 576).apply(&mut sps);

        assert_eq!(sps.level_idc, original.level_idc);
        let restriction = sps.vui.unwrap().bitstream_restriction.unwrap();
        assert_eq!(restriction.max_dec_frame_buffering, 4);
        assert_eq!(restriction.max_num_reorder_frames, 2);
        assert_eq!(restriction.log2_max_mv_length_horizontal, 9);
        assert_eq!(restriction.max_bytes_per_pic_denom, 2);
        assert_eq!(restriction.max_bits_per_mb_denom, 1);
        Ok(())
    }

    #[test]
    fn fixup_creates_missing_vui() {
        let mut sps = encoder_sps();
        sps.vui = None;
        SpsFixup::new(1920, 1080).apply(&mut sps);

        assert_eq!(sps.level_idc, LEVEL_IDC_1080P);
        let vui = sps.vui.unwrap();
        assert!(vui.timing_info.is_none());
        assert!(vui.bitstream_restriction.is_some());
    }

    #[test]
    fn disabled_fixup_strips_restriction() {
        let mut sps = encoder_sps();
        SpsFixup::new(1280, 720)
            .with_bitstream_fixup(false)
            .apply(&mut sps);
        assert!(sps.vui.unwrap().bitstream_restriction.is_none());
    }

    #[test]
    fn scaling_lists_and_poc_type1_survive() -> Result<()> {
        let mut original = encoder_sps();
        original.high_profile = Some(HighProfileExt {
            chroma_format_idc: 1,
            scaling_lists: Some(vec![
                Some(ScalingList {
                    deltas: vec![-8], // first delta drives next_scale to 0
                }),
                None,
                None,
                None,
                None,
                None,
                Some(ScalingList {
                    deltas: vec![1; 64],
                }),
                None,
            ]),
            ..Default::default()
        });
        original.pic_order_cnt = PicOrderCnt::Type1 {
            delta_pic_order_always_zero_flag: false,
            offset_for_non_ref_pic: -2,
            offset_for_top_to_bottom_field: 1,
            offset_for_ref_frame: vec![3, -3],
        };

        let (_, parsed) = SequenceParameterSet::from_nal(&nal_of(&original))?;
        assert_eq!(parsed, original);
        Ok(())
    }

    #[test]
    fn out_of_range_scaling_delta_is_rejected() {
        let mut sps = encoder_sps();
        sps.high_profile = Some(HighProfileExt {
            chroma_format_idc: 1,
            scaling_lists: Some(vec![
                Some(ScalingList { deltas: vec![128] }),
                None,
                None,
                None,
                None,
                None,
                None,
                None,
            ]),
            ..Default::default()
        });

        let err = SequenceParameterSet::from_nal(&nal_of(&sps)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpsError>(),
            Some(SpsError::DeltaScaleOutOfRange(128))
        ));

        sps.high_profile = Some(HighProfileExt {
            chroma_format_idc: 1,
            scaling_lists: Some(vec![
                Some(ScalingList {
                    deltas: vec![-128, 120],
                }),
                None,
                None,
                None,
                None,
                None,
                None,
                None,
            ]),
            ..Default::default()
        });
        assert!(SequenceParameterSet::from_nal(&nal_of(&sps)).is_ok());
    }

    #[test]
    fn picture_beyond_level_limits_is_rejected() {
        let mut sps = encoder_sps();
        sps.pic_width_in_mbs_minus1 = MAX_PIC_SIZE_IN_MBS;

        let err = SequenceParameterSet::from_nal(&nal_of(&sps)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpsError>(),
            Some(SpsError::PictureTooLarge {
                width_in_mbs: 1056,
                height_in_map_units: 45,
            })
        ));
    }

    #[test]
    fn geometry_saturates_on_huge_fields() {
        let sps = SequenceParameterSet {
            pic_width_in_mbs_minus1: u32::MAX - 1,
            pic_height_in_map_units_minus1: u32::MAX,
            frame_cropping: Some(FrameCropping {
                left: u32::MAX,
                right: u32::MAX,
                top: 0,
                bottom: u32::MAX,
            }),
            ..Default::default()
        };

        assert_eq!(sps.coded_width(), u32::MAX);
        assert_eq!(sps.coded_height(), u32::MAX);
        assert_eq!(sps.width(), 0);
        assert_eq!(sps.height(), 0);
    }

    #[test]
    fn rejects_non_sps_units() {
        let pps = [0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80];
        let err = SequenceParameterSet::from_nal(&pps).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpsError>(),
            Some(SpsError::NotSps(8))
        ));
    }
}
