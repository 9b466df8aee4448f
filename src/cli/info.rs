use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{Cli, InfoArgs};
use crate::input::InputReader;
use hwavc::structs::geometry::Geometry;
use hwavc::structs::nal::{self, AnnexBUnits, NAL_TYPE_SPS};
use hwavc::structs::sps::{BitstreamRestriction, SequenceParameterSet, SpsFixup};

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing H.264 stream: {}", args.input.display());

    let stream = InputReader::new(&args.input)?.read_all()?;

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Analyzing NAL units...");
            Some(pb)
        }
        None => None,
    };

    let mut context = AnalysisContext {
        pb,
        ..AnalysisContext::default()
    };

    for nal in AnnexBUnits::new(&stream) {
        context.process_nal(nal, cli)?;
    }

    if let Some(ref pb) = context.pb {
        pb.finish_and_clear();
    }

    if context.seen_sps.is_empty() {
        println!("No sequence parameter set found in the input.");
        println!("This doesn't appear to be an Annex B H.264 stream.");
    }

    display_summary(&context, stream.len());
    Ok(())
}

#[derive(Default)]
struct AnalysisContext {
    nal_counts: BTreeMap<u8, usize>,
    nal_total: usize,
    seen_sps: HashSet<Vec<u8>>,
    pb: Option<ProgressBar>,
}

impl AnalysisContext {
    fn process_nal(&mut self, nal: &[u8], cli: &Cli) -> Result<()> {
        self.nal_total += 1;

        let header = match nal::split_nal(nal) {
            Ok((header, _)) => header,
            Err(e) => {
                if cli.strict {
                    return Err(e);
                }
                log::warn!("Malformed NAL unit {}: {e}", self.nal_total);
                return Ok(());
            }
        };
        *self.nal_counts.entry(header.nal_unit_type).or_default() += 1;

        if header.nal_unit_type == NAL_TYPE_SPS && !self.seen_sps.contains(nal) {
            match SequenceParameterSet::from_nal(nal) {
                Ok((_, sps)) => {
                    let report = SpsReport::new(nal, &sps);
                    match self.pb {
                        Some(ref pb) => pb.suspend(|| report.display()),
                        None => report.display(),
                    }
                    self.seen_sps.insert(nal.to_vec());
                }
                Err(e) => {
                    if cli.strict {
                        return Err(e);
                    }
                    log::warn!("SPS parse error at NAL unit {}: {e}", self.nal_total);
                }
            }
        }

        if self.nal_total.is_multiple_of(500) {
            if let Some(ref pb) = self.pb {
                pb.set_message(format!("Analyzing NAL units...    {}", self.nal_total));
                pb.tick();
            }
        }

        Ok(())
    }
}

struct SpsReport {
    sps: SequenceParameterSet,
    geometry: Option<Geometry>,
    fixed: Option<SequenceParameterSet>,
    fixed_len: Option<usize>,
    original_len: usize,
}

impl SpsReport {
    fn new(nal: &[u8], sps: &SequenceParameterSet) -> Self {
        let geometry = Geometry::negotiate(sps.width(), sps.height()).ok();

        let mut fixup = SpsFixup::new(sps.width(), sps.height());
        let fixed_len = match fixup.fix(nal) {
            Ok(bytes) => Some(bytes.len()),
            Err(e) => {
                log::warn!("SPS fix-up failed: {e}");
                None
            }
        };
        let fixed = fixed_len.map(|_| {
            let mut fixed = sps.clone();
            fixup.apply(&mut fixed);
            fixed
        });

        Self {
            sps: sps.clone(),
            geometry,
            fixed,
            fixed_len,
            original_len: nal.len(),
        }
    }

    fn display(&self) {
        let sps = &self.sps;

        println!();
        println!("Sequence Parameter Set {}", sps.seq_parameter_set_id);
        println!("  Profile                   {}", profile_name(sps.profile_idc));
        println!("  Level                     {:.1}", sps.level());
        println!(
            "  Coded size                {}x{}",
            sps.coded_width(),
            sps.coded_height()
        );
        println!("  Display size              {}x{}", sps.width(), sps.height());
        println!("  Reference frames          {}", sps.max_num_ref_frames);

        if let Some(timing) = sps.vui.as_ref().and_then(|vui| vui.timing_info.as_ref()) {
            if timing.num_units_in_tick > 0 {
                let rate = f64::from(timing.time_scale) / (2.0 * f64::from(timing.num_units_in_tick));
                println!("  Frame rate                {rate:.3} fps");
            }
        }

        match &self.geometry {
            Some(geometry) => println!(
                "  Hardware geometry         {}x{}",
                geometry.horizontal, geometry.vertical
            ),
            None => println!("  Hardware geometry         unsupported"),
        }

        println!(
            "  Bitstream restriction     {}",
            restriction_str(restriction(sps))
        );

        if let (Some(fixed), Some(fixed_len)) = (&self.fixed, self.fixed_len) {
            println!("  Fix-up");
            println!("    Level                   {:.1}", fixed.level());
            println!(
                "    Bitstream restriction   {}",
                restriction_str(restriction(fixed))
            );
            println!(
                "    Size                    {} -> {} bytes",
                self.original_len, fixed_len
            );
        }
        println!();
    }
}

fn restriction(sps: &SequenceParameterSet) -> Option<&BitstreamRestriction> {
    sps.vui.as_ref()?.bitstream_restriction.as_ref()
}

fn restriction_str(restriction: Option<&BitstreamRestriction>) -> String {
    match restriction {
        Some(r) => format!(
            "max_dec_frame_buffering {}, max_bytes_per_pic_denom {}, max_bits_per_mb_denom {}",
            r.max_dec_frame_buffering, r.max_bytes_per_pic_denom, r.max_bits_per_mb_denom
        ),
        None => "absent".to_string(),
    }
}

fn profile_name(profile_idc: u8) -> String {
    match profile_idc {
        66 => "Baseline".to_string(),
        77 => "Main".to_string(),
        88 => "Extended".to_string(),
        100 => "High".to_string(),
        110 => "High 10".to_string(),
        122 => "High 4:2:2".to_string(),
        244 => "High 4:4:4 Predictive".to_string(),
        other => format!("Unknown ({other})"),
    }
}

fn nal_type_name(nal_unit_type: u8) -> &'static str {
    match nal_unit_type {
        1 => "Non-IDR slice",
        2..=4 => "Slice data partition",
        5 => "IDR slice",
        6 => "SEI",
        7 => "SPS",
        8 => "PPS",
        9 => "Access unit delimiter",
        10 => "End of sequence",
        11 => "End of stream",
        12 => "Filler data",
        _ => "Other",
    }
}

fn display_summary(context: &AnalysisContext, total_bytes: usize) {
    println!("Analysis Summary");
    println!("  NAL units                 {}", context.nal_total);
    for (&nal_unit_type, &count) in &context.nal_counts {
        println!(
            "    {:<22}  {count}",
            format!("{} ({nal_unit_type})", nal_type_name(nal_unit_type))
        );
    }
    println!("  Distinct SPS              {}", context.seen_sps.len());

    let size_mb = total_bytes as f64 / 1_000_000.0;
    println!("  Size                      {size_mb:.2} MB ({total_bytes} bytes)");
    println!();
}
