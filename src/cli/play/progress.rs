use anyhow::Result;
use hwavc::structs::nal::AnnexBUnits;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::units::UnitGrouper;

pub fn estimate_total_units(stream: &[u8]) -> u64 {
    log::info!("Counting decode units for progress estimation");
    let count_start = std::time::Instant::now();

    let mut grouper = UnitGrouper::default();
    let mut units = 0u64;
    for nal in AnnexBUnits::new(stream) {
        if let Ok(Some(_)) = grouper.push(nal) {
            units += 1;
        }
    }
    units += u64::from(grouper.finish().is_some());

    log::info!(
        "Found {units} decode units in {:.3}s ({} bytes)",
        count_start.elapsed().as_secs_f64(),
        stream.len()
    );

    units
}

pub fn create_progress_bar(multi: &MultiProgress, total_units: Option<u64>) -> Result<ProgressBar> {
    let pb = if let Some(total) = total_units {
        let pb = multi.add(ProgressBar::new(total));
        pb.set_style(ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos}/{len} units ({percent}%)\n{msg} | elapsed: {elapsed_precise} | ETA: {eta_precise}",
        )?);

        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    } else {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template(
            "{spinner:.green} {pos} units\n{msg} | elapsed: {elapsed_precise}",
        )?);

        pb
    };
    pb.set_message("setting up decoder");
    Ok(pb)
}
