mod delivery;
mod progress;
mod units;

use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use indicatif::MultiProgress;

use hwavc::hw::sim::SimBackend;
use hwavc::process::lifecycle::{DecodeStatus, SetupParams, VideoDecoder, setup_status};
use hwavc::process::present::PipelineStats;
use hwavc::structs::nal::{self, AnnexBUnits, NAL_TYPE_SPS};
use hwavc::structs::sps::SequenceParameterSet;

use super::command::{Cli, PlayArgs};
use crate::config::{ConfigFile, PlaySettings};
use crate::input::InputReader;
use crate::timestamp::duration_str;
use delivery::{DeliveryThreadConfig, spawn_delivery_thread};
use progress::{create_progress_bar, estimate_total_units};

/// Gap in delivery after which the poor-network indicator is raised.
const POOR_NETWORK_AFTER: Duration = Duration::from_millis(500);

/// Units buffered between delivery and decode.
const DELIVERY_QUEUE_DEPTH: usize = 8;

pub fn cmd_play(args: &PlayArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    macro_rules! pb_update {
        ($pb:expr, $method:ident($($args:expr),*)) => {
            if let Some(ref pb) = $pb {
                pb.$method($($args),*);
            }
        };
    }

    let config_file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let settings = config_file.resolve(args)?;

    log::info!(
        "Playing H.264 stream: {} (strict mode: {}, fps: {}, frame pacer: {})",
        args.input.display(),
        cli.strict,
        settings.video.fps,
        settings.video.enable_frame_pacer
    );

    let mut input_reader = InputReader::new(&args.input)?;
    let stream = input_reader.read_all()?;

    let (width, height) = stream_geometry(args, &stream)?;

    let total_units = if multi.is_some() && !input_reader.is_pipe() {
        Some(estimate_total_units(&stream))
    } else {
        None
    };

    let pb = multi
        .map(|multi| create_progress_bar(multi, total_units))
        .transpose()?;

    let sim = SimBackend::new();
    let mut video = VideoDecoder::new(
        sim.hardware(),
        sim.renderer(),
        sim.platform(),
        settings.video,
        settings.pacer,
    );

    let setup = video.setup(&SetupParams::h264(width, height, settings.video.fps));
    let status = setup_status(&setup);
    if let Err(e) = setup {
        bail!("Video setup failed with status {status:#010X}: {e}");
    }
    if let Some(geometry) = video.geometry() {
        log::info!(
            "Decoder ready: stream {}x{}, hardware {}x{}",
            geometry.width,
            geometry.height,
            geometry.horizontal,
            geometry.vertical
        );
    }

    video.start();
    pb_update!(pb, set_message("decoding".to_string()));

    let (tx, rx) = mpsc::sync_channel(DELIVERY_QUEUE_DEPTH);
    let delivery = spawn_delivery_thread(DeliveryThreadConfig {
        stream,
        delivery_fps: settings.delivery_fps,
        strict_mode: cli.strict,
        tx,
    })?;

    let started = Instant::now();
    let mut poor_network = false;
    let mut play_result = Ok(());

    loop {
        let unit = match rx.recv_timeout(POOR_NETWORK_AFTER) {
            Ok(Ok(unit)) => unit,
            Ok(Err(e)) => {
                play_result = Err(e);
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !poor_network {
                    log::warn!("No decode unit for {POOR_NETWORK_AFTER:?}");
                    video.show_poor_net_indicator();
                    poor_network = true;
                }
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        if poor_network {
            video.hide_poor_net_indicator();
            poor_network = false;
        }

        log::trace!(
            "Unit {}: {} bytes in {} NAL units",
            unit.frame_number,
            unit.len(),
            unit.nal_count()
        );
        if video.submit_decode_unit(&unit.as_decode_unit()) == DecodeStatus::NeedKeyframe {
            if cli.strict {
                play_result = Err(anyhow::anyhow!(
                    "Decoder requested a keyframe at unit {}",
                    unit.frame_number
                ));
                break;
            }
            log::debug!("Keyframe requested at unit {}", unit.frame_number);
        }

        pb_update!(pb, inc(1));
        let stats = video.stats();
        if stats.submitted.is_multiple_of(30) {
            let interval = video.pacer_shared().last_interval();
            pb_update!(
                pb,
                set_message(format!(
                    "presented {} | dropped {} | last interval {}/{} vblanks",
                    stats.presented, stats.dropped, interval.decoded, interval.vblanks
                ))
            );
        }
    }

    // Unblocks a delivery thread waiting on a full queue.
    drop(rx);
    video.stop();
    if delivery.join().is_err() {
        log::error!("Delivery thread panicked");
    }

    let elapsed = started.elapsed();
    let stats = *video.stats();
    video.teardown().context("Video cleanup failed")?;

    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }

    play_result?;

    if !sim.ledger().is_clean() {
        bail!("Hardware resources still held after cleanup");
    }

    print_summary(&settings, &stats, elapsed);
    Ok(())
}

/// Stream size from the flags, falling back to the first SPS.
fn stream_geometry(args: &PlayArgs, stream: &[u8]) -> Result<(u32, u32)> {
    if let (Some(width), Some(height)) = (args.width, args.height) {
        return Ok((width, height));
    }

    let sps = AnnexBUnits::new(stream)
        .find(|nal| {
            nal::split_nal(nal).is_ok_and(|(header, _)| header.nal_unit_type == NAL_TYPE_SPS)
        })
        .context("No sequence parameter set found; pass --width and --height")?;
    let (_, sps) = SequenceParameterSet::from_nal(sps)?;

    log::debug!("Geometry from SPS: {}x{}", sps.width(), sps.height());
    Ok((
        args.width.unwrap_or_else(|| sps.width()),
        args.height.unwrap_or_else(|| sps.height()),
    ))
}

fn print_summary(settings: &PlaySettings, stats: &PipelineStats, elapsed: Duration) {
    let seconds = elapsed.as_secs_f64();
    let presented_fps = if seconds > 0.0 {
        stats.presented as f64 / seconds
    } else {
        0.0
    };

    println!();
    println!("Playback Summary");
    println!("  Target rate               {} fps", settings.video.fps);
    println!("  Frame pacer               {}", settings.video.enable_frame_pacer);
    println!("  Units submitted           {}", stats.submitted);
    println!("  Frames presented          {}", stats.presented);
    println!("  Frames dropped            {}", stats.dropped);
    println!("  Pending outputs           {}", stats.pending);
    println!("  Keyframe requests         {}", stats.need_keyframe);
    println!("  Elapsed                   {}", duration_str(elapsed));
    println!("  Presented rate            {presented_fps:.1} fps");
    println!();
}
