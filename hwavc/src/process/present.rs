//! Frame decode and presentation.
//!
//! One call per decode unit: assemble, decode into the frame texture, then
//! either present the picture with its overlays or discard it against the
//! pacer's drop quota.

use log::{error, trace, warn};

use crate::hw::{AccessUnit, Rgba};
use crate::process::lifecycle::{DecodeStatus, Stage, VideoDecoder};
use crate::structs::decode_unit::DecodeUnit;
use crate::utils::errors::DecodeError;

/// Position and size of the decoded / vblank rate overlay.
pub const FPS_TEXT_POS: (i32, i32) = (40, 20);
pub const FPS_TEXT_SIZE: u32 = 16;

/// Position and size of the poor-network icon.
pub const NETWORK_ICON_POS: (i32, i32) = (40, 500);
pub const NETWORK_ICON_SIZE: u32 = 64;
pub const NETWORK_ICON: &str = "\u{26A0}";

/// What happened to a decoded unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Drawn and swapped to the display.
    Presented,
    /// Decoded but discarded to drain the drop quota.
    Dropped,
    /// Accepted by the decoder without an output picture yet.
    Pending,
    /// Decoded while video output is stopped.
    Hidden,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub submitted: u64,
    pub presented: u64,
    pub dropped: u64,
    pub pending: u64,
    pub hidden: u64,
    pub need_keyframe: u64,
}

impl PipelineStats {
    fn record(&mut self, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::Presented => self.presented += 1,
            FrameOutcome::Dropped => self.dropped += 1,
            FrameOutcome::Pending => self.pending += 1,
            FrameOutcome::Hidden => self.hidden += 1,
        }
    }
}

impl VideoDecoder {
    /// Decode-unit callback: decodes and presents one unit.
    ///
    /// # Panics
    ///
    /// Panics if called before setup has completed.
    pub fn submit_decode_unit(&mut self, unit: &DecodeUnit<'_>) -> DecodeStatus {
        self.stats.submitted += 1;

        match self.decode_frame(unit) {
            Ok(outcome) => {
                self.stats.record(outcome);
                DecodeStatus::Ok
            }
            Err(err) => {
                match &err {
                    DecodeError::TooManyPictures(_) => error!("Frame {}: {err}", unit.frame_number),
                    _ => warn!("Frame {}: {err}", unit.frame_number),
                }
                self.stats.need_keyframe += 1;
                DecodeStatus::NeedKeyframe
            }
        }
    }

    /// Decodes one unit and presents or discards the resulting picture.
    ///
    /// # Panics
    ///
    /// Panics if called before setup has completed.
    pub fn decode_frame(&mut self, unit: &DecodeUnit<'_>) -> Result<FrameOutcome, DecodeError> {
        assert_eq!(
            self.stage,
            Stage::PacerRunning,
            "decode unit submitted before video setup completed"
        );

        let (Some(assembler), Some(fixup), Some(texture), Some(decoder)) = (
            self.assembler.as_mut(),
            self.fixup.as_mut(),
            self.texture.as_mut(),
            self.decoder.as_ref(),
        ) else {
            unreachable!("resources of a running decoder are present");
        };

        let es = assembler.assemble(unit, fixup)?;
        let outputs = self
            .hw
            .decode(decoder, &AccessUnit::untimed(es), &mut texture.picture_target())
            .map_err(DecodeError::Rejected)?;

        match outputs {
            0 => {
                trace!("Frame {}: no picture yet", unit.frame_number);
                return Ok(FrameOutcome::Pending);
            }
            1 => {}
            n => return Err(DecodeError::TooManyPictures(n)),
        }

        if !self.shared.is_video_active() {
            return Ok(FrameOutcome::Hidden);
        }

        if self.shared.try_consume_drop() {
            trace!(
                "Frame {}: dropped, {} left to drop",
                unit.frame_number,
                self.shared.drop_quota()
            );
            return Ok(FrameOutcome::Dropped);
        }

        self.present();
        self.shared.record_presented();
        Ok(FrameOutcome::Presented)
    }

    fn present(&mut self) {
        let Some(texture) = self.texture.as_ref() else {
            return;
        };

        self.renderer.start_drawing();
        self.renderer.draw_texture(texture, 0.0, 0.0);

        if self.config.show_fps {
            let stats = self.shared.last_interval();
            let (x, y) = FPS_TEXT_POS;
            self.renderer.draw_text(
                x,
                y,
                Rgba::white(0xFF),
                FPS_TEXT_SIZE,
                &format!("fps: {} / {}", stats.decoded, stats.vblanks),
            );
        }

        if let Some(alpha) = self.indicator.advance() {
            let (x, y) = NETWORK_ICON_POS;
            self.renderer
                .draw_text(x, y, Rgba::white(alpha), NETWORK_ICON_SIZE, NETWORK_ICON);
        }

        self.renderer.end_drawing();
        self.renderer.wait_rendering_done();
        self.renderer.swap_buffers();
    }

    /// Resumes presentation and stops waiting on vblank for swaps.
    pub fn start(&mut self) {
        self.shared.set_video_active(true);
        self.renderer.set_vblank_wait(false);
    }

    /// Suspends presentation; decoding continues.
    pub fn stop(&mut self) {
        self.renderer.set_vblank_wait(true);
        self.shared.set_video_active(false);
    }

    pub fn show_poor_net_indicator(&mut self) {
        self.indicator.activate();
    }

    pub fn hide_poor_net_indicator(&mut self) {
        self.indicator.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::config::{PacerSettings, VideoConfig};
    use crate::hw::sim::{FailAt, SimBackend};
    use crate::process::lifecycle::SetupParams;
    use crate::structs::decode_unit::{Fragment, FrameType};

    const IDR: [u8; 8] = [0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21];
    const SEI: [u8; 7] = [0x00, 0x00, 0x00, 0x01, 0x06, 0x05, 0x80];

    fn running(sim: &SimBackend, config: VideoConfig) -> VideoDecoder {
        // The pacer sleeps far longer than any test runs, so it never adds
        // to the quota behind the test's back.
        let settings = PacerSettings {
            interval: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(2),
        };
        let mut video = VideoDecoder::new(
            sim.hardware(),
            sim.renderer(),
            sim.platform(),
            config,
            settings,
        );
        video.setup(&SetupParams::h264(1280, 720, 60)).unwrap();
        video
    }

    fn picture(frame_number: u32) -> DecodeUnit<'static> {
        DecodeUnit::new(frame_number, FrameType::PFrame, vec![Fragment::ordinary(&IDR)])
    }

    #[test]
    fn zero_quota_presents_and_counts() {
        let sim = SimBackend::new();
        let mut video = running(&sim, VideoConfig::default());
        let before = video.pacer_shared().frame_count();

        assert_eq!(video.decode_frame(&picture(0)).unwrap(), FrameOutcome::Presented);
        assert_eq!(video.pacer_shared().frame_count(), before + 1);
        assert_eq!(sim.ledger().presented(), 1);
        assert_eq!(sim.ledger().unsynced_swaps(), 0);
    }

    #[test]
    fn positive_quota_drops_one_frame() {
        let sim = SimBackend::new();
        let mut video = running(&sim, VideoConfig::default());
        video.pacer_shared().add_drop_quota(1);
        let before = video.pacer_shared().frame_count();

        assert_eq!(video.decode_frame(&picture(0)).unwrap(), FrameOutcome::Dropped);
        assert_eq!(video.pacer_shared().drop_quota(), 0);
        assert_eq!(video.pacer_shared().frame_count(), before);
        assert_eq!(sim.ledger().presented(), 0);
    }

    #[test]
    fn backlog_of_fifteen_is_shed_before_presenting_again() {
        let sim = SimBackend::new();
        let mut video = running(&sim, VideoConfig::default());

        // One interval worth of 75 frames against 60 fps.
        let shared = video.pacer_shared().clone();
        shared.take_frame_count();
        let mut state = crate::process::pacer::PacerState::new(
            video.config(),
            Duration::from_secs(1),
            0,
            Duration::ZERO,
        );
        for n in 0..75 {
            assert_eq!(video.decode_frame(&picture(n)).unwrap(), FrameOutcome::Presented);
        }
        state.tick(&shared, 60, Duration::from_secs(1));
        assert_eq!(shared.drop_quota(), 15);

        let outcomes: Vec<FrameOutcome> = (75..91)
            .map(|n| video.decode_frame(&picture(n)).unwrap())
            .collect();
        assert!(outcomes[..15].iter().all(|&o| o == FrameOutcome::Dropped));
        assert_eq!(outcomes[15], FrameOutcome::Presented);
        assert_eq!(shared.drop_quota(), 0);
    }

    #[test]
    fn zero_outputs_is_pending_and_presents_nothing() {
        let sim = SimBackend::new();
        let mut video = running(&sim, VideoConfig::default());
        let before = video.pacer_shared().frame_count();

        let sei_only = DecodeUnit::new(0, FrameType::PFrame, vec![Fragment::ordinary(&SEI)]);
        assert_eq!(video.submit_decode_unit(&sei_only), DecodeStatus::Ok);
        assert_eq!(video.stats().pending, 1);
        assert_eq!(video.pacer_shared().frame_count(), before);
        assert_eq!(sim.ledger().presented(), 0);
    }

    #[test]
    fn decode_failure_requests_keyframe() {
        let sim = SimBackend::new();
        let mut video = running(&sim, VideoConfig::default());
        sim.fail_at(FailAt::Decode);

        assert_eq!(video.submit_decode_unit(&picture(0)), DecodeStatus::NeedKeyframe);
        assert_eq!(video.stats().need_keyframe, 1);

        sim.clear_failures();
        assert_eq!(video.submit_decode_unit(&picture(1)), DecodeStatus::Ok);
        assert_eq!(video.stats().presented, 1);
    }

    #[test]
    fn oversized_unit_requests_keyframe_without_decoding() {
        let sim = SimBackend::new();
        let mut video = running(&sim, VideoConfig::default());

        let huge = vec![0u8; crate::process::assemble::DECODER_BUFFER_SIZE + 1];
        let unit = DecodeUnit::new(0, FrameType::Idr, vec![Fragment::ordinary(&huge)]);
        assert_eq!(video.submit_decode_unit(&unit), DecodeStatus::NeedKeyframe);
        assert_eq!(sim.ledger().decode_calls(), 0);
    }

    #[test]
    fn multiple_pictures_are_rejected() {
        let sim = SimBackend::new();
        let mut video = running(&sim, VideoConfig::default());
        sim.force_outputs(Some(2));

        let err = video.decode_frame(&picture(0)).unwrap_err();
        assert!(matches!(err, DecodeError::TooManyPictures(2)));
        assert_eq!(sim.ledger().presented(), 0);
    }

    #[test]
    fn overlays_follow_config_and_indicator() {
        let sim = SimBackend::new();
        let config = VideoConfig {
            show_fps: true,
            ..VideoConfig::default()
        };
        let mut video = running(&sim, config);

        video.decode_frame(&picture(0)).unwrap();
        let texts = sim.ledger().texts();
        assert_eq!(texts.len(), 1);
        assert_eq!((texts[0].0, texts[0].1), FPS_TEXT_POS);
        assert!(texts[0].3.starts_with("fps: "));

        video.show_poor_net_indicator();
        let mut icon_alphas = Vec::new();
        for n in 1..=3 {
            video.decode_frame(&picture(n)).unwrap();
            let texts = sim.ledger().texts();
            assert_eq!(texts.len(), 2);
            assert_eq!(texts[1].3, NETWORK_ICON);
            assert_eq!((texts[1].0, texts[1].1), NETWORK_ICON_POS);
            icon_alphas.push(texts[1].2.a);
        }
        assert_eq!(icon_alphas, vec![0, 252, 248]);

        video.hide_poor_net_indicator();
        video.decode_frame(&picture(4)).unwrap();
        let texts = sim.ledger().texts();
        assert_eq!(texts.len(), 1);
        assert!(texts.iter().all(|t| t.3 != NETWORK_ICON));
    }

    #[test]
    fn overlay_history_covers_only_the_last_frame() {
        let sim = SimBackend::new();
        let config = VideoConfig {
            show_fps: true,
            ..VideoConfig::default()
        };
        let mut video = running(&sim, config);
        video.show_poor_net_indicator();

        for n in 0..50 {
            video.decode_frame(&picture(n)).unwrap();
        }

        assert_eq!(sim.ledger().presented(), 50);
        assert_eq!(sim.ledger().texts().len(), 2);
    }

    #[test]
    fn stopped_video_decodes_without_presenting() {
        let sim = SimBackend::new();
        let mut video = running(&sim, VideoConfig::default());

        video.stop();
        assert!(sim.ledger().vblank_wait());
        assert_eq!(video.decode_frame(&picture(0)).unwrap(), FrameOutcome::Hidden);
        assert_eq!(sim.ledger().presented(), 0);

        video.start();
        assert!(!sim.ledger().vblank_wait());
        assert_eq!(video.decode_frame(&picture(1)).unwrap(), FrameOutcome::Presented);
    }

    #[test]
    #[should_panic(expected = "before video setup completed")]
    fn submitting_before_setup_panics() {
        let sim = SimBackend::new();
        let mut video = VideoDecoder::new(
            sim.hardware(),
            sim.renderer(),
            sim.platform(),
            VideoConfig::default(),
            PacerSettings::default(),
        );
        video.submit_decode_unit(&picture(0));
    }

    #[test]
    fn live_pacer_drops_excess_throughput() {
        let sim = SimBackend::new();
        let config = VideoConfig {
            fps: 10,
            ..VideoConfig::default()
        };
        let settings = PacerSettings {
            interval: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(2),
        };
        let mut video = VideoDecoder::new(
            sim.hardware(),
            sim.renderer(),
            sim.platform(),
            config,
            settings,
        );
        video.setup(&SetupParams::h264(1280, 720, 60)).unwrap();

        // Present far more than 10 frames per interval until the pacer reacts.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut n = 0;
        while video.stats().dropped == 0 && Instant::now() < deadline {
            video.submit_decode_unit(&picture(n));
            n += 1;
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(video.stats().dropped > 0);
        video.teardown().unwrap();
    }
}
