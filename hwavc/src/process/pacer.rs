//! Frame pacer.
//!
//! An independently scheduled task that wakes once per sampling interval,
//! compares the number of frames presented since the previous wake with the
//! target rate and grows a drop quota by the excess. The present pipeline
//! drains the quota one frame at a time.
//!
//! The two sides only share [`PacerShared`], a handful of atomics. Neither
//! side ever waits on the other.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, trace};

use crate::config::{PacerSettings, VideoConfig};
use crate::hw::Platform;
use crate::utils::errors::TeardownError;

pub const PACER_THREAD_NAME: &str = "frame_pacer";
pub const PACER_STACK_SIZE: usize = 0x10000;

/// Decoded frames and vblanks observed over the last sampling interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalStats {
    pub decoded: u32,
    pub vblanks: u32,
}

impl IntervalStats {
    fn pack(self) -> u64 {
        (u64::from(self.decoded) << 32) | u64::from(self.vblanks)
    }

    fn unpack(packed: u64) -> Self {
        Self {
            decoded: (packed >> 32) as u32,
            vblanks: packed as u32,
        }
    }
}

/// Counters shared between the present pipeline and the pacer task.
#[derive(Debug)]
pub struct PacerShared {
    frame_count: AtomicU32,
    need_drop: AtomicU32,
    last_interval: AtomicU64,
    video_active: AtomicBool,
}

impl Default for PacerShared {
    fn default() -> Self {
        Self {
            frame_count: AtomicU32::new(0),
            need_drop: AtomicU32::new(0),
            last_interval: AtomicU64::new(0),
            video_active: AtomicBool::new(true),
        }
    }
}

impl PacerShared {
    /// Counts one presented frame.
    pub fn record_presented(&self) {
        self.frame_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads and clears the presented-frame counter.
    pub fn take_frame_count(&self) -> u32 {
        self.frame_count.swap(0, Ordering::Relaxed)
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Takes one frame off the drop quota if it is positive.
    pub fn try_consume_drop(&self) -> bool {
        self.need_drop
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn add_drop_quota(&self, frames: u32) {
        // fetch_update never fails with a closure that always returns Some.
        let _ = self
            .need_drop
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(frames))
            });
    }

    pub fn drop_quota(&self) -> u32 {
        self.need_drop.load(Ordering::Acquire)
    }

    pub fn publish_interval(&self, stats: IntervalStats) {
        self.last_interval.store(stats.pack(), Ordering::Release);
    }

    pub fn last_interval(&self) -> IntervalStats {
        IntervalStats::unpack(self.last_interval.load(Ordering::Acquire))
    }

    pub fn set_video_active(&self, active: bool) {
        self.video_active.store(active, Ordering::Release);
    }

    pub fn is_video_active(&self) -> bool {
        self.video_active.load(Ordering::Acquire)
    }

    /// Clears the counters and the quota at pacer start.
    pub fn reset(&self) {
        self.frame_count.store(0, Ordering::Relaxed);
        self.need_drop.store(0, Ordering::Release);
        self.last_interval.store(0, Ordering::Release);
    }
}

/// Sleep before the next wake.
///
/// A wake that overran the interval by less than one interval sleeps only
/// what is left of the second interval; anything else sleeps a full one.
pub fn next_delay(lapse: Duration, interval: Duration) -> Duration {
    if lapse > interval && lapse - interval < interval {
        interval * 2 - lapse
    } else {
        interval
    }
}

/// State private to the pacer task.
#[derive(Debug, Clone)]
pub struct PacerState {
    target_fps: u32,
    enabled: bool,
    interval: Duration,
    last_vblank: u64,
    last_check: Duration,
}

impl PacerState {
    pub fn new(config: &VideoConfig, interval: Duration, vblank: u64, now: Duration) -> Self {
        Self {
            target_fps: config.fps,
            enabled: config.enable_frame_pacer,
            interval,
            last_vblank: vblank,
            last_check: now,
        }
    }

    /// One pacer wake. Returns how long to sleep until the next one.
    pub fn tick(&mut self, shared: &PacerShared, vblank: u64, now: Duration) -> Duration {
        let vblanks = u32::try_from(vblank.saturating_sub(self.last_vblank)).unwrap_or(u32::MAX);
        let decoded = shared.take_frame_count();

        if shared.is_video_active() && self.enabled && decoded > self.target_fps {
            let excess = decoded - self.target_fps;
            shared.add_drop_quota(excess);
            debug!(
                "Pacer: {decoded} frames against {} fps, dropping {excess} (quota {})",
                self.target_fps,
                shared.drop_quota()
            );
        }

        shared.publish_interval(IntervalStats { decoded, vblanks });
        self.last_vblank = vblank;

        let lapse = now.saturating_sub(self.last_check);
        self.last_check = now;

        let delay = next_delay(lapse, self.interval);
        trace!("Pacer: {decoded} / {vblanks}, lapse {lapse:?}, sleeping {delay:?}");
        delay
    }
}

/// Handle to the running pacer task.
#[derive(Debug)]
pub struct FramePacer {
    handle: Option<JoinHandle<()>>,
    stop_tx: Option<mpsc::Sender<()>>,
    done_rx: mpsc::Receiver<()>,
}

impl FramePacer {
    /// Clears the shared counters and starts the pacer task.
    pub fn start(
        platform: Arc<dyn Platform>,
        shared: Arc<PacerShared>,
        config: &VideoConfig,
        settings: &PacerSettings,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        shared.reset();

        let config = *config;
        let interval = settings.interval;
        let task_platform = Arc::clone(&platform);

        let handle = platform.spawn(
            PACER_THREAD_NAME,
            PACER_STACK_SIZE,
            Box::new(move || {
                let platform = task_platform;
                let mut state =
                    PacerState::new(&config, interval, platform.vblank_count(), platform.now());

                let mut delay = interval;
                loop {
                    match stop_rx.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) => {
                            delay = state.tick(&shared, platform.vblank_count(), platform.now());
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                drop(done_tx);
            }),
        )?;

        info!(
            "Frame pacer started: target {} fps, pacing {}",
            config.fps,
            if config.enable_frame_pacer { "on" } else { "off" }
        );

        Ok(Self {
            handle: Some(handle),
            stop_tx: Some(stop_tx),
            done_rx,
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signals the task to exit and waits at most `timeout` for it.
    ///
    /// On timeout the handle is kept so a later call can wait again.
    pub fn stop(&mut self, timeout: Duration) -> Result<(), TeardownError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.stop_tx.take();

        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                self.handle = Some(handle);
                Err(TeardownError::PacerShutdownTimeout(timeout))
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!("Frame pacer panicked");
                }
                info!("Frame pacer stopped");
                Ok(())
            }
        }
    }
}
