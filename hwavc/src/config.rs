//! Configuration consumed by the decode pipeline.

use std::time::Duration;

/// Stream settings chosen by the user before the session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    /// Target presentation rate in frames per second.
    pub fps: u32,
    /// Drop decoded frames when throughput exceeds `fps`.
    pub enable_frame_pacer: bool,
    /// Draw the decoded / vblank rate overlay.
    pub show_fps: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            enable_frame_pacer: true,
            show_fps: false,
        }
    }
}

/// Timing of the frame pacer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacerSettings {
    /// Sampling interval between two pacer wakes.
    pub interval: Duration,
    /// Upper bound on waiting for the pacer to exit during teardown.
    pub shutdown_timeout: Duration,
}

impl Default for PacerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}
