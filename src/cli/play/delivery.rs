use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use hwavc::structs::nal::AnnexBUnits;

use super::units::{OwnedUnit, UnitGrouper};

pub struct DeliveryThreadConfig {
    pub stream: Vec<u8>,
    /// Units per second; 0 delivers without waiting.
    pub delivery_fps: u32,
    pub strict_mode: bool,
    pub tx: mpsc::SyncSender<Result<OwnedUnit>>,
}

/// Spawns the thread standing in for the network transport.
///
/// Units are handed over at `delivery_fps` until the stream ends or the
/// receiving side goes away.
pub fn spawn_delivery_thread(config: DeliveryThreadConfig) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("unit_delivery".into())
        .spawn(move || {
            let DeliveryThreadConfig {
                stream,
                delivery_fps,
                strict_mode,
                tx,
            } = config;

            let period = (delivery_fps > 0).then(|| Duration::from_secs(1) / delivery_fps);
            let started = Instant::now();
            let mut grouper = UnitGrouper::default();
            let mut delivered = 0u32;
            let mut skipped = 0usize;

            let mut deliver = |unit: OwnedUnit| -> bool {
                if let Some(period) = period {
                    let deadline = started + period * delivered;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    }
                }
                delivered += 1;
                tx.send(Ok(unit)).is_ok()
            };

            for (index, nal) in AnnexBUnits::new(&stream).enumerate() {
                match grouper.push(nal) {
                    Ok(Some(unit)) => {
                        if !deliver(unit) {
                            log::debug!("Receiver closed, stopping delivery");
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) if strict_mode => {
                        let _ = tx.send(Err(e.context(format!("NAL unit {index}"))));
                        return;
                    }
                    Err(e) => {
                        log::warn!("Skipping NAL unit {index}: {e}");
                        skipped += 1;
                    }
                }
            }

            if let Some(unit) = grouper.finish() {
                deliver(unit);
            }

            log::debug!("Delivery complete: {delivered} units, {skipped} NAL units skipped");
        })?;

    Ok(handle)
}
