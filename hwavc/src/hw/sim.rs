//! Simulated hardware backend.
//!
//! Implements every seam in [`crate::hw`] in memory. A shared [`SimLedger`]
//! counts live resources, records the acquire/release order and lets a caller
//! make any single hardware call fail.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::trace;

use super::{
    AccessUnit, AvcHardware, DecoderHandle, DecoderInfo, FrameBuffer, FrameTexture, HwError,
    HwResult, InitInfo, MemBlock, PictureTarget, PixelFormat, Platform, Renderer, Rgba,
};
use crate::structs::nal::{self, AnnexBUnits};

/// Status returned by an injected failure.
pub const SIM_ERROR: HwError = HwError(0x8062_0001);

/// Hardware calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailAt {
    InitLibrary,
    QueryMemSize,
    AllocMemBlock,
    MemBlockBase,
    CreateDecoder,
    Decode,
    CreateTexture,
    SpawnTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimResource {
    Library,
    MemBlock,
    Decoder,
    Texture,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    Acquire(SimResource),
    Release(SimResource),
}

#[derive(Debug, Default)]
struct LedgerState {
    fail: HashSet<FailAt>,
    forced_outputs: Option<u32>,
    vblank_stall: Duration,

    library: bool,
    mem_blocks: usize,
    decoders: usize,
    textures: usize,
    tasks: usize,
    events: Vec<SimEvent>,
    next_id: u32,
    last_mem_block_size: usize,

    decode_calls: u64,
    presented: u64,
    unsynced_swaps: u64,
    render_pending: bool,
    texts: Vec<(i32, i32, Rgba, String)>,
    vblank_wait: bool,
}

impl LedgerState {
    fn acquire(&mut self, resource: SimResource) {
        self.events.push(SimEvent::Acquire(resource));
    }

    fn release(&mut self, resource: SimResource) {
        self.events.push(SimEvent::Release(resource));
    }

    fn fails(&self, at: FailAt) -> bool {
        self.fail.contains(&at)
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared record of everything the simulated hardware did.
#[derive(Debug, Default)]
pub struct SimLedger {
    state: Mutex<LedgerState>,
}

impl SimLedger {
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn library_initialized(&self) -> bool {
        self.lock().library
    }

    pub fn live_mem_blocks(&self) -> usize {
        self.lock().mem_blocks
    }

    pub fn live_decoders(&self) -> usize {
        self.lock().decoders
    }

    pub fn live_textures(&self) -> usize {
        self.lock().textures
    }

    pub fn live_tasks(&self) -> usize {
        self.lock().tasks
    }

    /// No resource of any kind is held.
    pub fn is_clean(&self) -> bool {
        let state = self.lock();
        !state.library
            && state.mem_blocks == 0
            && state.decoders == 0
            && state.textures == 0
            && state.tasks == 0
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().events.clone()
    }

    pub fn last_mem_block_size(&self) -> usize {
        self.lock().last_mem_block_size
    }

    pub fn decode_calls(&self) -> u64 {
        self.lock().decode_calls
    }

    pub fn presented(&self) -> u64 {
        self.lock().presented
    }

    /// Buffer swaps issued without waiting for rendering to finish first.
    pub fn unsynced_swaps(&self) -> u64 {
        self.lock().unsynced_swaps
    }

    /// Text drawn since the most recent `start_drawing`.
    pub fn texts(&self) -> Vec<(i32, i32, Rgba, String)> {
        self.lock().texts.clone()
    }

    pub fn vblank_wait(&self) -> bool {
        self.lock().vblank_wait
    }
}

/// Factory for the simulated seams, all sharing one ledger.
#[derive(Debug, Clone)]
pub struct SimBackend {
    ledger: Arc<SimLedger>,
    platform: Arc<SimPlatform>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    pub const REFRESH_HZ: f64 = 60.0;

    pub fn new() -> Self {
        let ledger = Arc::new(SimLedger::default());
        let platform = Arc::new(SimPlatform {
            ledger: Arc::clone(&ledger),
            origin: Instant::now(),
            refresh_hz: Self::REFRESH_HZ,
        });

        Self { ledger, platform }
    }

    pub fn ledger(&self) -> &SimLedger {
        &self.ledger
    }

    pub fn hardware(&self) -> Box<dyn AvcHardware> {
        Box::new(SimHardware {
            ledger: Arc::clone(&self.ledger),
        })
    }

    pub fn renderer(&self) -> Box<dyn Renderer> {
        Box::new(SimRenderer {
            ledger: Arc::clone(&self.ledger),
        })
    }

    pub fn platform(&self) -> Arc<dyn Platform> {
        self.platform.clone()
    }

    pub fn fail_at(&self, at: FailAt) {
        self.ledger.lock().fail.insert(at);
    }

    pub fn clear_failures(&self) {
        self.ledger.lock().fail.clear();
    }

    /// Makes every successful decode report `outputs` pictures.
    pub fn force_outputs(&self, outputs: Option<u32>) {
        self.ledger.lock().forced_outputs = outputs;
    }

    /// Delays every vblank counter read by `stall`.
    pub fn set_vblank_stall(&self, stall: Duration) {
        self.ledger.lock().vblank_stall = stall;
    }
}

/// Frame memory the simulated decoder asks for.
fn frame_mem_size(info: &DecoderInfo) -> usize {
    let picture = info.horizontal as usize * info.vertical as usize * 3 / 2;
    picture * (info.num_ref_frames as usize + 1) + 0x4_2000
}

struct SimHardware {
    ledger: Arc<SimLedger>,
}

impl AvcHardware for SimHardware {
    fn init_library(&mut self, info: &InitInfo) -> HwResult<()> {
        let mut state = self.ledger.lock();
        if state.fails(FailAt::InitLibrary) || state.library {
            return Err(SIM_ERROR);
        }

        trace!(
            "sim: init library {}x{}, {} refs",
            info.horizontal, info.vertical, info.num_ref_frames
        );
        state.library = true;
        state.acquire(SimResource::Library);
        Ok(())
    }

    fn term_library(&mut self) {
        let mut state = self.ledger.lock();
        if state.library {
            state.library = false;
            state.release(SimResource::Library);
        }
    }

    fn query_decoder_mem_size(&mut self, info: &DecoderInfo) -> HwResult<usize> {
        let state = self.ledger.lock();
        if state.fails(FailAt::QueryMemSize) || !state.library {
            return Err(SIM_ERROR);
        }

        Ok(frame_mem_size(info))
    }

    fn alloc_mem_block(&mut self, name: &str, size: usize) -> HwResult<MemBlock> {
        let mut state = self.ledger.lock();
        if state.fails(FailAt::AllocMemBlock) {
            return Err(SIM_ERROR);
        }

        let uid = state.next_id() as i32;
        trace!("sim: alloc mem block {name:?} uid {uid} size {size:#X}");
        state.mem_blocks += 1;
        state.last_mem_block_size = size;
        state.acquire(SimResource::MemBlock);
        Ok(MemBlock::new(uid, size))
    }

    fn mem_block_base(&mut self, block: &MemBlock) -> HwResult<usize> {
        let state = self.ledger.lock();
        if state.fails(FailAt::MemBlockBase) {
            return Err(SIM_ERROR);
        }

        Ok(0x8100_0000 + block.uid() as usize * 0x0100_0000)
    }

    fn free_mem_block(&mut self, block: MemBlock) {
        let mut state = self.ledger.lock();
        trace!("sim: free mem block uid {}", block.uid());
        state.mem_blocks = state.mem_blocks.saturating_sub(1);
        state.release(SimResource::MemBlock);
    }

    fn create_decoder(
        &mut self,
        frame_buf: FrameBuffer,
        info: &DecoderInfo,
    ) -> HwResult<DecoderHandle> {
        let mut state = self.ledger.lock();
        if state.fails(FailAt::CreateDecoder) || frame_buf.size < frame_mem_size(info) {
            return Err(SIM_ERROR);
        }

        let handle = state.next_id();
        state.decoders += 1;
        state.acquire(SimResource::Decoder);
        Ok(DecoderHandle::new(handle))
    }

    fn delete_decoder(&mut self, decoder: DecoderHandle) {
        let mut state = self.ledger.lock();
        trace!("sim: delete decoder {}", decoder.raw());
        state.decoders = state.decoders.saturating_sub(1);
        state.release(SimResource::Decoder);
    }

    fn decode(
        &mut self,
        _decoder: &DecoderHandle,
        au: &AccessUnit<'_>,
        picture: &mut PictureTarget<'_>,
    ) -> HwResult<u32> {
        let mut state = self.ledger.lock();
        state.decode_calls += 1;
        if state.fails(FailAt::Decode) || au.es.is_empty() {
            return Err(SIM_ERROR);
        }

        let outputs = state.forced_outputs.unwrap_or_else(|| {
            let has_picture = AnnexBUnits::new(au.es)
                .filter_map(|unit| nal::split_nal(unit).ok())
                .any(|(header, _)| header.is_vcl());
            u32::from(has_picture)
        });

        if outputs > 0 {
            let shade = (state.decode_calls & 0xFF) as u8;
            picture.buffer.fill(shade);
        }

        Ok(outputs)
    }
}

struct SimRenderer {
    ledger: Arc<SimLedger>,
}

impl Renderer for SimRenderer {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Option<FrameTexture> {
        let mut state = self.ledger.lock();
        if state.fails(FailAt::CreateTexture) {
            return None;
        }

        let id = state.next_id();
        state.textures += 1;
        state.acquire(SimResource::Texture);
        Some(FrameTexture::new(id, width, height, format))
    }

    fn free_texture(&mut self, texture: FrameTexture) {
        let mut state = self.ledger.lock();
        trace!("sim: free texture {}", texture.id());
        state.textures = state.textures.saturating_sub(1);
        state.release(SimResource::Texture);
    }

    fn start_drawing(&mut self) {
        self.ledger.lock().texts.clear();
    }

    fn draw_texture(&mut self, _texture: &FrameTexture, _x: f32, _y: f32) {}

    fn draw_text(&mut self, x: i32, y: i32, color: Rgba, _size: u32, text: &str) {
        self.ledger.lock().texts.push((x, y, color, text.to_string()));
    }

    fn end_drawing(&mut self) {
        self.ledger.lock().render_pending = true;
    }

    fn wait_rendering_done(&mut self) {
        self.ledger.lock().render_pending = false;
    }

    fn swap_buffers(&mut self) {
        let mut state = self.ledger.lock();
        if state.render_pending {
            state.unsynced_swaps += 1;
        }
        state.presented += 1;
    }

    fn set_vblank_wait(&mut self, enable: bool) {
        self.ledger.lock().vblank_wait = enable;
    }
}

/// Wall-clock platform with a vblank counter derived from elapsed time.
#[derive(Debug)]
pub struct SimPlatform {
    ledger: Arc<SimLedger>,
    origin: Instant,
    refresh_hz: f64,
}

impl Platform for SimPlatform {
    fn vblank_count(&self) -> u64 {
        let stall = self.ledger.lock().vblank_stall;
        if !stall.is_zero() {
            thread::sleep(stall);
        }

        (self.origin.elapsed().as_secs_f64() * self.refresh_hz) as u64
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn spawn(
        &self,
        name: &str,
        stack_size: usize,
        task: Box<dyn FnOnce() + Send + 'static>,
    ) -> io::Result<JoinHandle<()>> {
        {
            let mut state = self.ledger.lock();
            if state.fails(FailAt::SpawnTask) {
                return Err(io::Error::other("simulated thread creation failure"));
            }
            state.tasks += 1;
            state.acquire(SimResource::Task);
        }

        let ledger = Arc::clone(&self.ledger);
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .stack_size(stack_size)
            .spawn(move || {
                task();
                let mut state = ledger.lock();
                state.tasks = state.tasks.saturating_sub(1);
                state.release(SimResource::Task);
            });

        if spawned.is_err() {
            let mut state = self.ledger.lock();
            state.tasks = state.tasks.saturating_sub(1);
            state.release(SimResource::Task);
        }

        spawned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_outputs_one_picture_per_vcl_unit() {
        let sim = SimBackend::new();
        let mut hw = sim.hardware();
        let mut texture = FrameTexture::new(1, 16, 16, PixelFormat::Abgr8888);
        let decoder = DecoderHandle::new(1);

        let sps_only = [0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1F];
        let with_idr = [0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x00, 0x01, 0x65, 0x88];

        let outputs = hw
            .decode(
                &decoder,
                &AccessUnit::untimed(&sps_only),
                &mut texture.picture_target(),
            )
            .unwrap();
        assert_eq!(outputs, 0);

        let outputs = hw
            .decode(
                &decoder,
                &AccessUnit::untimed(&with_idr),
                &mut texture.picture_target(),
            )
            .unwrap();
        assert_eq!(outputs, 1);
        assert!(texture.pixels().iter().all(|&p| p == 2));
    }

    #[test]
    fn ledger_tracks_acquire_release_order() {
        let sim = SimBackend::new();
        let mut hw = sim.hardware();
        let info = InitInfo {
            horizontal: 1280,
            vertical: 720,
            num_ref_frames: 5,
            num_streams: 1,
        };

        hw.init_library(&info).unwrap();
        assert!(hw.init_library(&info).is_err(), "library state is global");

        let block = hw.alloc_mem_block("decoder", 0x10_0000).unwrap();
        assert_eq!(sim.ledger().live_mem_blocks(), 1);
        hw.free_mem_block(block);
        hw.term_library();

        assert!(sim.ledger().is_clean());
        assert_eq!(
            sim.ledger().events(),
            vec![
                SimEvent::Acquire(SimResource::Library),
                SimEvent::Acquire(SimResource::MemBlock),
                SimEvent::Release(SimResource::MemBlock),
                SimEvent::Release(SimResource::Library),
            ]
        );
    }

    #[test]
    fn injected_spawn_failure_leaves_no_task() {
        let sim = SimBackend::new();
        sim.fail_at(FailAt::SpawnTask);
        let err = sim
            .platform()
            .spawn("t", 0x10000, Box::new(|| {}))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(sim.ledger().live_tasks(), 0);
    }
}
