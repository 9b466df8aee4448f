/// Decode-unit reassembly into the elementary stream buffer.
///
/// Provides the [`Assembler`](assemble::Assembler), which applies the
/// parameter set fix-up while linearizing fragments.
pub mod assemble;

/// Staged acquisition and release of decoder resources.
///
/// Provides [`VideoDecoder`](lifecycle::VideoDecoder) and the
/// [`DecoderRenderer`](lifecycle::DecoderRenderer) callback contract.
pub mod lifecycle;

/// Frame pacer task and the counters it shares with the pipeline.
pub mod pacer;

/// Hardware decode, drop decisions and presentation.
pub mod present;
