use rand::rngs::StdRng;

use crate::error::Result;
use crate::voice::VoiceEmbedding;

/// The neural side of the engine: a voice encoder plus a conditioned
/// text-to-waveform generator.
///
/// The engine treats implementations as opaque functions. They must be
/// callable from several threads at once; any mutable inference state is
/// either allocated per call or guarded internally.
pub trait SpeechModel: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Rate of the waveform `embed` expects and `synthesize` produces.
    fn sample_rate(&self) -> u32;

    /// Width of each embedding frame.
    fn embedding_dim(&self) -> usize;

    /// Encode a mono waveform at [`SpeechModel::sample_rate`].
    fn embed(&self, waveform: &[f32]) -> Result<VoiceEmbedding>;

    /// Generate audio for one normalized text chunk.
    ///
    /// All randomness must be drawn from `rng` so seeded calls repeat exactly.
    fn synthesize(&self, text: &str, voice: &VoiceEmbedding, rng: &mut StdRng) -> Result<Vec<f32>>;
}
