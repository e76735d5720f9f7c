use std::path::Path;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::audio::{load_audio, prepare_reference, resample};
use crate::config::{Device, EngineConfig};
use crate::error::{Result, TtsError};
use crate::model::SpeechModel;
use crate::splice::{append_with_crossfade, crossfade_samples, sanitize};
use crate::text::prepare_chunks;
use crate::voice::VoiceEmbedding;
use crate::SynthesisResult;

/// A loaded text-to-speech engine.
///
/// Holds the configuration and model weights. All methods take `&self`: the
/// sampling RNG and model state are created per call, so one engine can serve
/// several threads. Calls block until inference finishes and cannot be
/// cancelled.
///
/// ```rust,no_run
/// use pocket_tts::{Engine, EngineConfig};
/// use std::path::Path;
///
/// let engine = Engine::new(EngineConfig::default())?;
/// let voice = engine.encode_voice(Path::new("models/reference_sample.wav"))?;
/// let audio = engine.generate("Hello world.", &voice)?;
/// audio.write_wav(Path::new("hello.wav"))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Engine {
    config: EngineConfig,
    model: Box<dyn SpeechModel>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("model", &self.model.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    /// Load the ONNX backend described by `config`.
    ///
    /// Every failure, including missing weight files, comes back as an
    /// initialization error.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        check_device(config.device)?;

        let start = Instant::now();
        let model = load_backend(&config).map_err(TtsError::into_initialization)?;
        log::info!(
            "Loaded {} model in {:.2?} (device {}, precision {:?})",
            model.name(),
            start.elapsed(),
            config.device,
            config.precision
        );
        Self::with_model(config, model)
    }

    /// Build an engine around an already-loaded model.
    pub fn with_model(config: EngineConfig, model: Box<dyn SpeechModel>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, model })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sample rate of audio returned by [`Engine::generate`].
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Decode a reference clip from disk and encode it into a voice.
    pub fn encode_voice(&self, path: &Path) -> Result<VoiceEmbedding> {
        let (samples, sample_rate) = load_audio(path)?;
        log::debug!(
            "Decoded {} ({} samples @ {} Hz)",
            path.display(),
            samples.len(),
            sample_rate
        );
        self.encode_voice_from_samples(&samples, sample_rate)
    }

    /// Encode a voice from mono samples at `sample_rate`.
    pub fn encode_voice_from_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<VoiceEmbedding> {
        if sample_rate == 0 {
            return Err(TtsError::InvalidInput("sample rate must be positive".into()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(TtsError::InvalidInput(
                "reference samples contain NaN or infinity".into(),
            ));
        }

        let reference = prepare_reference(
            samples,
            sample_rate,
            self.model.sample_rate(),
            self.config.min_reference_secs,
            self.config.max_reference_secs,
        )?;

        let start = Instant::now();
        let voice = self.model.embed(&reference)?;
        if voice.dim() != self.model.embedding_dim() {
            return Err(TtsError::Inference(format!(
                "{} returned a {}-wide embedding, expected {}",
                self.model.name(),
                voice.dim(),
                self.model.embedding_dim()
            )));
        }
        log::info!(
            "Encoded voice ({} frames) in {:.2?}",
            voice.frames(),
            start.elapsed()
        );
        Ok(voice)
    }

    /// Synthesize `text` in the timbre of `voice`.
    ///
    /// Long text is generated chunk by chunk and the pieces are cross-faded.
    /// The returned samples are always finite and within `[-1.0, 1.0]`. With
    /// `temperature > 0` and no `seed`, output differs between calls.
    pub fn generate(&self, text: &str, voice: &VoiceEmbedding) -> Result<SynthesisResult> {
        let chunks = prepare_chunks(text, self.config.max_chunk_chars)?;
        if voice.dim() != self.model.embedding_dim() {
            return Err(TtsError::VoiceMismatch {
                expected: self.model.embedding_dim(),
                actual: voice.dim(),
            });
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let model_rate = self.model.sample_rate();
        let fade = crossfade_samples(model_rate);
        let start = Instant::now();

        let mut combined: Vec<f32> = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            log::debug!("Chunk {}/{}: {chunk:?}", index + 1, chunks.len());
            let audio = self.model.synthesize(chunk, voice, &mut rng)?;
            if audio.is_empty() {
                log::warn!("No audio produced for chunk {}: {chunk:?}", index + 1);
                continue;
            }
            combined.try_reserve(audio.len()).map_err(|e| {
                TtsError::Inference(format!("out of memory assembling audio: {e}"))
            })?;
            append_with_crossfade(&mut combined, &audio, fade);
        }

        if combined.is_empty() {
            return Err(TtsError::Inference(format!(
                "{} produced no audio for the given text",
                self.model.name()
            )));
        }

        let mut samples = resample(&combined, model_rate, self.config.sample_rate)?;
        let fixed = sanitize(&mut samples);
        if fixed > 0 {
            log::warn!("Clamped or zeroed {fixed} out-of-range samples");
        }

        let result = SynthesisResult {
            samples,
            sample_rate: self.config.sample_rate,
        };
        let elapsed = start.elapsed();
        log::info!(
            "Synthesized {:.2}s audio in {:.2?} ({:.1}x real-time)",
            result.duration_secs(),
            elapsed,
            result.duration_secs() / elapsed.as_secs_f64().max(1e-9)
        );
        Ok(result)
    }
}

fn check_device(device: Device) -> Result<()> {
    match device {
        Device::Cpu => Ok(()),
        #[cfg(feature = "cuda")]
        Device::Cuda(_) => Ok(()),
        #[cfg(not(feature = "cuda"))]
        Device::Cuda(_) => Err(TtsError::DeviceUnavailable(device.to_string())),
    }
}

#[cfg(feature = "pocket")]
fn load_backend(config: &EngineConfig) -> Result<Box<dyn SpeechModel>> {
    let model = crate::engines::pocket::PocketModel::load(config)?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "pocket"))]
fn load_backend(_config: &EngineConfig) -> Result<Box<dyn SpeechModel>> {
    Err(TtsError::Initialization(
        "no inference backend in this build (enable the `pocket` feature)".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{sine, write_test_wav};
    use crate::error::ErrorKind;
    use crate::model::testing::{ToneModel, TONE_RATE};

    fn engine(config: EngineConfig) -> Engine {
        let model = ToneModel {
            temperature: config.temperature,
            ..Default::default()
        };
        Engine::with_model(config, Box::new(model)).unwrap()
    }

    fn deterministic() -> Engine {
        engine(EngineConfig::builder().temperature(0.0).build().unwrap())
    }

    fn reference() -> Vec<f32> {
        sine(180.0, 5.0, 16000, 0.4)
    }

    #[test]
    fn encodes_voice_from_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.wav");
        write_test_wav(&path, &reference(), 16000, 1);

        let engine = deterministic();
        let voice = engine.encode_voice(&path).unwrap();
        assert!(voice.frames() > 0);

        // The voice is detached from the file.
        std::fs::remove_file(&path).unwrap();
        let audio = engine.generate("Hello world.", &voice).unwrap();
        assert!(!audio.samples.is_empty());
    }

    #[test]
    fn short_reference_is_a_quality_error() {
        let engine = deterministic();
        let err = engine
            .encode_voice_from_samples(&sine(180.0, 1.0, 16000, 0.4), 16000)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AudioQuality);
    }

    #[test]
    fn unreadable_reference_is_an_io_error() {
        let err = deterministic()
            .encode_voice(Path::new("/no/such/reference.wav"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn non_finite_reference_is_rejected() {
        let mut clip = reference();
        clip[10] = f32::NAN;
        let err = deterministic()
            .encode_voice_from_samples(&clip, 16000)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn empty_text_is_invalid_input() {
        let engine = deterministic();
        let voice = engine.encode_voice_from_samples(&reference(), 16000).unwrap();
        for text in ["", "   ", "\n"] {
            let err = engine.generate(text, &voice).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn output_meets_sample_contract() {
        let engine = deterministic();
        let voice = engine.encode_voice_from_samples(&reference(), 16000).unwrap();
        let audio = engine.generate("Hello world. <nan> and more.", &voice).unwrap();
        assert_eq!(audio.sample_rate, 24000);
        assert!(!audio.samples.is_empty());
        assert!(audio
            .samples
            .iter()
            .all(|s| s.is_finite() && (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn deterministic_config_repeats_bit_for_bit() {
        let engine = deterministic();
        let voice = engine.encode_voice_from_samples(&reference(), 16000).unwrap();
        let a = engine.generate("Same text twice.", &voice).unwrap();
        let b = engine.generate("Same text twice.", &voice).unwrap();
        assert_eq!(a.samples.len(), b.samples.len());
        assert!(a
            .samples
            .iter()
            .zip(&b.samples)
            .all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn seeded_sampling_repeats_and_unseeded_varies() {
        let seeded = engine(
            EngineConfig::builder()
                .temperature(0.7)
                .seed(42)
                .build()
                .unwrap(),
        );
        let voice = seeded.encode_voice_from_samples(&reference(), 16000).unwrap();
        let a = seeded.generate("Noisy text.", &voice).unwrap();
        let b = seeded.generate("Noisy text.", &voice).unwrap();
        assert_eq!(a.samples, b.samples);

        let unseeded = engine(EngineConfig::builder().temperature(0.7).build().unwrap());
        let c = unseeded.generate("Noisy text.", &voice).unwrap();
        let d = unseeded.generate("Noisy text.", &voice).unwrap();
        assert_ne!(c.samples, d.samples);
    }

    #[test]
    fn long_text_is_chunked_and_spliced() {
        let engine = engine(
            EngineConfig::builder()
                .temperature(0.0)
                .max_chunk_chars(20)
                .build()
                .unwrap(),
        );
        let voice = engine.encode_voice_from_samples(&reference(), 16000).unwrap();
        let text = "First part here. Second part here. Third part here.";
        let whole = engine.generate(text, &voice).unwrap();

        let chunks = prepare_chunks(text, 20).unwrap();
        assert_eq!(chunks.len(), 3);
        let raw: usize = chunks.iter().map(|c| c.chars().count() * 480).sum();
        // Two splices, each overlapping by one cross-fade window.
        assert_eq!(whole.samples.len(), raw - 2 * crossfade_samples(TONE_RATE));
    }

    #[test]
    fn model_failure_is_an_inference_error() {
        let engine = deterministic();
        let voice = engine.encode_voice_from_samples(&reference(), 16000).unwrap();
        let err = engine.generate("please <fail> now", &voice).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inference);

        let err = engine.generate("<mute>", &voice).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inference);
    }

    #[test]
    fn resamples_to_configured_rate() {
        let engine = engine(
            EngineConfig::builder()
                .temperature(0.0)
                .sample_rate(48000)
                .build()
                .unwrap(),
        );
        let voice = engine.encode_voice_from_samples(&reference(), 16000).unwrap();
        let audio = engine.generate("Hi there.", &voice).unwrap();
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(audio.samples.len(), "Hi there.".len() * 480 * 2);
    }

    #[test]
    fn rejects_voice_of_wrong_width() {
        let engine = deterministic();
        let foreign = VoiceEmbedding::new(vec![0.1; 12], 3, 4).unwrap();
        let err = engine.generate("Hello.", &foreign).unwrap_err();
        assert!(matches!(err, TtsError::VoiceMismatch { expected: 8, actual: 4 }));
    }

    #[test]
    fn voice_outlives_its_engine() {
        let voice = {
            let producer = deterministic();
            producer.encode_voice_from_samples(&reference(), 16000).unwrap()
        };
        let audio = deterministic().generate("Still usable.", &voice).unwrap();
        assert!(!audio.samples.is_empty());
    }

    #[test]
    fn engine_is_shareable_across_threads() {
        let engine = std::sync::Arc::new(deterministic());
        let voice = engine.encode_voice_from_samples(&reference(), 16000).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                let voice = voice.clone();
                std::thread::spawn(move || engine.generate("Concurrent call.", &voice).unwrap())
            })
            .collect();
        let outputs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(outputs.windows(2).all(|w| w[0].samples == w[1].samples));
    }

    #[cfg(not(feature = "pocket"))]
    #[test]
    fn new_without_backend_is_an_initialization_error() {
        let err = Engine::new(EngineConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Initialization);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn unavailable_device_is_an_initialization_error() {
        let config = EngineConfig::builder().device(Device::Cuda(0)).build().unwrap();
        let err = Engine::new(config).unwrap_err();
        assert!(matches!(err, TtsError::DeviceUnavailable(_)));
        assert_eq!(err.kind(), ErrorKind::Initialization);
    }
}
