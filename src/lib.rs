//! # pocket-tts
//!
//! Voice-cloning text-to-speech with a handle-based C ABI.
//!
//! ## Features
//!
//! - **Voice cloning**: encode a few seconds of reference audio into a
//!   reusable [`VoiceEmbedding`]
//! - **Long text**: input is split at sentence boundaries and the generated
//!   pieces are cross-faded back together
//! - **C ABI**: opaque handles, caller-owned audio buffers and a per-thread
//!   last-error string (see [`ffi`] and `include/pocket_tts.h`)
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! pocket-tts = { version = "2026.2", features = ["pocket"] }
//! ```
//!
//! ```ignore
//! use std::path::Path;
//! use pocket_tts::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let voice = engine.encode_voice(Path::new("speaker.wav"))?;
//!
//! let result = engine.generate("Hello, world!", &voice)?;
//! result.write_wav(Path::new("output.wav"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod config;
pub mod engine;
pub mod engines;
pub mod error;
pub mod ffi;
pub mod model;
pub mod splice;
pub mod text;
pub mod voice;

use std::path::Path;

pub use config::{Device, EngineConfig, EngineConfigBuilder, Precision};
pub use engine::Engine;
pub use error::{ErrorKind, Result, TtsError};
pub use model::SpeechModel;
pub use voice::VoiceEmbedding;

/// The result of a synthesis (text-to-speech) operation.
///
/// Contains mono f32 samples in `[-1.0, 1.0]` and their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio (24000 unless configured otherwise)
    pub sample_rate: u32,
}

impl SynthesisResult {
    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}
