use std::path::{Path, PathBuf};
use std::str::FromStr;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TtsError};

/// Output sample rate of the Pocket model family.
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Weight precision to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 8-bit quantized generator and decoder graphs (CPU-optimized).
    #[default]
    Int8,
    /// Full 32-bit float graphs.
    Fp32,
}

impl Precision {
    /// Filename suffix used by the quantized graphs.
    pub fn suffix(self) -> &'static str {
        match self {
            Precision::Int8 => "_int8",
            Precision::Fp32 => "",
        }
    }
}

impl FromStr for Precision {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int8" | "q8" => Ok(Precision::Int8),
            "fp32" | "f32" => Ok(Precision::Fp32),
            other => Err(TtsError::Config(format!(
                "unknown precision '{other}' (expected 'int8' or 'fp32')"
            ))),
        }
    }
}

/// Execution device for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    /// CUDA GPU by ordinal. Requires the `cuda` feature.
    Cuda(u32),
}

impl FromStr for Device {
    type Err = TtsError;

    /// Accepts `cpu`, `cuda` and `cuda:<ordinal>`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => return Ok(Device::Cpu),
            "cuda" | "gpu" => return Ok(Device::Cuda(0)),
            _ => {}
        }
        if let Some(ordinal) = s.strip_prefix("cuda:") {
            return ordinal
                .parse()
                .map(Device::Cuda)
                .map_err(|_| TtsError::Config(format!("invalid CUDA ordinal in '{s}'")));
        }
        Err(TtsError::Config(format!("unknown device '{s}'")))
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

/// Engine configuration.
///
/// Every field has a default, so a JSON config file only needs the keys it
/// overrides:
///
/// ```
/// use pocket_tts::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .models_dir("models/onnx")
///     .temperature(0.0)
///     .build()?;
/// assert_eq!(config.sample_rate, 24000);
/// # Ok::<(), pocket_tts::TtsError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default, build_fn(error = "TtsError"))]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the ONNX graphs.
    #[builder(setter(into))]
    pub models_dir: PathBuf,
    /// Path to the `tokenizer.json` for the text conditioner.
    #[builder(setter(into))]
    pub tokenizer_path: PathBuf,
    pub precision: Precision,
    pub device: Device,
    /// Intra-op thread count. `None` keeps the runtime default.
    #[builder(setter(strip_option))]
    pub num_threads: Option<usize>,
    /// Variance of the latent noise. `0.0` makes generation deterministic.
    pub temperature: f32,
    /// Euler steps of the flow-matching sampler.
    pub lsd_steps: usize,
    /// Hard cap on generated frames per text chunk.
    pub max_frames: usize,
    /// Frames still generated after the end-of-speech logit fires.
    pub frames_after_eos: usize,
    /// End-of-speech logit threshold.
    pub eos_threshold: f32,
    /// Sample rate of returned audio.
    pub sample_rate: u32,
    /// Seed for the latent noise. Re-applied on every call when set.
    #[builder(setter(strip_option))]
    pub seed: Option<u64>,
    /// Upper bound on characters per generation chunk.
    pub max_chunk_chars: usize,
    /// Shortest usable reference clip, in seconds.
    pub min_reference_secs: f32,
    /// Reference clips are trimmed to this length before embedding.
    pub max_reference_secs: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models/onnx"),
            tokenizer_path: PathBuf::from("models/tokenizer.json"),
            precision: Precision::default(),
            device: Device::default(),
            num_threads: None,
            temperature: 0.7,
            lsd_steps: 10,
            max_frames: 500,
            frames_after_eos: 3,
            eos_threshold: -4.0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            seed: None,
            max_chunk_chars: 300,
            min_reference_secs: 3.0,
            max_reference_secs: 5.0,
        }
    }
}

impl From<derive_builder::UninitializedFieldError> for TtsError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        TtsError::Config(e.to_string())
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Read a config from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| TtsError::Config(format!("Failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges that would otherwise surface as confusing inference failures.
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(TtsError::Config(format!(
                "temperature must be a finite value >= 0, got {}",
                self.temperature
            )));
        }
        if self.lsd_steps == 0 {
            return Err(TtsError::Config("lsd_steps must be at least 1".into()));
        }
        if self.max_frames == 0 {
            return Err(TtsError::Config("max_frames must be at least 1".into()));
        }
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(TtsError::Config(format!(
                "sample_rate {} is outside 8000..=192000",
                self.sample_rate
            )));
        }
        if self.num_threads == Some(0) {
            return Err(TtsError::Config("num_threads must be at least 1".into()));
        }
        if !self.eos_threshold.is_finite() {
            return Err(TtsError::Config("eos_threshold must be finite".into()));
        }
        if self.max_chunk_chars < 16 {
            return Err(TtsError::Config(format!(
                "max_chunk_chars must be at least 16, got {}",
                self.max_chunk_chars
            )));
        }
        if !(self.min_reference_secs > 0.0) {
            return Err(TtsError::Config("min_reference_secs must be positive".into()));
        }
        if !(self.max_reference_secs >= self.min_reference_secs) {
            return Err(TtsError::Config(format!(
                "max_reference_secs ({}) must be >= min_reference_secs ({})",
                self.max_reference_secs, self.min_reference_secs
            )));
        }
        Ok(())
    }
}
