//! Pocket flow-matching TTS on ONNX Runtime.
//!
//! Five graphs are loaded from `models_dir`:
//!
//! | file                            | role                                     |
//! |---------------------------------|------------------------------------------|
//! | `mimi_encoder.onnx`             | reference audio → voice latents          |
//! | `text_conditioner.onnx`         | token ids → text embeddings              |
//! | `flow_lm_main[_int8].onnx`      | stateful LM: conditioning + EOS logit    |
//! | `flow_lm_flow[_int8].onnx`      | flow direction for Euler sampling        |
//! | `mimi_decoder[_int8].onnx`      | stateful decoder: latents → 24 kHz audio |
//!
//! plus a `tokenizer.json` for the text conditioner.
//!
//! # Usage
//!
//! ```rust,no_run
//! use pocket_tts::engines::pocket::PocketModel;
//! use pocket_tts::{Engine, EngineConfig};
//!
//! let config = EngineConfig::builder().models_dir("models/onnx").build()?;
//! let model = PocketModel::load(&config)?;
//! let engine = Engine::with_model(config, Box::new(model))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod model;
mod state;
mod tokenizer;

pub use model::PocketModel;
pub use tokenizer::TextTokenizer;

/// Output sample rate of the Mimi decoder.
pub const SAMPLE_RATE: u32 = 24000;

/// Width of one voice/text embedding frame.
pub const EMBED_DIM: usize = 1024;

/// Width of one generated latent frame.
pub const LATENT_DIM: usize = 32;

/// Audio samples produced per latent frame (80 ms @ 24kHz).
pub const SAMPLES_PER_FRAME: usize = 1920;

/// Latent frames fed to the decoder per call.
const DECODE_CHUNK_FRAMES: usize = 15;
