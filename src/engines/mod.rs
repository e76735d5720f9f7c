//! Speech model backends.
//!
//! Each backend implements [`crate::SpeechModel`] and is compiled in with a
//! Cargo feature:
//! - `pocket` - Pocket TTS flow-matching model (ONNX Runtime)
//! - `cuda` - `pocket` with the CUDA execution provider

#[cfg(feature = "pocket")]
pub mod pocket;
