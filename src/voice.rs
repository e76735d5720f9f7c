use std::sync::Arc;

use crate::error::{Result, TtsError};

/// Speaker conditioning extracted from one reference clip.
///
/// The shape (`frames × dim`) is fixed when the embedding is created. The
/// data is shared, so clones are cheap and a voice can be used from many
/// threads and engines at once. It holds no reference to the engine or the
/// file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceEmbedding {
    data: Arc<[f32]>,
    frames: usize,
    dim: usize,
}

impl VoiceEmbedding {
    /// Wrap a row-major `[frames, dim]` matrix.
    pub fn new(data: Vec<f32>, frames: usize, dim: usize) -> Result<Self> {
        if frames == 0 || dim == 0 {
            return Err(TtsError::Inference(format!(
                "empty voice embedding ({frames}x{dim})"
            )));
        }
        if data.len() != frames * dim {
            return Err(TtsError::Inference(format!(
                "voice embedding has {} values, expected {frames}x{dim}",
                data.len()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(TtsError::Inference(
                "voice embedding contains non-finite values".into(),
            ));
        }
        Ok(Self {
            data: data.into(),
            frames,
            dim,
        })
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Shape as `[batch, frames, dim]`, the layout conditioning graphs expect.
    pub fn shape(&self) -> [usize; 3] {
        [1, self.frames, self.dim]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_shape() {
        assert!(VoiceEmbedding::new(vec![0.0; 5], 2, 3).is_err());
        assert!(VoiceEmbedding::new(vec![], 0, 3).is_err());
    }

    #[test]
    fn rejects_nan() {
        assert!(VoiceEmbedding::new(vec![0.0, f32::NAN], 1, 2).is_err());
    }

    #[test]
    fn clones_share_storage() {
        let voice = VoiceEmbedding::new(vec![0.5; 6], 2, 3).unwrap();
        let copy = voice.clone();
        assert_eq!(voice.data().as_ptr(), copy.data().as_ptr());
        assert_eq!(copy.shape(), [1, 2, 3]);
    }
}
