//! Joining per-chunk audio and enforcing the output sample contract.

/// Cross-fade length used at every chunk splice.
pub const CROSSFADE_MS: u32 = 10;

/// Cross-fade length in samples at `sample_rate`.
pub fn crossfade_samples(sample_rate: u32) -> usize {
    (sample_rate * CROSSFADE_MS / 1000) as usize
}

/// Append `src` to `dst`, blending the overlapping region linearly so the
/// splice has no step discontinuity.
pub fn append_with_crossfade(dst: &mut Vec<f32>, src: &[f32], crossfade_samples: usize) {
    let overlap = crossfade_samples.min(dst.len()).min(src.len());
    if overlap == 0 {
        dst.extend_from_slice(src);
        return;
    }

    let dst_start = dst.len() - overlap;
    for i in 0..overlap {
        let t = (i + 1) as f32 / (overlap as f32 + 1.0);
        let left = dst[dst_start + i] * (1.0 - t);
        let right = src[i] * t;
        dst[dst_start + i] = left + right;
    }

    dst.extend_from_slice(&src[overlap..]);
}

/// Replace non-finite samples with silence and clamp into `[-1.0, 1.0]`.
///
/// Returns how many samples were changed.
pub fn sanitize(samples: &mut [f32]) -> usize {
    let mut touched = 0;
    for s in samples.iter_mut() {
        if !s.is_finite() {
            *s = 0.0;
            touched += 1;
        } else if s.abs() > 1.0 {
            *s = s.clamp(-1.0, 1.0);
            touched += 1;
        }
    }
    touched
}
