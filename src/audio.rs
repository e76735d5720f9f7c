//! Reference audio decoding, resampling and the quality gate run before a
//! clip is turned into a voice embedding.

use std::fs::File;
use std::path::Path;

use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Result, TtsError};

/// Silence floor for the whole clip.
const SILENCE_DBFS: f32 = -60.0;

/// Per-frame level above which a frame counts as voiced.
const VOICED_DBFS: f32 = -50.0;

/// Analysis frame for the voiced-signal measurement.
const FRAME_MS: u32 = 20;

/// Decode an audio file into mono f32 samples and its native sample rate.
///
/// WAV files go through `hound`; anything else (FLAC, Ogg/Vorbis, MP3, ...)
/// and WAV variants `hound` rejects (64-bit float, mu-law, ADPCM) are probed
/// with `symphonia`, which detects the container from its content.
pub fn load_audio(path: &Path) -> Result<(Vec<f32>, u32)> {
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"))
        .unwrap_or(false);

    if is_wav {
        match read_wav(path) {
            Ok(decoded) => return Ok(decoded),
            Err(TtsError::Wav(hound::Error::IoError(e))) => return Err(e.into()),
            Err(e) => {
                log::debug!("hound cannot read {} ({e}), probing with symphonia", path.display());
            }
        }
    }
    decode_with_symphonia(path)
}

/// Read a WAV file, down-mixing all channels to mono.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 8) => reader
            .into_samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, 24) => reader
            .into_samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8_388_608.0))
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, 32) => reader
            .into_samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2_147_483_648.0))
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        _ => return Err(TtsError::Wav(hound::Error::Unsupported)),
    };

    Ok((downmix(&interleaved, spec.channels as usize), spec.sample_rate))
}

fn decode_with_symphonia(path: &Path) -> Result<(Vec<f32>, u32)> {
    let src = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| TtsError::Decode(format!("no audio track in {}", path.display())))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!("Skipping corrupt packet in {}: {msg}", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        mono.extend(downmix(buf.samples(), spec.channels.count()));
    }

    if sample_rate == 0 {
        return Err(TtsError::Decode(format!(
            "unknown sample rate in {}",
            path.display()
        )));
    }
    Ok((mono, sample_rate))
}

/// Average interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Input frames per FFT resampler block.
const RESAMPLE_CHUNK: usize = 1024;

/// Band-limited resampling with rubato's FFT resampler.
///
/// The filter delay is removed, so the output lines up with the input and has
/// exactly `round(len * to_sr / from_sr)` samples.
pub fn resample(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>> {
    if from_sr == to_sr || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_sr as usize, to_sr as usize, RESAMPLE_CHUNK, 2, 1)?;
    let delay = resampler.output_delay();
    let expected = ((samples.len() as f64) * to_sr as f64 / from_sr as f64)
        .round()
        .max(1.0) as usize;
    let mut out = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut pos = 0;
    loop {
        let needed = resampler.input_frames_next();
        if samples.len() - pos < needed {
            break;
        }
        let chunk: [&[f32]; 1] = [&samples[pos..pos + needed]];
        let block = resampler.process(&chunk[..], None)?;
        out.extend_from_slice(&block[0]);
        pos += needed;
    }
    if pos < samples.len() {
        let tail: [&[f32]; 1] = [&samples[pos..]];
        let block = resampler.process_partial(Some(&tail[..]), None)?;
        out.extend_from_slice(&block[0]);
    }
    // Drain the filter tail.
    while out.len() < expected + delay {
        let block = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    let mut out = out.split_off(delay.min(out.len()));
    out.resize(expected, 0.0);
    Ok(out)
}

/// Scale the clip down to full scale if any sample exceeds it.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 1.0 {
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (energy / samples.len() as f64).sqrt() as f32
}

fn to_dbfs(level: f32) -> f32 {
    20.0 * level.max(1e-10).log10()
}

/// Measurements taken by [`check_reference`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceStats {
    pub duration_secs: f32,
    pub voiced_secs: f32,
    pub rms_dbfs: f32,
}

/// Reject clips that are too short, silent, or mostly silence.
///
/// A clip needs at least half of `min_secs` of voiced frames on top of the
/// total duration requirement.
pub fn check_reference(samples: &[f32], sample_rate: u32, min_secs: f32) -> Result<ReferenceStats> {
    let duration_secs = samples.len() as f32 / sample_rate as f32;
    if duration_secs < min_secs {
        return Err(TtsError::ReferenceTooShort {
            actual: duration_secs,
            minimum: min_secs,
        });
    }

    let rms_dbfs = to_dbfs(rms(samples));
    if rms_dbfs < SILENCE_DBFS {
        return Err(TtsError::ReferenceSilent { rms_db: rms_dbfs });
    }

    let frame_len = ((sample_rate * FRAME_MS) / 1000).max(1) as usize;
    let voiced_frames = samples
        .chunks(frame_len)
        .filter(|frame| to_dbfs(rms(frame)) >= VOICED_DBFS)
        .count();
    let voiced_secs = (voiced_frames * frame_len) as f32 / sample_rate as f32;
    let min_voiced = min_secs / 2.0;
    if voiced_secs < min_voiced {
        return Err(TtsError::ReferenceUnvoiced {
            voiced: voiced_secs,
            minimum: min_voiced,
        });
    }

    Ok(ReferenceStats {
        duration_secs,
        voiced_secs,
        rms_dbfs,
    })
}

/// Bring a decoded clip to `target_rate`, validate it and cap its length.
pub fn prepare_reference(
    samples: &[f32],
    sample_rate: u32,
    target_rate: u32,
    min_secs: f32,
    max_secs: f32,
) -> Result<Vec<f32>> {
    let mut audio = resample(samples, sample_rate, target_rate)?;
    normalize_peak(&mut audio);

    let stats = check_reference(&audio, target_rate, min_secs)?;
    log::debug!(
        "Reference clip: {:.2}s ({:.2}s voiced, {:.1} dBFS)",
        stats.duration_secs,
        stats.voiced_secs,
        stats.rms_dbfs
    );

    let max_samples = (max_secs * target_rate as f32) as usize;
    if audio.len() > max_samples {
        log::debug!(
            "Trimming reference from {} to {} samples",
            audio.len(),
            max_samples
        );
        audio.truncate(max_samples);
    }
    Ok(audio)
}

#[cfg(test)]
pub(crate) fn sine(freq: f32, secs: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let n = (secs * sample_rate as f32) as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

#[cfg(test)]
pub(crate) fn write_test_wav(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        for _ in 0..channels {
            writer.write_sample((s * 32767.0) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_stereo_wav_as_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let tone = sine(220.0, 0.5, 16000, 0.5);
        write_test_wav(&path, &tone, 16000, 2);

        let (mono, rate) = load_audio(&path).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(mono.len(), tone.len());
        assert!((mono[100] - tone[100]).abs() < 1e-3);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_audio(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
    }

    #[test]
    fn garbage_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"this is not audio at all").unwrap();
        let err = load_audio(&path).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
    }

    #[test]
    fn detects_container_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.audio");
        let tone = sine(220.0, 0.5, 16000, 0.5);
        write_test_wav(&path, &tone, 16000, 1);

        let (mono, rate) = load_audio(&path).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(mono.len(), tone.len());
        assert!(mono.iter().zip(&tone).all(|(a, b)| (a - b).abs() < 1e-3));
    }

    #[test]
    fn falls_back_for_wav_hound_cannot_read() {
        // 64-bit float WAV: valid RIFF/WAVE that hound refuses.
        let tone = sine(300.0, 0.25, 22050, 0.5);
        let data_len = (tone.len() * 8) as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&22050u32.to_le_bytes());
        bytes.extend_from_slice(&(22050u32 * 8).to_le_bytes());
        bytes.extend_from_slice(&8u16.to_le_bytes());
        bytes.extend_from_slice(&64u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for &s in &tone {
            bytes.extend_from_slice(&(s as f64).to_le_bytes());
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("double.wav");
        std::fs::write(&path, &bytes).unwrap();
        assert!(read_wav(&path).is_err());

        let (mono, rate) = load_audio(&path).unwrap();
        assert_eq!(rate, 22050);
        assert_eq!(mono.len(), tone.len());
        assert!(mono.iter().zip(&tone).all(|(a, b)| (a - b).abs() < 1e-6));
    }

    #[test]
    fn resample_changes_length_by_ratio() {
        let input = sine(100.0, 1.0, 16000, 0.5);
        let output = resample(&input, 16000, 24000).unwrap();
        assert_eq!(output.len(), 24000);
        assert_eq!(resample(&input, 16000, 16000).unwrap(), input);

        let short = resample(&input[..100], 44100, 24000).unwrap();
        assert_eq!(short.len(), 54);
    }

    #[test]
    fn resample_keeps_passband_and_removes_aliases() {
        // Interior samples only; the edges carry filter ramp-up.
        let interior = |s: &[f32]| rms(&s[2400..s.len() - 2400]);

        let voice_band = sine(1000.0, 1.0, 48000, 0.5);
        let kept = resample(&voice_band, 48000, 24000).unwrap();
        assert_eq!(kept.len(), 24000);
        assert!((interior(&kept) - 0.3536).abs() < 0.02, "rms {}", interior(&kept));

        // 20 kHz is above the 12 kHz Nyquist limit of the target rate.
        let too_high = sine(20000.0, 1.0, 48000, 0.5);
        let folded = resample(&too_high, 48000, 24000).unwrap();
        assert!(interior(&folded) < 0.01, "aliased rms {}", interior(&folded));
    }

    #[test]
    fn resample_is_aligned_with_input() {
        // A delayed output would put the peak of the tone late.
        let mut click = vec![0.0; 16000];
        click[8000] = 1.0;
        let out = resample(&click, 16000, 24000).unwrap();
        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak as i64 - 12000).abs() <= 3, "peak at {peak}");
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        let mixed = downmix(&[0.25, 0.5, 0.75], 3);
        assert_eq!(mixed.len(), 1);
        assert!((mixed[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn normalizes_only_overdriven_clips() {
        let mut quiet = vec![0.2, -0.4];
        normalize_peak(&mut quiet);
        assert_eq!(quiet, vec![0.2, -0.4]);

        let mut loud = vec![2.0, -4.0];
        normalize_peak(&mut loud);
        assert_eq!(loud, vec![0.5, -1.0]);
    }

    #[test]
    fn rejects_short_clip() {
        let clip = sine(200.0, 1.0, 24000, 0.5);
        let err = check_reference(&clip, 24000, 3.0).unwrap_err();
        assert!(matches!(err, TtsError::ReferenceTooShort { .. }));
    }

    #[test]
    fn rejects_silent_clip() {
        let clip = vec![0.0; 24000 * 4];
        let err = check_reference(&clip, 24000, 3.0).unwrap_err();
        assert!(matches!(err, TtsError::ReferenceSilent { .. }));
    }

    #[test]
    fn rejects_clip_with_a_blip_of_signal() {
        let mut clip = vec![0.0; 24000 * 4];
        clip[..4800].copy_from_slice(&sine(200.0, 0.2, 24000, 0.9));
        let err = check_reference(&clip, 24000, 3.0).unwrap_err();
        assert!(matches!(err, TtsError::ReferenceUnvoiced { .. }));
    }

    #[test]
    fn prepare_trims_to_maximum() {
        let clip = sine(200.0, 8.0, 16000, 0.5);
        let prepared = prepare_reference(&clip, 16000, 24000, 3.0, 5.0).unwrap();
        assert_eq!(prepared.len(), 5 * 24000);
    }
}
