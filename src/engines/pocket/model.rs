use std::borrow::Cow;
use std::path::Path;

use ndarray::{Array2, Array3};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::TensorRef;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use super::state::StreamState;
use super::tokenizer::TextTokenizer;
use super::{DECODE_CHUNK_FRAMES, EMBED_DIM, LATENT_DIM, SAMPLES_PER_FRAME, SAMPLE_RATE};
use crate::config::{Device, EngineConfig};
use crate::error::{Result, TtsError};
use crate::model::SpeechModel;
use crate::voice::VoiceEmbedding;

/// Sampling settings copied out of [`EngineConfig`] at load time.
#[derive(Debug, Clone, Copy)]
struct Sampling {
    temperature: f32,
    lsd_steps: usize,
    max_frames: usize,
    frames_after_eos: usize,
    eos_threshold: f32,
}

/// The Pocket TTS ONNX pipeline.
///
/// Each graph sits behind its own lock so that the stages of concurrent calls
/// interleave. Recurrent state lives on the caller's stack.
pub struct PocketModel {
    encoder: Mutex<Session>,
    conditioner: Mutex<Session>,
    flow_lm: Mutex<Session>,
    flow: Mutex<Session>,
    decoder: Mutex<Session>,
    tokenizer: TextTokenizer,
    /// Output names of `flow_lm_main`: conditioning, EOS logit.
    lm_outputs: (String, String),
    decoder_output: String,
    lm_state: StreamState,
    decoder_state: StreamState,
    /// `(s, t)` pairs of the Euler schedule.
    schedule: Vec<(f32, f32)>,
    sampling: Sampling,
}

impl PocketModel {
    /// Load every graph and the tokenizer described by `config`.
    pub fn load(config: &EngineConfig) -> Result<Self> {
        let dir = &config.models_dir;
        let suffix = config.precision.suffix();
        log::info!(
            "Loading Pocket TTS models from {} (precision {:?})",
            dir.display(),
            config.precision
        );

        let paths = [
            dir.join("mimi_encoder.onnx"),
            dir.join("text_conditioner.onnx"),
            dir.join(format!("flow_lm_main{suffix}.onnx")),
            dir.join(format!("flow_lm_flow{suffix}.onnx")),
            dir.join(format!("mimi_decoder{suffix}.onnx")),
        ];
        for path in &paths {
            if !path.exists() {
                return Err(TtsError::ModelNotFound(path.display().to_string()));
            }
        }
        let [encoder, conditioner, flow_lm, flow, decoder] = paths;

        let encoder = init_session(&encoder, config)?;
        let conditioner = init_session(&conditioner, config)?;
        let flow_lm = init_session(&flow_lm, config)?;
        let flow = init_session(&flow, config)?;
        let decoder = init_session(&decoder, config)?;

        let lm_outputs = match flow_lm.outputs() {
            [cond, eos, ..] => (cond.name().to_string(), eos.name().to_string()),
            _ => {
                return Err(TtsError::Initialization(
                    "flow_lm_main must output conditioning and an EOS logit".into(),
                ))
            }
        };
        let decoder_output = decoder
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or_else(|| TtsError::Initialization("mimi_decoder has no outputs".into()))?;

        let lm_state = StreamState::zeros(&flow_lm)?;
        let decoder_state = StreamState::zeros(&decoder)?;
        log::info!(
            "Detected {} LM state tensors, {} decoder state tensors",
            lm_state.len(),
            decoder_state.len()
        );

        let tokenizer = TextTokenizer::load(&config.tokenizer_path)?;

        Ok(Self {
            encoder: Mutex::new(encoder),
            conditioner: Mutex::new(conditioner),
            flow_lm: Mutex::new(flow_lm),
            flow: Mutex::new(flow),
            decoder: Mutex::new(decoder),
            tokenizer,
            lm_outputs,
            decoder_output,
            lm_state,
            decoder_state,
            schedule: euler_schedule(config.lsd_steps),
            sampling: Sampling {
                temperature: config.temperature,
                lsd_steps: config.lsd_steps,
                max_frames: config.max_frames,
                frames_after_eos: config.frames_after_eos,
                eos_threshold: config.eos_threshold,
            },
        })
    }

    fn text_embeddings(&self, ids: &[i64]) -> Result<Array3<f32>> {
        let ids = Array2::from_shape_vec((1, ids.len()), ids.to_vec())?;
        let mut session = self.conditioner.lock();
        let outputs = session.run(ort::inputs![
            "token_ids" => TensorRef::from_array_view(ids.view())?,
        ])?;
        let embeddings = outputs["embeddings"].try_extract_array::<f32>()?;
        let data: Vec<f32> = embeddings.iter().copied().collect();
        let frames = data.len() / EMBED_DIM;
        Ok(Array3::from_shape_vec((1, frames, EMBED_DIM), data)?)
    }

    /// One `flow_lm_main` pass. Returns the conditioning vector and EOS logit.
    fn lm_step(
        &self,
        sequence: &Array3<f32>,
        text: &Array3<f32>,
        state: &mut StreamState,
    ) -> Result<(Vec<f32>, f32)> {
        let mut inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> = vec![
            ("sequence".into(), TensorRef::from_array_view(sequence.view())?.into()),
            ("text_embeddings".into(), TensorRef::from_array_view(text.view())?.into()),
        ];
        let state_inputs = state.inputs()?;
        inputs.extend(state_inputs);

        let mut session = self.flow_lm.lock();
        let outputs = session.run(inputs)?;

        let (cond_name, eos_name) = &self.lm_outputs;
        let conditioning: Vec<f32> = outputs[cond_name.as_str()]
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();
        let eos = outputs[eos_name.as_str()]
            .try_extract_array::<f32>()?
            .iter()
            .next()
            .copied()
            .ok_or_else(|| TtsError::Inference("empty EOS logit".into()))?;

        for (name, value) in outputs.iter() {
            state.absorb(name, &value)?;
        }
        Ok((conditioning, eos))
    }

    /// Integrate the flow from noise to one latent frame.
    fn sample_latent(&self, conditioning: &[f32], rng: &mut StdRng) -> Result<Vec<f32>> {
        let mut x = vec![0.0f32; LATENT_DIM];
        if self.sampling.temperature > 0.0 {
            let normal = Normal::new(0.0, self.sampling.temperature.sqrt())
                .map_err(|e| TtsError::Inference(e.to_string()))?;
            for v in x.iter_mut() {
                *v = normal.sample(rng);
            }
        }

        let dt = 1.0 / self.sampling.lsd_steps as f32;
        let c = Array2::from_shape_vec((1, conditioning.len()), conditioning.to_vec())?;
        let mut session = self.flow.lock();
        for &(s, t) in &self.schedule {
            let s = Array2::from_elem((1, 1), s);
            let t = Array2::from_elem((1, 1), t);
            let xs = Array2::from_shape_vec((1, LATENT_DIM), x.clone())?;
            let outputs = session.run(ort::inputs![
                "c" => TensorRef::from_array_view(c.view())?,
                "s" => TensorRef::from_array_view(s.view())?,
                "t" => TensorRef::from_array_view(t.view())?,
                "x" => TensorRef::from_array_view(xs.view())?,
            ])?;
            let direction = outputs["flow_dir"].try_extract_array::<f32>()?;
            for (v, d) in x.iter_mut().zip(direction.iter()) {
                *v += d * dt;
            }
        }
        Ok(x)
    }

    fn decode(&self, latents: &[Vec<f32>]) -> Result<Vec<f32>> {
        let mut state = self.decoder_state.clone();
        let mut audio = Vec::with_capacity(latents.len() * SAMPLES_PER_FRAME);

        for chunk in latents.chunks(DECODE_CHUNK_FRAMES) {
            let data: Vec<f32> = chunk.iter().flatten().copied().collect();
            let latent = Array3::from_shape_vec((1, chunk.len(), LATENT_DIM), data)?;

            let mut inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
                vec![("latent".into(), TensorRef::from_array_view(latent.view())?.into())];
            inputs.extend(state.inputs()?);

            let mut session = self.decoder.lock();
            let outputs = session.run(inputs)?;
            audio.extend(
                outputs[self.decoder_output.as_str()]
                    .try_extract_array::<f32>()?
                    .iter()
                    .copied(),
            );
            for (name, value) in outputs.iter() {
                state.absorb(name, &value)?;
            }
        }
        Ok(audio)
    }
}

impl SpeechModel for PocketModel {
    fn name(&self) -> &str {
        "pocket"
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn embedding_dim(&self) -> usize {
        EMBED_DIM
    }

    fn embed(&self, waveform: &[f32]) -> Result<VoiceEmbedding> {
        let audio = Array3::from_shape_vec((1, 1, waveform.len()), waveform.to_vec())?;
        let mut session = self.encoder.lock();
        let outputs = session.run(ort::inputs![
            "audio" => TensorRef::from_array_view(audio.view())?,
        ])?;
        let latents = outputs["latents"].try_extract_array::<f32>()?;
        let data: Vec<f32> = latents.iter().copied().collect();
        let frames = data.len() / EMBED_DIM;
        VoiceEmbedding::new(data, frames, EMBED_DIM)
    }

    fn synthesize(&self, text: &str, voice: &VoiceEmbedding, rng: &mut StdRng) -> Result<Vec<f32>> {
        let ids = self.tokenizer.encode(text)?;
        let text_emb = self.text_embeddings(&ids)?;
        let voice_emb = Array3::from_shape_vec(
            (1, voice.frames(), voice.dim()),
            voice.data().to_vec(),
        )?;

        let no_sequence = Array3::<f32>::zeros((1, 0, LATENT_DIM));
        let no_text = Array3::<f32>::zeros((1, 0, EMBED_DIM));

        let mut state = self.lm_state.clone();
        self.lm_step(&no_sequence, &voice_emb, &mut state)?;
        self.lm_step(&no_sequence, &text_emb, &mut state)?;

        // NaN frame marks the start of the latent sequence.
        let mut current = Array3::from_elem((1, 1, LATENT_DIM), f32::NAN);
        let mut latents: Vec<Vec<f32>> = Vec::new();
        let mut eos_step: Option<usize> = None;

        for step in 0..self.sampling.max_frames {
            let (conditioning, eos_logit) = self.lm_step(&current, &no_text, &mut state)?;
            if eos_step.is_none() && eos_logit > self.sampling.eos_threshold {
                log::debug!("EOS at frame {step} (logit {eos_logit:.2})");
                eos_step = Some(step);
            }
            if eos_step.is_some_and(|eos| step >= eos + self.sampling.frames_after_eos) {
                break;
            }

            let latent = self.sample_latent(&conditioning, rng)?;
            current = Array3::from_shape_vec((1, 1, LATENT_DIM), latent.clone())?;
            latents.push(latent);
        }
        if eos_step.is_none() {
            log::warn!(
                "No end of speech within {} frames; output truncated",
                self.sampling.max_frames
            );
        }
        log::debug!("Generated {} latent frames for {} tokens", latents.len(), ids.len());

        self.decode(&latents)
    }
}

/// `(s, t)` pairs `(j/n, (j+1)/n)` for `j` in `0..n`.
fn euler_schedule(steps: usize) -> Vec<(f32, f32)> {
    let dt = 1.0 / steps as f32;
    (0..steps)
        .map(|j| {
            let s = j as f32 / steps as f32;
            (s, s + dt)
        })
        .collect()
}

fn execution_providers(device: Device) -> Result<Vec<ExecutionProviderDispatch>> {
    match device {
        Device::Cpu => Ok(vec![CPUExecutionProvider::default().build()]),
        #[cfg(feature = "cuda")]
        Device::Cuda(id) => Ok(vec![ort::execution_providers::CUDAExecutionProvider::default()
            .with_device_id(id as i32)
            .build()
            .error_on_failure()]),
        #[cfg(not(feature = "cuda"))]
        Device::Cuda(_) => Err(TtsError::DeviceUnavailable(device.to_string())),
    }
}

fn init_session(onnx_path: &Path, config: &EngineConfig) -> Result<Session> {
    log::debug!("Creating session for {}", onnx_path.display());
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_execution_providers(execution_providers(config.device)?)?;

    if let Some(threads) = config.num_threads {
        builder = builder
            .with_intra_threads(threads)?
            .with_inter_threads(threads)?;
    }

    Ok(builder.commit_from_file(onnx_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn schedule_covers_unit_interval() {
        let schedule = euler_schedule(4);
        assert_eq!(schedule, vec![(0.0, 0.25), (0.25, 0.5), (0.5, 0.75), (0.75, 1.0)]);
    }

    #[test]
    fn load_reports_missing_graph() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::builder()
            .models_dir(dir.path())
            .build()
            .unwrap();
        let err = PocketModel::load(&config).err().unwrap();
        assert!(matches!(err, TtsError::ModelNotFound(p) if p.ends_with("mimi_encoder.onnx")));
    }

    fn models_available() -> Option<EngineConfig> {
        let config = EngineConfig::default();
        if config.models_dir.join("mimi_encoder.onnx").exists() && config.tokenizer_path.exists() {
            Some(config)
        } else {
            eprintln!("Skipping: models not found in {}", config.models_dir.display());
            None
        }
    }

    #[test]
    fn generates_speech_with_real_models() {
        let Some(config) = models_available() else {
            return;
        };
        let model = PocketModel::load(&config).unwrap();
        let reference = crate::audio::sine(160.0, 5.0, SAMPLE_RATE, 0.3);
        let voice = model.embed(&reference).unwrap();
        assert_eq!(voice.dim(), EMBED_DIM);

        let mut rng = StdRng::seed_from_u64(7);
        let audio = model.synthesize("Hello world.", &voice, &mut rng).unwrap();
        assert!(!audio.is_empty());
        assert_eq!(audio.len() % SAMPLES_PER_FRAME, 0);
    }
}
