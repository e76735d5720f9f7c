use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use pocket_tts::{Device, Engine, EngineConfig, Precision};

/// Synthesize speech in the voice of a reference recording.
#[derive(Parser, Debug)]
#[command(name = "pocket-tts", version, about)]
struct Cli {
    /// Text to speak
    text: String,
    /// Reference recording of the target voice (WAV, FLAC, OGG or MP3)
    voice_file: PathBuf,
    /// Where to write the 32-bit float WAV output
    output_file: PathBuf,

    /// JSON config file; flags given on the command line override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    models_dir: Option<PathBuf>,
    #[arg(long)]
    tokenizer: Option<PathBuf>,
    /// int8 or fp32
    #[arg(long)]
    precision: Option<Precision>,
    /// cpu, cuda or cuda:<id>
    #[arg(long)]
    device: Option<Device>,
    #[arg(long)]
    temperature: Option<f32>,
    #[arg(long)]
    lsd_steps: Option<usize>,
    #[arg(long)]
    max_frames: Option<usize>,
    /// Make sampling repeatable
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(dir) = &self.models_dir {
            config.models_dir = dir.clone();
        }
        if let Some(path) = &self.tokenizer {
            config.tokenizer_path = path.clone();
        }
        if let Some(precision) = self.precision {
            config.precision = precision;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(steps) = self.lsd_steps {
            config.lsd_steps = steps;
        }
        if let Some(frames) = self.max_frames {
            config.max_frames = frames;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.engine_config()?;

    let load_start = Instant::now();
    let engine = Engine::new(config)?;
    println!("Model loaded in {:.2?}", load_start.elapsed());

    let encode_start = Instant::now();
    let voice = engine.encode_voice(&cli.voice_file)?;
    println!(
        "Voice encoded in {:.2?} ({} frames)",
        encode_start.elapsed(),
        voice.frames()
    );

    let synth_start = Instant::now();
    let result = engine.generate(&cli.text, &voice)?;
    let synth_dur = synth_start.elapsed();

    let speedup = result.duration_secs() / synth_dur.as_secs_f64();
    println!(
        "Synthesized {:.2}s audio in {:.2?} ({:.1}x real-time)",
        result.duration_secs(),
        synth_dur,
        speedup
    );

    result.write_wav(&cli.output_file)?;
    println!("Saved to {}", cli.output_file.display());
    Ok(())
}
