//! C ABI. See `include/pocket_tts.h` for the caller-side contract.
//!
//! Every function clears the calling thread's last error on entry, never
//! unwinds into the caller, and reports failure as a null handle or a `-1`
//! status with the cause in [`pocket_tts_get_last_error`].

mod buffers;
mod handles;
mod last_error;

use std::ffi::{c_char, c_int, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{ErrorKind, Result, TtsError};
use crate::voice::VoiceEmbedding;

/// Opaque engine handle. `0` is null.
pub type PocketTtsHandle = u64;

/// Opaque voice handle. `0` is null.
pub type PocketTtsVoice = u64;

/// Engine settings. Null strings and zero numbers select the default.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PocketTtsConfig {
    pub models_dir: *const c_char,
    pub tokenizer_path: *const c_char,
    /// `"int8"` or `"fp32"`.
    pub precision: *const c_char,
    /// `"cpu"`, `"cuda"` or `"cuda:<id>"`.
    pub device: *const c_char,
    /// `> 0` sets the sampling temperature, `< 0` requests deterministic
    /// (zero-temperature) sampling.
    pub temperature: f32,
    pub lsd_steps: c_int,
    pub max_frames: c_int,
    pub sample_rate: c_int,
    /// Nonzero makes sampling repeatable.
    pub seed: u64,
}

/// Audio returned by [`pocket_tts_generate`]; release with [`pocket_tts_free_audio`].
#[repr(C)]
#[derive(Debug)]
pub struct PocketTtsAudio {
    pub data: *mut f32,
    pub sample_count: c_int,
    pub sample_rate: c_int,
    /// Export id checked together with `data` on release; `0` once freed.
    pub id: u64,
}

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

static LOGGER: OnceCell<()> = OnceCell::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        // A host application may already have installed a logger.
        let _ = env_logger::try_init();
    });
}

/// Run one boundary call: clear the last error, catch panics, and turn an
/// `Err` into `fallback` plus a recorded message.
fn guard<T>(fallback: T, call: impl FnOnce() -> Result<T>) -> T {
    last_error::clear();
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            last_error::record(&err);
            fallback
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Panic at C boundary: {reason}");
            last_error::set(ErrorKind::Inference, &format!("internal panic: {reason}"));
            fallback
        }
    }
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(TtsError::InvalidInput(format!("{what} is null")));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| TtsError::InvalidInput(format!("{what} is not valid UTF-8")))
}

/// # Safety
/// As [`c_str`], but null maps to `None`.
unsafe fn opt_c_str<'a>(ptr: *const c_char, what: &str) -> Result<Option<&'a str>> {
    if ptr.is_null() {
        Ok(None)
    } else {
        unsafe { c_str(ptr, what) }.map(Some)
    }
}

/// # Safety
/// `config` must be null or point to a valid [`PocketTtsConfig`].
unsafe fn config_from_c(config: *const PocketTtsConfig) -> Result<EngineConfig> {
    let mut out = EngineConfig::default();
    let Some(c) = (unsafe { config.as_ref() }) else {
        return Ok(out);
    };

    if let Some(dir) = unsafe { opt_c_str(c.models_dir, "models_dir") }? {
        out.models_dir = dir.into();
    }
    if let Some(path) = unsafe { opt_c_str(c.tokenizer_path, "tokenizer_path") }? {
        out.tokenizer_path = path.into();
    }
    if let Some(precision) = unsafe { opt_c_str(c.precision, "precision") }? {
        out.precision = precision.parse()?;
    }
    if let Some(device) = unsafe { opt_c_str(c.device, "device") }? {
        out.device = device.parse()?;
    }
    if c.temperature > 0.0 {
        out.temperature = c.temperature;
    } else if c.temperature < 0.0 {
        out.temperature = 0.0;
    }
    if c.lsd_steps > 0 {
        out.lsd_steps = c.lsd_steps as usize;
    }
    if c.max_frames > 0 {
        out.max_frames = c.max_frames as usize;
    }
    if c.sample_rate > 0 {
        out.sample_rate = c.sample_rate as u32;
    }
    if c.seed != 0 {
        out.seed = Some(c.seed);
    }
    Ok(out)
}

fn lookup_engine(handle: PocketTtsHandle) -> Result<Arc<Engine>> {
    if handle == 0 {
        return Err(TtsError::InvalidInput("engine handle is null".into()));
    }
    handles::engines()
        .lock()
        .get(handle)
        .cloned()
        .ok_or_else(|| TtsError::InvalidInput(format!("unknown or destroyed engine handle {handle:#x}")))
}

fn lookup_voice(handle: PocketTtsVoice) -> Result<VoiceEmbedding> {
    if handle == 0 {
        return Err(TtsError::InvalidInput("voice handle is null".into()));
    }
    handles::voices()
        .lock()
        .get(handle)
        .cloned()
        .ok_or_else(|| TtsError::InvalidInput(format!("unknown or freed voice handle {handle:#x}")))
}

/// Load an engine. `config` may be null for defaults. Returns `0` on failure.
///
/// # Safety
/// `config` must be null or point to a valid [`PocketTtsConfig`] whose string
/// fields are null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn pocket_tts_create(config: *const PocketTtsConfig) -> PocketTtsHandle {
    init_logging();
    guard(0, || {
        let config = unsafe { config_from_c(config) }.map_err(TtsError::into_initialization)?;
        let engine = Engine::new(config)?;
        Ok(handles::engines().lock().insert(Arc::new(engine)))
    })
}

/// Release an engine. Unknown or already-destroyed handles are ignored and
/// reported through the last error. Voices made by the engine stay valid.
#[no_mangle]
pub extern "C" fn pocket_tts_destroy(handle: PocketTtsHandle) {
    guard((), || {
        let removed = handles::engines().lock().remove(handle);
        match removed {
            Some(engine) => {
                log::debug!("Destroying engine {handle:#x}");
                drop(engine);
                Ok(())
            }
            None => {
                log::warn!("pocket_tts_destroy: ignoring unknown engine handle {handle:#x}");
                Err(TtsError::InvalidInput(format!(
                    "unknown or already destroyed engine handle {handle:#x}"
                )))
            }
        }
    })
}

/// Encode a reference audio file into a voice. Returns `0` on failure.
///
/// # Safety
/// `audio_path` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn pocket_tts_encode_voice(
    handle: PocketTtsHandle,
    audio_path: *const c_char,
) -> PocketTtsVoice {
    guard(0, || {
        let engine = lookup_engine(handle)?;
        let path = unsafe { c_str(audio_path, "audio path") }?;
        let voice = engine.encode_voice(Path::new(path))?;
        Ok(handles::voices().lock().insert(voice))
    })
}

/// Encode mono samples at `sample_rate` into a voice. Returns `0` on failure.
///
/// # Safety
/// `samples` must be null or point to `sample_count` readable floats.
#[no_mangle]
pub unsafe extern "C" fn pocket_tts_encode_voice_from_samples(
    handle: PocketTtsHandle,
    samples: *const f32,
    sample_count: c_int,
    sample_rate: c_int,
) -> PocketTtsVoice {
    guard(0, || {
        let engine = lookup_engine(handle)?;
        if samples.is_null() {
            return Err(TtsError::InvalidInput("samples pointer is null".into()));
        }
        if sample_count <= 0 || sample_rate <= 0 {
            return Err(TtsError::InvalidInput(format!(
                "invalid sample count {sample_count} or rate {sample_rate}"
            )));
        }
        let samples = unsafe { std::slice::from_raw_parts(samples, sample_count as usize) };
        let voice = engine.encode_voice_from_samples(samples, sample_rate as u32)?;
        Ok(handles::voices().lock().insert(voice))
    })
}

/// Release a voice. Unknown or already-freed handles are ignored and reported
/// through the last error. Audio generated with the voice is unaffected.
#[no_mangle]
pub extern "C" fn pocket_tts_free_voice(voice: PocketTtsVoice) {
    guard((), || match handles::voices().lock().remove(voice) {
        Some(_) => Ok(()),
        None => {
            log::warn!("pocket_tts_free_voice: ignoring unknown voice handle {voice:#x}");
            Err(TtsError::InvalidInput(format!(
                "unknown or already freed voice handle {voice:#x}"
            )))
        }
    })
}

/// Synthesize `text` with `voice` into `*out`. Returns `0` on success and
/// `-1` on failure, in which case `*out` is left untouched.
///
/// # Safety
/// `text` must be null or NUL-terminated; `out` must be null or point to a
/// writable [`PocketTtsAudio`].
#[no_mangle]
pub unsafe extern "C" fn pocket_tts_generate(
    handle: PocketTtsHandle,
    text: *const c_char,
    voice: PocketTtsVoice,
    out: *mut PocketTtsAudio,
) -> c_int {
    guard(-1, || {
        if out.is_null() {
            return Err(TtsError::InvalidInput("output pointer is null".into()));
        }
        let engine = lookup_engine(handle)?;
        let voice = lookup_voice(voice)?;
        let text = unsafe { c_str(text, "text") }?;

        let result = engine.generate(text, &voice)?;
        let sample_count = c_int::try_from(result.samples.len()).map_err(|_| {
            TtsError::Inference(format!("{} samples exceed the C int range", result.samples.len()))
        })?;
        let sample_rate = c_int::try_from(result.sample_rate)
            .map_err(|_| TtsError::Inference("sample rate exceeds the C int range".into()))?;

        let (data, id) = buffers::export(result.samples);
        unsafe {
            out.write(PocketTtsAudio {
                data,
                sample_count,
                sample_rate,
                id,
            });
        }
        Ok(0)
    })
}

/// Release audio from [`pocket_tts_generate`], then null `data` and zero
/// `sample_count` and `id`. Buffers not produced by this library, already
/// freed, or presented with a different `id` are left alone and reported
/// through the last error.
///
/// # Safety
/// `audio` must be null or point to a valid [`PocketTtsAudio`].
#[no_mangle]
pub unsafe extern "C" fn pocket_tts_free_audio(audio: *mut PocketTtsAudio) {
    guard((), || {
        let Some(audio) = (unsafe { audio.as_mut() }) else {
            return Err(TtsError::InvalidInput("audio pointer is null".into()));
        };
        if audio.data.is_null() {
            return Err(TtsError::InvalidInput("audio buffer already released".into()));
        }
        if !buffers::release(audio.data, audio.id) {
            log::warn!("pocket_tts_free_audio: ignoring foreign buffer {:p}", audio.data);
            return Err(TtsError::InvalidInput(
                "audio buffer was not allocated by this library or was already released".into(),
            ));
        }
        audio.data = std::ptr::null_mut();
        audio.sample_count = 0;
        audio.id = 0;
        Ok(())
    })
}

/// The calling thread's last error, or `""` if its last call succeeded.
/// The pointer is valid until the thread's next call into this library.
#[no_mangle]
pub extern "C" fn pocket_tts_get_last_error() -> *const c_char {
    panic::catch_unwind(last_error::as_ptr).unwrap_or(b"\0".as_ptr() as *const c_char)
}

/// Library version as a static NUL-terminated string.
#[no_mangle]
pub extern "C" fn pocket_tts_version() -> *const c_char {
    last_error::clear();
    VERSION.as_ptr() as *const c_char
}
