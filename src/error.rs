//! Error types shared by the engine and the C boundary.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TtsError>;

/// Coarse failure category reported to callers.
///
/// The C boundary never encodes the kind in its status code; it is carried in
/// the last-error message instead, so new causes don't change the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad configuration, missing or corrupt weights, unavailable device.
    Initialization,
    /// Reference audio could not be read or decoded.
    Io,
    /// Reference audio is too short, silent or otherwise unusable.
    AudioQuality,
    /// Empty or malformed text, invalid or stale handle, bad arguments.
    InvalidInput,
    /// Internal model failure or allocation failure during inference.
    Inference,
}

impl ErrorKind {
    /// Stable name used as the prefix of boundary error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Initialization => "InitializationError",
            ErrorKind::Io => "IOError",
            ErrorKind::AudioQuality => "AudioQualityError",
            ErrorKind::InvalidInput => "InvalidInputError",
            ErrorKind::Inference => "InferenceError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error("Initialization failed: {0}")]
    Initialization(String),
    #[error("Model file not found: {0}")]
    ModelNotFound(String),
    #[error("Device '{0}' is not available in this build")]
    DeviceUnavailable(String),
    #[error("Invalid config: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Audio decode error: {0}")]
    Decode(String),
    #[error("Reference audio is too short: {actual:.2}s (minimum {minimum:.2}s)")]
    ReferenceTooShort { actual: f32, minimum: f32 },
    #[error("Reference audio is silent (RMS {rms_db:.1} dBFS)")]
    ReferenceSilent { rms_db: f32 },
    #[error("Reference audio has too little voiced signal: {voiced:.2}s (minimum {minimum:.2}s)")]
    ReferenceUnvoiced { voiced: f32, minimum: f32 },
    #[error("Text is empty")]
    EmptyText,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Voice embedding dimension {actual} does not match model dimension {expected}")]
    VoiceMismatch { expected: usize, actual: usize },
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Resampling failed: {0}")]
    Resample(String),
    #[cfg(feature = "pocket")]
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[cfg(feature = "pocket")]
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[cfg(feature = "pocket")]
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
}

impl TtsError {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TtsError::Initialization(_)
            | TtsError::ModelNotFound(_)
            | TtsError::DeviceUnavailable(_)
            | TtsError::Config(_) => ErrorKind::Initialization,
            TtsError::Io(_) | TtsError::Wav(_) | TtsError::Decode(_) => ErrorKind::Io,
            TtsError::ReferenceTooShort { .. }
            | TtsError::ReferenceSilent { .. }
            | TtsError::ReferenceUnvoiced { .. } => ErrorKind::AudioQuality,
            TtsError::EmptyText | TtsError::InvalidInput(_) | TtsError::VoiceMismatch { .. } => {
                ErrorKind::InvalidInput
            }
            TtsError::Inference(_) | TtsError::Resample(_) => ErrorKind::Inference,
            #[cfg(feature = "pocket")]
            TtsError::Ort(_) | TtsError::Shape(_) | TtsError::Tokenizer(_) => ErrorKind::Inference,
        }
    }

    /// Re-tag any error raised while loading the engine as an initialization
    /// failure, keeping its message.
    pub(crate) fn into_initialization(self) -> TtsError {
        match self.kind() {
            ErrorKind::Initialization => self,
            _ => TtsError::Initialization(self.to_string()),
        }
    }
}

impl From<symphonia::core::errors::Error> for TtsError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        TtsError::Decode(e.to_string())
    }
}

impl From<rubato::ResamplerConstructionError> for TtsError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        TtsError::Resample(e.to_string())
    }
}

impl From<rubato::ResampleError> for TtsError {
    fn from(e: rubato::ResampleError) -> Self {
        TtsError::Resample(e.to_string())
    }
}
