use std::fmt;
use std::path::PathBuf;

/// The TTS collaborator could not turn a piece of text into usable audio.
#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("refusing to synthesize empty text")]
    EmptyText,

    #[error("unsupported voice '{0}'")]
    UnsupportedVoice(String),

    #[error("tts engine unreachable: {0}")]
    Unreachable(#[source] std::io::Error),

    #[error("tts engine rejected input ({status}): {stderr}")]
    Rejected { status: String, stderr: String },

    #[error("tts output '{path}' is not readable audio: {source}")]
    UnreadableAudio {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("tts output '{0}' contains no audio")]
    SilentOutput(PathBuf),
}

#[derive(thiserror::Error, Debug)]
pub enum BackgroundError {
    #[error("probe failed for '{path}': {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("frame rate must be positive")]
    ZeroFps,

    #[error("background frame {index} out of range (clip has {len} frames)")]
    OutOfRange { index: u64, len: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ComposeError {
    #[error(
        "duration mismatch in segment {segment}: audio {audio:.6}s, background {background:.6}s, caption {caption:.6}s"
    )]
    DurationMismatch {
        segment: usize,
        audio: f64,
        background: f64,
        caption: f64,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("wav error on '{path}': {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("ffmpeg concat failed: {0}")]
    Ffmpeg(String),

    #[error("nothing to concatenate")]
    Empty,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("invalid encode settings: {0}")]
    Settings(String),

    #[error("ffmpeg is required for encoding, but was not found on PATH")]
    FfmpegMissing,

    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),

    #[error("frame size mismatch: got {got_w}x{got_h}, expected {want_w}x{want_h}")]
    FrameSize {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },

    #[error("encoder used before begin() or after finish()")]
    NotStarted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pipeline stage names, as they appear in run history and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchText,
    Synthesize,
    Render,
    Fit,
    Compose,
    Concatenate,
    Encode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::FetchText => "fetch-text",
            Stage::Synthesize => "synthesize",
            Stage::Render => "render",
            Stage::Fit => "fit",
            Stage::Compose => "compose",
            Stage::Concatenate => "concatenate",
            Stage::Encode => "encode",
        };
        f.write_str(name)
    }
}

/// Fatal failure of one assembly run, attributed to the stage that raised it.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("story '{0}' has nothing to narrate")]
    EmptyStory(String),

    #[error("synthesis failed for segment '{segment}': {source}")]
    Synthesis {
        segment: String,
        #[source]
        source: SynthesisError,
    },

    #[error("background fitting failed: {0}")]
    Fit(#[source] BackgroundError),

    #[error("composition failed: {0}")]
    Compose(#[from] ComposeError),

    #[error("soundtrack concatenation failed: {0}")]
    Concatenate(#[source] AudioError),

    #[error("encoding failed: {0}")]
    Encode(#[source] EncodeError),

    #[error("i/o error during {stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn io(stage: Stage, source: std::io::Error) -> Self {
        Self::Io { stage, source }
    }

    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::EmptyStory(_) => Stage::FetchText,
            PipelineError::Synthesis { .. } => Stage::Synthesize,
            PipelineError::Fit(_) => Stage::Fit,
            PipelineError::Compose(_) => Stage::Compose,
            PipelineError::Concatenate(_) => Stage::Concatenate,
            PipelineError::Encode(_) => Stage::Encode,
            PipelineError::Io { stage, .. } => *stage,
        }
    }
}
