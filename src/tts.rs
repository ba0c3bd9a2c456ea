use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, error};

use crate::error::SynthesisError;

/// A text-to-speech engine that writes one WAV file per call.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str, voice: &str, out_path: &Path) -> Result<(), SynthesisError>;
}

/// Piper, driven through its CLI. The voice is the path of an `.onnx` model.
#[derive(Debug, Clone)]
pub struct PiperTts {
    binary: PathBuf,
}

impl Default for PiperTts {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("piper"),
        }
    }
}

impl PiperTts {
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl SpeechSynthesizer for PiperTts {
    fn synthesize(&self, text: &str, voice: &str, out_path: &Path) -> Result<(), SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        if !Path::new(voice).exists() {
            return Err(SynthesisError::UnsupportedVoice(voice.to_string()));
        }

        debug!("Calling piper for {}", out_path.display());
        let mut child = Command::new(&self.binary)
            .arg("--model")
            .arg(voice)
            .arg("--output_file")
            .arg(out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(SynthesisError::Unreachable)?;

        {
            let stdin = child.stdin.as_mut().ok_or_else(|| {
                SynthesisError::Unreachable(std::io::Error::other("piper stdin not captured"))
            })?;
            stdin
                .write_all(text.as_bytes())
                .map_err(SynthesisError::Unreachable)?;
        }

        let output = child
            .wait_with_output()
            .map_err(SynthesisError::Unreachable)?;
        if !output.status.success() {
            error!("Piper failed for {}", out_path.display());
            return Err(SynthesisError::Rejected {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
