use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use hound::{WavReader, WavWriter};
use tracing::{debug, info, warn};

use crate::error::{AudioError, SynthesisError};
use crate::tts::SpeechSynthesizer;

/// Synthesized narration for one segment. The file lives in the run's work directory.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub id: String,
    pub path: PathBuf,
    pub duration: f64,
}

pub fn wav_duration_seconds(path: &Path) -> Result<f64, hound::Error> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    Ok(frames / spec.sample_rate as f64)
}

pub struct SegmentAudioBuilder<'a> {
    tts: &'a dyn SpeechSynthesizer,
    voice: &'a str,
    dir: &'a Path,
}

impl<'a> SegmentAudioBuilder<'a> {
    pub fn new(tts: &'a dyn SpeechSynthesizer, voice: &'a str, dir: &'a Path) -> Self {
        Self { tts, voice, dir }
    }

    pub fn build(&self, id: &str, text: &str) -> Result<AudioSegment, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        let path = self.dir.join(format!("{id}.wav"));
        debug!("Synthesizing {} ({} chars)", id, text.chars().count());
        self.tts.synthesize(text, self.voice, &path)?;

        let duration =
            wav_duration_seconds(&path).map_err(|source| SynthesisError::UnreadableAudio {
                path: path.clone(),
                source,
            })?;
        if duration <= 0.0 {
            return Err(SynthesisError::SilentOutput(path));
        }
        info!("Segment {} audio: {:.2}s", id, duration);
        Ok(AudioSegment {
            id: id.to_string(),
            path,
            duration,
        })
    }
}

/// Join the segment WAVs end to end into `out`.
///
/// Samples are copied directly when every part shares one format, which keeps the joined
/// length equal to the sum of the parts. Mixed formats go through ffmpeg's concat demuxer.
pub fn concat_wavs(parts: &[&Path], out: &Path) -> Result<(), AudioError> {
    let Some(first) = parts.first() else {
        return Err(AudioError::Empty);
    };
    let wav_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| AudioError::Wav { path, source }
    };

    let spec = WavReader::open(first).map_err(wav_err(*first))?.spec();
    let mut uniform = true;
    for part in &parts[1..] {
        let other = WavReader::open(part).map_err(wav_err(*part))?.spec();
        if other != spec {
            uniform = false;
            break;
        }
    }
    if !uniform {
        warn!("Segment audio formats differ; concatenating through ffmpeg");
        return ffmpeg_concat(parts, out);
    }

    let mut writer = WavWriter::create(out, spec).map_err(wav_err(out))?;
    for part in parts {
        let mut reader = WavReader::open(part).map_err(wav_err(*part))?;
        match spec.sample_format {
            hound::SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    writer
                        .write_sample(sample.map_err(wav_err(*part))?)
                        .map_err(wav_err(out))?;
                }
            }
            hound::SampleFormat::Int => {
                for sample in reader.samples::<i32>() {
                    writer
                        .write_sample(sample.map_err(wav_err(*part))?)
                        .map_err(wav_err(out))?;
                }
            }
        }
    }
    writer.finalize().map_err(wav_err(out))?;
    Ok(())
}

fn ffmpeg_concat(parts: &[&Path], out: &Path) -> Result<(), AudioError> {
    let list_path = out.with_extension("txt");
    {
        let mut f = File::create(&list_path)?;
        for p in parts {
            let abs = fs::canonicalize(p)?;
            let escaped = abs.to_string_lossy().replace('\'', r"'\''");
            writeln!(f, "file '{escaped}'")?;
        }
    }

    let run = |codec: &[&str]| -> Result<bool, AudioError> {
        let status = Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(codec)
            .arg(out)
            .status()?;
        Ok(status.success())
    };

    let result = if run(&["-c", "copy"])? {
        Ok(())
    } else {
        warn!("ffmpeg concat with copy failed; retrying with re-encode");
        if run(&["-c:a", "pcm_s16le"])? {
            Ok(())
        } else {
            Err(AudioError::Ffmpeg(
                "ffmpeg failed to concatenate WAV files".to_string(),
            ))
        }
    };
    let _ = fs::remove_file(&list_path);
    result
}
