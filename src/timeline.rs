//! Drives one story from text to a finished video file.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioSegment, SegmentAudioBuilder, concat_wavs};
use crate::background::{self, BackgroundSource, FittedBackground, frames_for};
use crate::compose::{CaptionLayer, Sequence, compose};
use crate::config::{PipelineConfig, StyleConfig};
use crate::encode::{FfmpegSink, FrameSink, SinkConfig};
use crate::error::{BackgroundError, EncodeError, PipelineError, Stage};
use crate::render::{CaptionRenderer, FrameRole};
use crate::story::{Segment, SegmentRole, StoryRecord, plan_segments};
use crate::subtitle::{SrtEntry, word_timings, write_srt};
use crate::tts::{PiperTts, SpeechSynthesizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    FetchText,
    Synthesize,
    Fit,
    Render,
    Compose,
    Concatenate,
    Encode,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::FetchText => "fetch-text",
            RunState::Synthesize => "synthesize",
            RunState::Fit => "fit",
            RunState::Render => "render",
            RunState::Compose => "compose",
            RunState::Concatenate => "concatenate",
            RunState::Encode => "encode",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Ordered sequences. Sequence `i` starts where `i - 1` ends.
#[derive(Debug, Clone)]
pub struct Timeline {
    sequences: Vec<Sequence>,
    fps: u32,
}

impl Timeline {
    pub fn new(fps: u32) -> Self {
        Self {
            sequences: Vec::new(),
            fps,
        }
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Sum of the narration lengths, accumulated in sequence order.
    pub fn duration(&self) -> f64 {
        self.sequences.iter().fold(0.0, |acc, s| acc + s.duration())
    }

    pub fn frame_count(&self) -> u64 {
        frames_for(self.duration(), self.fps)
    }
}

/// Renders `segment`'s card, slices the master background at `cursor`, and appends the
/// composed sequence. Returns the cursor for the next segment.
pub fn append_segment(
    timeline: &mut Timeline,
    cursor: f64,
    segment: &Segment,
    audio: AudioSegment,
    layer: CaptionLayer,
    master: &FittedBackground,
    opacity: f32,
) -> Result<f64, PipelineError> {
    let slice = master.slice(cursor, audio.duration);
    let next = cursor + audio.duration;
    let sequence = compose(segment.index, audio, layer, slice, opacity)?;
    debug!(
        "Sequence {} ({}): {:.3}s..{:.3}s, frames {}..{}",
        sequence.index,
        segment.role.as_str(),
        cursor,
        next,
        slice.first_frame,
        slice.first_frame + slice.frame_count
    );
    timeline.sequences.push(sequence);
    Ok(next)
}

/// Card for `segment`, plus a rolling caption of what is spoken for narrated text.
pub fn render_layer(renderer: &CaptionRenderer, segment: &Segment, duration: f64) -> CaptionLayer {
    let role = FrameRole::from(segment.role);
    let card = renderer.render_card(role, &segment.display, segment.label.as_deref());
    let layer = CaptionLayer::card(card);
    match segment.role {
        SegmentRole::Story | SegmentRole::Comment if renderer.style().rolling.enabled => {
            layer.with_captions(renderer.rolling(&segment.narration, duration))
        }
        _ => layer,
    }
}

/// Streams every frame of `timeline` into `sink`. Returns the number of frames written.
pub fn encode_timeline(
    sink: &mut dyn FrameSink,
    timeline: &Timeline,
    master: &mut FittedBackground,
    cfg: SinkConfig,
) -> Result<u64, EncodeError> {
    let fps = timeline.fps();
    sink.begin(cfg)?;
    let mut index = 0u64;
    for sequence in timeline.sequences() {
        for local in 0..sequence.frame_count() {
            let frame = sequence.render_frame(local, fps, master);
            sink.push_frame(index, &frame)?;
            index += 1;
        }
    }
    sink.end()?;
    Ok(index)
}

/// Encoder output written beside its final name, plus the optional subtitle sidecar.
/// Both land on `commit`; dropping without it removes them.
struct PendingOutput {
    video: NamedTempFile,
    subtitles: Option<NamedTempFile>,
}

fn partial_beside(dest: &Path, suffix: &str) -> io::Result<NamedTempFile> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(&format!("{stem}."))
        .suffix(suffix)
        .tempfile_in(dir)
}

impl PendingOutput {
    fn create(dest: &Path) -> io::Result<Self> {
        Ok(Self {
            video: partial_beside(dest, ".partial.mp4")?,
            subtitles: None,
        })
    }

    fn video_path(&self) -> &Path {
        self.video.path()
    }

    fn write_subtitles(&mut self, dest: &Path, cues: &[SrtEntry]) -> io::Result<()> {
        let file = partial_beside(dest, ".partial.srt")?;
        write_srt(file.path(), cues)?;
        self.subtitles = Some(file);
        Ok(())
    }

    /// Renames the video to `dest` and the subtitles to `dest` with an `.srt` extension.
    /// If the subtitles cannot be placed, the video is removed again.
    fn commit(self, dest: &Path) -> io::Result<()> {
        let Self { video, subtitles } = self;
        video.persist(dest).map_err(|e| e.error)?;
        if let Some(srt) = subtitles {
            if let Err(e) = srt.persist(dest.with_extension("srt")) {
                if let Err(rm) = fs::remove_file(dest) {
                    warn!("Could not remove {}: {}", dest.display(), rm);
                }
                return Err(e.error);
            }
        }
        Ok(())
    }
}

pub struct Assembler {
    config: PipelineConfig,
    synthesizer: Box<dyn SpeechSynthesizer>,
    sink: Box<dyn FrameSink>,
    history: Vec<RunState>,
}

impl Assembler {
    /// Piper for speech and ffmpeg for encoding.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            synthesizer: Box::new(PiperTts::default()),
            sink: Box::new(FfmpegSink::new()),
            history: Vec::new(),
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Box<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// States entered by the last run, in order.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Init)
    }

    /// `<results_dir>/<output_prefix>_<slug>.mp4`
    pub fn output_path(&self, story: &StoryRecord) -> PathBuf {
        self.config.results_dir.join(format!(
            "{}_{}.mp4",
            self.config.output_prefix,
            story.file_stem()
        ))
    }

    fn enter(&mut self, state: RunState) {
        info!("Stage: {}", state);
        self.history.push(state);
    }

    pub fn assemble(
        &mut self,
        story: &StoryRecord,
        background: BackgroundSource,
        style: &StyleConfig,
        max_comments: usize,
    ) -> Result<PathBuf, PipelineError> {
        self.history.clear();
        self.enter(RunState::Init);
        let result = self.run(story, background, style, max_comments);
        match &result {
            Ok(path) => {
                self.enter(RunState::Done);
                info!("Video written to {}", path.display());
            }
            Err(e) => {
                error!("Assembly failed at {}: {}", e.stage(), e);
                self.enter(RunState::Failed);
            }
        }
        let trail: Vec<String> = self.history.iter().map(RunState::to_string).collect();
        debug!("Run history: {}", trail.join(" -> "));
        result
    }

    fn run(
        &mut self,
        story: &StoryRecord,
        background: BackgroundSource,
        style: &StyleConfig,
        max_comments: usize,
    ) -> Result<PathBuf, PipelineError> {
        let fps = self.config.fps;

        self.enter(RunState::FetchText);
        let segments = plan_segments(story, &self.config.narration, max_comments);
        if segments.is_empty() {
            return Err(PipelineError::EmptyStory(story.slug.clone()));
        }
        info!("Planned {} segments for '{}'", segments.len(), story.slug);

        let work = fs::create_dir_all(&self.config.work_root)
            .and_then(|()| {
                tempfile::Builder::new()
                    .prefix(&format!("{}-", story.file_stem()))
                    .tempdir_in(&self.config.work_root)
            })
            .map_err(|e| PipelineError::io(Stage::Synthesize, e))?;
        debug!("Work dir {}", work.path().display());

        self.enter(RunState::Synthesize);
        let audio = {
            let builder =
                SegmentAudioBuilder::new(self.synthesizer.as_ref(), &self.config.voice, work.path());
            segments
                .iter()
                .map(|segment| {
                    builder
                        .build(&segment.id(), &segment.narration)
                        .map_err(|source| PipelineError::Synthesis {
                            segment: segment.id(),
                            source,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        let total = audio.iter().fold(0.0, |acc, a| acc + a.duration);
        info!("Narration totals {:.2}s over {} segments", total, audio.len());

        self.enter(RunState::Fit);
        if fps == 0 {
            return Err(PipelineError::Fit(BackgroundError::ZeroFps));
        }
        let source = background::resolve(background, style.canvas, fps, style.fallback_background);
        let mut master = background::fit(source, total, style.canvas, fps)
            .with_fallback(style.fallback_background)
            .with_dim(style.background_dim);
        info!(
            "Background fitted: {} frames, {} loop(s) of {}",
            master.frame_count(),
            master.loops(),
            master.period()
        );

        let renderer = CaptionRenderer::new(style);
        let mut timeline = Timeline::new(fps);
        let mut cues: Vec<SrtEntry> = Vec::new();
        let soundtrack_parts: Vec<PathBuf> = audio.iter().map(|a| a.path.clone()).collect();
        let mut cursor = 0.0;
        for (segment, audio) in segments.iter().zip(audio) {
            self.enter(RunState::Render);
            let layer = render_layer(&renderer, segment, audio.duration);
            if self.config.subtitles_sidecar {
                cues.extend(word_timings(&segment.narration, cursor, audio.duration));
            }
            self.enter(RunState::Compose);
            cursor = append_segment(
                &mut timeline,
                cursor,
                segment,
                audio,
                layer,
                &master,
                style.card_opacity,
            )?;
        }

        self.enter(RunState::Concatenate);
        let soundtrack = work.path().join("soundtrack.wav");
        let parts: Vec<&Path> = soundtrack_parts.iter().map(PathBuf::as_path).collect();
        concat_wavs(&parts, &soundtrack).map_err(PipelineError::Concatenate)?;

        self.enter(RunState::Encode);
        let out = self.output_path(story);
        fs::create_dir_all(&self.config.results_dir)
            .map_err(|e| PipelineError::io(Stage::Encode, e))?;
        let mut pending =
            PendingOutput::create(&out).map_err(|e| PipelineError::io(Stage::Encode, e))?;
        let cfg = SinkConfig {
            out_path: pending.video_path().to_path_buf(),
            audio_path: Some(soundtrack),
            width: style.canvas.width,
            height: style.canvas.height,
            fps,
            duration: timeline.duration(),
        };
        let frames = match encode_timeline(self.sink.as_mut(), &timeline, &mut master, cfg) {
            Ok(frames) => frames,
            Err(e) => {
                self.sink.abort();
                return Err(PipelineError::Encode(e));
            }
        };
        info!(
            "Encoded {} frames ({:.2}s at {} fps)",
            frames,
            timeline.duration(),
            fps
        );
        if self.config.subtitles_sidecar {
            pending
                .write_subtitles(&out, &cues)
                .map_err(|e| PipelineError::io(Stage::Encode, e))?;
        }
        pending
            .commit(&out)
            .map_err(|e| PipelineError::io(Stage::Encode, e))?;
        if self.config.subtitles_sidecar {
            info!("Subtitles written to {}", out.with_extension("srt").display());
        }
        Ok(out)
    }
}

/// One run with the default configuration: Piper voice, ffmpeg encoder, `results/` output.
pub fn assemble(
    story: &StoryRecord,
    background: BackgroundSource,
    style: &StyleConfig,
    max_comments: usize,
) -> Result<PathBuf, PipelineError> {
    Assembler::new(PipelineConfig::default()).assemble(story, background, style, max_comments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(text: &str) -> SrtEntry {
        SrtEntry {
            start: 0.0,
            end: 1.0,
            text: text.to_string(),
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn pending_output_is_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        let mut pending = PendingOutput::create(&dest).unwrap();
        fs::write(pending.video_path(), b"x").unwrap();
        pending.write_subtitles(&dest, &[cue("hi")]).unwrap();
        assert_eq!(entries(dir.path()).len(), 2);
        drop(pending);
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn commit_places_video_and_subtitles_together() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        let mut pending = PendingOutput::create(&dest).unwrap();
        let partial = pending.video_path().to_path_buf();
        assert!(partial.to_string_lossy().ends_with(".partial.mp4"));
        fs::write(&partial, b"y").unwrap();
        pending.write_subtitles(&dest, &[cue("hi")]).unwrap();
        pending.commit(&dest).unwrap();

        assert_eq!(entries(dir.path()), ["out.mp4", "out.srt"]);
        assert_eq!(fs::read(&dest).unwrap(), b"y");
        assert!(fs::read_to_string(dir.path().join("out.srt")).unwrap().contains("hi"));
    }

    #[test]
    fn blocked_subtitles_take_the_video_back_out() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        fs::create_dir(dir.path().join("out.srt")).unwrap();
        let mut pending = PendingOutput::create(&dest).unwrap();
        fs::write(pending.video_path(), b"y").unwrap();
        pending.write_subtitles(&dest, &[cue("hi")]).unwrap();

        assert!(pending.commit(&dest).is_err());
        assert_eq!(entries(dir.path()), ["out.srt"]);
    }

    #[test]
    fn output_path_uses_prefix_and_sanitized_slug() {
        let assembler = Assembler::new(PipelineConfig::default());
        let story = StoryRecord {
            slug: "My Story!".into(),
            title: "t".into(),
            body: String::new(),
            comments: vec![],
            category: String::new(),
            url: String::new(),
        };
        let out = assembler.output_path(&story);
        assert_eq!(out.parent(), Some(Path::new("results")));
        let name = out.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("ThreadJuice_"));
        assert!(name.ends_with(".mp4"));
        assert!(!name.contains(' ') && !name.contains('!'));
    }

    #[test]
    fn states_display_in_kebab_case() {
        assert_eq!(RunState::FetchText.to_string(), "fetch-text");
        assert_eq!(RunState::Done.to_string(), "done");
    }
}
