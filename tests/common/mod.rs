#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use hound::{SampleFormat, WavSpec, WavWriter};
use image::{Rgba, RgbaImage};

use storyreel::background::{ClipInfo, FrameSource};
use storyreel::config::{Canvas, PipelineConfig, StyleConfig};
use storyreel::error::{BackgroundError, SynthesisError};
use storyreel::story::{Comment, StoryRecord};
use storyreel::tts::SpeechSynthesizer;

pub const RATE: u32 = 8_000;
pub const CANVAS: Canvas = Canvas {
    width: 108,
    height: 192,
};

pub fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
}

/// Speaks each call for the next scripted duration; fails on text containing `fail_on`.
#[derive(Clone, Default)]
pub struct ScriptedTts {
    durations: Arc<Mutex<VecDeque<f64>>>,
    pub spoken: Arc<Mutex<Vec<String>>>,
    fail_on: Option<String>,
}

impl ScriptedTts {
    pub fn new(durations: &[f64]) -> Self {
        Self {
            durations: Arc::new(Mutex::new(durations.iter().copied().collect())),
            ..Self::default()
        }
    }

    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SpeechSynthesizer for ScriptedTts {
    fn synthesize(&self, text: &str, _voice: &str, out_path: &Path) -> Result<(), SynthesisError> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.fail_on.as_deref().is_some_and(|n| text.contains(n)) {
            return Err(SynthesisError::Rejected {
                status: "exit status: 1".into(),
                stderr: "voice crashed".into(),
            });
        }
        let seconds = self.durations.lock().unwrap().pop_front().unwrap_or(1.0);
        let spec = WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut w = WavWriter::create(out_path, spec).unwrap();
        for i in 0..(seconds * RATE as f64).round() as usize {
            w.write_sample((i % 64) as i16).unwrap();
        }
        w.finalize().unwrap();
        Ok(())
    }
}

/// Canvas-sized clip whose frame `i` is filled with `[i, i >> 8, 7, 255]`; records requests.
pub struct NumberedClip {
    frames: u64,
    pub requested: Arc<Mutex<Vec<u64>>>,
}

impl NumberedClip {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            requested: Arc::default(),
        }
    }
}

impl FrameSource for NumberedClip {
    fn info(&self) -> ClipInfo {
        ClipInfo {
            width: CANVAS.width,
            height: CANVAS.height,
            frame_count: self.frames,
        }
    }

    fn frame(&mut self, index: u64) -> Result<RgbaImage, BackgroundError> {
        if index >= self.frames {
            return Err(BackgroundError::OutOfRange {
                index,
                len: self.frames,
            });
        }
        self.requested.lock().unwrap().push(index);
        Ok(RgbaImage::from_pixel(
            CANVAS.width,
            CANVAS.height,
            Rgba([index as u8, (index >> 8) as u8, 7, 255]),
        ))
    }
}

/// Layout scaled down to the test canvas, built-in font, no logo.
pub fn small_style() -> StyleConfig {
    let mut style = StyleConfig {
        canvas: CANVAS,
        font_candidates: vec![],
        logo_candidates: vec![],
        label_px: 8.0,
        logo_top: 4,
        ..StyleConfig::default()
    };
    for card in [&mut style.title, &mut style.story, &mut style.comment] {
        card.font_px = 8.0;
        card.top = 40;
        card.padding = 4;
        card.line_gap = 2;
    }
    style.rolling.font_px = 8.0;
    style.rolling.wrap_chars = 12;
    style.rolling.strip_y = 150;
    style.rolling.strip_height = 40;
    style.rolling.padding = 4;
    style
}

pub fn pipeline_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        results_dir: root.join("results"),
        work_root: root.join("work"),
        voice: "test-voice.onnx".into(),
        ..PipelineConfig::default()
    }
}

pub fn story(slug: &str, comment_scores: &[i64]) -> StoryRecord {
    StoryRecord {
        slug: slug.into(),
        title: "The Office Fridge War".into(),
        body: "Someone kept eating my lunch, so I set a trap.".into(),
        comments: comment_scores
            .iter()
            .enumerate()
            .map(|(i, s)| Comment {
                text: format!("comment number {i}"),
                author: format!("u/user{i}"),
                score: *s,
            })
            .collect(),
        category: "workplace".into(),
        url: String::new(),
    }
}
