//! One timed unit of the final video: background slice, caption layer and narration.

use image::RgbaImage;

use crate::audio::AudioSegment;
use crate::background::{BackgroundSlice, FittedBackground};
use crate::error::ComposeError;
use crate::render::draw::overlay;
use crate::render::{CaptionFrame, FrameRole, RollingCaption};

const DURATION_TOLERANCE: f64 = 1e-9;

/// A static card, optionally with a rolling caption strip over it.
#[derive(Debug, Clone)]
pub struct CaptionLayer {
    pub card: CaptionFrame,
    pub captions: Option<RollingCaption>,
}

impl CaptionLayer {
    pub fn card(card: CaptionFrame) -> Self {
        Self {
            card,
            captions: None,
        }
    }

    pub fn with_captions(mut self, captions: RollingCaption) -> Self {
        self.captions = Some(captions);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Sequence {
    pub index: usize,
    pub role: FrameRole,
    pub audio: AudioSegment,
    pub caption: CaptionLayer,
    pub slice: BackgroundSlice,
    pub opacity: f32,
}

impl Sequence {
    /// Always the narration length.
    pub fn duration(&self) -> f64 {
        self.audio.duration
    }

    pub fn start(&self) -> f64 {
        self.slice.start
    }

    pub fn frame_count(&self) -> u64 {
        self.slice.frame_count
    }

    /// Composites frame `local_frame` of this sequence: background, card, then caption strip.
    pub fn render_frame(
        &self,
        local_frame: u64,
        fps: u32,
        background: &mut FittedBackground,
    ) -> RgbaImage {
        let mut frame = background.frame_or_fallback(self.slice.master_frame(local_frame));
        overlay(&mut frame, &self.caption.card.image, 0, 0, self.opacity);
        if let Some(captions) = &self.caption.captions {
            let t = local_frame as f64 / fps.max(1) as f64;
            let strip = captions.frame_at(t);
            overlay(&mut frame, &strip, 0, captions.strip_y() as i32, 1.0);
        }
        frame
    }
}

/// Binds audio, caption and background for segment `index`. All three must last equally long.
pub fn compose(
    index: usize,
    audio: AudioSegment,
    caption: CaptionLayer,
    slice: BackgroundSlice,
    opacity: f32,
) -> Result<Sequence, ComposeError> {
    let caption_duration = caption
        .captions
        .as_ref()
        .map(RollingCaption::duration)
        .unwrap_or(audio.duration);
    if (audio.duration - slice.duration).abs() > DURATION_TOLERANCE
        || (audio.duration - caption_duration).abs() > DURATION_TOLERANCE
    {
        return Err(ComposeError::DurationMismatch {
            segment: index,
            audio: audio.duration,
            background: slice.duration,
            caption: caption_duration,
        });
    }
    Ok(Sequence {
        index,
        role: caption.card.role,
        audio,
        caption,
        slice,
        opacity: opacity.clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use image::Rgba;

    use super::*;
    use crate::background::{SolidColorSource, fit};
    use crate::config::{Canvas, Color, StyleConfig};
    use crate::render::{CaptionRenderer, Typeface};

    const CANVAS: Canvas = Canvas {
        width: 108,
        height: 192,
    };

    fn renderer() -> CaptionRenderer {
        let mut style = StyleConfig {
            canvas: CANVAS,
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
        CaptionRenderer::with_assets(&style, Typeface::Builtin, None)
    }

    fn audio(duration: f64) -> AudioSegment {
        AudioSegment {
            id: "01_story".into(),
            path: PathBuf::from("01_story.wav"),
            duration,
        }
    }

    fn background(duration: f64) -> FittedBackground {
        let solid = SolidColorSource::new(CANVAS, Color::rgb(0, 0, 200));
        fit(Box::new(solid), duration, CANVAS, 24)
    }

    #[test]
    fn durations_must_agree() {
        let r = renderer();
        let bg = background(3.0);
        let card = CaptionLayer::card(r.render_card(FrameRole::Story, "hello", None));

        let seq = compose(1, audio(2.0), card.clone(), bg.slice(0.0, 2.0), 0.95).unwrap();
        assert_eq!(seq.duration(), 2.0);
        assert_eq!(seq.frame_count(), 48);
        assert_eq!(seq.role, FrameRole::Story);

        let err = compose(1, audio(2.0), card.clone(), bg.slice(0.0, 2.5), 0.95).unwrap_err();
        assert!(matches!(err, ComposeError::DurationMismatch { segment: 1, .. }));

        let rolling = card.with_captions(r.rolling("one two three", 1.5));
        assert!(compose(1, audio(2.0), rolling, bg.slice(0.0, 2.0), 0.95).is_err());
    }

    #[test]
    fn rendered_frames_put_card_over_background() {
        let r = renderer();
        let mut bg = background(1.0);
        let layer = CaptionLayer::card(r.render_card(FrameRole::Title, "Big news", None));
        let seq = compose(0, audio(1.0), layer, bg.slice(0.0, 1.0), 0.95).unwrap();

        let frame = seq.render_frame(0, 24, &mut bg);
        assert_eq!(frame.dimensions(), (CANVAS.width, CANVAS.height));
        // Nothing is drawn at the left edge mid-height.
        assert_eq!(*frame.get_pixel(0, CANVAS.height / 2), Rgba([0, 0, 200, 255]));
        assert!(frame.pixels().all(|p| p.0[3] == 255));
        assert!(frame.pixels().any(|p| p.0 != [0, 0, 200, 255]));
    }

    #[test]
    fn rolling_strip_tracks_local_time() {
        let r = renderer();
        let mut bg = background(2.0);
        let text = "alpha beta gamma delta";
        let layer = CaptionLayer::card(r.render_card(FrameRole::Story, text, None))
            .with_captions(r.rolling(text, 2.0));
        let seq = compose(1, audio(2.0), layer, bg.slice(0.0, 2.0), 0.95).unwrap();
        let early = seq.render_frame(0, 24, &mut bg);
        let late = seq.render_frame(47, 24, &mut bg);
        assert_ne!(early, late);
        assert_eq!(early, seq.render_frame(0, 24, &mut bg));
    }
}
