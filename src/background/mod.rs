//! Background clip fitting: loop, trim and cover-crop a source to an exact duration.

mod ffmpeg;

use std::fmt;
use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tracing::{debug, info, warn};

use crate::config::{Canvas, Color};
use crate::error::BackgroundError;
use crate::render::draw::dim;

pub use ffmpeg::{FfmpegFrameSource, ProbedClip, probe_clip};

/// Frame geometry and length of a clip, counted at the pipeline frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
}

/// Random access to the frames of a clip.
pub trait FrameSource: Send {
    fn info(&self) -> ClipInfo;
    fn frame(&mut self, index: u64) -> Result<RgbaImage, BackgroundError>;
}

/// One-frame clip of a single color; loops to any length.
#[derive(Debug, Clone)]
pub struct SolidColorSource {
    width: u32,
    height: u32,
    color: Color,
}

impl SolidColorSource {
    pub fn new(canvas: Canvas, color: Color) -> Self {
        Self {
            width: canvas.width,
            height: canvas.height,
            color,
        }
    }
}

impl FrameSource for SolidColorSource {
    fn info(&self) -> ClipInfo {
        ClipInfo {
            width: self.width,
            height: self.height,
            frame_count: 1,
        }
    }

    fn frame(&mut self, _index: u64) -> Result<RgbaImage, BackgroundError> {
        Ok(RgbaImage::from_pixel(
            self.width,
            self.height,
            Rgba(self.color.0),
        ))
    }
}

/// Scale-to-cover then center-crop from a source size to the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropPlan {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropPlan {
    pub fn cover(src_width: u32, src_height: u32, canvas: Canvas) -> Self {
        let (tw, th) = (canvas.width, canvas.height);
        if src_width == 0 || src_height == 0 {
            return Self::identity(canvas);
        }
        let scale = f64::max(
            tw as f64 / src_width as f64,
            th as f64 / src_height as f64,
        );
        let scaled_width = ((src_width as f64 * scale).round() as u32).max(tw);
        let scaled_height = ((src_height as f64 * scale).round() as u32).max(th);
        Self {
            scaled_width,
            scaled_height,
            x: (scaled_width - tw) / 2,
            y: (scaled_height - th) / 2,
            width: tw,
            height: th,
        }
    }

    fn identity(canvas: Canvas) -> Self {
        Self {
            scaled_width: canvas.width,
            scaled_height: canvas.height,
            x: 0,
            y: 0,
            width: canvas.width,
            height: canvas.height,
        }
    }

    pub fn apply(&self, frame: RgbaImage) -> RgbaImage {
        if frame.width() == self.width && frame.height() == self.height {
            return frame;
        }
        let scaled = if frame.dimensions() == (self.scaled_width, self.scaled_height) {
            frame
        } else {
            imageops::resize(
                &frame,
                self.scaled_width,
                self.scaled_height,
                FilterType::Triangle,
            )
        };
        imageops::crop_imm(&scaled, self.x, self.y, self.width, self.height).to_image()
    }
}

/// Number of whole frames covering `seconds` at `fps`.
pub fn frames_for(seconds: f64, fps: u32) -> u64 {
    (seconds.max(0.0) * fps as f64).round() as u64
}

/// A source looped end to end, trimmed to `[0, duration)` and cropped to the canvas.
pub struct FittedBackground {
    source: Box<dyn FrameSource>,
    period: u64,
    total: u64,
    duration: f64,
    fps: u32,
    canvas: Canvas,
    plan: CropPlan,
    fallback: Color,
    dim: f32,
    degraded: Option<RgbaImage>,
}

impl fmt::Debug for FittedBackground {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FittedBackground")
            .field("period", &self.period)
            .field("total", &self.total)
            .field("duration", &self.duration)
            .field("fps", &self.fps)
            .field("plan", &self.plan)
            .finish()
    }
}

/// Fits `source` to exactly `duration` seconds on `canvas`.
pub fn fit(source: Box<dyn FrameSource>, duration: f64, canvas: Canvas, fps: u32) -> FittedBackground {
    let info = source.info();
    let period = info.frame_count.max(1);
    let total = frames_for(duration, fps);
    let plan = CropPlan::cover(info.width, info.height, canvas);
    debug!(
        "Fitting {}x{} source ({} frames) to {} frames on {}x{}",
        info.width, info.height, period, total, canvas.width, canvas.height
    );
    FittedBackground {
        source,
        period,
        total,
        duration,
        fps,
        canvas,
        plan,
        fallback: Color::rgb(0, 0, 0),
        dim: 0.0,
        degraded: None,
    }
}

impl FittedBackground {
    /// Color used for the remaining frames if the source stops decoding mid-run.
    pub fn with_fallback(mut self, color: Color) -> Self {
        self.fallback = color;
        self
    }

    /// Darkening applied by `frame_or_fallback`, 0.0 to 1.0.
    pub fn with_dim(mut self, amount: f32) -> Self {
        self.dim = amount.clamp(0.0, 1.0);
        self
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn frame_count(&self) -> u64 {
        self.total
    }

    /// Source frames before the loop repeats.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// How many times the source plays, the last one possibly cut short.
    pub fn loops(&self) -> u64 {
        self.total.div_ceil(self.period)
    }

    /// Index of the source frame shown at fitted frame `index`.
    pub fn source_index(&self, index: u64) -> u64 {
        index % self.period
    }

    /// View of `[start, start + duration)` seconds of this clip.
    pub fn slice(&self, start: f64, duration: f64) -> BackgroundSlice {
        let first_frame = frames_for(start, self.fps).min(self.total);
        let end_frame = frames_for(start + duration, self.fps).min(self.total);
        BackgroundSlice {
            start,
            duration,
            first_frame,
            frame_count: end_frame - first_frame,
        }
    }

    /// Frame ready for compositing: dimmed, and never failing. A source error degrades
    /// this and every later frame to the fallback color.
    pub fn frame_or_fallback(&mut self, index: u64) -> RgbaImage {
        if let Some(solid) = &self.degraded {
            return solid.clone();
        }
        match self.frame(index) {
            Ok(mut frame) => {
                dim(&mut frame, self.dim);
                frame
            }
            Err(e) => {
                warn!("Background unavailable from frame {}: {}; using solid color", index, e);
                let solid = RgbaImage::from_pixel(
                    self.canvas.width,
                    self.canvas.height,
                    Rgba(self.fallback.0),
                );
                self.degraded = Some(solid.clone());
                solid
            }
        }
    }
}

impl FrameSource for FittedBackground {
    fn info(&self) -> ClipInfo {
        ClipInfo {
            width: self.canvas.width,
            height: self.canvas.height,
            frame_count: self.total,
        }
    }

    fn frame(&mut self, index: u64) -> Result<RgbaImage, BackgroundError> {
        if index >= self.total {
            return Err(BackgroundError::OutOfRange {
                index,
                len: self.total,
            });
        }
        let frame = self.source.frame(self.source_index(index))?;
        Ok(self.plan.apply(frame))
    }
}

/// A bounded window of the master background for one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundSlice {
    pub start: f64,
    pub duration: f64,
    pub first_frame: u64,
    pub frame_count: u64,
}

impl BackgroundSlice {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Master frame index for the slice-local frame `local`.
    pub fn master_frame(&self, local: u64) -> u64 {
        self.first_frame + local
    }
}

/// Where the background comes from.
pub enum BackgroundSource {
    File(PathBuf),
    Frames(Box<dyn FrameSource>),
    Unavailable,
}

impl fmt::Debug for BackgroundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackgroundSource::File(p) => f.debug_tuple("File").field(p).finish(),
            BackgroundSource::Frames(s) => f.debug_tuple("Frames").field(&s.info()).finish(),
            BackgroundSource::Unavailable => f.write_str("Unavailable"),
        }
    }
}

impl From<Option<PathBuf>> for BackgroundSource {
    fn from(path: Option<PathBuf>) -> Self {
        path.map_or(BackgroundSource::Unavailable, BackgroundSource::File)
    }
}

/// Opens the background, degrading to a solid clip when nothing usable is available.
pub fn resolve(
    source: BackgroundSource,
    canvas: Canvas,
    fps: u32,
    fallback: Color,
) -> Box<dyn FrameSource> {
    let solid = || -> Box<dyn FrameSource> { Box::new(SolidColorSource::new(canvas, fallback)) };
    match source {
        BackgroundSource::File(path) => match FfmpegFrameSource::open(&path, canvas, fps) {
            Ok(src) => {
                info!("Background: {} ({} frames)", path.display(), src.info().frame_count);
                Box::new(src)
            }
            Err(e) => {
                warn!("Background unavailable ({}); using solid color {}", e, fallback);
                solid()
            }
        },
        BackgroundSource::Frames(src) if src.info().frame_count > 0 => src,
        BackgroundSource::Frames(_) => {
            warn!("Background source has no frames; using solid color {}", fallback);
            solid()
        }
        BackgroundSource::Unavailable => {
            warn!("No background source; using solid color {}", fallback);
            solid()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame `i` is filled with `[i, i >> 8, 0, 255]`.
    struct Numbered {
        width: u32,
        height: u32,
        frames: u64,
    }

    impl FrameSource for Numbered {
        fn info(&self) -> ClipInfo {
            ClipInfo {
                width: self.width,
                height: self.height,
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
            Ok(RgbaImage::from_pixel(
                self.width,
                self.height,
                Rgba([index as u8, (index >> 8) as u8, 0, 255]),
            ))
        }
    }

    fn numbered(frames: u64) -> Box<dyn FrameSource> {
        Box::new(Numbered {
            width: 16,
            height: 9,
            frames,
        })
    }

    fn id_of(img: &RgbaImage) -> u64 {
        let p = img.get_pixel(0, 0).0;
        p[0] as u64 | (p[1] as u64) << 8
    }

    const CANVAS: Canvas = Canvas {
        width: 9,
        height: 16,
    };

    #[test]
    fn cover_plan_fills_and_centers() {
        let plan = CropPlan::cover(1920, 1080, Canvas::default());
        assert_eq!((plan.scaled_width, plan.scaled_height), (3413, 1920));
        assert_eq!((plan.x, plan.y), (1166, 0));
        assert_eq!((plan.width, plan.height), (1080, 1920));

        let tall = CropPlan::cover(1080, 3840, Canvas::default());
        assert_eq!((tall.scaled_width, tall.scaled_height), (1080, 3840));
        assert_eq!((tall.x, tall.y), (0, 960));
    }

    #[test]
    fn short_source_loops_then_trims() {
        // 10 s source, 40 s target at 24 fps
        let mut bg = fit(numbered(240), 40.0, CANVAS, 24);
        assert_eq!(bg.frame_count(), 960);
        assert_eq!(bg.loops(), 4);
        for k in [0, 1, 239] {
            assert_eq!(id_of(&bg.frame(k).unwrap()), k);
            assert_eq!(id_of(&bg.frame(k + 240).unwrap()), k);
            assert_eq!(id_of(&bg.frame(k + 720).unwrap()), k);
        }
        assert!(matches!(
            bg.frame(960),
            Err(BackgroundError::OutOfRange { index: 960, len: 960 })
        ));
    }

    #[test]
    fn partial_last_loop_is_cut_at_the_trim_boundary() {
        let mut bg = fit(numbered(100), 10.0, CANVAS, 25);
        assert_eq!(bg.frame_count(), 250);
        assert_eq!(bg.loops(), 3);
        assert_eq!(id_of(&bg.frame(249).unwrap()), 49);
    }

    #[test]
    fn long_source_is_only_trimmed() {
        let mut bg = fit(numbered(1000), 2.0, CANVAS, 24);
        assert_eq!(bg.loops(), 1);
        assert_eq!(id_of(&bg.frame(47).unwrap()), 47);
        assert!(bg.frame(48).is_err());
    }

    #[test]
    fn frames_are_cropped_to_canvas() {
        let mut bg = fit(numbered(3), 1.0, CANVAS, 24);
        let frame = bg.frame(2).unwrap();
        assert_eq!(frame.dimensions(), (9, 16));
        assert_eq!(id_of(&frame), 2);
    }

    #[test]
    fn fitting_a_fitted_clip_is_idempotent() {
        let once = fit(numbered(37), 5.0, CANVAS, 24);
        let total = once.frame_count();
        let mut reference = fit(numbered(37), 5.0, CANVAS, 24);
        let mut twice = fit(Box::new(once), 5.0, CANVAS, 24);
        assert_eq!(twice.frame_count(), total);
        for k in 0..total {
            assert_eq!(twice.frame(k).unwrap(), reference.frame(k).unwrap());
        }
    }

    #[test]
    fn slices_continue_across_segments() {
        let bg = fit(numbered(240), 40.0, CANVAS, 24);
        let a = bg.slice(0.0, 5.0);
        let b = bg.slice(a.end(), 35.0);
        assert_eq!((a.first_frame, a.frame_count), (0, 120));
        assert_eq!((b.first_frame, b.frame_count), (120, 840));
        assert_eq!(b.master_frame(0), a.master_frame(a.frame_count));
        assert_eq!(a.frame_count + b.frame_count, bg.frame_count());
    }

    #[test]
    fn fractional_boundaries_do_not_drift() {
        let bg = fit(numbered(10), 3.3, CANVAS, 24);
        let durations = [0.71, 1.13, 0.97, 0.49];
        let mut cursor = 0.0;
        let mut frames = 0;
        for d in durations {
            let s = bg.slice(cursor, d);
            assert_eq!(s.first_frame, frames);
            frames += s.frame_count;
            cursor += d;
        }
        assert_eq!(frames, frames_for(cursor, 24));
    }

    #[test]
    fn missing_sources_fall_back_to_solid_color() {
        let red = Color::rgb(200, 0, 0);
        let mut src = resolve(BackgroundSource::Unavailable, CANVAS, 24, red);
        assert_eq!(src.info().frame_count, 1);
        assert_eq!(src.frame(0).unwrap().get_pixel(3, 3).0, [200, 0, 0, 255]);

        let mut src = resolve(
            BackgroundSource::File(PathBuf::from("/nonexistent/clip.mp4")),
            CANVAS,
            24,
            red,
        );
        assert_eq!(src.frame(0).unwrap().dimensions(), (9, 16));

        let src = resolve(BackgroundSource::Frames(numbered(0)), CANVAS, 24, red);
        assert_eq!(src.info().frame_count, 1);
    }

    #[test]
    fn decode_failure_degrades_for_the_rest_of_the_run() {
        struct Flaky;
        impl FrameSource for Flaky {
            fn info(&self) -> ClipInfo {
                ClipInfo {
                    width: 9,
                    height: 16,
                    frame_count: 10,
                }
            }
            fn frame(&mut self, index: u64) -> Result<RgbaImage, BackgroundError> {
                if index < 3 {
                    Ok(RgbaImage::from_pixel(9, 16, Rgba([1, 2, 3, 255])))
                } else {
                    Err(BackgroundError::Decode("truncated".into()))
                }
            }
        }
        let mut bg = fit(Box::new(Flaky), 1.0, CANVAS, 24).with_fallback(Color::rgb(9, 9, 9));
        assert_eq!(bg.frame_or_fallback(0).get_pixel(0, 0).0, [1, 2, 3, 255]);
        assert_eq!(bg.frame_or_fallback(5).get_pixel(0, 0).0, [9, 9, 9, 255]);
        assert_eq!(bg.frame_or_fallback(1).get_pixel(0, 0).0, [9, 9, 9, 255]);
    }

    #[test]
    fn dim_applies_to_composited_frames_only() {
        let white = SolidColorSource::new(CANVAS, Color::rgb(200, 200, 200));
        let mut bg = fit(Box::new(white), 1.0, CANVAS, 24).with_dim(0.5);
        assert_eq!(bg.frame(0).unwrap().get_pixel(0, 0).0, [200, 200, 200, 255]);
        assert_eq!(bg.frame_or_fallback(0).get_pixel(0, 0).0, [100, 100, 100, 255]);
    }
}
