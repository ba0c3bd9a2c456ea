use std::ops::Range;
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::config::{CardStyle, Color, RollingStyle, StyleConfig};
use crate::render::assets::{load_logo, load_typeface};
use crate::render::draw::{fill_rect, overlay};
use crate::render::font::Typeface;
use crate::story::SegmentRole;
use crate::text::wrap_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRole {
    Title,
    Story,
    Comment,
}

impl From<SegmentRole> for FrameRole {
    fn from(role: SegmentRole) -> Self {
        match role {
            SegmentRole::Title => FrameRole::Title,
            SegmentRole::Story => FrameRole::Story,
            SegmentRole::Comment => FrameRole::Comment,
        }
    }
}

/// One drawn text line: the text origin and its backing rectangle `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBox {
    pub text: String,
    pub text_x: i32,
    pub text_y: i32,
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

/// A canvas-sized card raster and the line boxes drawn on it.
#[derive(Debug, Clone)]
pub struct CaptionFrame {
    pub role: FrameRole,
    pub image: RgbaImage,
    pub lines: Vec<LineBox>,
}

pub struct CaptionRenderer {
    style: StyleConfig,
    font: Arc<Typeface>,
    logo: Option<RgbaImage>,
}

impl CaptionRenderer {
    /// Loads fonts and logo once. Missing assets fall back silently.
    pub fn new(style: &StyleConfig) -> Self {
        let font = load_typeface(&style.font_candidates);
        let logo = load_logo(&style.logo_candidates, style.logo_width);
        Self::with_assets(style, font, logo)
    }

    pub fn with_assets(style: &StyleConfig, font: Typeface, logo: Option<RgbaImage>) -> Self {
        Self {
            style: style.clone(),
            font: Arc::new(font),
            logo,
        }
    }

    pub fn style(&self) -> &StyleConfig {
        &self.style
    }

    fn card_style(&self, role: FrameRole) -> &CardStyle {
        match role {
            FrameRole::Title => &self.style.title,
            FrameRole::Comment => &self.style.comment,
            FrameRole::Story => &self.style.story,
        }
    }

    /// Line boxes for a static card. Lines past the role's maximum are dropped.
    pub fn layout_card(&self, role: FrameRole, text: &str) -> Vec<LineBox> {
        let card = self.card_style(role);
        let center = self.style.canvas.width as i32 / 2;
        let pad = card.padding as i32;

        let mut lines = wrap_text(text, card.wrap_chars);
        lines.truncate(card.max_lines);

        let mut y = card.top as i32;
        let mut boxes = Vec::with_capacity(lines.len());
        for line in lines {
            let (w, h) = self.font.measure(&line, card.font_px);
            let (w, h) = (w as i32, h as i32);
            let text_x = center - w / 2;
            boxes.push(LineBox {
                text_x,
                text_y: y,
                x0: text_x - pad,
                y0: y - pad / 2,
                x1: text_x + w + pad,
                y1: y + h + pad / 2,
                text: line,
            });
            y += h + card.line_gap as i32;
        }
        boxes
    }

    /// Renders a title, story or comment card. `label` is drawn above the text (comment author).
    pub fn render_card(&self, role: FrameRole, text: &str, label: Option<&str>) -> CaptionFrame {
        let style = &self.style;
        let (w, h) = (style.canvas.width, style.canvas.height);
        let base = style.card_fill.map(|c| c.0).unwrap_or([0, 0, 0, 0]);
        let mut image = RgbaImage::from_pixel(w, h, Rgba(base));

        self.draw_logo(&mut image);

        let card = self.card_style(role);
        let lines = self.layout_card(role, text);
        if let Some(label) = label {
            let (lw, lh) = self.font.measure(label, style.label_px);
            let y = card.top as i32 - card.padding as i32 - lh as i32 * 2;
            self.font.draw(
                &mut image,
                w as i32 / 2 - lw as i32 / 2,
                y,
                label,
                style.label_px,
                style.accent,
            );
        }
        for line in &lines {
            fill_rect(&mut image, line.x0, line.y0, line.x1, line.y1, card.backing);
            self.font.draw(
                &mut image,
                line.text_x,
                line.text_y,
                &line.text,
                card.font_px,
                style.text_color,
            );
        }

        match role {
            FrameRole::Title => self.draw_badge(&mut image),
            FrameRole::Story | FrameRole::Comment => self.draw_call_to_action(&mut image),
        }

        CaptionFrame { role, image, lines }
    }

    /// Time-indexed caption strip over `text`, spread evenly across `duration` seconds.
    pub fn rolling(&self, text: &str, duration: f64) -> RollingCaption {
        RollingCaption {
            words: text.split_whitespace().map(str::to_string).collect(),
            duration,
            width: self.style.canvas.width,
            text_color: self.style.text_color,
            style: self.style.rolling.clone(),
            font: Arc::clone(&self.font),
        }
    }

    fn draw_logo(&self, image: &mut RgbaImage) {
        let style = &self.style;
        let center = style.canvas.width as i32 / 2;
        match &self.logo {
            Some(logo) => overlay(
                image,
                logo,
                center - logo.width() as i32 / 2,
                style.logo_top as i32,
                1.0,
            ),
            None => {
                let px = style.label_px * 5.0 / 3.0;
                let (lw, _) = self.font.measure(&style.brand_name, px);
                self.font.draw(
                    image,
                    center - lw as i32 / 2,
                    style.logo_top as i32 + 10,
                    &style.brand_name,
                    px,
                    style.accent,
                );
            }
        }
    }

    fn draw_badge(&self, image: &mut RgbaImage) {
        let style = &self.style;
        let top = style.canvas.height as i32 - 200;
        let (x0, x1) = (40, 320);
        fill_rect(image, x0, top, x1, top + 60, style.accent);
        self.draw_centered(image, &style.badge_text, (x0 + x1) / 2, top + 30, style.text_color);
    }

    fn draw_call_to_action(&self, image: &mut RgbaImage) {
        let style = &self.style;
        let center = style.canvas.width as i32 / 2;
        let top = style.canvas.height as i32 - 150;
        fill_rect(image, center - 200, top, center + 200, top + 80, style.accent);
        self.draw_centered(image, &style.cta_text, center, top + 40, style.text_color);
        self.draw_centered(image, &style.site_label, center, top + 100, style.accent);
    }

    fn draw_centered(&self, image: &mut RgbaImage, text: &str, cx: i32, cy: i32, color: Color) {
        let px = self.style.label_px;
        let (w, h) = self.font.measure(text, px);
        self.font
            .draw(image, cx - w as i32 / 2, cy - h as i32 / 2, text, px, color);
    }
}

/// The words visible at one instant and the one being spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptionWindow {
    pub start: usize,
    pub end: usize,
    pub current: Option<usize>,
}

/// Rolling caption strip as a pure function of time within its segment.
#[derive(Debug, Clone)]
pub struct RollingCaption {
    words: Vec<String>,
    duration: f64,
    width: u32,
    text_color: Color,
    style: RollingStyle,
    font: Arc<Typeface>,
}

impl RollingCaption {
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn strip_y(&self) -> u32 {
        self.style.strip_y
    }

    pub fn window_at(&self, t: f64) -> CaptionWindow {
        let n = self.words.len();
        if n == 0 {
            return CaptionWindow {
                start: 0,
                end: 0,
                current: None,
            };
        }
        let t = if t.is_finite() { t.max(0.0) } else { 0.0 };
        let current = if self.duration > 0.0 {
            ((t * n as f64 / self.duration).floor() as usize).min(n - 1)
        } else {
            0
        };
        let window = self.style.window_words.max(1);
        let start = current
            .saturating_sub(window / 2)
            .min(n.saturating_sub(window));
        let end = (start + window).min(n);
        CaptionWindow {
            start,
            end,
            current: Some(current),
        }
    }

    pub fn frame_at(&self, t: f64) -> RgbaImage {
        self.render_window(&self.window_at(t))
    }

    /// Strip image for a window; `frame_at` is this composed with `window_at`.
    pub fn render_window(&self, window: &CaptionWindow) -> RgbaImage {
        let style = &self.style;
        let mut strip = RgbaImage::from_pixel(self.width, style.strip_height, Rgba([0, 0, 0, 0]));
        let visible = &self.words[window.start..window.end];
        let pad = style.padding as i32;
        let center = self.width as i32 / 2;
        let (space_w, _) = self.font.measure(" ", style.font_px);

        let mut y = pad;
        for range in wrap_ranges(visible, style.wrap_chars) {
            let line = visible[range.clone()].join(" ");
            let (w, h) = self.font.measure(&line, style.font_px);
            let x = center - w as i32 / 2;
            fill_rect(
                &mut strip,
                x - pad,
                y - pad / 2,
                x + w as i32 + pad,
                y + h as i32 + pad / 2,
                style.backing,
            );

            let mut pen = x;
            for i in range {
                let word = &visible[i];
                let color = if Some(window.start + i) == window.current {
                    style.highlight
                } else {
                    self.text_color
                };
                self.font.draw(&mut strip, pen, y, word, style.font_px, color);
                let (ww, _) = self.font.measure(word, style.font_px);
                pen += (ww + space_w) as i32;
            }
            y += h as i32 + pad / 2;
        }
        strip
    }
}

/// Greedy wrap over word indices, same rule as `wrap_text`.
fn wrap_ranges(words: &[String], width: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut len = 0;
    for (i, word) in words.iter().enumerate() {
        let wl = word.chars().count();
        if i > start && len + wl + 1 > width {
            ranges.push(start..i);
            start = i;
            len = wl;
        } else if i == start {
            len = wl;
        } else {
            len += wl + 1;
        }
    }
    if start < words.len() {
        ranges.push(start..words.len());
    }
    ranges
}
