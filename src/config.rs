use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// An 8-bit RGBA color, written as `#rrggbb` or `#rrggbbaa` in settings files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        let hex = s.trim().trim_start_matches('#');
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(format!("expected #rrggbb or #rrggbbaa, got '{s}'"));
        }
        let byte = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("bad color '{s}': {e}"))
        };
        let a = if hex.len() == 8 { byte(6)? } else { 255 };
        Ok(Self([byte(0)?, byte(2)?, byte(4)?, a]))
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::parse(&value)
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{r:02x}{g:02x}{b:02x}")
        } else {
            write!(f, "#{r:02x}{g:02x}{b:02x}{a:02x}")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
        }
    }
}

/// Layout of one static card role. Offsets are in pixels on the configured canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardStyle {
    pub font_px: f32,
    pub wrap_chars: usize,
    pub max_lines: usize,
    pub top: u32,
    pub padding: u32,
    pub line_gap: u32,
    pub backing: Color,
}

impl Default for CardStyle {
    fn default() -> Self {
        Self::story()
    }
}

impl CardStyle {
    pub fn title() -> Self {
        Self {
            font_px: 72.0,
            wrap_chars: 20,
            max_lines: 6,
            top: 300,
            padding: 30,
            line_gap: 40,
            backing: Color::rgba(0, 0, 0, 0xaa),
        }
    }

    pub fn story() -> Self {
        Self {
            font_px: 48.0,
            wrap_chars: 25,
            max_lines: 8,
            top: 350,
            padding: 25,
            line_gap: 35,
            backing: Color::rgba(0, 0, 0, 0xcc),
        }
    }

    pub fn comment() -> Self {
        Self {
            font_px: 44.0,
            wrap_chars: 28,
            max_lines: 8,
            top: 420,
            padding: 25,
            line_gap: 30,
            backing: Color::rgba(0, 0, 0, 0xcc),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingStyle {
    pub enabled: bool,
    pub font_px: f32,
    pub window_words: usize,
    pub wrap_chars: usize,
    pub strip_height: u32,
    pub strip_y: u32,
    pub padding: u32,
    pub backing: Color,
    pub highlight: Color,
}

impl Default for RollingStyle {
    fn default() -> Self {
        Self {
            enabled: true,
            font_px: 40.0,
            window_words: 8,
            wrap_chars: 30,
            strip_height: 200,
            strip_y: 1600,
            padding: 20,
            backing: Color::rgba(0, 0, 0, 200),
            highlight: Color::rgb(0xff, 0x6b, 0x00),
        }
    }
}

/// Visual configuration of the rendered cards, captions and background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub canvas: Canvas,
    pub brand_name: String,
    pub site_label: String,
    pub badge_text: String,
    pub cta_text: String,
    pub text_color: Color,
    pub accent: Color,
    /// Fill under the whole card; `None` leaves the card transparent outside drawn elements.
    pub card_fill: Option<Color>,
    pub card_opacity: f32,
    pub fallback_background: Color,
    pub background_dim: f32,
    pub font_candidates: Vec<PathBuf>,
    pub logo_candidates: Vec<PathBuf>,
    pub logo_width: u32,
    pub logo_top: u32,
    pub label_px: f32,
    pub title: CardStyle,
    pub story: CardStyle,
    pub comment: CardStyle,
    pub rolling: RollingStyle,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            canvas: Canvas::default(),
            brand_name: "ThreadJuice".to_string(),
            site_label: "threadjuice.com".to_string(),
            badge_text: "VIRAL STORY".to_string(),
            cta_text: "Read Full Story".to_string(),
            text_color: Color::rgb(0xff, 0xff, 0xff),
            accent: Color::rgb(0xff, 0x6b, 0x00),
            card_fill: None,
            card_opacity: 0.95,
            fallback_background: Color::rgb(0x0a, 0x0a, 0x0a),
            background_dim: 0.0,
            font_candidates: vec![
                PathBuf::from("assets/fonts/Geist-Black.ttf"),
                PathBuf::from("fonts/Roboto-Bold.ttf"),
            ],
            logo_candidates: vec![
                PathBuf::from("public/assets/img/brand/1x/Logotype-White.png"),
                PathBuf::from("brand/Logo/1x/Logotype-White.png"),
                PathBuf::from("public/assets/img/logo/w_logo.png"),
            ],
            logo_width: 300,
            logo_top: 80,
            label_px: 36.0,
            title: CardStyle::title(),
            story: CardStyle::story(),
            comment: CardStyle::comment(),
            rolling: RollingStyle::default(),
        }
    }
}

/// What gets spoken, as opposed to what gets drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub title_intro: String,
    /// Character budget for the spoken body; `None` narrates the whole body.
    pub body_char_limit: Option<usize>,
    pub body_outro: String,
    pub always_outro: bool,
    /// Character budget for the body drawn on the story card.
    pub card_char_limit: usize,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            title_intro: "ThreadJuice presents: ".to_string(),
            body_char_limit: Some(500),
            body_outro: " Visit ThreadJuice dot com for the full story!".to_string(),
            always_outro: true,
            card_char_limit: 400,
        }
    }
}

/// Run-level configuration of one assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub results_dir: PathBuf,
    pub work_root: PathBuf,
    pub output_prefix: String,
    pub fps: u32,
    pub voice: String,
    pub subtitles_sidecar: bool,
    pub narration: NarrationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            work_root: PathBuf::from("assets/temp"),
            output_prefix: "ThreadJuice".to_string(),
            fps: 24,
            voice: "./tts/en_US-hfc_male-medium.onnx".to_string(),
            subtitles_sidecar: false,
            narration: NarrationConfig::default(),
        }
    }
}

/// Everything a settings file may contain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub style: StyleConfig,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings '{}'", path.display()))?;
        let settings = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse settings '{}'", path.display()))?;
        Ok(settings)
    }
}
