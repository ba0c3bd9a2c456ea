//! Narrated short-form videos from text stories: speech, caption cards and a fitted
//! background clip, composed into one timeline and encoded with ffmpeg.

pub mod audio;
pub mod background;
pub mod compose;
pub mod config;
pub mod encode;
pub mod error;
pub mod pexels;
pub mod render;
pub mod stories;
pub mod story;
pub mod subtitle;
pub mod text;
pub mod timeline;
pub mod tts;

pub use background::BackgroundSource;
pub use config::{PipelineConfig, Settings, StyleConfig};
pub use error::PipelineError;
pub use story::StoryRecord;
pub use timeline::{Assembler, RunState, Timeline, assemble};
