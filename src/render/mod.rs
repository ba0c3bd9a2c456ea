//! Card and caption rasterization.

pub mod assets;
pub mod caption;
pub mod draw;
pub mod font;

pub use caption::{CaptionFrame, CaptionRenderer, CaptionWindow, FrameRole, LineBox, RollingCaption};
pub use font::Typeface;
