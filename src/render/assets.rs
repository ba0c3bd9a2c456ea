use std::path::{Path, PathBuf};

use image::RgbaImage;
use image::imageops::{self, FilterType};
use tracing::{debug, warn};

use crate::render::font::Typeface;

/// Tries each candidate in order and returns the first that loads. Misses are not errors.
pub fn first_loadable<T>(
    candidates: &[PathBuf],
    what: &str,
    load: impl Fn(&Path) -> Option<T>,
) -> Option<T> {
    for path in candidates {
        match load(path) {
            Some(asset) => {
                debug!("Loaded {} from {}", what, path.display());
                return Some(asset);
            }
            None => debug!("No usable {} at {}", what, path.display()),
        }
    }
    None
}

/// Configured font, or the built-in bitmap font.
pub fn load_typeface(candidates: &[PathBuf]) -> Typeface {
    first_loadable(candidates, "font", Typeface::from_file).unwrap_or_else(|| {
        warn!("No font asset found; using built-in bitmap font");
        Typeface::Builtin
    })
}

/// Configured logo scaled to `width`, or `None` so the caller can draw a text logo.
pub fn load_logo(candidates: &[PathBuf], width: u32) -> Option<RgbaImage> {
    let logo = first_loadable(candidates, "logo", |path| {
        let img = image::open(path).ok()?.to_rgba8();
        if img.width() == 0 || img.height() == 0 || width == 0 {
            return None;
        }
        let height = ((width as u64 * img.height() as u64) / img.width() as u64).max(1) as u32;
        Some(imageops::resize(&img, width, height, FilterType::Triangle))
    });
    if logo.is_none() {
        warn!("No logo asset found; using text logo");
    }
    logo
}
