use image::{Rgba, RgbaImage};

use crate::config::Color;

/// Straight-alpha "over": `src` scaled by `opacity` onto `dst`.
#[inline]
pub fn blend_pixel(dst: &mut Rgba<u8>, src: [u8; 4], opacity: f32) {
    let sa = src[3] as f32 / 255.0 * opacity.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    if sa >= 1.0 {
        dst.0 = [src[0], src[1], src[2], 255];
        return;
    }
    let da = dst.0[3] as f32 / 255.0;
    let keep = da * (1.0 - sa);
    let oa = sa + keep;
    for i in 0..3 {
        let c = (src[i] as f32 * sa + dst.0[i] as f32 * keep) / oa;
        dst.0[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = (oa * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Fills `[x0, x1) × [y0, y1)`, clipped to the image.
pub fn fill_rect(img: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Color) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let (x0, x1) = (x0.clamp(0, w), x1.clamp(0, w));
    let (y0, y1) = (y0.clamp(0, h), y1.clamp(0, h));
    for y in y0..y1 {
        for x in x0..x1 {
            blend_pixel(img.get_pixel_mut(x as u32, y as u32), color.0, 1.0);
        }
    }
}

/// Composites `src` onto `dst` with its top-left corner at `(x, y)`.
pub fn overlay(dst: &mut RgbaImage, src: &RgbaImage, x: i32, y: i32, opacity: f32) {
    if opacity <= 0.0 {
        return;
    }
    let (dw, dh) = (dst.width() as i32, dst.height() as i32);
    let sx0 = (-x).max(0);
    let sy0 = (-y).max(0);
    let sx1 = (dw - x).min(src.width() as i32);
    let sy1 = (dh - y).min(src.height() as i32);
    for sy in sy0..sy1 {
        for sx in sx0..sx1 {
            let p = src.get_pixel(sx as u32, sy as u32).0;
            if p[3] == 0 {
                continue;
            }
            blend_pixel(
                dst.get_pixel_mut((x + sx) as u32, (y + sy) as u32),
                p,
                opacity,
            );
        }
    }
}

/// Darkens RGB by `amount` (0 leaves the image unchanged, 1 makes it black).
pub fn dim(img: &mut RgbaImage, amount: f32) {
    let keep = 1.0 - amount.clamp(0.0, 1.0);
    if keep >= 1.0 {
        return;
    }
    for p in img.pixels_mut() {
        for c in &mut p.0[..3] {
            *c = (*c as f32 * keep).round() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_over_anything_replaces() {
        let mut p = Rgba([10, 20, 30, 40]);
        blend_pixel(&mut p, [200, 100, 50, 255], 1.0);
        assert_eq!(p.0, [200, 100, 50, 255]);
    }

    #[test]
    fn half_opacity_mixes_over_opaque() {
        let mut p = Rgba([0, 0, 0, 255]);
        blend_pixel(&mut p, [255, 255, 255, 255], 0.5);
        assert_eq!(p.0, [128, 128, 128, 255]);
    }

    #[test]
    fn translucent_over_transparent_keeps_color() {
        let mut p = Rgba([0, 0, 0, 0]);
        blend_pixel(&mut p, [0, 0, 0, 0xaa], 1.0);
        assert_eq!(p.0, [0, 0, 0, 0xaa]);
    }

    #[test]
    fn rect_and_overlay_clip_to_bounds() {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        fill_rect(&mut img, -5, -5, 2, 2, Color::rgb(255, 0, 0));
        assert_eq!(img.get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(2, 2).0, [0, 0, 0, 255]);

        let patch = RgbaImage::from_pixel(3, 3, Rgba([0, 255, 0, 255]));
        overlay(&mut img, &patch, 2, 2, 1.0);
        assert_eq!(img.get_pixel(3, 3).0, [0, 255, 0, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [255, 0, 0, 255]);
    }

    #[test]
    fn dim_scales_rgb_only() {
        let mut img = RgbaImage::from_pixel(1, 1, Rgba([200, 100, 50, 255]));
        dim(&mut img, 0.5);
        assert_eq!(img.get_pixel(0, 0).0, [100, 50, 25, 255]);
    }
}
