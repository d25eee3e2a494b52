use egui::{Pos2, Rect, Vec2};
use image::{GrayImage, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{CropRect, Layer};
use crate::error::{EngineError, Result};
use crate::ops::blend::{blend_pixel, keep_where, BlendMode};
use crate::ops::geometry::rotate_vec;

// ============================================================================
// SURFACE
// ============================================================================

/// A raster that maps to a world-space region.
///
/// Pixel `(px, py)` covers world `origin + (px, py) / scale`.
#[derive(Clone, Debug)]
pub struct Surface {
    pub image: RgbaImage,
    pub origin: Pos2,
    /// Pixels per world unit.
    pub scale: f32,
}

impl Surface {
    /// Allocates a transparent surface, refusing empty or oversized requests.
    pub fn new(width: u32, height: u32, origin: Pos2, scale: f32, max_edge: u32) -> Result<Self> {
        if width == 0 || height == 0 || !(scale > 0.0) {
            return Err(EngineError::degenerate("surface", width as f32, height as f32));
        }
        if width > max_edge || height > max_edge {
            return Err(EngineError::SurfaceAllocation {
                width,
                height,
                limit: max_edge,
            });
        }
        Ok(Self {
            image: RgbaImage::new(width, height),
            origin,
            scale,
        })
    }

    /// Surface covering a world rectangle at `scale` pixels per unit.
    pub fn for_rect(rect: Rect, scale: f32, max_edge: u32) -> Result<Self> {
        let w = rect.width() * scale;
        let h = rect.height() * scale;
        if !(w.is_finite() && h.is_finite()) || w < 0.5 || h < 0.5 {
            return Err(EngineError::degenerate("surface", rect.width(), rect.height()));
        }
        let (w, h) = (w.round(), h.round());
        if w > max_edge as f32 || h > max_edge as f32 {
            return Err(EngineError::SurfaceAllocation {
                width: w.min(u32::MAX as f32) as u32,
                height: h.min(u32::MAX as f32) as u32,
                limit: max_edge,
            });
        }
        Self::new(w as u32, h as u32, rect.min, scale, max_edge)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_to_world(&self, px: f32, py: f32) -> Pos2 {
        self.origin + Vec2::new(px, py) / self.scale
    }

    pub fn world_to_pixel(&self, p: Pos2) -> Pos2 {
        ((p - self.origin) * self.scale).to_pos2()
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Multiplies alpha by a coverage mask that spans the whole surface.
    pub fn apply_mask(&mut self, mask: &GrayImage) {
        let (w, h) = self.image.dimensions();
        let (mw, mh) = mask.dimensions();
        if mw == 0 || mh == 0 {
            return;
        }
        let row_len = w as usize * 4;
        self.image
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| {
                let my = ((y as u64 * mh as u64) / h as u64).min(mh as u64 - 1) as u32;
                for x in 0..w as usize {
                    let mx = ((x as u64 * mw as u64) / w as u64).min(mw as u64 - 1) as u32;
                    let i = x * 4;
                    let mut px = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                    keep_where(&mut px, mask.get_pixel(mx, my)[0]);
                    row[i + 3] = px[3];
                }
            });
    }
}

// ============================================================================
// LAYER BLIT
// ============================================================================

/// What to sample when drawing a layer.
pub struct LayerTexture<'a> {
    pub image: &'a RgbaImage,
    /// Image-space rectangle of the layer that `image` covers.
    pub covers: CropRect,
    /// Coverage mask spanning the visible part of the frame, at any resolution.
    pub mask: Option<&'a GrayImage>,
}

/// Placement of a layer, detached from the store so it can cross threads.
#[derive(Clone, Copy, Debug)]
pub struct BlitParams {
    pub center: Pos2,
    pub width: f32,
    pub height: f32,
    pub rotation_rad: f32,
    pub flip_h: bool,
    pub flip_v: bool,
    pub original_width: f32,
    pub original_height: f32,
    /// Visible image-space rectangle.
    pub source: CropRect,
    pub opacity: f32,
    pub blend_mode: BlendMode,
}

impl BlitParams {
    pub fn from_layer(layer: &Layer) -> Self {
        Self {
            center: layer.center(),
            width: layer.width,
            height: layer.height,
            rotation_rad: layer.rotation_rad(),
            flip_h: layer.flip_h,
            flip_v: layer.flip_v,
            original_width: layer.original_width.max(1) as f32,
            original_height: layer.original_height.max(1) as f32,
            source: layer.source_rect(),
            opacity: layer.opacity.clamp(0.0, 1.0),
            blend_mode: layer.blend_mode,
        }
    }

    /// World point → image-space point, or None outside the visible source.
    fn image_point(&self, world: Pos2) -> Option<(f32, f32)> {
        let mut local = rotate_vec(world - self.center, -self.rotation_rad);
        if self.flip_h {
            local.x = -local.x;
        }
        if self.flip_v {
            local.y = -local.y;
        }
        let ix = (local.x + self.width / 2.0) * self.original_width / self.width;
        let iy = (local.y + self.height / 2.0) * self.original_height / self.height;
        let s = &self.source;
        (ix >= s.x && ix < s.right() && iy >= s.y && iy < s.bottom()).then_some((ix, iy))
    }

    /// World bounds of the visible part of the frame.
    fn world_bounds(&self) -> Rect {
        let sx = self.width / self.original_width;
        let sy = self.height / self.original_height;
        let (mut l, mut r) = (self.source.x * sx - self.width / 2.0, self.source.right() * sx - self.width / 2.0);
        let (mut t, mut b) = (self.source.y * sy - self.height / 2.0, self.source.bottom() * sy - self.height / 2.0);
        if self.flip_h {
            (l, r) = (-r, -l);
        }
        if self.flip_v {
            (t, b) = (-b, -t);
        }
        let mut rect = Rect::NOTHING;
        for corner in [Vec2::new(l, t), Vec2::new(r, t), Vec2::new(r, b), Vec2::new(l, b)] {
            rect.extend_with(self.center + rotate_vec(corner, self.rotation_rad));
        }
        rect
    }
}

/// Draws one layer onto `surface`, rows in parallel.
pub fn blit_layer(surface: &mut Surface, params: &BlitParams, texture: &LayerTexture<'_>) {
    if params.width <= 0.0 || params.height <= 0.0 || params.opacity <= 0.0 {
        return;
    }
    let (tw, th) = texture.image.dimensions();
    if tw == 0 || th == 0 || texture.covers.width <= 0.0 || texture.covers.height <= 0.0 {
        return;
    }

    let bounds = params.world_bounds();
    let min = surface.world_to_pixel(bounds.min);
    let max = surface.world_to_pixel(bounds.max);
    let (sw, sh) = surface.image.dimensions();
    let x0 = min.x.floor().max(0.0) as u32;
    let y0 = min.y.floor().max(0.0) as u32;
    let x1 = (max.x.ceil().max(0.0) as u32).min(sw);
    let y1 = (max.y.ceil().max(0.0) as u32).min(sh);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let origin = surface.origin;
    let scale = surface.scale;
    let row_len = sw as usize * 4;
    let covers = texture.covers;
    let tex_sx = tw as f32 / covers.width;
    let tex_sy = th as f32 / covers.height;
    let source = params.source;

    surface
        .image
        .par_chunks_mut(row_len)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(y, row)| {
            let wy = origin.y + (y as f32 + 0.5) / scale;
            for x in x0..x1 {
                let wx = origin.x + (x as f32 + 0.5) / scale;
                let Some((ix, iy)) = params.image_point(Pos2::new(wx, wy)) else { continue };

                let tx = (ix - covers.x) * tex_sx - 0.5;
                let ty = (iy - covers.y) * tex_sy - 0.5;
                let mut px = sample_bilinear(texture.image, tx, ty);
                if let Some(mask) = texture.mask {
                    let (mw, mh) = mask.dimensions();
                    if mw > 0 && mh > 0 {
                        let mx = (ix - source.x) / source.width * mw as f32 - 0.5;
                        let my = (iy - source.y) / source.height * mh as f32 - 0.5;
                        keep_where(&mut px, sample_coverage(mask, mx, my));
                    }
                }
                if px[3] == 0 {
                    continue;
                }
                let i = x as usize * 4;
                let base = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                let out = blend_pixel(base, px, params.blend_mode, params.opacity);
                row[i..i + 4].copy_from_slice(&out.0);
            }
        });
}

/// Bilinear lookup into a coverage mask, clamped at the border.
fn sample_coverage(mask: &GrayImage, x: f32, y: f32) -> u8 {
    let (w, h) = mask.dimensions();
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let at = |sx: i32, sy: i32| -> f32 {
        mask.get_pixel(sx.clamp(0, w as i32 - 1) as u32, sy.clamp(0, h as i32 - 1) as u32)[0] as f32
    };
    let top = at(x0, y0) * (1.0 - fx) + at(x0 + 1, y0) * fx;
    let bottom = at(x0, y0 + 1) * (1.0 - fx) + at(x0 + 1, y0 + 1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}

pub(crate) fn sample_bilinear(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let (w, h) = img.dimensions();
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let sample = |sx: i32, sy: i32| -> [f32; 4] {
        let cx = sx.clamp(0, w as i32 - 1) as u32;
        let cy = sy.clamp(0, h as i32 - 1) as u32;
        let p = img.get_pixel(cx, cy).0;
        [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
    };

    let p00 = sample(x0, y0);
    let p10 = sample(x0 + 1, y0);
    let p01 = sample(x0, y0 + 1);
    let p11 = sample(x0 + 1, y0 + 1);
    let w00 = (1.0 - fx) * (1.0 - fy);
    let w10 = fx * (1.0 - fy);
    let w01 = (1.0 - fx) * fy;
    let w11 = fx * fy;

    let mut out = [0u8; 4];
    for c in 0..4 {
        out[c] = (p00[c] * w00 + p10[c] * w10 + p01[c] * w01 + p11[c] * w11)
            .round()
            .clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}
