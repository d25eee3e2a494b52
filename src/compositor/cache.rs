use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;
use rayon::prelude::*;

use super::feather::feather_mask;
use super::surface::sample_bilinear;
use crate::canvas::{CropRect, Layer, LayerId};
use crate::error::{EngineError, Result};
use crate::ops::blend::keep_where;

// ============================================================================
// CACHE KEY
// ============================================================================

/// Fingerprint of a processed image: `(layer, blend_area, crop, width, height)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub layer: LayerId,
    pub blend_area: u8,
    pub crop: Option<[i32; 4]>,
    pub width: u32,
    pub height: u32,
}

impl CacheKey {
    pub fn for_layer(layer: &Layer) -> Self {
        let (width, height) = layer.cache_dims();
        Self {
            layer: layer.id,
            blend_area: layer.blend_area,
            crop: layer.crop_rect().map(|c| c.key()),
            width,
            height,
        }
    }
}

/// Everything a worker needs to build one processed image.
#[derive(Clone, Debug)]
pub struct CacheJob {
    pub key: CacheKey,
    pub generation: u64,
    pub source: Arc<RgbaImage>,
    /// Visible image-space rectangle.
    pub crop: CropRect,
    /// Output size in pixels: the visible part of the frame.
    pub out_width: u32,
    pub out_height: u32,
    pub max_edge: u32,
}

/// Pixel size of the visible part of `layer`'s frame at one pixel per unit.
pub fn frame_pixels(layer: &Layer) -> (u32, u32) {
    let crop = layer.source_rect();
    let sx = layer.width / layer.original_width.max(1) as f32;
    let sy = layer.height / layer.original_height.max(1) as f32;
    (
        (crop.width * sx).round().max(0.0) as u32,
        (crop.height * sy).round().max(0.0) as u32,
    )
}

impl CacheJob {
    pub fn for_layer(layer: &Layer, generation: u64, max_edge: u32) -> Self {
        let (out_width, out_height) = frame_pixels(layer);
        Self {
            key: CacheKey::for_layer(layer),
            generation,
            source: Arc::clone(&layer.image),
            crop: layer.source_rect(),
            out_width,
            out_height,
            max_edge,
        }
    }

    /// Resamples the visible source into the frame size and applies the feather.
    pub fn run(&self) -> Result<RgbaImage> {
        let (w, h) = (self.out_width, self.out_height);
        if w == 0 || h == 0 {
            return Err(EngineError::degenerate("processed image", w as f32, h as f32));
        }
        if w > self.max_edge || h > self.max_edge {
            return Err(EngineError::SurfaceAllocation {
                width: w,
                height: h,
                limit: self.max_edge,
            });
        }
        if self.source.width() == 0 || self.source.height() == 0 {
            return Err(EngineError::CacheCreation(format!(
                "layer {} has no pixels to process",
                self.key.layer
            )));
        }

        let mask = feather_mask(w, h, self.key.blend_area);
        let mut out = RgbaImage::new(w, h);
        let crop = self.crop;
        let fx = crop.width / w as f32;
        let fy = crop.height / h as f32;
        let source = &self.source;
        out.par_chunks_mut(w as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let sy = crop.y + (y as f32 + 0.5) * fy - 0.5;
                for x in 0..w as usize {
                    let sx = crop.x + (x as f32 + 0.5) * fx - 0.5;
                    let mut px = sample_bilinear(source, sx, sy);
                    keep_where(&mut px, mask.get_pixel(x as u32, y as u32)[0]);
                    row[x * 4..x * 4 + 4].copy_from_slice(&px.0);
                }
            });
        Ok(out)
    }
}

// ============================================================================
// PROCESSED IMAGE CACHE
// ============================================================================

#[derive(Debug, Default)]
pub struct ProcessedImageCache {
    entries: HashMap<CacheKey, Arc<RgbaImage>>,
}

impl ProcessedImageCache {
    pub fn get(&self, key: &CacheKey) -> Option<Arc<RgbaImage>> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: CacheKey, image: Arc<RgbaImage>) {
        self.entries.insert(key, image);
    }

    /// Removes every entry belonging to `layer`. Returns how many went.
    pub fn invalidate_layer(&mut self, layer: LayerId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.layer != layer);
        before - self.entries.len()
    }

    /// Removes entries of `key.layer` other than `key`.
    pub fn retain_only(&mut self, key: &CacheKey) {
        self.entries.retain(|k, _| k.layer != key.layer || k == key);
    }

    pub fn entries_for(&self, layer: LayerId) -> usize {
        self.entries.keys().filter(|k| k.layer == layer).count()
    }

    /// Closest stored entry for the same layer.
    ///
    /// A matching crop outweighs any blend-area difference; equal blend area
    /// comes next, then a small bonus for an identical size.
    pub fn best_match(&self, key: &CacheKey) -> Option<(CacheKey, Arc<RgbaImage>)> {
        self.entries
            .iter()
            .filter(|(k, _)| k.layer == key.layer)
            .map(|(k, img)| (similarity(key, k), *k, img))
            .max_by_key(|(score, _, _)| *score)
            .map(|(_, k, img)| (k, Arc::clone(img)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

const CROP_MATCH_WEIGHT: u32 = 1000;
const BLEND_AREA_WEIGHT: u32 = 5;
const SIZE_MATCH_BONUS: u32 = 1;

fn similarity(wanted: &CacheKey, have: &CacheKey) -> u32 {
    let mut score = 0;
    if wanted.crop == have.crop {
        score += CROP_MATCH_WEIGHT;
    }
    let diff = wanted.blend_area.abs_diff(have.blend_area) as u32;
    score += (100u32.saturating_sub(diff)) * BLEND_AREA_WEIGHT;
    if wanted.width == have.width && wanted.height == have.height {
        score += SIZE_MATCH_BONUS;
    }
    score
}
