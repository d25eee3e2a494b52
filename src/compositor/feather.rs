use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use image::{GrayImage, Luma};
use rayon::prelude::*;

/// Soft-edge coverage mask for a `width` x `height` rectangle.
///
/// Coverage ramps from 0 at the border to 255 at a distance of
/// `blend_area / 100 * min(width, height) / 2` using a smoothstep curve.
pub fn feather_mask(width: u32, height: u32, blend_area: u8) -> GrayImage {
    let mut mask = GrayImage::from_pixel(width, height, Luma([255]));
    if width == 0 || height == 0 || blend_area == 0 {
        return mask;
    }
    let w = width as f32;
    let h = height as f32;
    let falloff = blend_area.min(100) as f32 / 100.0 * w.min(h) / 2.0;
    if falloff <= 0.0 {
        return mask;
    }
    let row_len = width as usize;
    mask.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        let py = y as f32 + 0.5;
        let dy = py.min(h - py);
        for (x, px) in row.iter_mut().enumerate() {
            let bx = x as f32 + 0.5;
            let d = bx.min(w - bx).min(dy);
            *px = (smoothstep(d / falloff) * 255.0).round() as u8;
        }
    });
    mask
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Identifies a mask by the raster it belongs to, its size and intensity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeatherKey {
    /// Address of the shared raster. Only compared, never dereferenced.
    pub source: usize,
    pub crop: Option<[i32; 4]>,
    pub blend_area: u8,
    pub width: u32,
    pub height: u32,
}

/// Bounded store of generated masks, oldest evicted first.
#[derive(Debug)]
pub struct FeatherCache {
    masks: HashMap<FeatherKey, Arc<GrayImage>>,
    order: VecDeque<FeatherKey>,
    capacity: usize,
    generated: u64,
}

impl FeatherCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            masks: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            generated: 0,
        }
    }

    /// Returns the mask for `key`, generating it on first use.
    pub fn get_or_create(&mut self, key: FeatherKey) -> Arc<GrayImage> {
        if let Some(mask) = self.masks.get(&key) {
            return Arc::clone(mask);
        }
        let mask = Arc::new(feather_mask(key.width, key.height, key.blend_area));
        self.generated += 1;
        while self.order.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.masks.remove(&old);
            }
        }
        self.order.push_back(key);
        self.masks.insert(key, Arc::clone(&mask));
        mask
    }

    /// Drops every mask generated for the given raster.
    pub fn forget_source(&mut self, source: usize) {
        self.order.retain(|k| k.source != source);
        self.masks.retain(|k, _| k.source != source);
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.masks.clear();
    }

    /// Number of masks generated so far.
    pub fn generated(&self) -> u64 {
        self.generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(source: usize, blend_area: u8) -> FeatherKey {
        FeatherKey { source, crop: None, blend_area, width: 40, height: 20 }
    }

    #[test]
    fn mask_fades_towards_edges() {
        let m = feather_mask(40, 20, 100);
        assert!(m.get_pixel(0, 10)[0] < 20);
        assert!(m.get_pixel(20, 10)[0] > 250);
        assert!(m.get_pixel(3, 10)[0] < m.get_pixel(6, 10)[0]);
    }

    #[test]
    fn zero_blend_area_is_opaque() {
        let m = feather_mask(8, 8, 0);
        assert!(m.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn cache_reuses_and_evicts() {
        let mut cache = FeatherCache::new(2);
        let a = cache.get_or_create(key(1, 40));
        let again = cache.get_or_create(key(1, 40));
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(cache.generated(), 1);
        cache.get_or_create(key(2, 40));
        cache.get_or_create(key(3, 40));
        assert_eq!(cache.masks.len(), 2);
        cache.get_or_create(key(1, 40));
        assert_eq!(cache.generated(), 4);
        cache.forget_source(1);
        assert_eq!(cache.masks.len(), 1);
        cache.clear();
        assert!(cache.masks.is_empty() && cache.order.is_empty());
    }
}
