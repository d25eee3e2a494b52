use egui::{Pos2, Rect};
use image::{GrayImage, Luma};

use crate::canvas::OutputArea;

/// Read/write access to the editor's mask raster.
///
/// The brush that paints the mask lives outside the engine; it only hands
/// finished stroke segments to [`MaskProvider::stroke`].
pub trait MaskProvider {
    /// Full-resolution coverage raster (255 keeps, 0 removes).
    fn get(&self) -> GrayImage;

    fn set(&mut self, raster: GrayImage);

    /// The part of the mask covering `area`, one pixel per world unit.
    fn area_of_interest(&self, area: &OutputArea) -> GrayImage;

    /// Paints a segment. `erase` clears coverage instead of restoring it.
    fn stroke(&mut self, from: Pos2, to: Pos2, radius: f32, erase: bool);
}

/// In-memory mask anchored in world space at `bounds.min`.
///
/// Everything outside the raster counts as fully kept.
#[derive(Clone, Debug)]
pub struct MaskRaster {
    raster: GrayImage,
    bounds: Rect,
}

impl MaskRaster {
    pub fn new(bounds: Rect) -> Self {
        let w = bounds.width().round().max(0.0) as u32;
        let h = bounds.height().round().max(0.0) as u32;
        Self {
            raster: GrayImage::from_pixel(w, h, Luma([255])),
            bounds,
        }
    }

    pub fn for_output_area(area: &OutputArea) -> Self {
        Self::new(area.rect())
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    fn coverage_at(&self, world: Pos2) -> u8 {
        let x = (world.x - self.bounds.min.x).floor();
        let y = (world.y - self.bounds.min.y).floor();
        if x < 0.0 || y < 0.0 || x >= self.raster.width() as f32 || y >= self.raster.height() as f32 {
            return 255;
        }
        self.raster.get_pixel(x as u32, y as u32)[0]
    }
}

impl MaskProvider for MaskRaster {
    fn get(&self) -> GrayImage {
        self.raster.clone()
    }

    fn set(&mut self, raster: GrayImage) {
        self.bounds = Rect::from_min_size(
            self.bounds.min,
            egui::vec2(raster.width() as f32, raster.height() as f32),
        );
        self.raster = raster;
    }

    fn area_of_interest(&self, area: &OutputArea) -> GrayImage {
        let w = area.width.round().max(0.0) as u32;
        let h = area.height.round().max(0.0) as u32;
        GrayImage::from_fn(w, h, |x, y| {
            Luma([self.coverage_at(Pos2::new(area.x + x as f32 + 0.5, area.y + y as f32 + 0.5))])
        })
    }

    fn stroke(&mut self, from: Pos2, to: Pos2, radius: f32, erase: bool) {
        let radius = radius.max(0.5);
        let value = if erase { 0 } else { 255 };
        let origin = self.bounds.min;
        let a = from - origin;
        let b = to - origin;
        let (w, h) = self.raster.dimensions();
        let x0 = (a.x.min(b.x) - radius).floor().max(0.0) as u32;
        let y0 = (a.y.min(b.y) - radius).floor().max(0.0) as u32;
        let x1 = ((a.x.max(b.x) + radius).ceil().max(0.0) as u32).min(w);
        let y1 = ((a.y.max(b.y) + radius).ceil().max(0.0) as u32).min(h);
        let seg = b - a;
        let len_sq = seg.length_sq();
        for y in y0..y1 {
            for x in x0..x1 {
                let p = egui::vec2(x as f32 + 0.5, y as f32 + 0.5);
                let t = if len_sq > 0.0 { ((p - a).dot(seg) / len_sq).clamp(0.0, 1.0) } else { 0.0 };
                if (p - (a + seg * t)).length() <= radius {
                    self.raster.put_pixel(x, y, Luma([value]));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_mask_keeps_everything() {
        let mask = MaskRaster::for_output_area(&OutputArea::new(0.0, 0.0, 8.0, 8.0));
        assert!(mask.get().pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn stroke_erases_along_segment() {
        let mut mask = MaskRaster::new(Rect::from_min_size(Pos2::ZERO, egui::vec2(20.0, 10.0)));
        mask.stroke(Pos2::new(2.0, 5.0), Pos2::new(18.0, 5.0), 1.5, true);
        let raster = mask.get();
        assert_eq!(raster.get_pixel(10, 5)[0], 0);
        assert_eq!(raster.get_pixel(10, 0)[0], 255);
        mask.stroke(Pos2::new(10.0, 5.0), Pos2::new(10.0, 5.0), 1.0, false);
        assert_eq!(mask.get().get_pixel(10, 5)[0], 255);
    }

    #[test]
    fn area_of_interest_samples_world_space() {
        let mut mask = MaskRaster::new(Rect::from_min_size(Pos2::new(10.0, 10.0), egui::vec2(10.0, 10.0)));
        mask.stroke(Pos2::new(10.0, 10.0), Pos2::new(12.0, 12.0), 1.0, true);
        let aoi = mask.area_of_interest(&OutputArea::new(5.0, 5.0, 10.0, 10.0));
        assert_eq!(aoi.dimensions(), (10, 10));
        // Outside the raster counts as kept.
        assert_eq!(aoi.get_pixel(0, 0)[0], 255);
        assert_eq!(aoi.get_pixel(5, 5)[0], 0);
    }
}
