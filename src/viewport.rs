use egui::{Pos2, Rect, Vec2};
use serde::{Deserialize, Serialize};

/// Size of the drawing element on screen versus its backing raster.
///
/// When the backing raster is not `element_size * pixels_per_point`, screen
/// coordinates coming from the host are off by that ratio and get corrected.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenMetrics {
    /// Element size in logical points.
    pub element_size: Vec2,
    /// Backing raster size in physical pixels.
    pub backing_size: Vec2,
    pub pixels_per_point: f32,
}

impl ScreenMetrics {
    /// Metrics for an element whose backing raster matches its on-screen size.
    pub fn matched(element_size: Vec2, pixels_per_point: f32) -> Self {
        Self {
            element_size,
            backing_size: element_size * pixels_per_point,
            pixels_per_point,
        }
    }

    /// Factor mapping logical screen points onto the backing raster, per axis.
    pub fn correction(&self) -> Vec2 {
        let expected = self.element_size * self.pixels_per_point;
        let axis = |backing: f32, expected: f32| {
            if expected > 0.0 && backing > 0.0 { backing / expected } else { 1.0 }
        };
        Vec2::new(
            axis(self.backing_size.x, expected.x),
            axis(self.backing_size.y, expected.y),
        )
    }
}

impl Default for ScreenMetrics {
    fn default() -> Self {
        Self::matched(Vec2::new(1.0, 1.0), 1.0)
    }
}

/// Pan/zoom state: `(x, y)` is the world point under the screen's top-left.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub zoom: f32,
    #[serde(skip, default = "default_min_zoom")]
    pub min_zoom: f32,
    #[serde(skip, default = "default_max_zoom")]
    pub max_zoom: f32,
}

fn default_min_zoom() -> f32 {
    0.1
}

fn default_max_zoom() -> f32 {
    10.0
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
        }
    }
}

impl Viewport {
    pub fn with_zoom_range(min_zoom: f32, max_zoom: f32) -> Self {
        Self {
            min_zoom,
            max_zoom,
            ..Self::default()
        }
    }

    pub fn origin(&self) -> Pos2 {
        Pos2::new(self.x, self.y)
    }

    pub fn world_to_screen(&self, p: Pos2) -> Pos2 {
        ((p - self.origin()) * self.zoom).to_pos2()
    }

    pub fn screen_to_world(&self, p: Pos2, metrics: &ScreenMetrics) -> Pos2 {
        let c = metrics.correction();
        self.origin() + Vec2::new(p.x * c.x, p.y * c.y) / self.zoom
    }

    /// Length in world units of `px` screen pixels.
    pub fn screen_len(&self, px: f32) -> f32 {
        px / self.zoom
    }

    pub fn clamp_zoom(&self, zoom: f32) -> f32 {
        if !zoom.is_finite() {
            return self.zoom;
        }
        zoom.clamp(self.min_zoom, self.max_zoom)
    }

    pub fn set_zoom_range(&mut self, min_zoom: f32, max_zoom: f32) {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self.zoom = self.clamp_zoom(self.zoom);
    }

    /// Multiplies zoom by `factor`, keeping the world point under `cursor` fixed.
    pub fn zoom_at(&mut self, cursor: Pos2, factor: f32, metrics: &ScreenMetrics) {
        let pinned = self.screen_to_world(cursor, metrics);
        self.zoom = self.clamp_zoom(self.zoom * factor);
        let c = metrics.correction();
        let screen = Vec2::new(cursor.x * c.x, cursor.y * c.y);
        let origin = pinned - screen / self.zoom;
        self.x = origin.x;
        self.y = origin.y;
    }

    /// Moves the view by a screen-space drag delta.
    pub fn pan_by(&mut self, screen_delta: Vec2) {
        self.x -= screen_delta.x / self.zoom;
        self.y -= screen_delta.y / self.zoom;
    }

    /// Zooms and centres so `rect` fits an element of `screen_size` with `margin` px.
    pub fn fit_rect(&mut self, rect: Rect, screen_size: Vec2, margin: f32) {
        let avail = (screen_size - Vec2::splat(margin * 2.0)).max(Vec2::splat(1.0));
        if rect.width() <= 0.0 || rect.height() <= 0.0 {
            return;
        }
        self.zoom = self.clamp_zoom((avail.x / rect.width()).min(avail.y / rect.height()));
        let origin = rect.center() - screen_size / (2.0 * self.zoom);
        self.x = origin.x;
        self.y = origin.y;
    }

    pub fn reset(&mut self) {
        self.x = 0.0;
        self.y = 0.0;
        self.zoom = self.clamp_zoom(1.0);
    }

    /// World rectangle visible in an element of `screen_size`.
    pub fn visible_world(&self, screen_size: Vec2) -> Rect {
        Rect::from_min_size(self.origin(), screen_size / self.zoom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_pins_cursor() {
        let metrics = ScreenMetrics::matched(Vec2::new(800.0, 600.0), 1.0);
        let mut vp = Viewport { x: 40.0, y: -20.0, ..Viewport::default() };
        let cursor = Pos2::new(300.0, 200.0);
        let before = vp.screen_to_world(cursor, &metrics);
        vp.zoom_at(cursor, 2.5, &metrics);
        assert_eq!(vp.zoom, 2.5);
        let after = vp.world_to_screen(before);
        assert!((after - cursor).length() < 1e-3);
    }

    #[test]
    fn zoom_is_clamped() {
        let metrics = ScreenMetrics::default();
        let mut vp = Viewport::default();
        vp.zoom_at(Pos2::ZERO, 1000.0, &metrics);
        assert_eq!(vp.zoom, 10.0);
        vp.zoom_at(Pos2::ZERO, 1e-6, &metrics);
        assert_eq!(vp.zoom, 0.1);
    }

    #[test]
    fn stretched_backing_is_corrected() {
        // Element shown at 400x300 but backed by an 800x600 raster at 1 ppp.
        let metrics = ScreenMetrics {
            element_size: Vec2::new(400.0, 300.0),
            backing_size: Vec2::new(800.0, 600.0),
            pixels_per_point: 1.0,
        };
        let vp = Viewport::default();
        assert_eq!(vp.screen_to_world(Pos2::new(100.0, 50.0), &metrics), Pos2::new(200.0, 100.0));
    }

    #[test]
    fn pan_moves_opposite_to_drag() {
        let mut vp = Viewport { zoom: 2.0, ..Viewport::default() };
        vp.pan_by(Vec2::new(10.0, -4.0));
        assert_eq!((vp.x, vp.y), (-5.0, 2.0));
    }

    #[test]
    fn fit_rect_centres() {
        let mut vp = Viewport::default();
        let rect = Rect::from_min_size(Pos2::new(0.0, 0.0), Vec2::new(200.0, 100.0));
        vp.fit_rect(rect, Vec2::new(400.0, 400.0), 0.0);
        assert_eq!(vp.zoom, 2.0);
        let c = vp.world_to_screen(rect.center());
        assert!((c - Pos2::new(200.0, 200.0)).length() < 1e-3);
    }
}
