use std::fmt;
use std::sync::Arc;

use egui::{Pos2, Rect, Vec2};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ops::blend::BlendMode;
use crate::ops::geometry::rotate_vec;

// ============================================================================
// IDENTIFIERS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// CROP
// ============================================================================

/// Visible sub-rectangle of a layer's image, in original-image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl CropRect {
    pub fn full(original_width: u32, original_height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: original_width as f32,
            height: original_height as f32,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Clamps into `[0, ow] x [0, oh]` with a minimum extent of `min_extent`
    /// (or the whole image when the image is smaller than that).
    pub fn clamped(self, original_width: u32, original_height: u32, min_extent: f32) -> Self {
        let ow = original_width as f32;
        let oh = original_height as f32;
        if ![self.x, self.y, self.width, self.height].iter().all(|v| v.is_finite()) {
            return Self::full(original_width, original_height);
        }
        let (x, width) = clamp_span(self.x, self.width, ow, min_extent);
        let (y, height) = clamp_span(self.y, self.height, oh, min_extent);
        Self { x, y, width, height }
    }

    pub(crate) fn key(&self) -> [i32; 4] {
        [
            (self.x * 10.0).round() as i32,
            (self.y * 10.0).round() as i32,
            (self.width * 10.0).round() as i32,
            (self.height * 10.0).round() as i32,
        ]
    }
}

fn clamp_span(start: f32, len: f32, limit: f32, min_extent: f32) -> (f32, f32) {
    let min_extent = min_extent.min(limit).max(0.0);
    let start = start.clamp(0.0, (limit - min_extent).max(0.0));
    let len = len.clamp(min_extent, (limit - start).max(min_extent));
    (start, len)
}

/// Crop state as a tagged variant; crop bounds only exist while cropping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum CropMode {
    #[default]
    Off,
    On(CropRect),
}

// ============================================================================
// LAYER
// ============================================================================

/// One raster layer placed in world space.
///
/// `x, y, width, height` describe the transform frame (pre-rotation), which can
/// differ from the image's native size. Rotation is in degrees about the frame centre.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    /// Shared decoded raster. Never serialized; resolved again through `image_key`.
    #[serde(skip, default = "empty_image")]
    pub image: Arc<RgbaImage>,
    pub image_key: String,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub original_width: u32,
    pub original_height: u32,
    pub rotation: f32,
    pub flip_h: bool,
    pub flip_v: bool,
    pub z_index: usize,
    pub blend_mode: BlendMode,
    pub opacity: f32,
    pub visible: bool,
    pub crop: CropMode,
    /// Feather intensity, 0..=100. Zero disables feathering.
    pub blend_area: u8,
}

fn empty_image() -> Arc<RgbaImage> {
    Arc::new(RgbaImage::new(0, 0))
}

/// Structural equality: every field except the shared raster.
impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.image_key == other.image_key
            && self.name == other.name
            && self.x == other.x
            && self.y == other.y
            && self.width == other.width
            && self.height == other.height
            && self.original_width == other.original_width
            && self.original_height == other.original_height
            && self.rotation == other.rotation
            && self.flip_h == other.flip_h
            && self.flip_v == other.flip_v
            && self.z_index == other.z_index
            && self.blend_mode == other.blend_mode
            && self.opacity == other.opacity
            && self.visible == other.visible
            && self.crop == other.crop
            && self.blend_area == other.blend_area
    }
}

impl Layer {
    /// New layer at the origin with its frame at the image's native size.
    pub fn new(image: Arc<RgbaImage>, image_key: impl Into<String>, name: impl Into<String>) -> Self {
        let (w, h) = image.dimensions();
        Self {
            id: LayerId::new(),
            image,
            image_key: image_key.into(),
            name: name.into(),
            x: 0.0,
            y: 0.0,
            width: w as f32,
            height: h as f32,
            original_width: w,
            original_height: h,
            rotation: 0.0,
            flip_h: false,
            flip_v: false,
            z_index: 0,
            blend_mode: BlendMode::Normal,
            opacity: 1.0,
            visible: true,
            crop: CropMode::Off,
            blend_area: 0,
        }
    }

    pub fn frame_rect(&self) -> Rect {
        Rect::from_min_size(Pos2::new(self.x, self.y), Vec2::new(self.width, self.height))
    }

    pub fn center(&self) -> Pos2 {
        Pos2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn rotation_rad(&self) -> f32 {
        self.rotation.to_radians()
    }

    pub fn is_cropping(&self) -> bool {
        matches!(self.crop, CropMode::On(_))
    }

    pub fn crop_rect(&self) -> Option<CropRect> {
        match self.crop {
            CropMode::On(rect) => Some(rect),
            CropMode::Off => None,
        }
    }

    /// Image-space rectangle that is drawn into the frame.
    pub fn source_rect(&self) -> CropRect {
        self.crop_rect()
            .unwrap_or_else(|| CropRect::full(self.original_width, self.original_height))
    }

    /// World point → local frame coordinates relative to the centre, un-rotated.
    pub fn world_to_local(&self, p: Pos2) -> Vec2 {
        rotate_vec(p - self.center(), -self.rotation_rad())
    }

    pub fn local_to_world(&self, local: Vec2) -> Pos2 {
        self.center() + rotate_vec(local, self.rotation_rad())
    }

    /// The four frame corners in world space (nw, ne, se, sw).
    pub fn world_corners(&self) -> [Pos2; 4] {
        let hw = self.width / 2.0;
        let hh = self.height / 2.0;
        [
            self.local_to_world(Vec2::new(-hw, -hh)),
            self.local_to_world(Vec2::new(hw, -hh)),
            self.local_to_world(Vec2::new(hw, hh)),
            self.local_to_world(Vec2::new(-hw, hh)),
        ]
    }

    /// Axis-aligned world bounds of the rotated frame.
    pub fn world_bounds(&self) -> Rect {
        let corners = self.world_corners();
        let mut rect = Rect::NOTHING;
        for c in corners {
            rect.extend_with(c);
        }
        rect
    }

    pub fn geometry(&self) -> LayerGeometry {
        LayerGeometry {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            rotation: self.rotation,
            crop: self.crop,
        }
    }

    pub fn apply_geometry(&mut self, g: &LayerGeometry) {
        self.x = g.x;
        self.y = g.y;
        self.width = g.width;
        self.height = g.height;
        self.rotation = g.rotation;
        self.crop = g.crop;
    }

    /// Frame size in whole pixels, as used for processed images.
    pub fn cache_dims(&self) -> (u32, u32) {
        (
            self.width.round().max(1.0) as u32,
            self.height.round().max(1.0) as u32,
        )
    }
}

/// Normalises an angle in degrees to `(-180, 180]`.
pub fn normalize_degrees(deg: f32) -> f32 {
    if !deg.is_finite() {
        return 0.0;
    }
    let mut d = deg % 360.0;
    if d <= -180.0 {
        d += 360.0;
    } else if d > 180.0 {
        d -= 360.0;
    }
    d
}

/// Geometry captured at drag start so deltas never accumulate drift.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerGeometry {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
    pub crop: CropMode,
}

impl LayerGeometry {
    pub fn center(&self) -> Pos2 {
        Pos2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

// ============================================================================
// OUTPUT AREA
// ============================================================================

/// World-space rectangle exported as the flattened composite.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputArea {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for OutputArea {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1024.0,
            height: 1024.0,
        }
    }
}

impl OutputArea {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn rect(&self) -> Rect {
        Rect::from_min_size(Pos2::new(self.x, self.y), Vec2::new(self.width, self.height))
    }

    pub fn from_rect(rect: Rect) -> Self {
        Self::new(rect.min.x, rect.min.y, rect.width(), rect.height())
    }

    pub fn center(&self) -> Pos2 {
        self.rect().center()
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0) || !self.width.is_finite() || !self.height.is_finite()
    }
}

// ============================================================================
// LAYER STORE
// ============================================================================

/// Layers kept in paint order (index 0 painted first) plus the selection.
///
/// Invariant: `layers[i].z_index == i` after every public mutation.
#[derive(Clone, Debug, Default)]
pub struct LayerStore {
    layers: Vec<Layer>,
    /// Ordered by last interaction; the last entry is the primary layer.
    selection: Vec<LayerId>,
}

impl LayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layers in ascending z order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id).collect()
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.index_of(id).is_some()
    }

    pub(crate) fn layers_mut(&mut self) -> &mut Vec<Layer> {
        &mut self.layers
    }

    /// Inserts at `index` in paint order and renumbers.
    pub fn insert(&mut self, index: usize, layer: Layer) {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self.renumber();
    }

    pub fn push_top(&mut self, layer: Layer) {
        self.layers.push(layer);
        self.renumber();
    }

    /// Removes the given layers, returning them in paint order.
    pub fn remove(&mut self, ids: &[LayerId]) -> Vec<Layer> {
        let (removed, kept): (Vec<Layer>, Vec<Layer>) =
            std::mem::take(&mut self.layers).into_iter().partition(|l| ids.contains(&l.id));
        self.layers = kept;
        self.selection.retain(|id| !ids.contains(id));
        self.renumber();
        removed
    }

    /// Replaces every layer, ordering by stored `z_index`.
    pub fn replace_all(&mut self, mut layers: Vec<Layer>) {
        layers.sort_by_key(|l| l.z_index);
        self.layers = layers;
        self.renumber();
        let layers = &self.layers;
        self.selection.retain(|id| layers.iter().any(|l| l.id == *id));
    }

    /// Reassigns `z_index` to the contiguous range `0..N` in current order.
    pub fn renumber(&mut self) {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.z_index = i;
        }
    }

    /// Ids top-first, as shown in a layer list.
    pub fn display_order(&self) -> Vec<LayerId> {
        self.layers.iter().rev().map(|l| l.id).collect()
    }

    pub fn selection(&self) -> &[LayerId] {
        &self.selection
    }

    pub fn primary(&self) -> Option<LayerId> {
        self.selection.last().copied()
    }

    pub fn is_selected(&self, id: LayerId) -> bool {
        self.selection.contains(&id)
    }

    /// Replaces the selection; unknown ids are dropped. Returns true if it changed.
    pub fn set_selection(&mut self, ids: &[LayerId]) -> bool {
        let mut next: Vec<LayerId> = Vec::with_capacity(ids.len());
        for id in ids {
            if self.contains(*id) && !next.contains(id) {
                next.push(*id);
            }
        }
        let changed = next != self.selection;
        self.selection = next;
        changed
    }

    /// Moves `id` to the primary slot, keeping the rest of the selection.
    pub fn touch_selection(&mut self, id: LayerId) -> bool {
        if !self.contains(id) || self.primary() == Some(id) {
            return false;
        }
        self.selection.retain(|s| *s != id);
        self.selection.push(id);
        true
    }

    pub fn toggle_selection(&mut self, id: LayerId) -> bool {
        if !self.contains(id) {
            return false;
        }
        if self.is_selected(id) {
            self.selection.retain(|s| *s != id);
        } else {
            self.selection.push(id);
        }
        true
    }

    pub fn clear_selection(&mut self) -> bool {
        let changed = !self.selection.is_empty();
        self.selection.clear();
        changed
    }

    /// Indices of selected layers in ascending paint order.
    pub fn selected_indices(&self) -> Vec<usize> {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| self.selection.contains(&l.id))
            .map(|(i, _)| i)
            .collect()
    }

    /// `base`, or `base (n)` with the smallest free `n`.
    pub fn unique_name(&self, base: &str, ignore: Option<LayerId>) -> String {
        let taken = |name: &str| {
            self.layers
                .iter()
                .any(|l| Some(l.id) != ignore && l.name == name)
        };
        if !taken(base) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base} ({n})");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgba;

    pub(crate) fn solid(w: u32, h: u32, px: [u8; 4]) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(w, h, Rgba(px)))
    }

    pub(crate) fn layer_at(name: &str, x: f32, y: f32, w: f32, h: f32) -> Layer {
        let mut layer = Layer::new(solid(w as u32, h as u32, [255, 0, 0, 255]), name, name);
        layer.x = x;
        layer.y = y;
        layer
    }

    #[test]
    fn crop_clamp_keeps_inside_and_min_extent() {
        let c = CropRect { x: -5.0, y: 90.0, width: 500.0, height: 0.2 }.clamped(100, 100, 1.0);
        assert_eq!(c.x, 0.0);
        assert_eq!(c.width, 100.0);
        assert!(c.y + c.height <= 100.0);
        assert!(c.height >= 1.0);

        let nan = CropRect { x: f32::NAN, y: 0.0, width: 1.0, height: 1.0 }.clamped(40, 30, 1.0);
        assert_eq!(nan, CropRect::full(40, 30));
    }

    #[test]
    fn local_world_round_trip_under_rotation() {
        let mut l = layer_at("a", 10.0, 20.0, 100.0, 50.0);
        l.rotation = 33.0;
        let p = Pos2::new(47.0, 31.0);
        let back = l.local_to_world(l.world_to_local(p));
        assert!((back - p).length() < 1e-3);
    }

    #[test]
    fn store_renumbers_and_drops_selection_on_remove() {
        let mut store = LayerStore::new();
        let a = layer_at("a", 0.0, 0.0, 4.0, 4.0);
        let b = layer_at("b", 0.0, 0.0, 4.0, 4.0);
        let c = layer_at("c", 0.0, 0.0, 4.0, 4.0);
        let (ida, idb, idc) = (a.id, b.id, c.id);
        store.push_top(a);
        store.push_top(b);
        store.push_top(c);
        store.set_selection(&[idb, idc]);
        let removed = store.remove(&[idb]);
        assert_eq!(removed.len(), 1);
        assert_eq!(store.selection(), &[idc]);
        let z: Vec<usize> = store.iter().map(|l| l.z_index).collect();
        assert_eq!(z, vec![0, 1]);
        assert_eq!(store.display_order(), vec![idc, ida]);
    }

    #[test]
    fn unique_name_appends_counter() {
        let mut store = LayerStore::new();
        store.push_top(layer_at("photo", 0.0, 0.0, 2.0, 2.0));
        store.push_top(layer_at("photo (2)", 0.0, 0.0, 2.0, 2.0));
        assert_eq!(store.unique_name("photo", None), "photo (3)");
        assert_eq!(store.unique_name("other", None), "other");
    }

    #[test]
    fn structural_equality_ignores_raster() {
        let a = layer_at("a", 0.0, 0.0, 4.0, 4.0);
        let mut b = a.clone();
        b.image = solid(4, 4, [0, 0, 0, 0]);
        assert_eq!(a, b);
        b.x = 1.0;
        assert_ne!(a, b);
    }

    #[test]
    fn normalize_degrees_wraps() {
        assert_eq!(normalize_degrees(190.0), -170.0);
        assert_eq!(normalize_degrees(-180.0), 180.0);
        assert_eq!(normalize_degrees(540.0), 180.0);
    }
}
