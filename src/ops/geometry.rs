use egui::{CursorIcon, Pos2, Rect, Vec2};

use crate::canvas::{normalize_degrees, CropMode, CropRect, Layer, LayerGeometry, LayerId, LayerStore, OutputArea};

// ============================================================================
// HELPERS
// ============================================================================

/// Rotates `v` by `rad` (clockwise on screen, since y grows downward).
#[inline]
pub fn rotate_vec(v: Vec2, rad: f32) -> Vec2 {
    let (sin, cos) = rad.sin_cos();
    Vec2::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
}

pub fn snap_to_grid(p: Pos2, grid: f32) -> Pos2 {
    if grid <= 0.0 {
        return p;
    }
    Pos2::new((p.x / grid).round() * grid, (p.y / grid).round() * grid)
}

// ============================================================================
// HANDLES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Handle {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
    Rotate,
}

impl Handle {
    pub const RESIZE: [Handle; 8] = [
        Handle::NW,
        Handle::N,
        Handle::NE,
        Handle::E,
        Handle::SE,
        Handle::S,
        Handle::SW,
        Handle::W,
    ];

    pub const CORNERS: [Handle; 4] = [Handle::NW, Handle::NE, Handle::SE, Handle::SW];

    /// Unit direction of the handle from the frame centre, per axis in {-1, 0, 1}.
    pub fn sign(self) -> Vec2 {
        match self {
            Handle::N => Vec2::new(0.0, -1.0),
            Handle::NE => Vec2::new(1.0, -1.0),
            Handle::E => Vec2::new(1.0, 0.0),
            Handle::SE => Vec2::new(1.0, 1.0),
            Handle::S => Vec2::new(0.0, 1.0),
            Handle::SW => Vec2::new(-1.0, 1.0),
            Handle::W => Vec2::new(-1.0, 0.0),
            Handle::NW => Vec2::new(-1.0, -1.0),
            Handle::Rotate => Vec2::ZERO,
        }
    }

    pub fn opposite(self) -> Handle {
        match self {
            Handle::N => Handle::S,
            Handle::NE => Handle::SW,
            Handle::E => Handle::W,
            Handle::SE => Handle::NW,
            Handle::S => Handle::N,
            Handle::SW => Handle::NE,
            Handle::W => Handle::E,
            Handle::NW => Handle::SE,
            Handle::Rotate => Handle::Rotate,
        }
    }

    pub fn is_corner(self) -> bool {
        let s = self.sign();
        s.x != 0.0 && s.y != 0.0
    }

    pub fn cursor(self) -> CursorIcon {
        match self {
            Handle::N => CursorIcon::ResizeNorth,
            Handle::NE => CursorIcon::ResizeNorthEast,
            Handle::E => CursorIcon::ResizeEast,
            Handle::SE => CursorIcon::ResizeSouthEast,
            Handle::S => CursorIcon::ResizeSouth,
            Handle::SW => CursorIcon::ResizeSouthWest,
            Handle::W => CursorIcon::ResizeWest,
            Handle::NW => CursorIcon::ResizeNorthWest,
            Handle::Rotate => CursorIcon::Alias,
        }
    }
}

/// Handle layout parameters in screen pixels.
#[derive(Clone, Copy, Debug)]
pub struct HandleMetrics {
    pub radius_px: f32,
    pub rotate_offset_px: f32,
    pub zoom: f32,
}

impl HandleMetrics {
    fn radius_world(&self) -> f32 {
        self.radius_px / self.zoom.max(f32::EPSILON)
    }

    fn rotate_offset_world(&self) -> f32 {
        self.rotate_offset_px / self.zoom.max(f32::EPSILON)
    }
}

/// Box the handles bound, in local frame coordinates centred on the frame.
///
/// Outside crop mode this is the whole frame. In crop mode it is the crop rectangle
/// scaled into the frame, mirrored on flipped axes.
pub fn handle_box(layer: &Layer) -> Rect {
    let hw = layer.width / 2.0;
    let hh = layer.height / 2.0;
    let CropMode::On(crop) = layer.crop else {
        return Rect::from_min_max(Pos2::new(-hw, -hh), Pos2::new(hw, hh));
    };
    let sx = layer.width / (layer.original_width.max(1) as f32);
    let sy = layer.height / (layer.original_height.max(1) as f32);
    let (mut l, mut r) = (crop.x * sx - hw, crop.right() * sx - hw);
    let (mut t, mut b) = (crop.y * sy - hh, crop.bottom() * sy - hh);
    if layer.flip_h {
        (l, r) = (-r, -l);
    }
    if layer.flip_v {
        (t, b) = (-b, -t);
    }
    Rect::from_min_max(Pos2::new(l, t), Pos2::new(r, b))
}

fn box_point(b: Rect, handle: Handle) -> Vec2 {
    let s = handle.sign();
    let c = b.center();
    Vec2::new(c.x + s.x * b.width() / 2.0, c.y + s.y * b.height() / 2.0)
}

/// Eight resize handles followed by the rotation handle, in world space.
pub fn handles_for(layer: &Layer, metrics: &HandleMetrics) -> Vec<(Handle, Pos2)> {
    let b = handle_box(layer);
    let mut out: Vec<(Handle, Pos2)> = Handle::RESIZE
        .iter()
        .map(|h| (*h, layer.local_to_world(box_point(b, *h))))
        .collect();
    let rotate_local = Vec2::new(b.center().x, b.min.y - metrics.rotate_offset_world());
    out.push((Handle::Rotate, layer.local_to_world(rotate_local)));
    out
}

/// Handle under `world`, rotation handle first, then corners, then edges.
pub fn handle_at(layer: &Layer, world: Pos2, metrics: &HandleMetrics) -> Option<Handle> {
    let radius = metrics.radius_world();
    let handles = handles_for(layer, metrics);
    let hit = |kind: Handle| {
        handles
            .iter()
            .find(|(h, _)| *h == kind)
            .is_some_and(|(_, p)| p.distance(world) <= radius)
    };
    if hit(Handle::Rotate) {
        return Some(Handle::Rotate);
    }
    Handle::CORNERS
        .iter()
        .chain([Handle::N, Handle::E, Handle::S, Handle::W].iter())
        .copied()
        .find(|h| hit(*h))
}

/// Corner of the handle box closest to `world`.
pub fn nearest_corner(layer: &Layer, world: Pos2) -> Handle {
    let b = handle_box(layer);
    let local = layer.world_to_local(world);
    Handle::CORNERS
        .iter()
        .copied()
        .min_by(|a, c| {
            let da = (box_point(b, *a) - local).length_sq();
            let dc = (box_point(b, *c) - local).length_sq();
            da.total_cmp(&dc)
        })
        .unwrap_or(Handle::SE)
}

// ============================================================================
// HIT TESTING
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerHit {
    pub id: LayerId,
    /// Point in the layer's un-rotated frame, relative to its centre.
    pub local: Vec2,
}

/// Topmost visible layer whose frame contains `world`.
pub fn layer_at(store: &LayerStore, world: Pos2) -> Option<LayerHit> {
    store.iter().rev().filter(|l| l.visible).find_map(|layer| {
        let local = layer.world_to_local(world);
        let inside = local.x.abs() <= layer.width / 2.0 && local.y.abs() <= layer.height / 2.0;
        inside.then_some(LayerHit { id: layer.id, local })
    })
}

// ============================================================================
// RESIZE / ROTATE / CROP
// ============================================================================

/// Anchor-preserving resize of a (possibly rotated) box.
///
/// The point opposite `handle` stays fixed in world space. Returns the new
/// centre and size.
pub fn anchored_resize(
    center: Pos2,
    size: Vec2,
    rot_rad: f32,
    handle: Handle,
    pointer: Pos2,
    aspect_lock: bool,
    min_extent: f32,
) -> (Pos2, Vec2) {
    let sign = handle.sign();
    let anchor = center + rotate_vec(
        Vec2::new(-sign.x * size.x / 2.0, -sign.y * size.y / 2.0),
        rot_rad,
    );
    let local = rotate_vec(pointer - anchor, -rot_rad);

    let mut w = if sign.x != 0.0 { (local.x * sign.x).max(min_extent) } else { size.x };
    let mut h = if sign.y != 0.0 { (local.y * sign.y).max(min_extent) } else { size.y };

    if aspect_lock && size.x > 0.0 && size.y > 0.0 {
        let aspect = size.x / size.y;
        let x_driven = if sign.x != 0.0 && sign.y != 0.0 {
            w / size.x >= h / size.y
        } else {
            sign.x != 0.0
        };
        if x_driven {
            h = w / aspect;
        } else {
            w = h * aspect;
        }
        if w < min_extent {
            w = min_extent;
            h = w / aspect;
        }
        if h < min_extent {
            h = min_extent;
            w = h * aspect;
        }
    }

    let new_center = anchor + rotate_vec(Vec2::new(sign.x * w / 2.0, sign.y * h / 2.0), rot_rad);
    (new_center, Vec2::new(w, h))
}

/// Frame resize from a handle, computed against the drag-start geometry.
pub fn resize_frame(
    origin: &LayerGeometry,
    handle: Handle,
    pointer: Pos2,
    aspect_lock: bool,
    min_extent: f32,
) -> LayerGeometry {
    if handle == Handle::Rotate {
        return *origin;
    }
    let (center, size) = anchored_resize(
        origin.center(),
        Vec2::new(origin.width, origin.height),
        origin.rotation.to_radians(),
        handle,
        pointer,
        aspect_lock,
        min_extent,
    );
    LayerGeometry {
        x: center.x - size.x / 2.0,
        y: center.y - size.y / 2.0,
        width: size.x,
        height: size.y,
        ..*origin
    }
}

/// Crop-bounds edit from a handle.
///
/// Works on the pointer delta since drag start, rotated into the frame and
/// corrected for the layer's current flips, then scaled into image space. Frame
/// size is untouched.
#[allow(clippy::too_many_arguments)]
pub fn resize_crop(
    origin: &LayerGeometry,
    original_width: u32,
    original_height: u32,
    flip_h: bool,
    flip_v: bool,
    handle: Handle,
    drag_start: Pos2,
    pointer: Pos2,
    min_extent: f32,
) -> CropRect {
    let start = match origin.crop {
        CropMode::On(rect) => rect,
        CropMode::Off => CropRect::full(original_width, original_height),
    }
    .clamped(original_width, original_height, min_extent);
    if handle == Handle::Rotate || origin.width <= 0.0 || origin.height <= 0.0 {
        return start;
    }

    let mut d = rotate_vec(pointer - drag_start, -origin.rotation.to_radians());
    if flip_h {
        d.x = -d.x;
    }
    if flip_v {
        d.y = -d.y;
    }
    let dx = d.x * original_width as f32 / origin.width;
    let dy = d.y * original_height as f32 / origin.height;

    // Flips mirror which image edge sits under a given handle.
    let sign = handle.sign();
    let side_x = if flip_h { -sign.x } else { sign.x };
    let side_y = if flip_v { -sign.y } else { sign.y };

    let ow = original_width as f32;
    let oh = original_height as f32;
    let min_x = min_extent.min(ow);
    let min_y = min_extent.min(oh);
    let (left, right) = move_edges(start.x, start.right(), side_x, dx, ow, min_x);
    let (top, bottom) = move_edges(start.y, start.bottom(), side_y, dy, oh, min_y);

    CropRect {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
    }
    .clamped(original_width, original_height, min_extent)
}

fn move_edges(lo: f32, hi: f32, side: f32, delta: f32, limit: f32, min: f32) -> (f32, f32) {
    if !delta.is_finite() {
        return (lo, hi);
    }
    if side < 0.0 {
        let lo = (lo + delta).clamp(0.0, limit);
        if hi - lo < min {
            let hi = (lo + min).min(limit);
            return ((hi - min).max(0.0), hi);
        }
        (lo, hi)
    } else if side > 0.0 {
        let hi = (hi + delta).clamp(0.0, limit);
        if hi - lo < min {
            let lo = (hi - min).max(0.0);
            return (lo, (lo + min).min(limit));
        }
        (lo, hi)
    } else {
        (lo, hi)
    }
}

/// `origin + (angle(pointer) - angle(start))` about `center`, in degrees.
pub fn rotation_from_drag(
    origin_deg: f32,
    center: Pos2,
    drag_start: Pos2,
    pointer: Pos2,
    snap_deg: Option<f32>,
) -> f32 {
    let a0 = (drag_start.y - center.y).atan2(drag_start.x - center.x);
    let a1 = (pointer.y - center.y).atan2(pointer.x - center.x);
    let mut deg = origin_deg + (a1 - a0).to_degrees();
    if let Some(step) = snap_deg
        && step > 0.0
    {
        deg = (deg / step).round() * step;
    }
    normalize_degrees(deg)
}

/// Scales a frame about its centre.
pub fn scale_about_center(origin: &LayerGeometry, factor: f32, min_extent: f32) -> LayerGeometry {
    let c = origin.center();
    let mut factor = factor.max(f32::EPSILON);
    let smallest = origin.width.min(origin.height);
    if smallest * factor < min_extent && smallest > 0.0 {
        factor = min_extent / smallest;
    }
    let w = origin.width * factor;
    let h = origin.height * factor;
    LayerGeometry {
        x: c.x - w / 2.0,
        y: c.y - h / 2.0,
        width: w,
        height: h,
        ..*origin
    }
}

/// Maps a frame from one rectangle's coordinate system into another's.
pub fn remap_geometry(origin: &LayerGeometry, from: Rect, to: Rect) -> LayerGeometry {
    let sx = if from.width() > 0.0 { to.width() / from.width() } else { 1.0 };
    let sy = if from.height() > 0.0 { to.height() / from.height() } else { 1.0 };
    let c = origin.center();
    let nc = Pos2::new(to.min.x + (c.x - from.min.x) * sx, to.min.y + (c.y - from.min.y) * sy);
    let w = origin.width * sx;
    let h = origin.height * sy;
    LayerGeometry {
        x: nc.x - w / 2.0,
        y: nc.y - h / 2.0,
        width: w,
        height: h,
        ..*origin
    }
}

// ============================================================================
// OUTPUT AREA
// ============================================================================

pub fn output_handles(area: &OutputArea) -> Vec<(Handle, Pos2)> {
    let r = area.rect();
    let c = r.center();
    Handle::RESIZE
        .iter()
        .map(|h| {
            let s = h.sign();
            (*h, Pos2::new(c.x + s.x * r.width() / 2.0, c.y + s.y * r.height() / 2.0))
        })
        .collect()
}

pub fn output_handle_at(area: &OutputArea, world: Pos2, metrics: &HandleMetrics) -> Option<Handle> {
    let radius = metrics.radius_world();
    let handles = output_handles(area);
    handles
        .iter()
        .filter(|(h, _)| h.is_corner())
        .chain(handles.iter().filter(|(h, _)| !h.is_corner()))
        .find(|(_, p)| p.distance(world) <= radius)
        .map(|(h, _)| *h)
}

/// Anchor-preserving resize of the output area. Grid snap rounds the pointer.
pub fn resize_output_area(
    origin: &OutputArea,
    handle: Handle,
    pointer: Pos2,
    aspect_lock: bool,
    grid: Option<f32>,
    min_extent: f32,
) -> OutputArea {
    let pointer = match grid {
        Some(g) => snap_to_grid(pointer, g),
        None => pointer,
    };
    let r = origin.rect();
    let (c, size) = anchored_resize(r.center(), r.size(), 0.0, handle, pointer, aspect_lock, min_extent);
    OutputArea::new(c.x - size.x / 2.0, c.y - size.y / 2.0, size.x, size.y)
}

pub fn move_output_area(origin: &OutputArea, delta: Vec2, grid: Option<f32>) -> OutputArea {
    let mut min = Pos2::new(origin.x, origin.y) + delta;
    if let Some(g) = grid {
        min = snap_to_grid(min, g);
    }
    OutputArea::new(min.x, min.y, origin.width, origin.height)
}

/// Axis-aligned world bounds covering every given layer.
pub fn union_bounds<'a>(layers: impl IntoIterator<Item = &'a Layer>) -> Rect {
    layers
        .into_iter()
        .fold(Rect::NOTHING, |acc, l| acc.union(l.world_bounds()))
}
