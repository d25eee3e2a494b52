// ============================================================================
// LAYER-STRUCTURE OPERATIONS: add, remove, fuse, per-layer properties
// ============================================================================
//
// These mutate the store only. Callers record history and tell the compositor.

use std::sync::Arc;
use std::time::Instant;

use egui::{Pos2, Vec2};
use image::RgbaImage;

use crate::canvas::{CropMode, CropRect, Layer, LayerId, LayerStore, OutputArea};
use crate::compositor::Compositor;
use crate::error::{EngineError, Result};
use crate::ops::blend::BlendMode;
use crate::ops::geometry::union_bounds;

/// Where a new layer lands relative to the output area.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Placement {
    /// Native size, centred on the output area.
    #[default]
    Center,
    /// Scaled down (never up) to fit inside the output area, centred.
    Fit,
    /// Native size with the top-left corner at a world point.
    At(Pos2),
}

pub fn place_layer(layer: &mut Layer, placement: Placement, area: &OutputArea) {
    let native = Vec2::new(layer.original_width as f32, layer.original_height as f32);
    let (size, min) = match placement {
        Placement::Center => (native, area.center() - native / 2.0),
        Placement::Fit => {
            let scale = if native.x > 0.0 && native.y > 0.0 {
                (area.width / native.x).min(area.height / native.y).min(1.0)
            } else {
                1.0
            };
            let size = native * scale;
            (size, area.center() - size / 2.0)
        }
        Placement::At(p) => (native, p),
    };
    layer.x = min.x;
    layer.y = min.y;
    layer.width = size.x;
    layer.height = size.y;
}

/// Adds a layer on top of the stack and makes it the only selection.
pub fn add_layer(
    store: &mut LayerStore,
    image: Arc<RgbaImage>,
    image_key: &str,
    name: &str,
    placement: Placement,
    area: &OutputArea,
) -> Result<LayerId> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(EngineError::degenerate("new layer", w as f32, h as f32));
    }
    let unique = store.unique_name(name, None);
    let mut layer = Layer::new(image, image_key, unique);
    place_layer(&mut layer, placement, area);
    let id = layer.id;
    store.push_top(layer);
    store.set_selection(&[id]);
    tracing::info!(layer = %id, image_key, width = w, height = h, "Layer added");
    Ok(id)
}

pub fn remove_layers(store: &mut LayerStore, ids: &[LayerId]) -> Vec<Layer> {
    let removed = store.remove(ids);
    if !removed.is_empty() {
        tracing::info!(count = removed.len(), "Layers removed");
    }
    removed
}

/// Flattens `ids` into one layer covering their combined bounds.
///
/// The new layer takes the lowest paint position of its inputs. Returns the new
/// layer and the ones it replaced. Nothing changes if the bounds have no area.
pub fn fuse_layers(
    store: &mut LayerStore,
    ids: &[LayerId],
    compositor: &mut Compositor,
    image_key: &str,
    now: Instant,
) -> Result<(LayerId, Vec<Layer>)> {
    let inputs: Vec<&Layer> = store.iter().filter(|l| ids.contains(&l.id)).collect();
    let Some(first) = inputs.first() else {
        return Err(match ids.first() {
            Some(id) => EngineError::LayerNotFound(*id),
            None => EngineError::degenerate("fuse", 0.0, 0.0),
        });
    };
    let lowest = first.z_index;

    let bounds = union_bounds(inputs.iter().copied().filter(|l| l.visible));
    if !bounds.is_positive() || bounds.width() < 1.0 || bounds.height() < 1.0 {
        return Err(EngineError::degenerate("fuse", bounds.width().max(0.0), bounds.height().max(0.0)));
    }
    let bounds = egui::Rect::from_min_max(bounds.min.floor(), bounds.max.ceil());
    let surface = compositor.render_layers(inputs.iter().copied(), bounds, now)?;
    let origin = surface.origin;
    let image = Arc::new(surface.into_image());

    let name = store.unique_name("Fused", None);
    let mut fused = Layer::new(image, image_key, name);
    fused.x = origin.x;
    fused.y = origin.y;

    let fused_id = fused.id;
    let removed = store.remove(ids);
    store.insert(lowest, fused);
    store.set_selection(&[fused_id]);
    tracing::info!(layer = %fused_id, inputs = removed.len(), "Layers fused");
    Ok((fused_id, removed))
}

// ----------------------------------------------------------------------------
// Per-layer properties. Each returns whether anything changed.
// ----------------------------------------------------------------------------

fn layer_mut(store: &mut LayerStore, id: LayerId) -> Result<&mut Layer> {
    store.get_mut(id).ok_or(EngineError::LayerNotFound(id))
}

pub fn set_opacity(store: &mut LayerStore, id: LayerId, opacity: f32) -> Result<bool> {
    let layer = layer_mut(store, id)?;
    let opacity = if opacity.is_finite() { opacity.clamp(0.0, 1.0) } else { layer.opacity };
    let changed = layer.opacity != opacity;
    layer.opacity = opacity;
    Ok(changed)
}

pub fn set_blend_mode(store: &mut LayerStore, id: LayerId, mode: BlendMode) -> Result<bool> {
    let layer = layer_mut(store, id)?;
    let changed = layer.blend_mode != mode;
    layer.blend_mode = mode;
    Ok(changed)
}

pub fn set_blend_area(store: &mut LayerStore, id: LayerId, blend_area: u8) -> Result<bool> {
    let layer = layer_mut(store, id)?;
    let blend_area = blend_area.min(100);
    let changed = layer.blend_area != blend_area;
    layer.blend_area = blend_area;
    Ok(changed)
}

pub fn set_visible(store: &mut LayerStore, id: LayerId, visible: bool) -> Result<bool> {
    let layer = layer_mut(store, id)?;
    let changed = layer.visible != visible;
    layer.visible = visible;
    Ok(changed)
}

pub fn rename(store: &mut LayerStore, id: LayerId, name: &str) -> Result<bool> {
    if !store.contains(id) {
        return Err(EngineError::LayerNotFound(id));
    }
    let unique = store.unique_name(name.trim(), Some(id));
    let layer = layer_mut(store, id)?;
    let changed = layer.name != unique;
    layer.name = unique;
    Ok(changed)
}

pub fn flip(store: &mut LayerStore, id: LayerId, horizontal: bool) -> Result<bool> {
    let layer = layer_mut(store, id)?;
    if horizontal {
        layer.flip_h = !layer.flip_h;
    } else {
        layer.flip_v = !layer.flip_v;
    }
    Ok(true)
}

/// Turning crop on starts from the whole image; turning it off drops the bounds.
pub fn set_crop_mode(store: &mut LayerStore, id: LayerId, on: bool, min_extent: f32) -> Result<bool> {
    let layer = layer_mut(store, id)?;
    let next = match (on, layer.crop) {
        (true, CropMode::On(rect)) => {
            CropMode::On(rect.clamped(layer.original_width, layer.original_height, min_extent))
        }
        (true, CropMode::Off) => CropMode::On(CropRect::full(layer.original_width, layer.original_height)),
        (false, _) => CropMode::Off,
    };
    let changed = next != layer.crop;
    layer.crop = next;
    Ok(changed)
}

/// Native size about the current centre, no rotation, crop kept.
pub fn reset_transform(store: &mut LayerStore, id: LayerId) -> Result<bool> {
    let layer = layer_mut(store, id)?;
    let before = layer.geometry();
    let c = layer.center();
    layer.width = layer.original_width as f32;
    layer.height = layer.original_height as f32;
    layer.x = c.x - layer.width / 2.0;
    layer.y = c.y - layer.height / 2.0;
    layer.rotation = 0.0;
    Ok(layer.geometry() != before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::tests::{layer_at, solid};
    use crate::settings::EngineSettings;

    #[test]
    fn add_layer_centres_and_selects() {
        let mut store = LayerStore::new();
        let area = OutputArea::new(0.0, 0.0, 100.0, 100.0);
        let id = add_layer(&mut store, solid(20, 10, [1, 2, 3, 255]), "k", "photo", Placement::Center, &area).unwrap();
        let layer = store.get(id).unwrap();
        assert_eq!((layer.x, layer.y), (40.0, 45.0));
        assert_eq!(store.selection(), &[id]);

        let second = add_layer(&mut store, solid(20, 10, [1, 2, 3, 255]), "k", "photo", Placement::Center, &area).unwrap();
        assert_eq!(store.get(second).unwrap().name, "photo (2)");
        assert_eq!(store.get(second).unwrap().z_index, 1);
    }

    #[test]
    fn fit_placement_scales_down_only() {
        let area = OutputArea::new(0.0, 0.0, 100.0, 50.0);
        let mut big = Layer::new(solid(400, 100, [0; 4]), "k", "big");
        place_layer(&mut big, Placement::Fit, &area);
        assert_eq!((big.width, big.height), (100.0, 25.0));
        let mut small = Layer::new(solid(10, 10, [0; 4]), "k", "small");
        place_layer(&mut small, Placement::Fit, &area);
        assert_eq!((small.width, small.height), (10.0, 10.0));
    }

    #[test]
    fn empty_image_is_rejected() {
        let mut store = LayerStore::new();
        let err = add_layer(&mut store, solid(0, 5, [0; 4]), "k", "n", Placement::Center, &OutputArea::default());
        assert!(matches!(err, Err(EngineError::DegenerateGeometry { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn fuse_replaces_inputs_at_lowest_position() {
        let mut store = LayerStore::new();
        let under = layer_at("under", 0.0, 0.0, 4.0, 4.0);
        let a = layer_at("a", 0.0, 0.0, 4.0, 4.0);
        let top = layer_at("top", 0.0, 0.0, 4.0, 4.0);
        let b = layer_at("b", 10.0, 2.0, 4.0, 4.0);
        let ids = [a.id, b.id];
        let (under_id, top_id) = (under.id, top.id);
        store.push_top(under);
        store.push_top(a);
        store.push_top(top);
        store.push_top(b);

        let mut comp = Compositor::new(&EngineSettings::inline());
        let (fused, removed) = fuse_layers(&mut store, &ids, &mut comp, "generated:f", Instant::now()).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.ids(), vec![under_id, fused, top_id]);
        let layer = store.get(fused).unwrap();
        assert_eq!((layer.x, layer.y, layer.width, layer.height), (0.0, 0.0, 14.0, 6.0));
        assert_eq!(layer.image.get_pixel(11, 3)[3], 255);
        assert_eq!(layer.image.get_pixel(6, 5)[3], 0);
    }

    #[test]
    fn fuse_of_hidden_layers_is_degenerate_and_untouched() {
        let mut store = LayerStore::new();
        let mut a = layer_at("a", 0.0, 0.0, 4.0, 4.0);
        a.visible = false;
        let id = a.id;
        store.push_top(a);
        let before = store.layers().to_vec();
        let mut comp = Compositor::new(&EngineSettings::inline());
        let err = fuse_layers(&mut store, &[id], &mut comp, "generated:f", Instant::now());
        assert!(matches!(err, Err(EngineError::DegenerateGeometry { .. })));
        assert_eq!(store.layers(), before.as_slice());
    }

    #[test]
    fn property_setters_clamp() {
        let mut store = LayerStore::new();
        let l = layer_at("a", 0.0, 0.0, 4.0, 4.0);
        let id = l.id;
        store.push_top(l);
        set_opacity(&mut store, id, 3.0).unwrap();
        set_blend_area(&mut store, id, 250).unwrap();
        assert_eq!(store.get(id).unwrap().opacity, 1.0);
        assert_eq!(store.get(id).unwrap().blend_area, 100);
        assert!(set_crop_mode(&mut store, id, true, 1.0).unwrap());
        assert_eq!(store.get(id).unwrap().crop, CropMode::On(CropRect::full(4, 4)));
        assert!(matches!(set_visible(&mut store, LayerId::new(), true), Err(EngineError::LayerNotFound(_))));
    }
}
