use std::sync::Arc;

use egui::{Pos2, Vec2};
use image::RgbaImage;
use proptest::prelude::*;

use layerfe::canvas::{CropMode, CropRect, Layer, LayerGeometry, LayerStore};
use layerfe::ops::geometry::{resize_crop, resize_frame, rotate_vec, Handle};
use layerfe::ops::zorder::{self, Direction};
use layerfe::viewport::{ScreenMetrics, Viewport};

fn assert_contiguous(store: &LayerStore) {
    for (i, layer) in store.layers().iter().enumerate() {
        assert_eq!(layer.z_index, i);
    }
}

fn anchor_of(g: &LayerGeometry, handle: Handle) -> Pos2 {
    let sign = handle.sign();
    g.center() + rotate_vec(Vec2::new(-sign.x * g.width / 2.0, -sign.y * g.height / 2.0), g.rotation.to_radians())
}

proptest! {
    #[test]
    fn z_order_stays_contiguous(ops in prop::collection::vec((0u8..8, any::<u8>()), 1..60)) {
        let image = Arc::new(RgbaImage::new(2, 2));
        let mut store = LayerStore::new();
        for (op, arg) in ops {
            let ids = store.ids();
            match op {
                0 => store.push_top(Layer::new(Arc::clone(&image), "k", "layer")),
                1 if !ids.is_empty() => {
                    store.remove(&[ids[arg as usize % ids.len()]]);
                }
                2 => {
                    let picked: Vec<_> = ids
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| arg & (1 << (i % 8)) != 0)
                        .map(|(_, id)| *id)
                        .collect();
                    store.set_selection(&picked);
                }
                3 | 4 => {
                    let dir = if op == 3 { Direction::Up } else { Direction::Down };
                    let sel = store.selection().to_vec();
                    zorder::move_relative(&mut store, &sel, dir);
                }
                5 => {
                    let sel = store.selection().to_vec();
                    zorder::bring_to_front(&mut store, &sel);
                }
                6 => {
                    let sel = store.selection().to_vec();
                    zorder::send_to_back(&mut store, &sel);
                }
                7 if !ids.is_empty() => {
                    let sel = store.selection().to_vec();
                    zorder::move_absolute(&mut store, &sel, arg as usize % ids.len());
                }
                _ => {}
            }
            assert_contiguous(&store);
            let mut unique = store.ids();
            unique.sort_by_key(|id| id.0);
            unique.dedup();
            prop_assert_eq!(unique.len(), store.len());
        }
    }

    #[test]
    fn resize_keeps_opposite_anchor(
        w in 20.0f32..400.0,
        h in 20.0f32..400.0,
        rotation in -180.0f32..180.0,
        handle_idx in 0usize..8,
        dx in -300.0f32..300.0,
        dy in -300.0f32..300.0,
        aspect_lock in any::<bool>(),
    ) {
        let origin = LayerGeometry { x: 50.0, y: -20.0, width: w, height: h, rotation, crop: CropMode::Off };
        let handle = Handle::RESIZE[handle_idx];
        let pointer = Pos2::new(200.0 + dx, 100.0 + dy);
        let next = resize_frame(&origin, handle, pointer, aspect_lock, 10.0);

        // Edge handles under aspect lock grow the free axis symmetrically.
        if aspect_lock && !handle.is_corner() {
            return Ok(());
        }
        let before = anchor_of(&origin, handle);
        let after = anchor_of(&next, handle);
        prop_assert!((before - after).length() < 0.05, "{before:?} vs {after:?}");
        prop_assert!(next.width >= 10.0 - 1e-3 && next.height >= 10.0 - 1e-3);
        prop_assert_eq!(next.rotation, rotation);
    }

    #[test]
    fn crop_stays_inside_image(
        ow in 1u32..600,
        oh in 1u32..600,
        steps in prop::collection::vec((0usize..8, -800.0f32..800.0, -800.0f32..800.0, any::<bool>(), any::<bool>()), 1..20),
    ) {
        let min_extent = 1.0;
        let mut geometry = LayerGeometry {
            x: 0.0,
            y: 0.0,
            width: 300.0,
            height: 200.0,
            rotation: 30.0,
            crop: CropMode::On(CropRect::full(ow, oh)),
        };
        let (mut flip_h, mut flip_v) = (false, false);
        for (handle_idx, dx, dy, toggle_h, toggle_v) in steps {
            flip_h ^= toggle_h;
            flip_v ^= toggle_v;
            let start = Pos2::new(10.0, 10.0);
            let crop = resize_crop(
                &geometry,
                ow,
                oh,
                flip_h,
                flip_v,
                Handle::RESIZE[handle_idx],
                start,
                start + Vec2::new(dx, dy),
                min_extent,
            );
            let eps = 1e-3;
            prop_assert!(crop.x >= -eps && crop.y >= -eps);
            prop_assert!(crop.right() <= ow as f32 + eps && crop.bottom() <= oh as f32 + eps);
            prop_assert!(crop.width >= min_extent.min(ow as f32) - eps);
            prop_assert!(crop.height >= min_extent.min(oh as f32) - eps);
            geometry.crop = CropMode::On(crop);
        }
    }

    #[test]
    fn screen_world_round_trip(
        x in -5000.0f32..5000.0,
        y in -5000.0f32..5000.0,
        zoom in 0.1f32..10.0,
        sx in 0.0f32..1920.0,
        sy in 0.0f32..1080.0,
        ppp in 1.0f32..3.0,
    ) {
        let vp = Viewport { x, y, zoom, ..Viewport::default() };
        let metrics = ScreenMetrics::matched(Vec2::new(1920.0, 1080.0), ppp);
        let screen = Pos2::new(sx, sy);
        let back = vp.world_to_screen(vp.screen_to_world(screen, &metrics));
        prop_assert!((back - screen).length() < 0.05, "{screen:?} -> {back:?}");
    }

    #[test]
    fn zoom_pins_point_under_cursor(
        zoom in 0.2f32..5.0,
        factor in 0.5f32..2.0,
        sx in 0.0f32..800.0,
        sy in 0.0f32..600.0,
    ) {
        let mut vp = Viewport { zoom, ..Viewport::default() };
        let metrics = ScreenMetrics::matched(Vec2::new(800.0, 600.0), 1.0);
        let cursor = Pos2::new(sx, sy);
        let before = vp.screen_to_world(cursor, &metrics);
        vp.zoom_at(cursor, factor, &metrics);
        let after = vp.screen_to_world(cursor, &metrics);
        prop_assert!((before - after).length() < 0.05);
        prop_assert!(vp.zoom >= vp.min_zoom && vp.zoom <= vp.max_zoom);
    }
}
