use std::time::Instant;

use egui::{CursorIcon, Pos2, Vec2};
use image::GrayImage;

use crate::canvas::{LayerGeometry, LayerId, LayerStore, OutputArea};
use crate::components::history::HistoryTrack;
use crate::compositor::{Compositor, TransformKind};
use crate::mask::MaskProvider;
use crate::ops::canvas_ops;
use crate::ops::geometry::{
    self, Handle, HandleMetrics, handle_at, layer_at, nearest_corner, output_handle_at,
};
use crate::settings::EngineSettings;
use crate::viewport::{ScreenMetrics, Viewport};

/// Wheel notches are turned into scale factors as `WHEEL_STEP.powf(notches)`.
const WHEEL_STEP: f32 = 1.1;
const NUDGE_FAST: f32 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Transform,
    OutputArea,
    MaskBrush,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Modifiers {
    /// Aspect lock, rotation snap, additive selection.
    pub shift: bool,
    /// Resize from a layer body; scale layers with the output area; wheel-scale.
    pub ctrl: bool,
    /// Grid snap for output-area edits.
    pub alt: bool,
    /// Pan modifier (space held).
    pub pan: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EditorKey {
    Delete,
    Escape,
    /// Arrow-key nudge in world units; shift multiplies it.
    Nudge(Vec2),
    ToggleCrop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InteractionMode {
    #[default]
    Idle,
    Dragging,
    Resizing(Handle),
    Rotating,
    Panning,
    ResizingOutputArea(Handle),
    MovingOutputArea,
    /// Output-area resize that carries every layer along.
    TransformingOutputArea(Handle),
    DrawingMask,
}

/// State captured at gesture start. Every move is computed against it.
#[derive(Clone, Debug, Default)]
pub enum TransformOrigin {
    #[default]
    None,
    Layers(Vec<(LayerId, LayerGeometry)>),
    OutputArea {
        area: OutputArea,
        layers: Vec<(LayerId, LayerGeometry)>,
    },
    Viewport(Pos2),
    Mask(GrayImage),
}

/// Brush parameters forwarded with each mask segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushSettings {
    pub radius: f32,
    pub erase: bool,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            radius: 12.0,
            erase: true,
        }
    }
}

/// A history entry the caller should record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Commit {
    pub label: &'static str,
    pub track: HistoryTrack,
    /// Fold into the previous entry instead of pushing.
    pub coalesce: bool,
}

/// What a single input event changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub render: bool,
    pub selection_changed: bool,
    pub commit: Option<Commit>,
}

impl Outcome {
    fn render() -> Self {
        Self {
            render: true,
            ..Self::default()
        }
    }
}

/// Everything an input event may touch, borrowed from the editor for one call.
pub struct Scene<'a> {
    pub store: &'a mut LayerStore,
    pub viewport: &'a mut Viewport,
    pub output_area: &'a mut OutputArea,
    pub compositor: &'a mut Compositor,
    pub mask: &'a mut dyn MaskProvider,
    pub settings: &'a EngineSettings,
    pub metrics: &'a ScreenMetrics,
}

impl Scene<'_> {
    fn to_world(&self, screen: Pos2) -> Pos2 {
        self.viewport.screen_to_world(screen, self.metrics)
    }

    fn handle_metrics(&self) -> HandleMetrics {
        HandleMetrics {
            radius_px: self.settings.handle_radius_px,
            rotate_offset_px: self.settings.rotate_handle_offset_px,
            zoom: self.viewport.zoom,
        }
    }

    fn grid(&self, mods: Modifiers) -> Option<f32> {
        mods.alt.then_some(self.settings.grid_size)
    }
}

/// Pointer/keyboard state machine driving layer, output-area and mask edits.
#[derive(Clone, Debug)]
pub struct Interaction {
    pub tool: Tool,
    pub brush: BrushSettings,
    mode: InteractionMode,
    origin: TransformOrigin,
    start_world: Pos2,
    start_screen: Pos2,
    last_world: Pos2,
    targets: Vec<LayerId>,
    mutated: bool,
    cursor: CursorIcon,
    /// Layer and time of the last wheel-scale tick, for coalescing history.
    wheel_gesture: Option<(LayerId, Instant)>,
}

impl Default for Interaction {
    fn default() -> Self {
        Self {
            tool: Tool::default(),
            brush: BrushSettings::default(),
            mode: InteractionMode::Idle,
            origin: TransformOrigin::None,
            start_world: Pos2::ZERO,
            start_screen: Pos2::ZERO,
            last_world: Pos2::ZERO,
            targets: Vec::new(),
            mutated: false,
            cursor: CursorIcon::Default,
            wheel_gesture: None,
        }
    }
}

impl Interaction {
    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn is_idle(&self) -> bool {
        self.mode == InteractionMode::Idle
    }

    pub fn cursor(&self) -> CursorIcon {
        self.cursor
    }

    pub fn targets(&self) -> &[LayerId] {
        &self.targets
    }

    /// History track edits currently land on.
    pub fn history_track(&self) -> HistoryTrack {
        match self.tool {
            Tool::MaskBrush => HistoryTrack::Mask,
            _ => HistoryTrack::Layers,
        }
    }

    fn begin(&mut self, mode: InteractionMode, origin: TransformOrigin, screen: Pos2, world: Pos2) {
        self.mode = mode;
        self.origin = origin;
        self.start_screen = screen;
        self.start_world = world;
        self.last_world = world;
        self.mutated = false;
        self.cursor = mode_cursor(mode);
    }

    fn reset(&mut self) {
        self.mode = InteractionMode::Idle;
        self.origin = TransformOrigin::None;
        self.targets.clear();
        self.mutated = false;
        self.cursor = CursorIcon::Default;
    }

    /// Drops any gesture in progress, keeping the tool and brush.
    pub fn reset_gesture(&mut self) {
        self.reset();
        self.end_wheel_gesture();
    }

    /// The next wheel tick starts a new history entry.
    pub fn end_wheel_gesture(&mut self) {
        self.wheel_gesture = None;
    }

    fn begin_layers(&mut self, scene: &mut Scene<'_>, mode: InteractionMode, targets: Vec<LayerId>, screen: Pos2, world: Pos2) {
        let origins = targets
            .iter()
            .filter_map(|id| scene.store.get(*id).map(|l| (*id, l.geometry())))
            .collect();
        for id in &targets {
            scene.compositor.begin_transform(*id);
        }
        self.targets = targets;
        self.begin(mode, TransformOrigin::Layers(origins), screen, world);
    }

    // ------------------------------------------------------------------
    // Pointer
    // ------------------------------------------------------------------

    pub fn pointer_down(&mut self, scene: &mut Scene<'_>, screen: Pos2, button: PointerButton, mods: Modifiers) -> Outcome {
        if !self.is_idle() {
            return Outcome::default();
        }
        self.end_wheel_gesture();
        let world = scene.to_world(screen);

        if button == PointerButton::Middle || mods.pan {
            let origin = TransformOrigin::Viewport(scene.viewport.origin());
            self.begin(InteractionMode::Panning, origin, screen, world);
            return Outcome::default();
        }
        if button != PointerButton::Primary {
            return Outcome::default();
        }

        match self.tool {
            Tool::MaskBrush => {
                let origin = TransformOrigin::Mask(scene.mask.get());
                self.begin(InteractionMode::DrawingMask, origin, screen, world);
                scene.mask.stroke(world, world, self.brush.radius, self.brush.erase);
                self.mutated = true;
                Outcome::render()
            }
            Tool::OutputArea => self.output_area_down(scene, screen, world, mods),
            Tool::Transform => self.transform_down(scene, screen, world, mods),
        }
    }

    fn output_area_down(&mut self, scene: &mut Scene<'_>, screen: Pos2, world: Pos2, mods: Modifiers) -> Outcome {
        let area = *scene.output_area;
        if let Some(handle) = output_handle_at(&area, world, &scene.handle_metrics()) {
            if mods.ctrl {
                let layers: Vec<(LayerId, LayerGeometry)> =
                    scene.store.iter().map(|l| (l.id, l.geometry())).collect();
                self.targets = layers.iter().map(|(id, _)| *id).collect();
                for id in &self.targets {
                    scene.compositor.begin_transform(*id);
                }
                let origin = TransformOrigin::OutputArea { area, layers };
                self.begin(InteractionMode::TransformingOutputArea(handle), origin, screen, world);
            } else {
                let origin = TransformOrigin::OutputArea { area, layers: Vec::new() };
                self.begin(InteractionMode::ResizingOutputArea(handle), origin, screen, world);
            }
        } else if area.rect().contains(world) {
            let origin = TransformOrigin::OutputArea { area, layers: Vec::new() };
            self.begin(InteractionMode::MovingOutputArea, origin, screen, world);
        } else {
            let origin = TransformOrigin::Viewport(scene.viewport.origin());
            self.begin(InteractionMode::Panning, origin, screen, world);
        }
        Outcome::default()
    }

    fn transform_down(&mut self, scene: &mut Scene<'_>, screen: Pos2, world: Pos2, mods: Modifiers) -> Outcome {
        let metrics = scene.handle_metrics();

        // Handles of the primary layer take precedence over any body.
        if let Some(primary) = scene.store.primary()
            && let Some(layer) = scene.store.get(primary)
            && layer.visible
            && let Some(handle) = handle_at(layer, world, &metrics)
        {
            let mode = match handle {
                Handle::Rotate => InteractionMode::Rotating,
                h => InteractionMode::Resizing(h),
            };
            self.begin_layers(scene, mode, vec![primary], screen, world);
            return Outcome::default();
        }

        let Some(hit) = layer_at(scene.store, world) else {
            let selection_changed = !mods.shift && scene.store.clear_selection();
            let origin = TransformOrigin::Viewport(scene.viewport.origin());
            self.begin(InteractionMode::Panning, origin, screen, world);
            return Outcome {
                render: selection_changed,
                selection_changed,
                commit: None,
            };
        };

        let selection_changed = if mods.shift {
            scene.store.toggle_selection(hit.id)
        } else if scene.store.is_selected(hit.id) {
            scene.store.touch_selection(hit.id)
        } else {
            scene.store.set_selection(&[hit.id])
        };
        let outcome = Outcome {
            render: selection_changed,
            selection_changed,
            commit: None,
        };
        if !scene.store.is_selected(hit.id) {
            // Shift-click removed it; nothing to drag.
            return outcome;
        }

        if mods.ctrl {
            let handle = scene
                .store
                .get(hit.id)
                .map(|l| nearest_corner(l, world))
                .unwrap_or(Handle::SE);
            self.begin_layers(scene, InteractionMode::Resizing(handle), vec![hit.id], screen, world);
        } else {
            let targets = scene.store.selection().to_vec();
            self.begin_layers(scene, InteractionMode::Dragging, targets, screen, world);
        }
        outcome
    }

    pub fn pointer_move(&mut self, scene: &mut Scene<'_>, screen: Pos2, mods: Modifiers) -> Outcome {
        let world = scene.to_world(screen);
        let outcome = match self.mode {
            InteractionMode::Idle => {
                self.cursor = self.hover_cursor(scene, world);
                return Outcome::default();
            }
            InteractionMode::Panning => {
                if let TransformOrigin::Viewport(origin) = self.origin {
                    let c = scene.metrics.correction();
                    let d = screen - self.start_screen;
                    let d = Vec2::new(d.x * c.x, d.y * c.y);
                    scene.viewport.x = origin.x - d.x / scene.viewport.zoom;
                    scene.viewport.y = origin.y - d.y / scene.viewport.zoom;
                }
                Outcome::render()
            }
            InteractionMode::Dragging => {
                let delta = world - self.start_world;
                if let TransformOrigin::Layers(origins) = &self.origin {
                    for (id, g) in origins {
                        if let Some(layer) = scene.store.get_mut(*id) {
                            layer.x = g.x + delta.x;
                            layer.y = g.y + delta.y;
                        }
                    }
                }
                self.mutated |= delta != Vec2::ZERO;
                Outcome::render()
            }
            InteractionMode::Resizing(handle) => {
                self.resize_move(scene, handle, world, mods);
                Outcome::render()
            }
            InteractionMode::Rotating => {
                if let TransformOrigin::Layers(origins) = &self.origin
                    && let Some((id, g)) = origins.first()
                    && let Some(layer) = scene.store.get_mut(*id)
                {
                    let snap = mods.shift.then_some(scene.settings.rotation_snap_deg);
                    let rotation = geometry::rotation_from_drag(g.rotation, g.center(), self.start_world, world, snap);
                    self.mutated |= rotation != layer.rotation;
                    layer.rotation = rotation;
                }
                Outcome::render()
            }
            InteractionMode::ResizingOutputArea(handle) | InteractionMode::TransformingOutputArea(handle) => {
                self.output_area_move(scene, handle, world, mods);
                Outcome::render()
            }
            InteractionMode::MovingOutputArea => {
                if let TransformOrigin::OutputArea { area, .. } = &self.origin {
                    let moved = geometry::move_output_area(area, world - self.start_world, scene.grid(mods));
                    self.mutated |= moved != *scene.output_area;
                    *scene.output_area = moved;
                }
                Outcome::render()
            }
            InteractionMode::DrawingMask => {
                scene.mask.stroke(self.last_world, world, self.brush.radius, self.brush.erase);
                self.mutated = true;
                Outcome::render()
            }
        };
        self.last_world = world;
        outcome
    }

    fn resize_move(&mut self, scene: &mut Scene<'_>, handle: Handle, world: Pos2, mods: Modifiers) {
        let TransformOrigin::Layers(origins) = &self.origin else { return };
        let Some((id, origin)) = origins.first() else { return };
        let Some(layer) = scene.store.get_mut(*id) else { return };

        if layer.is_cropping() {
            // Current flips, so a flip mid-edit keeps edges under the pointer.
            let crop = geometry::resize_crop(
                origin,
                layer.original_width,
                layer.original_height,
                layer.flip_h,
                layer.flip_v,
                handle,
                self.start_world,
                world,
                scene.settings.min_crop_extent,
            );
            let next = crate::canvas::CropMode::On(crop);
            if next != layer.crop {
                layer.crop = next;
                self.mutated = true;
                scene.compositor.invalidate(*id);
            }
        } else {
            let next = geometry::resize_frame(origin, handle, world, mods.shift, scene.settings.min_frame_extent);
            if next != layer.geometry() {
                let resized = next.width != layer.width || next.height != layer.height;
                layer.apply_geometry(&next);
                self.mutated = true;
                if resized {
                    scene.compositor.invalidate(*id);
                }
            }
        }
    }

    fn output_area_move(&mut self, scene: &mut Scene<'_>, handle: Handle, world: Pos2, mods: Modifiers) {
        let TransformOrigin::OutputArea { area, layers } = &self.origin else { return };
        let next = geometry::resize_output_area(
            area,
            handle,
            world,
            mods.shift,
            scene.grid(mods),
            scene.settings.min_frame_extent,
        );
        if next == *scene.output_area {
            return;
        }
        *scene.output_area = next;
        self.mutated = true;
        for (id, g) in layers {
            let mapped = geometry::remap_geometry(g, area.rect(), next.rect());
            if let Some(layer) = scene.store.get_mut(*id) {
                let resized = mapped.width != layer.width || mapped.height != layer.height;
                layer.apply_geometry(&mapped);
                if resized {
                    scene.compositor.invalidate(*id);
                }
            }
        }
    }

    pub fn pointer_up(&mut self, scene: &mut Scene<'_>, now: Instant) -> Outcome {
        let cropping = self
            .targets
            .first()
            .and_then(|id| scene.store.get(*id))
            .is_some_and(|l| l.is_cropping());
        let (label, kind) = match self.mode {
            InteractionMode::Idle => return Outcome::default(),
            InteractionMode::Panning => (None, None),
            InteractionMode::Dragging => (Some("Move layer"), None),
            InteractionMode::Rotating => (Some("Rotate layer"), None),
            InteractionMode::Resizing(_) if cropping => (Some("Crop layer"), Some(TransformKind::Crop)),
            InteractionMode::Resizing(_) => (Some("Resize layer"), Some(TransformKind::Scale)),
            InteractionMode::ResizingOutputArea(_) => (Some("Resize output area"), None),
            InteractionMode::MovingOutputArea => (Some("Move output area"), None),
            InteractionMode::TransformingOutputArea(_) => (Some("Transform output area"), Some(TransformKind::Scale)),
            InteractionMode::DrawingMask => (Some("Mask stroke"), None),
        };

        for id in &self.targets {
            match (kind, scene.store.get(*id)) {
                (Some(kind), Some(layer)) if self.mutated => scene.compositor.end_transform(layer, kind, now),
                _ => scene.compositor.cancel_transform(*id),
            }
        }

        let track = match self.mode {
            InteractionMode::DrawingMask => HistoryTrack::Mask,
            _ => HistoryTrack::Layers,
        };
        let commit = match label {
            Some(label) if self.mutated => Some(Commit {
                label,
                track,
                coalesce: false,
            }),
            _ => None,
        };
        if let Some(c) = commit {
            tracing::debug!(label = c.label, targets = self.targets.len(), "Interaction committed");
        }
        self.reset();
        Outcome {
            render: true,
            selection_changed: false,
            commit,
        }
    }

    /// Puts every target back to where the gesture started.
    pub fn cancel(&mut self, scene: &mut Scene<'_>) -> Outcome {
        if self.is_idle() {
            return Outcome::default();
        }
        match std::mem::take(&mut self.origin) {
            TransformOrigin::None => {}
            TransformOrigin::Layers(origins) => restore_layers(scene, &origins),
            TransformOrigin::OutputArea { area, layers } => {
                *scene.output_area = area;
                restore_layers(scene, &layers);
            }
            TransformOrigin::Viewport(origin) => {
                scene.viewport.x = origin.x;
                scene.viewport.y = origin.y;
            }
            TransformOrigin::Mask(raster) => scene.mask.set(raster),
        }
        for id in &self.targets {
            scene.compositor.cancel_transform(*id);
        }
        tracing::debug!(mode = ?self.mode, "Interaction rolled back");
        self.reset();
        Outcome::render()
    }

    // ------------------------------------------------------------------
    // Wheel and keys
    // ------------------------------------------------------------------

    /// Plain wheel zooms at the cursor; ctrl over the primary layer scales it.
    pub fn wheel(&mut self, scene: &mut Scene<'_>, screen: Pos2, notches: f32, mods: Modifiers, now: Instant) -> Outcome {
        if !notches.is_finite() || notches == 0.0 {
            return Outcome::default();
        }
        let factor = WHEEL_STEP.powf(notches);
        let world = scene.to_world(screen);

        let target = scene
            .store
            .primary()
            .filter(|_| mods.ctrl && self.tool == Tool::Transform && self.is_idle())
            .filter(|id| layer_at(scene.store, world).is_some_and(|hit| hit.id == *id));

        let Some(id) = target else {
            scene.viewport.zoom_at(screen, factor, scene.metrics);
            return Outcome::render();
        };
        let Some(layer) = scene.store.get_mut(id) else {
            return Outcome::default();
        };
        let next = geometry::scale_about_center(&layer.geometry(), factor, scene.settings.min_frame_extent);
        if next == layer.geometry() {
            return Outcome::default();
        }
        layer.apply_geometry(&next);
        scene.compositor.wheel_tick(id, now);
        scene.compositor.dimensions_changed(id);

        let coalesce = self.wheel_gesture.is_some_and(|(last_id, last)| {
            last_id == id && now.saturating_duration_since(last) < scene.settings.wheel_idle
        });
        self.wheel_gesture = Some((id, now));
        Outcome {
            render: true,
            selection_changed: false,
            commit: Some(Commit {
                label: "Scale layer",
                track: HistoryTrack::Layers,
                coalesce,
            }),
        }
    }

    pub fn key(&mut self, scene: &mut Scene<'_>, key: EditorKey, mods: Modifiers) -> Outcome {
        if key == EditorKey::Escape {
            return self.cancel(scene);
        }
        if !self.is_idle() || self.tool != Tool::Transform {
            return Outcome::default();
        }
        self.end_wheel_gesture();
        let selection = scene.store.selection().to_vec();
        if selection.is_empty() {
            return Outcome::default();
        }

        match key {
            EditorKey::Escape => Outcome::default(),
            EditorKey::Delete => {
                for id in &selection {
                    if let Some(layer) = scene.store.get(*id) {
                        scene.compositor.forget_layer(layer);
                    }
                }
                canvas_ops::remove_layers(scene.store, &selection);
                Outcome {
                    render: true,
                    selection_changed: true,
                    commit: Some(Commit {
                        label: "Delete layers",
                        track: HistoryTrack::Layers,
                        coalesce: false,
                    }),
                }
            }
            EditorKey::Nudge(step) => {
                let step = if mods.shift { step * NUDGE_FAST } else { step };
                for id in &selection {
                    if let Some(layer) = scene.store.get_mut(*id) {
                        layer.x += step.x;
                        layer.y += step.y;
                    }
                }
                Outcome {
                    render: true,
                    selection_changed: false,
                    commit: Some(Commit {
                        label: "Nudge layer",
                        track: HistoryTrack::Layers,
                        coalesce: false,
                    }),
                }
            }
            EditorKey::ToggleCrop => {
                let Some(primary) = scene.store.primary() else {
                    return Outcome::default();
                };
                let on = scene.store.get(primary).is_some_and(|l| !l.is_cropping());
                match canvas_ops::set_crop_mode(scene.store, primary, on, scene.settings.min_crop_extent) {
                    Ok(true) => {
                        scene.compositor.invalidate(primary);
                        Outcome {
                            render: true,
                            selection_changed: false,
                            commit: Some(Commit {
                                label: if on { "Crop on" } else { "Crop off" },
                                track: HistoryTrack::Layers,
                                coalesce: false,
                            }),
                        }
                    }
                    _ => Outcome::default(),
                }
            }
        }
    }

    fn hover_cursor(&self, scene: &Scene<'_>, world: Pos2) -> CursorIcon {
        let metrics = scene.handle_metrics();
        match self.tool {
            Tool::MaskBrush => CursorIcon::Crosshair,
            Tool::OutputArea => {
                if let Some(h) = output_handle_at(scene.output_area, world, &metrics) {
                    h.cursor()
                } else if scene.output_area.rect().contains(world) {
                    CursorIcon::Move
                } else {
                    CursorIcon::Grab
                }
            }
            Tool::Transform => {
                if let Some(primary) = scene.store.primary()
                    && let Some(layer) = scene.store.get(primary)
                    && let Some(h) = handle_at(layer, world, &metrics)
                {
                    return h.cursor();
                }
                if layer_at(scene.store, world).is_some() {
                    CursorIcon::Move
                } else {
                    CursorIcon::Default
                }
            }
        }
    }
}

fn mode_cursor(mode: InteractionMode) -> CursorIcon {
    match mode {
        InteractionMode::Idle => CursorIcon::Default,
        InteractionMode::Dragging | InteractionMode::MovingOutputArea => CursorIcon::Move,
        InteractionMode::Resizing(h)
        | InteractionMode::ResizingOutputArea(h)
        | InteractionMode::TransformingOutputArea(h) => h.cursor(),
        InteractionMode::Rotating => Handle::Rotate.cursor(),
        InteractionMode::Panning => CursorIcon::Grabbing,
        InteractionMode::DrawingMask => CursorIcon::Crosshair,
    }
}

fn restore_layers(scene: &mut Scene<'_>, origins: &[(LayerId, LayerGeometry)]) {
    for (id, g) in origins {
        if let Some(layer) = scene.store.get_mut(*id) {
            let resized = g.width != layer.width || g.height != layer.height || g.crop != layer.crop;
            layer.apply_geometry(g);
            if resized {
                scene.compositor.invalidate(*id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::canvas::tests::layer_at as make_layer;
    use crate::canvas::{CropMode, CropRect};
    use crate::mask::MaskRaster;

    struct Fixture {
        store: LayerStore,
        viewport: Viewport,
        area: OutputArea,
        compositor: Compositor,
        mask: MaskRaster,
        settings: EngineSettings,
        metrics: ScreenMetrics,
    }

    impl Fixture {
        fn new() -> Self {
            let settings = EngineSettings::inline();
            let area = OutputArea::new(0.0, 0.0, 400.0, 300.0);
            Self {
                store: LayerStore::new(),
                viewport: Viewport::default(),
                area,
                compositor: Compositor::new(&settings),
                mask: MaskRaster::for_output_area(&area),
                settings,
                metrics: ScreenMetrics::matched(Vec2::new(800.0, 600.0), 1.0),
            }
        }

        fn scene(&mut self) -> Scene<'_> {
            Scene {
                store: &mut self.store,
                viewport: &mut self.viewport,
                output_area: &mut self.area,
                compositor: &mut self.compositor,
                mask: &mut self.mask,
                settings: &self.settings,
                metrics: &self.metrics,
            }
        }

        fn with_layer(&mut self, x: f32, y: f32, w: f32, h: f32) -> LayerId {
            let layer = make_layer("l", x, y, w, h);
            let id = layer.id;
            self.store.push_top(layer);
            id
        }
    }

    fn drag(ix: &mut Interaction, fx: &mut Fixture, from: Pos2, to: Pos2, mods: Modifiers) -> Outcome {
        ix.pointer_down(&mut fx.scene(), from, PointerButton::Primary, mods);
        ix.pointer_move(&mut fx.scene(), to, mods);
        ix.pointer_up(&mut fx.scene(), Instant::now())
    }

    #[test]
    fn body_drag_moves_and_commits() {
        let mut fx = Fixture::new();
        let id = fx.with_layer(10.0, 10.0, 50.0, 50.0);
        let mut ix = Interaction::default();
        let out = drag(&mut ix, &mut fx, Pos2::new(30.0, 30.0), Pos2::new(40.0, 25.0), Modifiers::default());
        let layer = fx.store.get(id).unwrap();
        assert_eq!((layer.x, layer.y), (20.0, 5.0));
        assert_eq!(out.commit.map(|c| c.label), Some("Move layer"));
        assert!(ix.is_idle());
        assert_eq!(fx.store.selection(), &[id]);
    }

    #[test]
    fn click_without_motion_commits_nothing() {
        let mut fx = Fixture::new();
        fx.with_layer(10.0, 10.0, 50.0, 50.0);
        let mut ix = Interaction::default();
        let p = Pos2::new(30.0, 30.0);
        let down = ix.pointer_down(&mut fx.scene(), p, PointerButton::Primary, Modifiers::default());
        assert!(down.selection_changed);
        let up = ix.pointer_up(&mut fx.scene(), Instant::now());
        assert_eq!(up.commit, None);
    }

    #[test]
    fn se_handle_resize_keeps_nw_corner() {
        let mut fx = Fixture::new();
        let id = fx.with_layer(100.0, 100.0, 200.0, 100.0);
        fx.store.set_selection(&[id]);
        let mut ix = Interaction::default();
        drag(&mut ix, &mut fx, Pos2::new(300.0, 200.0), Pos2::new(350.0, 250.0), Modifiers::default());
        let l = fx.store.get(id).unwrap();
        assert!((l.width - 250.0).abs() < 1e-3 && (l.height - 150.0).abs() < 1e-3);
        assert!((l.x - 100.0).abs() < 1e-3 && (l.y - 100.0).abs() < 1e-3);
    }

    #[test]
    fn ctrl_body_drag_resizes_from_nearest_corner() {
        let mut fx = Fixture::new();
        let id = fx.with_layer(0.0, 0.0, 100.0, 100.0);
        let mut ix = Interaction::default();
        let ctrl = Modifiers { ctrl: true, ..Modifiers::default() };
        let out = drag(&mut ix, &mut fx, Pos2::new(90.0, 90.0), Pos2::new(110.0, 100.0), ctrl);
        let l = fx.store.get(id).unwrap();
        assert_eq!((l.x, l.y), (0.0, 0.0));
        assert!((l.width - 110.0).abs() < 1e-3 && (l.height - 100.0).abs() < 1e-3);
        assert_eq!(out.commit.map(|c| c.label), Some("Resize layer"));
    }

    #[test]
    fn escape_rolls_back_drag() {
        let mut fx = Fixture::new();
        let id = fx.with_layer(10.0, 10.0, 50.0, 50.0);
        let mut ix = Interaction::default();
        ix.pointer_down(&mut fx.scene(), Pos2::new(30.0, 30.0), PointerButton::Primary, Modifiers::default());
        ix.pointer_move(&mut fx.scene(), Pos2::new(80.0, 90.0), Modifiers::default());
        ix.key(&mut fx.scene(), EditorKey::Escape, Modifiers::default());
        let l = fx.store.get(id).unwrap();
        assert_eq!((l.x, l.y), (10.0, 10.0));
        assert!(ix.is_idle());
        assert_eq!(ix.pointer_up(&mut fx.scene(), Instant::now()).commit, None);
    }

    #[test]
    fn background_drag_pans() {
        let mut fx = Fixture::new();
        let mut ix = Interaction::default();
        let out = drag(&mut ix, &mut fx, Pos2::new(500.0, 500.0), Pos2::new(520.0, 490.0), Modifiers::default());
        assert_eq!((fx.viewport.x, fx.viewport.y), (-20.0, 10.0));
        assert_eq!(out.commit, None);
    }

    #[test]
    fn crop_handle_drag_edits_crop_not_frame() {
        let mut fx = Fixture::new();
        let id = fx.with_layer(0.0, 0.0, 100.0, 100.0);
        fx.store.get_mut(id).unwrap().crop = CropMode::On(CropRect::full(100, 100));
        fx.store.set_selection(&[id]);
        let mut ix = Interaction::default();
        let out = drag(&mut ix, &mut fx, Pos2::new(100.0, 50.0), Pos2::new(80.0, 50.0), Modifiers::default());
        let l = fx.store.get(id).unwrap();
        assert_eq!((l.width, l.height), (100.0, 100.0));
        let crop = l.crop_rect().unwrap();
        assert!((crop.width - 80.0).abs() < 1e-3);
        assert_eq!(out.commit.map(|c| c.label), Some("Crop layer"));
    }

    #[test]
    fn output_area_ctrl_resize_scales_layers() {
        let mut fx = Fixture::new();
        let id = fx.with_layer(0.0, 0.0, 200.0, 150.0);
        let mut ix = Interaction { tool: Tool::OutputArea, ..Interaction::default() };
        let ctrl = Modifiers { ctrl: true, ..Modifiers::default() };
        drag(&mut ix, &mut fx, Pos2::new(400.0, 300.0), Pos2::new(800.0, 600.0), ctrl);
        assert_eq!(fx.area, OutputArea::new(0.0, 0.0, 800.0, 600.0));
        let l = fx.store.get(id).unwrap();
        assert!((l.width - 400.0).abs() < 1e-3 && (l.height - 300.0).abs() < 1e-3);
    }

    #[test]
    fn output_area_move_snaps_with_alt() {
        let mut fx = Fixture::new();
        let mut ix = Interaction { tool: Tool::OutputArea, ..Interaction::default() };
        let alt = Modifiers { alt: true, ..Modifiers::default() };
        drag(&mut ix, &mut fx, Pos2::new(100.0, 100.0), Pos2::new(113.0, 96.0), alt);
        assert_eq!((fx.area.x, fx.area.y), (10.0, 0.0));
    }

    #[test]
    fn mask_stroke_commits_on_mask_track() {
        let mut fx = Fixture::new();
        let mut ix = Interaction { tool: Tool::MaskBrush, ..Interaction::default() };
        let out = drag(&mut ix, &mut fx, Pos2::new(50.0, 50.0), Pos2::new(100.0, 50.0), Modifiers::default());
        assert_eq!(out.commit.map(|c| c.track), Some(HistoryTrack::Mask));
        assert_eq!(fx.mask.get().get_pixel(75, 50)[0], 0);
    }

    #[test]
    fn ctrl_wheel_scales_and_coalesces() {
        let mut fx = Fixture::new();
        let id = fx.with_layer(0.0, 0.0, 100.0, 100.0);
        fx.store.set_selection(&[id]);
        let mut ix = Interaction::default();
        let ctrl = Modifiers { ctrl: true, ..Modifiers::default() };
        let now = Instant::now();
        let first = ix.wheel(&mut fx.scene(), Pos2::new(50.0, 50.0), 1.0, ctrl, now);
        let second = ix.wheel(&mut fx.scene(), Pos2::new(50.0, 50.0), 1.0, ctrl, now + Duration::from_millis(20));
        assert_eq!(first.commit.map(|c| c.coalesce), Some(false));
        assert_eq!(second.commit.map(|c| c.coalesce), Some(true));
        let l = fx.store.get(id).unwrap();
        assert!((l.width - 121.0).abs() < 1e-2);
        assert!(fx.compositor.is_wheel_scaling(id));
        assert_eq!(fx.viewport.zoom, 1.0);
    }

    #[test]
    fn key_edit_between_wheel_ticks_starts_new_entry() {
        let mut fx = Fixture::new();
        let id = fx.with_layer(0.0, 0.0, 100.0, 100.0);
        fx.store.set_selection(&[id]);
        let mut ix = Interaction::default();
        let ctrl = Modifiers { ctrl: true, ..Modifiers::default() };
        let now = Instant::now();
        ix.wheel(&mut fx.scene(), Pos2::new(50.0, 50.0), 1.0, ctrl, now);
        let nudge = ix.key(&mut fx.scene(), EditorKey::Nudge(Vec2::new(1.0, 0.0)), Modifiers::default());
        assert_eq!(nudge.commit.map(|c| c.label), Some("Nudge layer"));
        let again = ix.wheel(&mut fx.scene(), Pos2::new(50.0, 50.0), 1.0, ctrl, now + Duration::from_millis(20));
        assert_eq!(again.commit.map(|c| c.coalesce), Some(false));
    }

    #[test]
    fn plain_wheel_zooms() {
        let mut fx = Fixture::new();
        let mut ix = Interaction::default();
        ix.wheel(&mut fx.scene(), Pos2::new(10.0, 10.0), 2.0, Modifiers::default(), Instant::now());
        assert!((fx.viewport.zoom - 1.21).abs() < 1e-4);
    }

    #[test]
    fn delete_key_removes_selection() {
        let mut fx = Fixture::new();
        let a = fx.with_layer(0.0, 0.0, 10.0, 10.0);
        let b = fx.with_layer(20.0, 0.0, 10.0, 10.0);
        fx.store.set_selection(&[a]);
        let mut ix = Interaction::default();
        let out = ix.key(&mut fx.scene(), EditorKey::Delete, Modifiers::default());
        assert_eq!(fx.store.ids(), vec![b]);
        assert!(out.selection_changed);
        assert_eq!(fx.store.get(b).unwrap().z_index, 0);
    }
}
