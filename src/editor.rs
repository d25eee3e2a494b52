//! The engine facade a host embeds.
//!
//! Owns the layer store, viewport, output area, history and compositor. Every
//! mutation goes through here so history, cache invalidation and host
//! notifications stay in step.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use egui::{Pos2, Vec2};
use image::RgbaImage;

use crate::canvas::{CropMode, Layer, LayerId, LayerStore, OutputArea};
use crate::components::history::{HistoryManager, HistoryTrack, Restored};
use crate::compositor::surface::Surface;
use crate::compositor::{CacheStats, Compositor};
use crate::error::{EngineError, Result};
use crate::host::{HostNotifier, NullHost};
use crate::interaction::{EditorKey, Interaction, Modifiers, Outcome, PointerButton, Scene, Tool};
use crate::io::{self, DecodeQueue, ImageLibrary, ImageResolver, PersistenceStore, SessionFile, SessionId};
use crate::mask::{MaskProvider, MaskRaster};
use crate::ops::blend::BlendMode;
use crate::ops::canvas_ops::{self, Placement};
use crate::ops::zorder::{self, Direction};
use crate::settings::EngineSettings;
use crate::viewport::{ScreenMetrics, Viewport};

/// Per-layer state that decides whether processed images are still valid.
type CacheFacts = (f32, f32, CropMode, u8, usize);

fn cache_facts(layer: &Layer) -> CacheFacts {
    (
        layer.width,
        layer.height,
        layer.crop,
        layer.blend_area,
        Arc::as_ptr(&layer.image) as usize,
    )
}

/// Looks in the editor's own library before asking the host.
struct Fallback<'a> {
    first: &'a ImageLibrary,
    then: &'a dyn ImageResolver,
}

impl ImageResolver for Fallback<'_> {
    fn resolve(&self, key: &str) -> Option<Arc<RgbaImage>> {
        self.first.resolve(key).or_else(|| self.then.resolve(key))
    }
}

pub struct Editor {
    settings: EngineSettings,
    store: LayerStore,
    viewport: Viewport,
    output_area: OutputArea,
    metrics: ScreenMetrics,
    history: HistoryManager,
    compositor: Compositor,
    interaction: Interaction,
    mask: Box<dyn MaskProvider>,
    host: Box<dyn HostNotifier>,
    library: ImageLibrary,
    decoder: DecodeQueue,
    /// Bumped on every recorded change; lets owners track unsaved edits.
    revision: u64,
}

impl Editor {
    pub fn new(settings: EngineSettings) -> Self {
        let output_area = OutputArea::default();
        let mut editor = Self {
            viewport: Viewport::with_zoom_range(settings.min_zoom, settings.max_zoom),
            store: LayerStore::new(),
            output_area,
            metrics: ScreenMetrics::default(),
            history: HistoryManager::new(settings.max_undo_steps),
            compositor: Compositor::new(&settings),
            interaction: Interaction::default(),
            mask: Box::new(MaskRaster::for_output_area(&output_area)),
            host: Box::new(NullHost),
            library: ImageLibrary::default(),
            decoder: DecodeQueue::default(),
            revision: 0,
            settings,
        };
        editor.reset_history();
        editor
    }

    pub fn with_host(mut self, host: impl HostNotifier + 'static) -> Self {
        self.host = Box::new(host);
        self
    }

    pub fn with_mask(mut self, mask: impl MaskProvider + 'static) -> Self {
        self.mask = Box::new(mask);
        self.reset_history();
        self
    }

    /// Starts history over from the current state.
    pub fn reset_history(&mut self) {
        let mask = Some(self.mask.get());
        if let Err(e) = self.history.reset(&self.store, &self.output_area, mask) {
            tracing::warn!(error = %e, "Could not record history baseline");
        }
        self.notify_history();
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.store.get(id)
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn output_area(&self) -> OutputArea {
        self.output_area
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.compositor.stats()
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn mask(&self) -> &dyn MaskProvider {
        self.mask.as_ref()
    }

    pub fn library(&self) -> &ImageLibrary {
        &self.library
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn tool(&self) -> Tool {
        self.interaction.tool
    }

    /// Switching tools abandons any gesture in progress.
    pub fn set_tool(&mut self, tool: Tool) {
        if self.interaction.tool == tool {
            return;
        }
        if !self.interaction.is_idle() {
            self.key(EditorKey::Escape, Modifiers::default());
        }
        self.interaction.tool = tool;
        self.notify_history();
    }

    pub fn set_brush(&mut self, radius: f32, erase: bool) {
        self.interaction.brush.radius = radius.max(0.5);
        self.interaction.brush.erase = erase;
    }

    pub fn set_screen_metrics(&mut self, metrics: ScreenMetrics) {
        self.metrics = metrics;
    }

    /// Frames the output area inside an element of `screen_size`.
    pub fn fit_output_area(&mut self, screen_size: Vec2, margin: f32) {
        self.viewport.fit_rect(self.output_area.rect(), screen_size, margin);
        self.host.render_requested();
    }

    pub fn zoom_at(&mut self, cursor: Pos2, factor: f32) {
        self.viewport.zoom_at(cursor, factor, &self.metrics);
        self.host.render_requested();
    }

    // ------------------------------------------------------------------
    // Layer lifecycle
    // ------------------------------------------------------------------

    pub fn add_layer(&mut self, image: RgbaImage, image_key: &str, name: &str, placement: Placement) -> Result<LayerId> {
        let image = Arc::new(image);
        let id = canvas_ops::add_layer(&mut self.store, Arc::clone(&image), image_key, name, placement, &self.output_area)?;
        self.library.insert(image_key, image);
        self.record("Add layer");
        self.notify_selection();
        self.host.render_requested();
        Ok(id)
    }

    /// Decodes `bytes` in the background; the layer appears on a later `poll`.
    pub fn add_layer_from_bytes(&mut self, image_key: &str, name: &str, placement: Placement, bytes: Vec<u8>) {
        self.decoder.request(image_key.to_string(), name.to_string(), placement, bytes);
    }

    pub fn pending_decodes(&self) -> usize {
        self.decoder.pending()
    }

    pub fn remove_layers(&mut self, ids: &[LayerId]) -> usize {
        for id in ids {
            if let Some(layer) = self.store.get(*id) {
                self.compositor.forget_layer(layer);
            }
        }
        let removed = canvas_ops::remove_layers(&mut self.store, ids);
        if !removed.is_empty() {
            self.record("Delete layers");
            self.notify_selection();
            self.host.render_requested();
        }
        removed.len()
    }

    /// Flattens `ids` into one layer; returns its id.
    pub fn fuse_layers(&mut self, ids: &[LayerId], now: Instant) -> Result<LayerId> {
        let key = io::generated_key();
        let (fused, removed) = canvas_ops::fuse_layers(&mut self.store, ids, &mut self.compositor, &key, now)?;
        for layer in &removed {
            self.compositor.forget_layer(layer);
        }
        if let Some(layer) = self.store.get(fused) {
            self.library.insert(key, Arc::clone(&layer.image));
        }
        self.record("Fuse layers");
        self.notify_selection();
        self.host.render_requested();
        Ok(fused)
    }

    pub fn update_selection(&mut self, ids: &[LayerId]) -> bool {
        let changed = self.store.set_selection(ids);
        if changed {
            self.notify_selection();
            self.host.render_requested();
        }
        changed
    }

    // ------------------------------------------------------------------
    // Z-order
    // ------------------------------------------------------------------

    fn reorder(&mut self, moved: bool) -> bool {
        if moved {
            self.record("Reorder layers");
            self.host.render_requested();
        }
        moved
    }

    pub fn move_selection(&mut self, direction: Direction) -> bool {
        let selection = self.store.selection().to_vec();
        let moved = zorder::move_relative(&mut self.store, &selection, direction);
        self.reorder(moved)
    }

    pub fn move_selection_to(&mut self, display_index: usize) -> bool {
        let selection = self.store.selection().to_vec();
        let moved = zorder::move_absolute(&mut self.store, &selection, display_index);
        self.reorder(moved)
    }

    pub fn bring_to_front(&mut self) -> bool {
        let selection = self.store.selection().to_vec();
        let moved = zorder::bring_to_front(&mut self.store, &selection);
        self.reorder(moved)
    }

    pub fn send_to_back(&mut self) -> bool {
        let selection = self.store.selection().to_vec();
        let moved = zorder::send_to_back(&mut self.store, &selection);
        self.reorder(moved)
    }

    // ------------------------------------------------------------------
    // Layer properties
    // ------------------------------------------------------------------

    /// Runs a property edit; on change records history and drops stale
    /// processed images when the edit touched what they depend on.
    fn edit<F>(&mut self, id: LayerId, label: &str, op: F) -> Result<bool>
    where
        F: FnOnce(&mut LayerStore) -> Result<bool>,
    {
        let before = self.store.get(id).map(cache_facts).ok_or(EngineError::LayerNotFound(id))?;
        if !op(&mut self.store)? {
            return Ok(false);
        }
        if self.store.get(id).map(cache_facts) != Some(before) {
            self.compositor.invalidate(id);
        }
        self.record(label);
        self.host.render_requested();
        Ok(true)
    }

    pub fn set_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> Result<bool> {
        self.edit(id, "Blend mode", |s| canvas_ops::set_blend_mode(s, id, mode))
    }

    pub fn set_opacity(&mut self, id: LayerId, opacity: f32) -> Result<bool> {
        self.edit(id, "Opacity", |s| canvas_ops::set_opacity(s, id, opacity))
    }

    pub fn set_blend_area(&mut self, id: LayerId, blend_area: u8) -> Result<bool> {
        self.edit(id, "Blend area", |s| canvas_ops::set_blend_area(s, id, blend_area))
    }

    pub fn set_visible(&mut self, id: LayerId, visible: bool) -> Result<bool> {
        self.edit(id, "Visibility", |s| canvas_ops::set_visible(s, id, visible))
    }

    pub fn rename_layer(&mut self, id: LayerId, name: &str) -> Result<bool> {
        self.edit(id, "Rename layer", |s| canvas_ops::rename(s, id, name))
    }

    pub fn flip_layer(&mut self, id: LayerId, horizontal: bool) -> Result<bool> {
        let label = if horizontal { "Flip horizontal" } else { "Flip vertical" };
        self.edit(id, label, |s| canvas_ops::flip(s, id, horizontal))
    }

    pub fn set_crop_mode(&mut self, id: LayerId, on: bool) -> Result<bool> {
        let min = self.settings.min_crop_extent;
        let label = if on { "Crop on" } else { "Crop off" };
        self.edit(id, label, |s| canvas_ops::set_crop_mode(s, id, on, min))
    }

    pub fn reset_transform(&mut self, id: LayerId) -> Result<bool> {
        self.edit(id, "Reset transform", |s| canvas_ops::reset_transform(s, id))
    }

    /// Replaces the export rectangle. A rectangle without area is refused.
    pub fn set_output_area(&mut self, area: OutputArea) -> Result<()> {
        if area.is_degenerate() {
            return Err(EngineError::degenerate("output area", area.width, area.height));
        }
        if area != self.output_area {
            self.output_area = area;
            self.record("Output area");
            self.host.render_requested();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Track the undo/redo buttons act on: the mask while the mask tool is active.
    pub fn active_track(&self) -> HistoryTrack {
        self.interaction.history_track()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo(self.active_track())
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo(self.active_track())
    }

    pub fn undo(&mut self) -> bool {
        if !self.interaction.is_idle() {
            return false;
        }
        let restored = self.history.undo(self.active_track());
        self.apply_restored(restored)
    }

    pub fn redo(&mut self) -> bool {
        if !self.interaction.is_idle() {
            return false;
        }
        let restored = self.history.redo(self.active_track());
        self.apply_restored(restored)
    }

    fn apply_restored(&mut self, restored: Option<Restored>) -> bool {
        let Some(restored) = restored else { return false };
        match restored {
            Restored::Layers(snapshot) => {
                let before: HashMap<LayerId, (Layer, CacheFacts)> = self
                    .store
                    .iter()
                    .map(|l| (l.id, (l.clone(), cache_facts(l))))
                    .collect();
                let selection_before = self.store.selection().to_vec();
                snapshot.restore_into(&mut self.store, &mut self.output_area);
                for (id, (layer, facts)) in &before {
                    match self.store.get(*id) {
                        None => self.compositor.forget_layer(layer),
                        Some(now) if cache_facts(now) != *facts => self.compositor.invalidate(*id),
                        Some(_) => {}
                    }
                }
                if self.store.selection() != selection_before.as_slice() {
                    self.notify_selection();
                }
            }
            Restored::Mask(snapshot) => self.mask.set((*snapshot.raster).clone()),
        }
        self.interaction.end_wheel_gesture();
        self.revision += 1;
        self.notify_history();
        self.host.render_requested();
        true
    }

    fn record(&mut self, label: &str) {
        self.interaction.end_wheel_gesture();
        match self.history.snapshot(label, &self.store, &self.output_area) {
            Ok(true) => {
                self.revision += 1;
                self.prune_library();
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(label, error = %e, "History snapshot failed"),
        }
        self.notify_history();
    }

    /// Releases rasters that neither the store nor any history entry uses.
    fn prune_library(&mut self) {
        let referenced = self.history.image_keys();
        let store = &self.store;
        let released = self
            .library
            .retain(|key| referenced.contains(key) || store.iter().any(|l| l.image_key == key));
        if released > 0 {
            tracing::debug!(released, kept = self.library.len(), "Unreferenced images released");
        }
    }

    fn notify_history(&mut self) {
        let track = self.active_track();
        let (can_undo, can_redo) = (self.history.can_undo(track), self.history.can_redo(track));
        self.host.history_changed(can_undo, can_redo);
    }

    fn notify_selection(&mut self) {
        let selection = self.store.selection().to_vec();
        self.host.selection_changed(&selection);
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    fn with_scene<F>(&mut self, f: F) -> Outcome
    where
        F: FnOnce(&mut Interaction, &mut Scene<'_>) -> Outcome,
    {
        let mut scene = Scene {
            store: &mut self.store,
            viewport: &mut self.viewport,
            output_area: &mut self.output_area,
            compositor: &mut self.compositor,
            mask: self.mask.as_mut(),
            settings: &self.settings,
            metrics: &self.metrics,
        };
        let outcome = f(&mut self.interaction, &mut scene);
        self.apply_outcome(outcome);
        outcome
    }

    fn apply_outcome(&mut self, outcome: Outcome) {
        if outcome.selection_changed {
            self.notify_selection();
        }
        if let Some(commit) = outcome.commit {
            // Only fold into an entry the same kind of gesture pushed.
            let coalesce = commit.coalesce && self.history.top_label(commit.track) == Some(commit.label);
            let recorded = match commit.track {
                HistoryTrack::Mask => Ok(self.history.snapshot_mask(commit.label, self.mask.get())),
                HistoryTrack::Layers if coalesce => {
                    self.history.replace_last(commit.label, &self.store, &self.output_area)
                }
                HistoryTrack::Layers => self.history.snapshot(commit.label, &self.store, &self.output_area),
            };
            match recorded {
                Ok(true) => {
                    self.revision += 1;
                    if commit.track == HistoryTrack::Layers {
                        self.prune_library();
                    }
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(label = commit.label, error = %e, "History snapshot failed"),
            }
            self.notify_history();
        }
        if outcome.render {
            self.host.render_requested();
        }
    }

    pub fn pointer_down(&mut self, screen: Pos2, button: PointerButton, mods: Modifiers) -> Outcome {
        self.with_scene(|ix, scene| ix.pointer_down(scene, screen, button, mods))
    }

    pub fn pointer_move(&mut self, screen: Pos2, mods: Modifiers) -> Outcome {
        self.with_scene(|ix, scene| ix.pointer_move(scene, screen, mods))
    }

    pub fn pointer_up(&mut self, now: Instant) -> Outcome {
        self.with_scene(|ix, scene| ix.pointer_up(scene, now))
    }

    pub fn wheel(&mut self, screen: Pos2, notches: f32, mods: Modifiers, now: Instant) -> Outcome {
        self.with_scene(|ix, scene| ix.wheel(scene, screen, notches, mods, now))
    }

    pub fn key(&mut self, key: EditorKey, mods: Modifiers) -> Outcome {
        self.with_scene(|ix, scene| ix.key(scene, key, mods))
    }

    // ------------------------------------------------------------------
    // Timers, rendering and export
    // ------------------------------------------------------------------

    /// Applies finished background work. Returns true when a redraw is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for decoded in self.decoder.drain() {
            match decoded.result {
                Ok(image) => {
                    match self.add_layer(image, &decoded.image_key, &decoded.name, decoded.placement) {
                        Ok(_) => changed = true,
                        Err(e) => self.layer_failed(&decoded.image_key, &e),
                    }
                }
                Err(e) => self.layer_failed(&decoded.image_key, &e),
            }
        }
        if self.compositor.poll(&self.store, now) {
            self.host.render_requested();
            changed = true;
        }
        changed
    }

    /// When the host should call `poll` next, if anything is waiting on time.
    pub fn next_poll_at(&self) -> Option<Instant> {
        self.compositor.next_wakeup()
    }

    fn layer_failed(&mut self, image_key: &str, e: &EngineError) {
        tracing::warn!(key = image_key, error = %e, "Layer creation failed");
        self.host.layer_creation_failed(image_key, &e.to_string());
    }

    /// Renders what an element of `screen_size` logical points currently shows.
    pub fn render(&mut self, screen_size: Vec2, now: Instant) -> Result<Surface> {
        let view = self.viewport.visible_world(screen_size);
        let scale = self.viewport.zoom * self.metrics.pixels_per_point;
        self.compositor.render(&self.store, view, scale, now)
    }

    /// Flattens the output area, always from live layer data.
    pub fn export_flattened(&mut self, with_mask: bool, now: Instant) -> Result<RgbaImage> {
        let mask = with_mask.then(|| self.mask.area_of_interest(&self.output_area));
        let image = self.compositor.export(&self.store, &self.output_area, mask.as_ref(), now)?;
        tracing::info!(width = image.width(), height = image.height(), with_mask, "Exported composite");
        Ok(image)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn to_persisted(&self) -> SessionFile {
        io::build_session(&self.store, &self.viewport, &self.output_area)
    }

    /// Writes the session using the configured persistence mode.
    pub fn persist(&self, store: Arc<dyn PersistenceStore>, id: SessionId) -> Result<Option<JoinHandle<()>>> {
        io::persist(store, id, self.to_persisted(), self.settings.persist_mode)
    }

    /// Replaces the whole state from a session blob. Returns the image keys of
    /// layers that were left out because their raster could not be resolved.
    pub fn restore_persisted(&mut self, bytes: &[u8], resolver: &dyn ImageResolver) -> Result<Vec<String>> {
        let session = io::decode_session(bytes)?;
        let restored = {
            let fallback = Fallback {
                first: &self.library,
                then: resolver,
            };
            io::restore_session(session, &fallback)
        };

        self.compositor.clear();
        self.store = restored.store;
        self.viewport = restored.viewport;
        self.viewport.set_zoom_range(self.settings.min_zoom, self.settings.max_zoom);
        self.output_area = restored.output_area;
        for layer in self.store.iter() {
            self.library.insert(layer.image_key.clone(), Arc::clone(&layer.image));
        }
        self.interaction.reset_gesture();
        self.reset_history();
        self.prune_library();
        self.notify_selection();
        self.host.render_requested();
        tracing::info!(
            layers = self.store.len(),
            skipped = restored.skipped.len(),
            "Session restored"
        );
        Ok(restored.skipped)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::host::RecordingHost;

    fn image(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba([200, 10, 10, 255]))
    }

    #[test]
    fn add_layer_records_history_and_notifies() {
        let host = Arc::new(Mutex::new(RecordingHost::default()));
        let mut editor = Editor::new(EngineSettings::inline()).with_host(Arc::clone(&host));
        let id = editor.add_layer(image(10, 10), "a", "a", Placement::Center).unwrap();

        assert!(editor.can_undo());
        let h = host.lock().unwrap();
        assert_eq!(h.selections.last(), Some(&vec![id]));
        assert_eq!(h.history.last(), Some(&(true, false)));
        assert!(h.renders > 0);
    }

    #[test]
    fn undo_redo_restores_layers() {
        let mut editor = Editor::new(EngineSettings::inline());
        let id = editor.add_layer(image(10, 10), "a", "a", Placement::Center).unwrap();
        editor.set_opacity(id, 0.5).unwrap();
        assert!(editor.undo());
        assert_eq!(editor.layer(id).unwrap().opacity, 1.0);
        assert!(editor.undo());
        assert!(editor.store().is_empty());
        assert!(!editor.undo());
        assert!(editor.redo());
        assert!(editor.redo());
        assert_eq!(editor.layer(id).unwrap().opacity, 0.5);
    }

    #[test]
    fn mask_tool_switches_history_track() {
        let mut editor = Editor::new(EngineSettings::inline());
        editor.add_layer(image(10, 10), "a", "a", Placement::Center).unwrap();
        editor.set_tool(Tool::MaskBrush);
        assert!(!editor.can_undo());
        editor.pointer_down(Pos2::new(500.0, 500.0), PointerButton::Primary, Modifiers::default());
        editor.pointer_move(Pos2::new(520.0, 500.0), Modifiers::default());
        editor.pointer_up(Instant::now());
        assert!(editor.can_undo());
        assert!(editor.undo());
        assert!(editor.mask().get().pixels().all(|p| p[0] == 255));
        assert_eq!(editor.store().len(), 1);
    }

    #[test]
    fn degenerate_output_area_is_refused() {
        let mut editor = Editor::new(EngineSettings::inline());
        let before = editor.output_area();
        let err = editor.set_output_area(OutputArea::new(0.0, 0.0, 0.0, 10.0));
        assert!(matches!(err, Err(EngineError::DegenerateGeometry { .. })));
        assert_eq!(editor.output_area(), before);
    }

    #[test]
    fn export_covers_output_area() {
        let mut editor = Editor::new(EngineSettings::inline());
        editor.set_output_area(OutputArea::new(0.0, 0.0, 20.0, 10.0)).unwrap();
        editor.add_layer(image(20, 10), "a", "a", Placement::At(Pos2::ZERO)).unwrap();
        let out = editor.export_flattened(false, Instant::now()).unwrap();
        assert_eq!(out.dimensions(), (20, 10));
        assert_eq!(out.get_pixel(10, 5)[0], 200);
    }

    #[test]
    fn decode_failure_reaches_host() {
        let host = Arc::new(Mutex::new(RecordingHost::default()));
        let mut editor = Editor::new(EngineSettings::inline()).with_host(Arc::clone(&host));
        editor.add_layer_from_bytes("broken", "broken", Placement::Center, vec![1, 2, 3]);
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        while editor.pending_decodes() > 0 && Instant::now() < deadline {
            editor.poll(Instant::now());
            std::thread::yield_now();
        }
        assert!(editor.store().is_empty());
        assert_eq!(host.lock().unwrap().failures, vec!["broken".to_string()]);
    }

    #[test]
    fn persisted_session_restores_with_baseline_history() {
        let mut editor = Editor::new(EngineSettings::inline());
        let a = editor.add_layer(image(8, 8), "a", "a", Placement::Center).unwrap();
        let b = editor.add_layer(image(8, 8), "b", "b", Placement::At(Pos2::new(30.0, 0.0))).unwrap();
        editor.fuse_layers(&[a, b], Instant::now()).unwrap();
        let bytes = io::encode_session(&editor.to_persisted()).unwrap();

        let mut other = Editor::new(EngineSettings::inline());
        let skipped = other.restore_persisted(&bytes, &ImageLibrary::default()).unwrap();
        assert!(skipped.is_empty());
        assert_eq!(other.store().len(), 1);
        assert!(!other.can_undo());
    }

    #[test]
    fn restore_drops_gesture_and_keeps_tool() {
        let mut editor = Editor::new(EngineSettings::inline());
        editor.add_layer(image(8, 8), "a", "a", Placement::Center).unwrap();
        let bytes = io::encode_session(&editor.to_persisted()).unwrap();
        editor.set_tool(Tool::MaskBrush);
        editor.pointer_down(Pos2::new(500.0, 500.0), PointerButton::Primary, Modifiers::default());
        assert!(!editor.interaction().is_idle());

        editor.restore_persisted(&bytes, &ImageLibrary::default()).unwrap();
        assert!(editor.interaction().is_idle());
        assert_eq!(editor.tool(), Tool::MaskBrush);
        assert_eq!(editor.store().len(), 1);
    }

    #[test]
    fn edit_between_wheel_ticks_keeps_its_own_entry() {
        let mut editor = Editor::new(EngineSettings::inline());
        let id = editor.add_layer(image(100, 100), "a", "a", Placement::At(Pos2::ZERO)).unwrap();
        let ctrl = Modifiers { ctrl: true, ..Modifiers::default() };
        let t0 = Instant::now();

        editor.wheel(Pos2::new(50.0, 50.0), 1.0, ctrl, t0);
        editor.set_opacity(id, 0.5).unwrap();
        editor.wheel(Pos2::new(50.0, 50.0), 1.0, ctrl, t0 + std::time::Duration::from_millis(20));

        assert_eq!(
            editor.history().undo_labels(HistoryTrack::Layers),
            vec!["Scale layer", "Opacity", "Scale layer", "Add layer"]
        );
        assert!(editor.undo());
        assert_eq!(editor.layer(id).unwrap().opacity, 0.5);
    }

    #[test]
    fn library_releases_images_history_no_longer_reaches() {
        let settings = EngineSettings {
            max_undo_steps: 2,
            ..EngineSettings::inline()
        };
        let mut editor = Editor::new(settings);
        let a = editor.add_layer(image(4, 4), "a", "a", Placement::Center).unwrap();
        editor.remove_layers(&[a]);
        // Still reachable through undo.
        assert!(editor.library().contains("a"));

        editor.add_layer(image(4, 4), "b", "b", Placement::Center).unwrap();
        assert!(!editor.library().contains("a"));
        assert!(editor.library().contains("b"));
        assert_eq!(editor.library().len(), 1);
    }
}
