use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use image::GrayImage;

use crate::canvas::{Layer, LayerStore, OutputArea};
use crate::error::Result;

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// Layer-store state. Rasters are shared with the live layers, not copied.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSnapshot {
    pub layers: Vec<Layer>,
    pub output_area: OutputArea,
}

impl LayerSnapshot {
    pub fn capture(store: &LayerStore, output_area: &OutputArea) -> Self {
        Self {
            layers: store.layers().to_vec(),
            output_area: *output_area,
        }
    }

    /// Structural hash of every serialized layer field plus the output area.
    pub fn signature(&self) -> Result<u64> {
        let bytes = bincode::serialize(&(&self.layers, &self.output_area))?;
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Ok(hasher.finish())
    }

    pub fn restore_into(&self, store: &mut LayerStore, output_area: &mut OutputArea) {
        store.replace_all(self.layers.clone());
        *output_area = self.output_area;
    }
}

#[derive(Clone, Debug)]
pub struct MaskSnapshot {
    pub raster: Arc<GrayImage>,
}

impl MaskSnapshot {
    pub fn capture(raster: GrayImage) -> Self {
        Self { raster: Arc::new(raster) }
    }

    pub fn signature(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.raster.dimensions().hash(&mut hasher);
        self.raster.as_raw().hash(&mut hasher);
        hasher.finish()
    }
}

// ============================================================================
// TRACK
// ============================================================================

#[derive(Clone, Debug)]
pub struct HistoryEntry<S> {
    pub label: String,
    pub signature: u64,
    pub state: S,
}

/// One undo/redo stack pair.
///
/// `undo[0]` is the baseline: it is restored to, never undone past.
#[derive(Debug)]
pub struct Track<S> {
    undo: VecDeque<HistoryEntry<S>>,
    redo: Vec<HistoryEntry<S>>,
    limit: usize,
}

impl<S> Track<S> {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit: limit.max(2),
        }
    }

    /// Pushes unless the signature equals the current top. Clears redo on push.
    pub fn push(&mut self, label: &str, signature: u64, state: S) -> bool {
        if self.undo.back().is_some_and(|top| top.signature == signature) {
            tracing::trace!(label, "History push skipped: state unchanged");
            return false;
        }
        self.redo.clear();
        self.undo.push_back(HistoryEntry {
            label: label.to_string(),
            signature,
            state,
        });
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
        tracing::debug!(label, undo_depth = self.undo.len(), "History entry pushed");
        true
    }

    /// Discards the top entry (never the baseline), then pushes.
    pub fn replace_last(&mut self, label: &str, signature: u64, state: S) -> bool {
        if self.undo.len() >= 2 {
            self.undo.pop_back();
        }
        self.push(label, signature, state)
    }

    /// Moves the top entry to redo and returns the state to restore.
    pub fn undo(&mut self) -> Option<&HistoryEntry<S>> {
        if self.undo.len() < 2 {
            return None;
        }
        let entry = self.undo.pop_back()?;
        tracing::debug!(label = %entry.label, undo_remaining = self.undo.len(), "Undo");
        self.redo.push(entry);
        self.undo.back()
    }

    pub fn redo(&mut self) -> Option<&HistoryEntry<S>> {
        let entry = self.redo.pop()?;
        tracing::debug!(label = %entry.label, redo_remaining = self.redo.len(), "Redo");
        self.undo.push_back(entry);
        self.undo.back()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.len() >= 2
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo.len()
    }

    /// Labels of undoable entries, most recent first.
    pub fn undo_labels(&self) -> Vec<String> {
        self.undo.iter().skip(1).rev().map(|e| e.label.clone()).collect()
    }

    pub fn top(&self) -> Option<&HistoryEntry<S>> {
        self.undo.back()
    }

    /// Every state still reachable by undo or redo, baseline included.
    pub fn states(&self) -> impl Iterator<Item = &S> {
        self.undo.iter().chain(self.redo.iter()).map(|e| &e.state)
    }

    /// Drops everything and starts over from `state`.
    pub fn reset(&mut self, label: &str, signature: u64, state: S) {
        self.undo.clear();
        self.redo.clear();
        self.undo.push_back(HistoryEntry {
            label: label.to_string(),
            signature,
            state,
        });
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryTrack {
    Layers,
    Mask,
}

/// What an undo or redo hands back for the caller to apply.
#[derive(Clone, Debug)]
pub enum Restored {
    Layers(LayerSnapshot),
    Mask(MaskSnapshot),
}

/// Independent layer and mask histories.
#[derive(Debug)]
pub struct HistoryManager {
    layers: Track<LayerSnapshot>,
    mask: Track<MaskSnapshot>,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            layers: Track::new(max_history_size),
            mask: Track::new(max_history_size),
        }
    }

    /// Starts both tracks over with the given baseline.
    pub fn reset(&mut self, store: &LayerStore, output_area: &OutputArea, mask: Option<GrayImage>) -> Result<()> {
        let snapshot = LayerSnapshot::capture(store, output_area);
        let signature = snapshot.signature()?;
        self.layers.reset("Initial", signature, snapshot);
        match mask {
            Some(raster) => {
                let snapshot = MaskSnapshot::capture(raster);
                let signature = snapshot.signature();
                self.mask.reset("Initial", signature, snapshot);
            }
            None => self.mask.clear(),
        }
        Ok(())
    }

    /// Records the layer store. Returns true if an entry was added.
    pub fn snapshot(&mut self, label: &str, store: &LayerStore, output_area: &OutputArea) -> Result<bool> {
        let snapshot = LayerSnapshot::capture(store, output_area);
        let signature = snapshot.signature()?;
        Ok(self.layers.push(label, signature, snapshot))
    }

    /// Like `snapshot`, but folds into the previous entry.
    pub fn replace_last(&mut self, label: &str, store: &LayerStore, output_area: &OutputArea) -> Result<bool> {
        let snapshot = LayerSnapshot::capture(store, output_area);
        let signature = snapshot.signature()?;
        Ok(self.layers.replace_last(label, signature, snapshot))
    }

    pub fn snapshot_mask(&mut self, label: &str, raster: GrayImage) -> bool {
        let snapshot = MaskSnapshot::capture(raster);
        let signature = snapshot.signature();
        self.mask.push(label, signature, snapshot)
    }

    pub fn undo(&mut self, track: HistoryTrack) -> Option<Restored> {
        match track {
            HistoryTrack::Layers => self.layers.undo().map(|e| Restored::Layers(e.state.clone())),
            HistoryTrack::Mask => self.mask.undo().map(|e| Restored::Mask(e.state.clone())),
        }
    }

    pub fn redo(&mut self, track: HistoryTrack) -> Option<Restored> {
        match track {
            HistoryTrack::Layers => self.layers.redo().map(|e| Restored::Layers(e.state.clone())),
            HistoryTrack::Mask => self.mask.redo().map(|e| Restored::Mask(e.state.clone())),
        }
    }

    pub fn can_undo(&self, track: HistoryTrack) -> bool {
        match track {
            HistoryTrack::Layers => self.layers.can_undo(),
            HistoryTrack::Mask => self.mask.can_undo(),
        }
    }

    pub fn can_redo(&self, track: HistoryTrack) -> bool {
        match track {
            HistoryTrack::Layers => self.layers.can_redo(),
            HistoryTrack::Mask => self.mask.can_redo(),
        }
    }

    pub fn undo_count(&self, track: HistoryTrack) -> usize {
        match track {
            HistoryTrack::Layers => self.layers.undo_count(),
            HistoryTrack::Mask => self.mask.undo_count(),
        }
    }

    pub fn redo_count(&self, track: HistoryTrack) -> usize {
        match track {
            HistoryTrack::Layers => self.layers.redo_count(),
            HistoryTrack::Mask => self.mask.redo_count(),
        }
    }

    pub fn undo_labels(&self, track: HistoryTrack) -> Vec<String> {
        match track {
            HistoryTrack::Layers => self.layers.undo_labels(),
            HistoryTrack::Mask => self.mask.undo_labels(),
        }
    }

    /// Label of the entry an undo on `track` would remove.
    pub fn top_label(&self, track: HistoryTrack) -> Option<&str> {
        let top = match track {
            HistoryTrack::Layers => self.layers.top().map(|e| &e.label),
            HistoryTrack::Mask => self.mask.top().map(|e| &e.label),
        };
        top.map(String::as_str)
    }

    /// Image keys of every layer any layer-track entry still refers to.
    pub fn image_keys(&self) -> HashSet<&str> {
        self.layers
            .states()
            .flat_map(|s| s.layers.iter())
            .map(|l| l.image_key.as_str())
            .collect()
    }

    pub fn clear(&mut self) {
        self.layers.clear();
        self.mask.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::tests::layer_at;

    fn store() -> LayerStore {
        let mut store = LayerStore::new();
        store.push_top(layer_at("a", 0.0, 0.0, 10.0, 10.0));
        store
    }

    #[test]
    fn identical_snapshots_dedupe() {
        let store = store();
        let area = OutputArea::default();
        let mut history = HistoryManager::new(50);
        history.reset(&store, &area, None).unwrap();
        assert!(!history.snapshot("noop", &store, &area).unwrap());
        assert_eq!(history.undo_count(HistoryTrack::Layers), 1);
    }

    #[test]
    fn undo_stops_at_baseline() {
        let mut store = store();
        let mut area = OutputArea::default();
        let id = store.layers()[0].id;
        let mut history = HistoryManager::new(50);
        history.reset(&store, &area, None).unwrap();
        for i in 1..=3 {
            store.get_mut(id).unwrap().x = i as f32;
            history.snapshot("move", &store, &area).unwrap();
        }
        for _ in 0..3 {
            let Some(Restored::Layers(s)) = history.undo(HistoryTrack::Layers) else { panic!("undo") };
            s.restore_into(&mut store, &mut area);
        }
        assert_eq!(store.layers()[0].x, 0.0);
        assert!(history.undo(HistoryTrack::Layers).is_none());
        assert_eq!(history.redo_count(HistoryTrack::Layers), 3);
    }

    #[test]
    fn redo_reapplies_and_new_push_clears_redo() {
        let mut store = store();
        let mut area = OutputArea::default();
        let id = store.layers()[0].id;
        let mut history = HistoryManager::new(50);
        history.reset(&store, &area, None).unwrap();
        store.get_mut(id).unwrap().x = 5.0;
        history.snapshot("move", &store, &area).unwrap();
        if let Some(Restored::Layers(s)) = history.undo(HistoryTrack::Layers) {
            s.restore_into(&mut store, &mut area);
        }
        let Some(Restored::Layers(s)) = history.redo(HistoryTrack::Layers) else { panic!("redo") };
        s.restore_into(&mut store, &mut area);
        assert_eq!(store.layers()[0].x, 5.0);

        history.undo(HistoryTrack::Layers);
        store.get_mut(id).unwrap().x = 9.0;
        history.snapshot("other", &store, &area).unwrap();
        assert!(!history.can_redo(HistoryTrack::Layers));
    }

    #[test]
    fn image_keys_follow_eviction() {
        let mut store = store();
        let area = OutputArea::default();
        let a = store.layers()[0].id;
        let mut history = HistoryManager::new(2);
        history.reset(&store, &area, None).unwrap();
        store.remove(&[a]);
        history.snapshot("delete", &store, &area).unwrap();
        assert!(history.image_keys().contains("a"));

        store.push_top(layer_at("b", 0.0, 0.0, 4.0, 4.0));
        history.snapshot("add", &store, &area).unwrap();
        let keys = history.image_keys();
        assert!(!keys.contains("a"));
        assert!(keys.contains("b"));
        assert_eq!(history.top_label(HistoryTrack::Layers), Some("add"));
    }

    #[test]
    fn replace_last_coalesces_gesture() {
        let mut store = store();
        let area = OutputArea::default();
        let id = store.layers()[0].id;
        let mut history = HistoryManager::new(50);
        history.reset(&store, &area, None).unwrap();
        store.get_mut(id).unwrap().width = 20.0;
        history.snapshot("scale", &store, &area).unwrap();
        for w in [25.0, 30.0, 35.0] {
            store.get_mut(id).unwrap().width = w;
            history.replace_last("scale", &store, &area).unwrap();
        }
        assert_eq!(history.undo_count(HistoryTrack::Layers), 2);
        assert_eq!(history.undo_labels(HistoryTrack::Layers), vec!["scale".to_string()]);
    }

    #[test]
    fn replace_last_never_drops_baseline() {
        let mut track: Track<u32> = Track::new(10);
        track.reset("base", 0, 0);
        track.replace_last("x", 1, 1);
        assert_eq!(track.undo_count(), 2);
        assert_eq!(track.undo.front().map(|e| e.state), Some(0));
    }

    #[test]
    fn limit_evicts_oldest() {
        let mut track: Track<u32> = Track::new(3);
        for i in 0..6 {
            track.push("p", i, i as u32);
        }
        assert_eq!(track.undo_count(), 3);
        assert_eq!(track.undo.front().map(|e| e.state), Some(3));
    }

    #[test]
    fn mask_track_is_independent() {
        let store = store();
        let area = OutputArea::default();
        let mut history = HistoryManager::new(50);
        history.reset(&store, &area, Some(GrayImage::new(4, 4))).unwrap();
        assert!(history.snapshot_mask("paint", GrayImage::from_pixel(4, 4, image::Luma([9]))));
        assert!(history.can_undo(HistoryTrack::Mask));
        assert!(!history.can_undo(HistoryTrack::Layers));
        let Some(Restored::Mask(m)) = history.undo(HistoryTrack::Mask) else { panic!("mask undo") };
        assert_eq!(m.raster.get_pixel(0, 0)[0], 0);
    }
}
