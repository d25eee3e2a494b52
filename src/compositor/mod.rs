//! Layer drawing and the processed-image cache.
//!
//! Layers draw either from a cached *processed image* (crop applied, resampled to
//! the frame, feathered) or live from their source raster. Cache creation is
//! debounced per layer through a [`Scheduler`] and runs inline or on rayon,
//! depending on [`CacheExecution`]. Results carry a generation token; anything
//! produced for a superseded generation is dropped on arrival.

pub mod cache;
pub mod feather;
pub mod surface;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use egui::Rect;
use image::{GrayImage, RgbaImage};

use crate::canvas::{Layer, LayerId, LayerStore, OutputArea};
use crate::error::{EngineError, Result};
use crate::scheduler::Scheduler;
use crate::settings::{CacheExecution, EngineSettings};

use cache::{CacheJob, CacheKey, ProcessedImageCache};
use feather::{FeatherCache, FeatherKey};
use surface::{blit_layer, BlitParams, LayerTexture, Surface};

/// Which gesture just finished, deciding how soon the processed image is rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformKind {
    Crop,
    Scale,
    Wheel,
}

/// How a layer was drawn on the last frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawSource {
    Cached,
    /// A stale entry stood in while wheel scaling.
    Substitute,
    Live,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Processed-image creations started.
    pub creations: u64,
    pub landed: u64,
    pub discarded: u64,
    pub failures: u64,
    pub hits: u64,
    pub misses: u64,
    pub substitutions: u64,
}

struct CacheResult {
    key: CacheKey,
    generation: u64,
    outcome: Result<RgbaImage>,
}

pub struct Compositor {
    settings: EngineSettings,
    cache: ProcessedImageCache,
    feathers: FeatherCache,
    scheduler: Scheduler<LayerId, CacheKey>,
    generations: HashMap<LayerId, u64>,
    in_flight: HashMap<LayerId, u64>,
    /// Layers under an active gesture; drawn live, nothing scheduled.
    transforming: HashSet<LayerId>,
    /// Layers drawn live until their rebuilt entry lands.
    awaiting: HashSet<LayerId>,
    wheel_scaling: HashMap<LayerId, Instant>,
    failed: HashSet<CacheKey>,
    tx: mpsc::Sender<CacheResult>,
    rx: mpsc::Receiver<CacheResult>,
    stats: CacheStats,
}

impl Compositor {
    pub fn new(settings: &EngineSettings) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            settings: settings.clone(),
            cache: ProcessedImageCache::default(),
            feathers: FeatherCache::new(settings.feather_cache_capacity),
            scheduler: Scheduler::new(),
            generations: HashMap::new(),
            in_flight: HashMap::new(),
            transforming: HashSet::new(),
            awaiting: HashSet::new(),
            wheel_scaling: HashMap::new(),
            failed: HashSet::new(),
            tx,
            rx,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn cache(&self) -> &ProcessedImageCache {
        &self.cache
    }

    pub fn is_pending(&self, id: LayerId) -> bool {
        self.scheduler.is_pending(id) || self.in_flight.contains_key(&id)
    }

    /// True while `id` draws live waiting for its rebuilt processed image.
    pub fn is_awaiting(&self, id: LayerId) -> bool {
        self.awaiting.contains(&id)
    }

    pub fn is_wheel_scaling(&self, id: LayerId) -> bool {
        self.wheel_scaling.contains_key(&id)
    }

    /// Earliest time `poll` has work: a due creation or a wheel gesture going idle.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let idle = self
            .wheel_scaling
            .values()
            .map(|last| *last + self.settings.wheel_idle)
            .min();
        match (self.scheduler.next_due(), idle) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn feather_masks_generated(&self) -> u64 {
        self.feathers.generated()
    }

    fn generation(&self, id: LayerId) -> u64 {
        self.generations.get(&id).copied().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Invalidation and gesture tracking
    // ------------------------------------------------------------------

    /// Drops every processed image of `id` and cancels its pending creation.
    pub fn invalidate(&mut self, id: LayerId) {
        let removed = self.cache.invalidate_layer(id);
        self.scheduler.cancel(id);
        self.in_flight.remove(&id);
        self.failed.retain(|k| k.layer != id);
        let generation = self.generations.entry(id).or_insert(0);
        *generation = generation.wrapping_add(1);
        if removed > 0 {
            tracing::trace!(layer = %id, removed, "Processed images invalidated");
        }
    }

    /// A size change. Stale entries survive while wheel scaling so they can stand in.
    pub fn dimensions_changed(&mut self, id: LayerId) {
        if self.wheel_scaling.contains_key(&id) {
            self.scheduler.cancel(id);
            self.in_flight.remove(&id);
            let generation = self.generations.entry(id).or_insert(0);
            *generation = generation.wrapping_add(1);
        } else {
            self.invalidate(id);
        }
    }

    pub fn forget_layer(&mut self, layer: &Layer) {
        self.invalidate(layer.id);
        self.generations.remove(&layer.id);
        self.transforming.remove(&layer.id);
        self.awaiting.remove(&layer.id);
        self.wheel_scaling.remove(&layer.id);
        self.feathers.forget_source(Arc::as_ptr(&layer.image) as usize);
    }

    /// Drops every processed image, mask and pending creation. Results still
    /// in flight are discarded when they arrive.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.feathers.clear();
        self.scheduler.clear();
        let known: Vec<LayerId> = self.generations.keys().chain(self.in_flight.keys()).copied().collect();
        for id in known {
            let generation = self.generations.entry(id).or_insert(0);
            *generation = generation.wrapping_add(1);
        }
        self.in_flight.clear();
        self.transforming.clear();
        self.awaiting.clear();
        self.wheel_scaling.clear();
        self.failed.clear();
        tracing::debug!("Compositor state cleared");
    }

    pub fn begin_transform(&mut self, id: LayerId) {
        self.transforming.insert(id);
        self.scheduler.cancel(id);
    }

    /// Finishes a gesture and schedules the rebuild: crop and scale at once,
    /// wheel after the short debounce. The layer keeps drawing live until then.
    pub fn end_transform(&mut self, layer: &Layer, kind: TransformKind, now: Instant) {
        self.transforming.remove(&layer.id);
        if kind == TransformKind::Wheel {
            self.wheel_scaling.remove(&layer.id);
        }
        if layer.blend_area == 0 {
            self.awaiting.remove(&layer.id);
            return;
        }
        let due = match kind {
            TransformKind::Crop | TransformKind::Scale => now,
            TransformKind::Wheel => now + self.settings.wheel_debounce,
        };
        self.awaiting.insert(layer.id);
        self.scheduler.schedule(layer.id, due, CacheKey::for_layer(layer));
        tracing::debug!(layer = %layer.id, ?kind, "Processed image rebuild scheduled");
    }

    /// Records a wheel-scale tick. Creation stays suspended until the gesture ends.
    pub fn wheel_tick(&mut self, id: LayerId, now: Instant) {
        self.wheel_scaling.insert(id, now);
        self.scheduler.cancel(id);
    }

    /// Drops transient gesture state, e.g. after a rollback.
    pub fn cancel_transform(&mut self, id: LayerId) {
        self.transforming.remove(&id);
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Picks the image to draw `layer` with, scheduling creation on a miss.
    fn resolve(&mut self, layer: &Layer, now: Instant) -> (DrawSource, Option<Arc<RgbaImage>>) {
        if layer.blend_area == 0 {
            return (DrawSource::Live, None);
        }
        let key = CacheKey::for_layer(layer);

        if self.wheel_scaling.contains_key(&layer.id) {
            if let Some(img) = self.cache.get(&key) {
                self.stats.hits += 1;
                return (DrawSource::Cached, Some(img));
            }
            if let Some((_, img)) = self.cache.best_match(&key) {
                self.stats.substitutions += 1;
                return (DrawSource::Substitute, Some(img));
            }
            return (DrawSource::Live, None);
        }
        if self.transforming.contains(&layer.id) {
            return (DrawSource::Live, None);
        }
        if self.awaiting.contains(&layer.id) {
            if !self.is_pending(layer.id) && !self.failed.contains(&key) {
                self.scheduler
                    .schedule_coalesced(layer.id, now + self.settings.cache_debounce, key);
            }
            return (DrawSource::Live, None);
        }
        if let Some(img) = self.cache.get(&key) {
            self.stats.hits += 1;
            return (DrawSource::Cached, Some(img));
        }
        self.stats.misses += 1;
        if !self.failed.contains(&key) && self.in_flight.get(&layer.id) != Some(&self.generation(layer.id)) {
            self.scheduler
                .schedule_coalesced(layer.id, now + self.settings.cache_debounce, key);
        }
        (DrawSource::Live, None)
    }

    // ------------------------------------------------------------------
    // Poll
    // ------------------------------------------------------------------

    /// Ends idle wheel gestures, runs due creations and applies finished ones.
    /// Returns true when something landed and a redraw is due.
    pub fn poll(&mut self, store: &LayerStore, now: Instant) -> bool {
        let idle: Vec<LayerId> = self
            .wheel_scaling
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= self.settings.wheel_idle)
            .map(|(id, _)| *id)
            .collect();
        for id in idle {
            match store.get(id) {
                Some(layer) => self.end_transform(layer, TransformKind::Wheel, now),
                None => {
                    self.wheel_scaling.remove(&id);
                }
            }
        }

        for (id, key) in self.scheduler.take_due(now) {
            let Some(layer) = store.get(id) else { continue };
            if CacheKey::for_layer(layer) != key {
                // The layer moved on since this was queued; its own miss reschedules.
                continue;
            }
            let job = CacheJob::for_layer(layer, self.generation(id), self.settings.max_surface_edge);
            self.dispatch(job);
        }

        let mut landed = false;
        while let Ok(result) = self.rx.try_recv() {
            landed |= self.apply_result(store, result);
        }
        landed
    }

    fn dispatch(&mut self, job: CacheJob) {
        self.stats.creations += 1;
        self.in_flight.insert(job.key.layer, job.generation);
        tracing::debug!(
            layer = %job.key.layer,
            width = job.out_width,
            height = job.out_height,
            blend_area = job.key.blend_area,
            "Creating processed image"
        );
        match self.settings.cache_execution {
            CacheExecution::Inline => {
                let outcome = job.run();
                let _ = self.tx.send(CacheResult {
                    key: job.key,
                    generation: job.generation,
                    outcome,
                });
            }
            CacheExecution::Background => {
                let tx = self.tx.clone();
                rayon::spawn(move || {
                    let outcome = job.run();
                    let _ = tx.send(CacheResult {
                        key: job.key,
                        generation: job.generation,
                        outcome,
                    });
                });
            }
        }
    }

    fn apply_result(&mut self, store: &LayerStore, result: CacheResult) -> bool {
        let id = result.key.layer;
        if self.in_flight.get(&id) == Some(&result.generation) {
            self.in_flight.remove(&id);
        }
        if result.generation != self.generation(id) || !store.contains(id) {
            self.stats.discarded += 1;
            return false;
        }
        match result.outcome {
            Ok(image) => {
                self.cache.insert(result.key, Arc::new(image));
                self.cache.retain_only(&result.key);
                self.stats.landed += 1;
                let current = store.get(id).map(CacheKey::for_layer);
                if current == Some(result.key) {
                    self.awaiting.remove(&id);
                }
                true
            }
            Err(e) => {
                self.stats.failures += 1;
                self.failed.insert(result.key);
                tracing::warn!(layer = %id, error = %e, "Processed image creation failed; drawing live");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Drawing
    // ------------------------------------------------------------------

    /// Draws one layer. `allow_cache` is false for exports, which always draw live.
    pub fn draw_layer(&mut self, surface: &mut Surface, layer: &Layer, now: Instant, allow_cache: bool) -> DrawSource {
        if !layer.visible || layer.opacity <= 0.0 {
            return DrawSource::Live;
        }
        let params = BlitParams::from_layer(layer);
        let (source, processed) = if allow_cache {
            self.resolve(layer, now)
        } else {
            (DrawSource::Live, None)
        };

        match processed {
            Some(img) => {
                let texture = LayerTexture {
                    image: &img,
                    covers: params.source,
                    mask: None,
                };
                blit_layer(surface, &params, &texture);
            }
            None => {
                let mask = (layer.blend_area > 0).then(|| self.live_feather(layer));
                let texture = LayerTexture {
                    image: &layer.image,
                    covers: crate::canvas::CropRect::full(layer.original_width, layer.original_height),
                    mask: mask.as_deref(),
                };
                blit_layer(surface, &params, &texture);
            }
        }
        source
    }

    /// Feather at the same frame-pixel size a processed image is built at, so
    /// live and cached drawing fade identically. Oversized frames shrink the
    /// mask uniformly, which keeps the falloff proportional.
    fn live_feather(&mut self, layer: &Layer) -> Arc<GrayImage> {
        let (w, h) = cache::frame_pixels(layer);
        let (w, h) = (w.max(1), h.max(1));
        let longest = w.max(h);
        let max_edge = self.settings.max_surface_edge.max(1);
        let (width, height) = if longest > max_edge {
            let k = max_edge as f32 / longest as f32;
            (
                ((w as f32 * k).round() as u32).max(1),
                ((h as f32 * k).round() as u32).max(1),
            )
        } else {
            (w, h)
        };
        self.feathers.get_or_create(FeatherKey {
            source: Arc::as_ptr(&layer.image) as usize,
            crop: layer.crop_rect().map(|c| c.key()),
            blend_area: layer.blend_area,
            width,
            height,
        })
    }

    /// Renders the store into a surface covering `view` at `scale` pixels per unit.
    pub fn render(&mut self, store: &LayerStore, view: Rect, scale: f32, now: Instant) -> Result<Surface> {
        let mut surface = Surface::for_rect(view, scale, self.settings.max_surface_edge)?;
        for layer in store.iter() {
            self.draw_layer(&mut surface, layer, now, true);
        }
        Ok(surface)
    }

    /// Draws the given layers live into a surface covering `rect` at scale 1.
    pub fn render_layers<'a>(&mut self, layers: impl IntoIterator<Item = &'a Layer>, rect: Rect, now: Instant) -> Result<Surface> {
        let mut surface = Surface::for_rect(rect, 1.0, self.settings.max_surface_edge)?;
        for layer in layers {
            self.draw_layer(&mut surface, layer, now, false);
        }
        Ok(surface)
    }

    /// Flattens every visible layer inside the output area, optionally masked.
    pub fn export(&mut self, store: &LayerStore, area: &OutputArea, mask: Option<&GrayImage>, now: Instant) -> Result<RgbaImage> {
        if area.is_degenerate() {
            return Err(EngineError::degenerate("export", area.width, area.height));
        }
        let mut surface = self.render_layers(store.iter(), area.rect(), now)?;
        if let Some(mask) = mask {
            surface.apply_mask(mask);
        }
        tracing::info!(width = surface.width(), height = surface.height(), masked = mask.is_some(), "Exported composite");
        Ok(surface.into_image())
    }
}
