use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::{Layer, LayerId, LayerStore, OutputArea};
use crate::error::{EngineError, Result};
use crate::ops::canvas_ops::Placement;
use crate::settings::PersistMode;
use crate::viewport::Viewport;

pub type SessionId = Uuid;

/// Image keys with this prefix name rasters the engine produced itself (fused
/// layers). They are embedded in the session file since no host can resolve them.
pub const GENERATED_KEY_PREFIX: &str = "generated:";

pub fn generated_key() -> String {
    format!("{GENERATED_KEY_PREFIX}{}", Uuid::new_v4())
}

// ============================================================================
// SESSION FILE FORMAT
// ============================================================================

/// Magic header of the session blob.
const SESSION_MAGIC: &str = "LFE1";
/// Guards against crafted blobs.
const MAX_LAYERS: usize = 1024;
const MAX_EMBEDDED_DIM: u32 = 32_768;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct EmbeddedImage {
    key: String,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Serializable editor state. Layer rasters travel as image keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFile {
    magic: String,
    pub viewport: Viewport,
    pub output_area: OutputArea,
    pub layers: Vec<Layer>,
    pub selection: Vec<LayerId>,
    embedded: Vec<EmbeddedImage>,
}

/// Builds the session blob. Copies generated rasters, so call it on the
/// mutation thread and hand the result to a worker for encoding.
pub fn build_session(store: &LayerStore, viewport: &Viewport, output_area: &OutputArea) -> SessionFile {
    let mut embedded: Vec<EmbeddedImage> = Vec::new();
    for layer in store.iter() {
        if layer.image_key.starts_with(GENERATED_KEY_PREFIX) && !embedded.iter().any(|e| e.key == layer.image_key) {
            embedded.push(EmbeddedImage {
                key: layer.image_key.clone(),
                width: layer.image.width(),
                height: layer.image.height(),
                pixels: layer.image.as_raw().clone(),
            });
        }
    }
    SessionFile {
        magic: SESSION_MAGIC.to_string(),
        viewport: *viewport,
        output_area: *output_area,
        layers: store.layers().to_vec(),
        selection: store.selection().to_vec(),
        embedded,
    }
}

pub fn encode_session(session: &SessionFile) -> Result<Vec<u8>> {
    Ok(bincode::serialize(session)?)
}

pub fn decode_session(raw: &[u8]) -> Result<SessionFile> {
    // bincode writes a String as an 8-byte length followed by its bytes.
    if raw.len() < 12 {
        return Err(EngineError::InvalidFormat("session blob too small".into()));
    }
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != SESSION_MAGIC {
        return Err(EngineError::InvalidFormat(format!("unknown magic '{magic}'")));
    }
    let session: SessionFile = bincode::deserialize(raw)?;
    if session.layers.len() > MAX_LAYERS {
        return Err(EngineError::InvalidFormat(format!(
            "session holds {} layers, more than the maximum of {MAX_LAYERS}",
            session.layers.len()
        )));
    }
    for e in &session.embedded {
        let expected = e.width as usize * e.height as usize * 4;
        if e.width > MAX_EMBEDDED_DIM || e.height > MAX_EMBEDDED_DIM || e.pixels.len() != expected {
            return Err(EngineError::InvalidFormat(format!(
                "embedded image '{}' is {}x{} with {} bytes",
                e.key,
                e.width,
                e.height,
                e.pixels.len()
            )));
        }
    }
    Ok(session)
}

// ============================================================================
// IMAGE RESOLUTION
// ============================================================================

/// Turns an image key back into a decoded raster when a session is restored.
pub trait ImageResolver {
    fn resolve(&self, key: &str) -> Option<Arc<RgbaImage>>;
}

/// Decoded rasters by image key.
#[derive(Clone, Debug, Default)]
pub struct ImageLibrary {
    images: HashMap<String, Arc<RgbaImage>>,
}

impl ImageLibrary {
    pub fn insert(&mut self, key: impl Into<String>, image: Arc<RgbaImage>) {
        self.images.insert(key.into(), image);
    }

    pub fn get(&self, key: &str) -> Option<Arc<RgbaImage>> {
        self.images.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.images.contains_key(key)
    }

    /// Drops rasters whose key fails `keep`. Returns how many went.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.images.len();
        self.images.retain(|key, _| keep(key));
        before - self.images.len()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageResolver for ImageLibrary {
    fn resolve(&self, key: &str) -> Option<Arc<RgbaImage>> {
        self.get(key)
    }
}

/// Result of restoring a session; `skipped` lists image keys that did not resolve.
#[derive(Debug)]
pub struct RestoredSession {
    pub store: LayerStore,
    pub viewport: Viewport,
    pub output_area: OutputArea,
    pub embedded: ImageLibrary,
    pub skipped: Vec<String>,
}

/// Rebuilds the layer store. Layers whose raster cannot be found, or no longer
/// matches the recorded size, are left out with a warning.
pub fn restore_session(session: SessionFile, resolver: &dyn ImageResolver) -> RestoredSession {
    let mut embedded = ImageLibrary::default();
    for e in session.embedded {
        match RgbaImage::from_raw(e.width, e.height, e.pixels) {
            Some(img) => embedded.insert(e.key, Arc::new(img)),
            None => tracing::warn!(key = %e.key, "Embedded image is malformed"),
        }
    }

    let mut layers = Vec::with_capacity(session.layers.len());
    let mut skipped = Vec::new();
    for mut layer in session.layers {
        let image = embedded
            .get(&layer.image_key)
            .or_else(|| resolver.resolve(&layer.image_key));
        match image {
            Some(img) if img.dimensions() == (layer.original_width, layer.original_height) => {
                layer.image = img;
                layers.push(layer);
            }
            Some(img) => {
                tracing::warn!(
                    layer = %layer.id,
                    key = %layer.image_key,
                    expected = ?(layer.original_width, layer.original_height),
                    found = ?img.dimensions(),
                    "Skipping layer: image size changed"
                );
                skipped.push(layer.image_key);
            }
            None => {
                tracing::warn!(layer = %layer.id, key = %layer.image_key, "Skipping layer: image not found");
                skipped.push(layer.image_key);
            }
        }
    }

    let mut store = LayerStore::new();
    store.replace_all(layers);
    let selection: Vec<LayerId> = session.selection.into_iter().filter(|id| store.contains(*id)).collect();
    store.set_selection(&selection);

    RestoredSession {
        store,
        viewport: session.viewport,
        output_area: session.output_area,
        embedded,
        skipped,
    }
}

// ============================================================================
// PERSISTENCE STORES
// ============================================================================

/// Key-value store for session blobs.
pub trait PersistenceStore: Send + Sync {
    fn save(&self, id: SessionId, bytes: &[u8]) -> Result<()>;
    fn load(&self, id: SessionId) -> Result<Option<Vec<u8>>>;
    fn remove(&self, id: SessionId) -> Result<()>;
}

/// One `<session-id>.lfe` file per session inside a directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/LayerFE/sessions`, next to the session log.
    pub fn default_dir() -> Option<PathBuf> {
        crate::logger::data_dir().map(|d| d.join("sessions"))
    }

    pub fn path_for(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{id}.lfe"))
    }
}

impl PersistenceStore for FileStore {
    fn save(&self, id: SessionId, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(id);
        let tmp = path.with_extension("lfe.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_all(bytes)?;
            writer.flush()?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, id: SessionId) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, id: SessionId) -> Result<()> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store. Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<SessionId, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> EngineError {
    EngineError::Io(std::io::Error::other("memory store lock poisoned"))
}

impl PersistenceStore for MemoryStore {
    fn save(&self, id: SessionId, bytes: &[u8]) -> Result<()> {
        self.inner.lock().map_err(|_| poisoned())?.insert(id, bytes.to_vec());
        Ok(())
    }

    fn load(&self, id: SessionId) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().map_err(|_| poisoned())?.get(&id).cloned())
    }

    fn remove(&self, id: SessionId) -> Result<()> {
        self.inner.lock().map_err(|_| poisoned())?.remove(&id);
        Ok(())
    }
}

/// Encodes and writes a session. In background mode the work runs on a named
/// thread and the handle is returned; if that thread cannot be spawned the
/// write happens here instead.
pub fn persist(
    store: Arc<dyn PersistenceStore>,
    id: SessionId,
    session: SessionFile,
    mode: PersistMode,
) -> Result<Option<JoinHandle<()>>> {
    if mode == PersistMode::Background {
        let worker_store = Arc::clone(&store);
        let worker_session = session.clone();
        let spawned = std::thread::Builder::new()
            .name("layerfe-persist".into())
            .spawn(move || {
                let outcome = encode_session(&worker_session).and_then(|bytes| worker_store.save(id, &bytes));
                match outcome {
                    Ok(()) => tracing::debug!(session = %id, "Session persisted"),
                    Err(e) => tracing::warn!(session = %id, error = %e, "Background persist failed"),
                }
            });
        match spawned {
            Ok(handle) => return Ok(Some(handle)),
            Err(e) => tracing::warn!(session = %id, error = %e, "Persist worker unavailable; writing synchronously"),
        }
    }
    let bytes = encode_session(&session)?;
    store.save(id, &bytes)?;
    tracing::debug!(session = %id, bytes = bytes.len(), "Session persisted");
    Ok(None)
}

// ============================================================================
// IMAGE DECODING
// ============================================================================

pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Synchronously load an image file (CLI / headless mode).
pub fn load_image_file(path: &Path) -> Result<RgbaImage> {
    Ok(image::open(path)?.to_rgba8())
}

/// A finished background decode.
#[derive(Debug)]
pub struct DecodedImage {
    pub image_key: String,
    pub name: String,
    pub placement: Placement,
    pub result: Result<RgbaImage>,
}

/// Decodes image bytes on rayon; results are drained on the mutation thread.
pub struct DecodeQueue {
    tx: mpsc::Sender<DecodedImage>,
    rx: mpsc::Receiver<DecodedImage>,
    pending: usize,
}

impl Default for DecodeQueue {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx, pending: 0 }
    }
}

impl DecodeQueue {
    pub fn request(&mut self, image_key: String, name: String, placement: Placement, bytes: Vec<u8>) {
        self.pending += 1;
        let tx = self.tx.clone();
        rayon::spawn(move || {
            let result = decode_image(&bytes);
            let _ = tx.send(DecodedImage {
                image_key,
                name,
                placement,
                result,
            });
        });
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn drain(&mut self) -> Vec<DecodedImage> {
        let done: Vec<DecodedImage> = self.rx.try_iter().collect();
        self.pending = self.pending.saturating_sub(done.len());
        done
    }

    /// Blocks until every requested decode has arrived.
    pub fn wait_all(&mut self) -> Vec<DecodedImage> {
        let mut done = Vec::with_capacity(self.pending);
        while self.pending > 0 {
            match self.rx.recv() {
                Ok(d) => {
                    self.pending -= 1;
                    done.push(d);
                }
                Err(_) => break,
            }
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::tests::{layer_at, solid};

    fn sample_store() -> (LayerStore, LayerId, LayerId) {
        let mut store = LayerStore::new();
        let a = layer_at("a", 0.0, 0.0, 4.0, 4.0);
        let mut b = Layer::new(solid(2, 2, [0, 0, 255, 255]), generated_key(), "fused");
        b.x = 7.0;
        let (ia, ib) = (a.id, b.id);
        store.push_top(a);
        store.push_top(b);
        store.set_selection(&[ib]);
        (store, ia, ib)
    }

    #[test]
    fn session_round_trips_with_embedded_generated_images() {
        let (store, a, b) = sample_store();
        let bytes = encode_session(&build_session(&store, &Viewport::default(), &OutputArea::default())).unwrap();

        let mut library = ImageLibrary::default();
        library.insert("a", solid(4, 4, [255, 0, 0, 255]));
        let restored = restore_session(decode_session(&bytes).unwrap(), &library);
        assert!(restored.skipped.is_empty());
        assert_eq!(restored.store.ids(), vec![a, b]);
        assert_eq!(restored.store.selection(), &[b]);
        assert_eq!(restored.store.get(b).unwrap().image.get_pixel(1, 1)[2], 255);
        assert_eq!(restored.store.get(b).unwrap().x, 7.0);
    }

    #[test]
    fn unresolved_layers_are_skipped() {
        let (store, _, b) = sample_store();
        let session = build_session(&store, &Viewport::default(), &OutputArea::default());
        let restored = restore_session(session, &ImageLibrary::default());
        assert_eq!(restored.skipped, vec!["a".to_string()]);
        assert_eq!(restored.store.ids(), vec![b]);
        assert_eq!(restored.store.get(b).unwrap().z_index, 0);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode_session(&build_session(&LayerStore::new(), &Viewport::default(), &OutputArea::default())).unwrap();
        bytes[8] = b'X';
        assert!(matches!(decode_session(&bytes), Err(EngineError::InvalidFormat(_))));
        assert!(matches!(decode_session(&[1, 2]), Err(EngineError::InvalidFormat(_))));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("sessions"));
        let id = Uuid::new_v4();
        assert_eq!(store.load(id).unwrap(), None);
        store.save(id, b"hello").unwrap();
        assert_eq!(store.load(id).unwrap().as_deref(), Some(&b"hello"[..]));
        store.remove(id).unwrap();
        assert_eq!(store.load(id).unwrap(), None);
    }

    #[test]
    fn persist_background_and_sync_reach_the_store() {
        let (layers, _, _) = sample_store();
        let memory = MemoryStore::default();
        let shared: Arc<dyn PersistenceStore> = Arc::new(memory.clone());
        let session = build_session(&layers, &Viewport::default(), &OutputArea::default());

        let id = Uuid::new_v4();
        assert!(persist(Arc::clone(&shared), id, session.clone(), PersistMode::Sync).unwrap().is_none());
        assert!(memory.load(id).unwrap().is_some());

        let id2 = Uuid::new_v4();
        if let Some(handle) = persist(shared, id2, session, PersistMode::Background).unwrap() {
            handle.join().unwrap();
        }
        let raw = memory.load(id2).unwrap().unwrap();
        assert_eq!(decode_session(&raw).unwrap().layers.len(), 2);
    }

    #[test]
    fn decode_queue_reports_failures() {
        let mut png = Vec::new();
        RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageOutputFormat::Png)
            .unwrap();
        let mut queue = DecodeQueue::default();
        queue.request("ok".into(), "ok".into(), Placement::Center, png);
        queue.request("bad".into(), "bad".into(), Placement::Center, vec![0, 1, 2]);
        let mut done = queue.wait_all();
        done.sort_by(|a, b| a.image_key.cmp(&b.image_key));
        assert!(done[0].result.is_err());
        assert_eq!(done[1].result.as_ref().unwrap().dimensions(), (3, 2));
        assert_eq!(queue.pending(), 0);
    }
}
