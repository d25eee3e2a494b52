use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// ENGINE SETTINGS
// ============================================================================

/// Where processed-image creation runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheExecution {
    /// rayon worker; results are picked up by `Editor::poll`.
    Background,
    /// On the calling thread during `poll`. Deterministic, used by tests and the CLI.
    Inline,
}

/// How session snapshots reach the persistence store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistMode {
    Background,
    Sync,
}

/// Tunables for the engine. Loaded from a `key=value` file; anything missing or
/// unparsable keeps its default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub max_undo_steps: usize,
    /// Quiet period before a processed image is created after a cache miss.
    pub cache_debounce: Duration,
    /// Delay before creation after a wheel-scale gesture ends.
    pub wheel_debounce: Duration,
    /// Time without a wheel tick after which wheel scaling is considered over.
    pub wheel_idle: Duration,
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Handle grab radius in screen pixels.
    pub handle_radius_px: f32,
    /// Distance of the rotation handle above the top edge, in screen pixels.
    pub rotate_handle_offset_px: f32,
    pub min_frame_extent: f32,
    pub min_crop_extent: f32,
    pub rotation_snap_deg: f32,
    pub grid_size: f32,
    /// Largest edge a drawing surface may have.
    pub max_surface_edge: u32,
    pub feather_cache_capacity: usize,
    pub cache_execution: CacheExecution,
    pub persist_mode: PersistMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: 50,
            cache_debounce: Duration::from_millis(300),
            wheel_debounce: Duration::from_millis(150),
            wheel_idle: Duration::from_millis(200),
            min_zoom: 0.1,
            max_zoom: 10.0,
            handle_radius_px: 8.0,
            rotate_handle_offset_px: 24.0,
            min_frame_extent: 10.0,
            min_crop_extent: 1.0,
            rotation_snap_deg: 15.0,
            grid_size: 10.0,
            max_surface_edge: 16384,
            feather_cache_capacity: 32,
            cache_execution: CacheExecution::Background,
            persist_mode: PersistMode::Background,
        }
    }
}

impl EngineSettings {
    /// Settings with every deferred job run inline. Handy for headless use.
    pub fn inline() -> Self {
        Self {
            cache_execution: CacheExecution::Inline,
            persist_mode: PersistMode::Sync,
            ..Self::default()
        }
    }

    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").ok()?;
            return Some(PathBuf::from(appdata).join("LayerFE").join("layerfe_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("LayerFE")
                    .join("layerfe_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("layerfe").join("layerfe_settings.cfg"))
        }
    }

    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "max_undo_steps" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_undo_steps = v.clamp(2, 1000);
                    }
                }
                "cache_debounce_ms" => set_millis(&mut s.cache_debounce, val),
                "wheel_debounce_ms" => set_millis(&mut s.wheel_debounce, val),
                "wheel_idle_ms" => set_millis(&mut s.wheel_idle, val),
                "min_zoom" => set_positive(&mut s.min_zoom, val),
                "max_zoom" => set_positive(&mut s.max_zoom, val),
                "handle_radius_px" => set_positive(&mut s.handle_radius_px, val),
                "rotate_handle_offset_px" => set_positive(&mut s.rotate_handle_offset_px, val),
                "min_frame_extent" => set_positive(&mut s.min_frame_extent, val),
                "min_crop_extent" => set_positive(&mut s.min_crop_extent, val),
                "rotation_snap_deg" => set_positive(&mut s.rotation_snap_deg, val),
                "grid_size" => set_positive(&mut s.grid_size, val),
                "max_surface_edge" => {
                    if let Ok(v) = val.parse::<u32>()
                        && v > 0
                    {
                        s.max_surface_edge = v;
                    }
                }
                "feather_cache_capacity" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.feather_cache_capacity = v.max(1);
                    }
                }
                "cache_execution" => {
                    s.cache_execution = match val {
                        "inline" => CacheExecution::Inline,
                        _ => CacheExecution::Background,
                    };
                }
                "persist_mode" => {
                    s.persist_mode = match val {
                        "sync" => PersistMode::Sync,
                        _ => PersistMode::Background,
                    };
                }
                _ => {}
            }
        }
        if s.min_zoom > s.max_zoom {
            std::mem::swap(&mut s.min_zoom, &mut s.max_zoom);
        }
        s
    }

    pub fn to_cfg_string(&self) -> String {
        let exec = match self.cache_execution {
            CacheExecution::Background => "background",
            CacheExecution::Inline => "inline",
        };
        let persist = match self.persist_mode {
            PersistMode::Background => "background",
            PersistMode::Sync => "sync",
        };
        format!(
            "max_undo_steps={}\n\
             cache_debounce_ms={}\n\
             wheel_debounce_ms={}\n\
             wheel_idle_ms={}\n\
             min_zoom={}\n\
             max_zoom={}\n\
             handle_radius_px={}\n\
             rotate_handle_offset_px={}\n\
             min_frame_extent={}\n\
             min_crop_extent={}\n\
             rotation_snap_deg={}\n\
             grid_size={}\n\
             max_surface_edge={}\n\
             feather_cache_capacity={}\n\
             cache_execution={exec}\n\
             persist_mode={persist}\n",
            self.max_undo_steps,
            self.cache_debounce.as_millis(),
            self.wheel_debounce.as_millis(),
            self.wheel_idle.as_millis(),
            self.min_zoom,
            self.max_zoom,
            self.handle_radius_px,
            self.rotate_handle_offset_px,
            self.min_frame_extent,
            self.min_crop_extent,
            self.rotation_snap_deg,
            self.grid_size,
            self.max_surface_edge,
            self.feather_cache_capacity,
        )
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_cfg_string())
    }

    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to save settings");
        }
    }
}

fn set_millis(slot: &mut Duration, val: &str) {
    if let Ok(ms) = val.parse::<u64>() {
        *slot = Duration::from_millis(ms);
    }
}

fn set_positive(slot: &mut f32, val: &str) {
    if let Ok(v) = val.parse::<f32>()
        && v.is_finite()
        && v > 0.0
    {
        *slot = v;
    }
}
