//! Session logger: every `tracing` event goes to one file in the OS data directory.
//!
//! The file is truncated at each launch, so it only holds the most recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\LayerFE\layerfe.log`
//!   Linux:    `~/.local/share/LayerFE/layerfe.log`
//!   macOS:    `~/Library/Application Support/LayerFE/layerfe.log`

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::Level;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Initialise the session logger in the default location.
pub fn init(verbose: bool) -> Option<PathBuf> {
    let path = data_dir()?.join("layerfe.log");
    init_at(&path, verbose).then_some(path)
}

/// Truncates `path`, writes a session header, installs the file subscriber and
/// a panic hook that mirrors panics into the log. Returns false if the file
/// could not be opened; logging is then skipped, never fatal.
pub fn init_at(path: &Path, verbose: bool) -> bool {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(path);
    let mut file = match file {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            return false;
        }
    };

    let _ = writeln!(file, "=== LayerFE session started {} ===", unix_timestamp());
    let _ = writeln!(file, "Log file: {}", path.display());
    let _ = writeln!(file);
    let _ = LOG_PATH.set(path.to_path_buf());

    let panic_file: Option<File> = file.try_clone().ok();
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let installed = tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_max_level(level)
        .try_init()
        .is_ok();
    if !installed {
        // Another subscriber already owns the process (tests, embedding host).
        return true;
    }

    if let Some(panic_file) = panic_file {
        let panic_file = Mutex::new(panic_file);
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Ok(mut f) = panic_file.lock() {
                let _ = writeln!(f, "[PANIC] {}", info);
            }
            prev(info);
        }));
    }
    true
}

/// `<platform data dir>/LayerFE`.
pub fn data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Some(PathBuf::from(appdata).join("LayerFE"));
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("LayerFE"),
            );
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return Some(PathBuf::from(xdg).join("LayerFE"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local").join("share").join("LayerFE"))
}

fn unix_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_truncates_and_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("layerfe.log");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "stale content from a previous run\n").unwrap();

        assert!(init_at(&path, false));
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("=== LayerFE session started"));
        assert!(!content.contains("stale content"));
    }

    #[test]
    fn unopenable_path_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as the log file.
        assert!(!init_at(dir.path(), false));
    }
}
