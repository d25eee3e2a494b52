use std::sync::{Arc, Mutex};

use crate::canvas::LayerId;

/// Callbacks into the chrome that embeds the editor. All default to no-ops.
pub trait HostNotifier: Send {
    fn selection_changed(&mut self, _selection: &[LayerId]) {}

    fn history_changed(&mut self, _can_undo: bool, _can_redo: bool) {}

    /// Something changed that the host should repaint.
    fn render_requested(&mut self) {}

    /// A layer could not be created from the given image key.
    fn layer_creation_failed(&mut self, _image_key: &str, _reason: &str) {}
}

/// Host that ignores every notification.
#[derive(Debug, Default)]
pub struct NullHost;

impl HostNotifier for NullHost {}

/// Host that records notifications, for tests and headless tooling.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecordingHost {
    pub selections: Vec<Vec<LayerId>>,
    pub history: Vec<(bool, bool)>,
    pub renders: usize,
    pub failures: Vec<String>,
}

impl HostNotifier for RecordingHost {
    fn selection_changed(&mut self, selection: &[LayerId]) {
        self.selections.push(selection.to_vec());
    }

    fn history_changed(&mut self, can_undo: bool, can_redo: bool) {
        self.history.push((can_undo, can_redo));
    }

    fn render_requested(&mut self) {
        self.renders += 1;
    }

    fn layer_creation_failed(&mut self, image_key: &str, _reason: &str) {
        self.failures.push(image_key.to_string());
    }
}

/// Shares one host between the editor and whoever inspects it.
impl<H: HostNotifier> HostNotifier for Arc<Mutex<H>> {
    fn selection_changed(&mut self, selection: &[LayerId]) {
        if let Ok(mut host) = self.lock() {
            host.selection_changed(selection);
        }
    }

    fn history_changed(&mut self, can_undo: bool, can_redo: bool) {
        if let Ok(mut host) = self.lock() {
            host.history_changed(can_undo, can_redo);
        }
    }

    fn render_requested(&mut self) {
        if let Ok(mut host) = self.lock() {
            host.render_requested();
        }
    }

    fn layer_creation_failed(&mut self, image_key: &str, reason: &str) {
        if let Ok(mut host) = self.lock() {
            host.layer_creation_failed(image_key, reason);
        }
    }
}
