#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod editor;
pub mod error;
pub mod host;
pub mod interaction;
pub mod io;
pub mod logger;
pub mod mask;
pub mod ops;
pub mod panel;
pub mod project;
pub mod scheduler;
pub mod settings;
pub mod viewport;

pub use canvas::{CropMode, CropRect, Layer, LayerId, LayerStore, OutputArea};
pub use editor::Editor;
pub use error::{EngineError, Result};
pub use host::HostNotifier;
pub use interaction::{EditorKey, Modifiers, PointerButton, Tool};
pub use mask::{MaskProvider, MaskRaster};
pub use ops::blend::BlendMode;
pub use ops::canvas_ops::Placement;
pub use settings::EngineSettings;
pub use viewport::Viewport;
