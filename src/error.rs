use thiserror::Error;
use uuid::Uuid;

use crate::canvas::LayerId;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A drawing surface could not be allocated. Aborts the current operation.
    #[error("cannot allocate a {width}x{height} drawing surface (limit {limit})")]
    SurfaceAllocation { width: u32, height: u32, limit: u32 },

    /// A computed export, crop or bounding box has no area. Nothing was mutated.
    #[error("degenerate geometry in {context}: {width}x{height}")]
    DegenerateGeometry {
        context: &'static str,
        width: f32,
        height: f32,
    },

    #[error("layer {0} not found")]
    LayerNotFound(LayerId),

    #[error("no session registered for {0}")]
    UnknownSession(Uuid),

    #[error("processed image creation failed: {0}")]
    CacheCreation(String),

    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("invalid session data: {0}")]
    InvalidFormat(String),
}

impl EngineError {
    pub(crate) fn degenerate(context: &'static str, width: f32, height: f32) -> Self {
        Self::DegenerateGeometry {
            context,
            width,
            height,
        }
    }

    /// True for errors the caller should surface as a warning rather than a failure.
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::DegenerateGeometry { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_allocation_message_names_size_and_limit() {
        let err = EngineError::SurfaceAllocation {
            width: 20000,
            height: 10,
            limit: 16384,
        };
        assert_eq!(
            err.to_string(),
            "cannot allocate a 20000x10 drawing surface (limit 16384)"
        );
    }

    #[test]
    fn degenerate_geometry_is_flagged_as_warning() {
        let err = EngineError::degenerate("export", 0.0, 12.0);
        assert!(err.is_degenerate());
        assert!(err.to_string().contains("export"));
        assert!(!EngineError::InvalidFormat("x".into()).is_degenerate());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
