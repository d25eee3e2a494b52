pub mod blend;
pub mod canvas_ops;
pub mod geometry;
pub mod zorder;
