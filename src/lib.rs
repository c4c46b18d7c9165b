pub mod config;
pub mod error;
pub mod provider;
pub mod server;

// Re-export vision types for convenience
pub use facemark_vision::{
    annotate, AnnotateError, AnnotateOptions, Annotated, DetectedFace, DetectorService,
    FaceDetector, RenderStyle,
};
