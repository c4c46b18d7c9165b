pub mod codec;
pub mod detect;
pub mod error;
pub mod landmark;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod yunet;

// Re-export commonly used types
pub use codec::{Backdrop, DecodeError};
pub use detect::{DetectedFace, DetectorOptions, DetectorService, FaceBox, FaceDetector};
pub use error::{Result, VisionError};
pub use landmark::{Landmark, LandmarkGroup, LandmarkPointSet, LANDMARK_GROUPS};
pub use pipeline::{annotate, AnnotateError, AnnotateOptions, Annotated};
pub use render::RenderStyle;
