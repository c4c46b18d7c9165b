use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid model: {0}")]
    Model(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Detector session lock poisoned")]
    Poisoned,
}

impl VisionError {
    /// Wrap an ONNX Runtime failure.
    pub fn inference(err: impl std::fmt::Display) -> Self {
        Self::Inference(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;
