use std::time::Instant;

use thiserror::Error;

use crate::codec::{self, Backdrop, DecodeError, DEFAULT_JPEG_QUALITY};
use crate::detect::FaceDetector;
use crate::error::VisionError;
use crate::landmark::LANDMARK_GROUPS;
use crate::render::{self, RenderStyle};

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("no faces found")]
    NoFaces,

    #[error("face detection failed: {0}")]
    Detection(VisionError),

    #[error("could not encode annotated image: {0}")]
    Encode(VisionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotateOptions {
    pub style: RenderStyle,
    pub backdrop: Backdrop,
    pub jpeg_quality: u8,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self {
            style: RenderStyle::default(),
            backdrop: Backdrop::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Annotated {
    pub jpeg: Vec<u8>,
    pub faces: usize,
    pub width: u32,
    pub height: u32,
}

/// Full pipeline: decode → detect → render → encode
pub fn annotate(
    detector: &dyn FaceDetector,
    bytes: &[u8],
    options: &AnnotateOptions,
) -> Result<Annotated, AnnotateError> {
    let start = Instant::now();
    let image = codec::decode(bytes)?;
    let (width, height) = (image.width(), image.height());
    log::debug!("decoded {width}x{height} image in {:?}", start.elapsed());

    let start = Instant::now();
    let faces = detector.detect(&image).map_err(AnnotateError::Detection)?;
    log::debug!("detected {} face(s) in {:?}", faces.len(), start.elapsed());
    if faces.is_empty() {
        return Err(AnnotateError::NoFaces);
    }

    let start = Instant::now();
    let canvas = codec::backdrop(&image, options.backdrop);
    let annotated = render::render(&canvas, &faces, &LANDMARK_GROUPS, &options.style);
    let jpeg =
        codec::encode_jpeg(&annotated, options.jpeg_quality).map_err(AnnotateError::Encode)?;
    log::debug!("rendered and encoded in {:?}", start.elapsed());

    Ok(Annotated {
        jpeg,
        faces: faces.len(),
        width,
        height,
    })
}
