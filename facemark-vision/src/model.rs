use std::path::Path;

#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

use crate::error::{Result, VisionError};
use crate::landmark::{dlib, ShapePredictor, LANDMARK_COUNT};

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder = Session::builder()
        .map_err(VisionError::inference)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(VisionError::inference)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available().map_err(VisionError::inference)? {
            ep.register(&mut builder).map_err(VisionError::inference)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available().map_err(VisionError::inference)? {
            ep.register(&mut builder).map_err(VisionError::inference)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

/// YuNet face detector from an `.onnx` file.
pub fn detector_session(path: &Path) -> Result<Session> {
    if !path.exists() {
        return Err(VisionError::Model(format!(
            "detector model not found at {}",
            path.display()
        )));
    }
    log::debug!("loading detector model {}", path.display());
    session_builder()?
        .commit_from_file(path)
        .map_err(VisionError::inference)
}

/// dlib 68-point shape predictor from a `.dat` (or `.dat.bz2`) file.
pub fn landmark_predictor(path: &Path) -> Result<ShapePredictor> {
    log::debug!("loading landmark model {}", path.display());
    let predictor = dlib::load_shape_predictor(path)?;
    if predictor.num_landmarks() != LANDMARK_COUNT {
        return Err(VisionError::Model(format!(
            "{} predicts {} landmarks, expected {LANDMARK_COUNT}",
            path.display(),
            predictor.num_landmarks()
        )));
    }
    log::debug!(
        "landmark model: {} points, {} cascade stages",
        predictor.num_landmarks(),
        predictor.num_cascade_stages()
    );
    Ok(predictor)
}
