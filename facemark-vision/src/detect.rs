use std::path::Path;
use std::sync::Mutex;

use image::{imageops, DynamicImage, GrayImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::error::{Result, VisionError};
use crate::landmark::{FaceRect, Landmark, LandmarkPointSet, ShapePredictor};
use crate::{model, yunet};

/// Face bounding box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bounds: FaceBox,
    pub landmarks: LandmarkPointSet,
}

/// Anything that can find faces and their 68 landmarks in an image.
pub trait FaceDetector: Send + Sync {
    /// Empty when the image holds no face.
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>>;
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorOptions {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// YuNet face detection followed by dlib 68-point landmark regression.
///
/// Built once at startup and shared. The predictor is read-only; the ONNX
/// session needs exclusive access per run, so it sits behind a mutex.
pub struct DetectorService {
    session: Mutex<Session>,
    predictor: ShapePredictor,
    options: DetectorOptions,
}

impl DetectorService {
    pub fn new(
        detector_model: &Path,
        landmark_model: &Path,
        options: DetectorOptions,
    ) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(model::detector_session(detector_model)?),
            predictor: model::landmark_predictor(landmark_model)?,
            options,
        })
    }

    /// Face boxes in `gray`, best score first.
    pub fn find_faces(&self, gray: &GrayImage) -> Result<Vec<FaceBox>> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Ok(vec![]);
        }

        let (input, letterbox) = letterbox(gray, yunet::INPUT_SIZE as u32);
        let input = Value::from_array(input).map_err(VisionError::inference)?;

        let output_data: Vec<(Vec<i64>, Vec<f32>)> = {
            let mut session = self.session.lock().map_err(|_| VisionError::Poisoned)?;
            let outputs = session
                .run(ort::inputs![input])
                .map_err(VisionError::inference)?;

            let mut data = Vec::new();
            for (_name, output) in outputs.iter() {
                let (shape, values) = output
                    .try_extract_tensor::<f32>()
                    .map_err(VisionError::inference)?;
                data.push((shape.iter().copied().collect(), values.to_vec()));
            }
            data
        };

        let output_refs: Vec<yunet::TensorRef<'_>> = output_data
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        let raw = yunet::decode(
            &output_refs,
            yunet::INPUT_SIZE,
            self.options.score_threshold,
        )?;

        let boxes: Vec<FaceBox> = raw
            .into_iter()
            .map(|d| letterbox.restore(&d))
            .collect();

        Ok(nms(&boxes, self.options.nms_threshold))
    }
}

impl FaceDetector for DetectorService {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let gray = image.to_luma8();
        let boxes = self.find_faces(&gray)?;
        log::debug!("detector found {} face(s)", boxes.len());

        boxes
            .into_iter()
            .map(|bounds| {
                let rect = FaceRect::from_xywh(bounds.x, bounds.y, bounds.width, bounds.height);
                let points: Vec<Landmark> = self
                    .predictor
                    .predict(&gray, &rect)
                    .into_iter()
                    .map(Landmark::from)
                    .collect();
                Ok(DetectedFace {
                    bounds,
                    landmarks: LandmarkPointSet::try_from(points)?,
                })
            })
            .collect()
    }
}

/// Placement of the source image inside the square network input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Letterbox {
    fn restore(&self, d: &yunet::RawDetection) -> FaceBox {
        FaceBox {
            x: (d.bbox[0] - self.offset_x) / self.scale,
            y: (d.bbox[1] - self.offset_y) / self.scale,
            width: d.bbox[2] / self.scale,
            height: d.bbox[3] / self.scale,
            score: d.score,
        }
    }
}

/// Scale `gray` to fit a `size`x`size` canvas, centered, and lay it out as
/// a `[1, 3, size, size]` tensor with the luma repeated on every channel.
fn letterbox(gray: &GrayImage, size: u32) -> (Array4<f32>, Letterbox) {
    let (width, height) = gray.dimensions();
    let scale = size as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * scale) as u32).clamp(1, size);
    let new_height = ((height as f32 * scale) as u32).clamp(1, size);

    let resized = imageops::resize(gray, new_width, new_height, imageops::FilterType::Triangle);
    let offset_x = (size - new_width) / 2;
    let offset_y = (size - new_height) / 2;

    let mut canvas = GrayImage::new(size, size);
    imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    let side = size as usize;
    let tensor = Array4::from_shape_fn((1, 3, side, side), |(_, _, y, x)| {
        canvas.get_pixel(x as u32, y as u32).0[0] as f32
    });

    (
        tensor,
        Letterbox {
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        },
    )
}

/// Keep the best-scoring box of every overlapping cluster.
pub fn nms(boxes: &[FaceBox], iou_threshold: f32) -> Vec<FaceBox> {
    let mut sorted = boxes.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in sorted {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a.width * a.height + b.width * b.height - inter)
}
