//! 68-point facial landmarks.
//!
//! Index layout follows the iBUG 300-W annotation used by dlib's
//! `shape_predictor_68_face_landmarks.dat`:
//! jaw 0-16, eyebrows 17-26, nose 27-35, eyes 36-47, lips 48-67.

use std::ops::Range;

use crate::error::{Result, VisionError};

pub mod dlib;
pub mod predictor;

pub use predictor::{FaceRect, Point, ShapePredictor};

pub const LANDMARK_COUNT: usize = 68;

/// Integer pixel position of one landmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Landmark {
    pub x: i32,
    pub y: i32,
}

impl Landmark {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<Point> for Landmark {
    fn from(p: Point) -> Self {
        Self {
            x: p.x.round() as i32,
            y: p.y.round() as i32,
        }
    }
}

/// The 68 landmarks of one face, in fixed index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandmarkPointSet {
    points: [Landmark; LANDMARK_COUNT],
}

impl LandmarkPointSet {
    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    /// Points of a group, in drawing order.
    pub fn group(&self, group: &LandmarkGroup) -> &[Landmark] {
        &self.points[group.indices.clone()]
    }
}

impl TryFrom<Vec<Landmark>> for LandmarkPointSet {
    type Error = VisionError;

    fn try_from(points: Vec<Landmark>) -> Result<Self> {
        let len = points.len();
        let points: [Landmark; LANDMARK_COUNT] = points.try_into().map_err(|_| {
            VisionError::Model(format!("expected {LANDMARK_COUNT} landmarks, got {len}"))
        })?;
        Ok(Self { points })
    }
}

/// A named run of consecutive landmark indices drawn as one polyline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandmarkGroup {
    pub name: &'static str,
    pub indices: Range<usize>,
}

const fn group(name: &'static str, start: usize, end: usize) -> LandmarkGroup {
    LandmarkGroup {
        name,
        indices: start..end,
    }
}

pub const LANDMARK_GROUPS: [LandmarkGroup; 9] = [
    group("jaw", 0, 17),
    group("right_eyebrow", 17, 22),
    group("left_eyebrow", 22, 27),
    group("nose_bridge", 27, 31),
    group("lower_nose", 30, 36),
    group("right_eye", 36, 42),
    group("left_eye", 42, 48),
    group("outer_lip", 48, 60),
    group("inner_lip", 60, 68),
];
