//! Ensemble-of-regression-trees shape predictor (Kazemi & Sullivan, 2014),
//! evaluated the way dlib's `shape_predictor` does it.
//!
//! Shapes live in a normalized frame where the face rectangle spans
//! `[0, 1] x [0, 1]`. Each cascade stage samples a fixed set of reference
//! pixels, each positioned relative to an anchor landmark of the current
//! shape, then lets every tree of the stage add its leaf delta.

use image::GrayImage;

use crate::error::{Result, VisionError};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl std::ops::Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::AddAssign for Point {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Face rectangle with inclusive corners, as dlib's `rectangle`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl FaceRect {
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            left: x,
            top: y,
            right: x + (width - 1.0).max(0.0),
            bottom: y + (height - 1.0).max(0.0),
        }
    }

    /// Map a normalized shape point into image coordinates.
    pub fn unnormalize(&self, p: Point) -> Point {
        Point::new(
            self.left + p.x * (self.right - self.left),
            self.top + p.y * (self.bottom - self.top),
        )
    }
}

/// Rotation plus uniform scale, `[[a, -b], [b, a]]`. Translation is dropped:
/// only the linear part is used to warp reference pixel offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
}

impl SimilarityTransform {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0 };

    /// Least-squares similarity mapping `from` onto `to`.
    pub fn between(from: &[Point], to: &[Point]) -> Self {
        if from.is_empty() || from.len() != to.len() {
            return Self::IDENTITY;
        }

        let n = from.len() as f32;
        let mean = |pts: &[Point]| {
            let sum = pts.iter().fold(Point::default(), |acc, p| acc + *p);
            Point::new(sum.x / n, sum.y / n)
        };
        let mf = mean(from);
        let mt = mean(to);

        let (mut num_a, mut num_b, mut den) = (0.0f32, 0.0f32, 0.0f32);
        for (f, t) in from.iter().zip(to) {
            let f = *f - mf;
            let t = *t - mt;
            num_a += f.x * t.x + f.y * t.y;
            num_b += f.x * t.y - f.y * t.x;
            den += f.x * f.x + f.y * f.y;
        }

        if den <= f32::EPSILON {
            return Self::IDENTITY;
        }

        Self {
            a: num_a / den,
            b: num_b / den,
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(self.a * p.x - self.b * p.y, self.b * p.x + self.a * p.y)
    }
}

/// Split on the difference of two sampled reference pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Split {
    pub idx1: usize,
    pub idx2: usize,
    pub thresh: f32,
}

/// Complete binary tree stored breadth-first: split `i` has children
/// `2i + 1` and `2i + 2`; indices past the splits address leaves.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    pub splits: Vec<Split>,
    pub leaf_values: Vec<Vec<Point>>,
}

impl RegressionTree {
    pub fn leaf(&self, pixels: &[f32]) -> &[Point] {
        let mut i = 0;
        while i < self.splits.len() {
            let split = &self.splits[i];
            i = if pixels[split.idx1] - pixels[split.idx2] > split.thresh {
                2 * i + 1
            } else {
                2 * i + 2
            };
        }
        &self.leaf_values[i - self.splits.len()]
    }
}

/// One cascade level: its forest and the reference pixels it reads.
#[derive(Debug, Clone)]
pub struct CascadeStage {
    pub trees: Vec<RegressionTree>,
    pub anchor_idx: Vec<usize>,
    pub deltas: Vec<Point>,
}

#[derive(Debug, Clone)]
pub struct ShapePredictor {
    initial_shape: Vec<Point>,
    stages: Vec<CascadeStage>,
}

impl ShapePredictor {
    pub fn new(initial_shape: Vec<Point>, stages: Vec<CascadeStage>) -> Result<Self> {
        let n = initial_shape.len();
        if n == 0 {
            return Err(VisionError::Model("empty initial shape".into()));
        }

        for (s, stage) in stages.iter().enumerate() {
            if stage.anchor_idx.len() != stage.deltas.len() {
                return Err(VisionError::Model(format!(
                    "stage {s}: {} anchors but {} deltas",
                    stage.anchor_idx.len(),
                    stage.deltas.len()
                )));
            }
            if let Some(a) = stage.anchor_idx.iter().find(|a| **a >= n) {
                return Err(VisionError::Model(format!(
                    "stage {s}: anchor {a} out of range for {n} landmarks"
                )));
            }
            let pixels = stage.deltas.len();
            for tree in &stage.trees {
                if tree.leaf_values.len() != tree.splits.len() + 1 {
                    return Err(VisionError::Model(format!(
                        "stage {s}: {} splits need {} leaves, got {}",
                        tree.splits.len(),
                        tree.splits.len() + 1,
                        tree.leaf_values.len()
                    )));
                }
                if tree
                    .splits
                    .iter()
                    .any(|sp| sp.idx1 >= pixels || sp.idx2 >= pixels)
                {
                    return Err(VisionError::Model(format!(
                        "stage {s}: split reads past {pixels} reference pixels"
                    )));
                }
                if tree.leaf_values.iter().any(|leaf| leaf.len() != n) {
                    return Err(VisionError::Model(format!(
                        "stage {s}: leaf size differs from {n} landmarks"
                    )));
                }
            }
        }

        Ok(Self {
            initial_shape,
            stages,
        })
    }

    pub fn num_landmarks(&self) -> usize {
        self.initial_shape.len()
    }

    pub fn num_cascade_stages(&self) -> usize {
        self.stages.len()
    }

    /// Landmark positions, in image coordinates, for the face in `rect`.
    pub fn predict(&self, image: &GrayImage, rect: &FaceRect) -> Vec<Point> {
        let mut shape = self.initial_shape.clone();
        let mut pixels = Vec::new();

        for stage in &self.stages {
            let tform = SimilarityTransform::between(&self.initial_shape, &shape);

            pixels.clear();
            pixels.extend(
                stage
                    .anchor_idx
                    .iter()
                    .zip(&stage.deltas)
                    .map(|(&anchor, &delta)| {
                        let p = rect.unnormalize(tform.apply(delta) + shape[anchor]);
                        intensity(image, p)
                    }),
            );

            for tree in &stage.trees {
                for (point, delta) in shape.iter_mut().zip(tree.leaf(&pixels)) {
                    *point += *delta;
                }
            }
        }

        shape.into_iter().map(|p| rect.unnormalize(p)).collect()
    }
}

/// Nearest-pixel intensity; zero outside the image.
fn intensity(image: &GrayImage, p: Point) -> f32 {
    let x = (p.x + 0.5).floor();
    let y = (p.y + 0.5).floor();
    if x < 0.0 || y < 0.0 {
        return 0.0;
    }
    image
        .get_pixel_checked(x as u32, y as u32)
        .map_or(0.0, |px| px.0[0] as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ]
    }

    fn leaf_tree(n: usize, delta: Point) -> RegressionTree {
        RegressionTree {
            splits: vec![],
            leaf_values: vec![vec![delta; n]],
        }
    }

    #[test]
    fn similarity_identity_for_same_shape() {
        let t = SimilarityTransform::between(&square(), &square());
        assert!((t.a - 1.0).abs() < 1e-6);
        assert!(t.b.abs() < 1e-6);
    }

    #[test]
    fn similarity_recovers_rotation_and_scale() {
        // 90 degree rotation, doubled, then shifted
        let to: Vec<Point> = square()
            .into_iter()
            .map(|p| Point::new(-2.0 * p.y + 5.0, 2.0 * p.x - 3.0))
            .collect();
        let t = SimilarityTransform::between(&square(), &to);
        assert!(t.a.abs() < 1e-5);
        assert!((t.b - 2.0).abs() < 1e-5);

        let v = t.apply(Point::new(1.0, 0.0));
        assert!(v.x.abs() < 1e-5 && (v.y - 2.0).abs() < 1e-5);
    }

    #[test]
    fn similarity_of_degenerate_shape_is_identity() {
        let dot = vec![Point::new(3.0, 3.0); 4];
        assert_eq!(
            SimilarityTransform::between(&dot, &square()),
            SimilarityTransform::IDENTITY
        );
    }

    #[test]
    fn tree_goes_left_when_difference_exceeds_threshold() {
        let tree = RegressionTree {
            splits: vec![Split {
                idx1: 0,
                idx2: 1,
                thresh: 10.0,
            }],
            leaf_values: vec![vec![Point::new(-1.0, 0.0)], vec![Point::new(1.0, 0.0)]],
        };
        assert_eq!(tree.leaf(&[100.0, 0.0])[0].x, -1.0);
        assert_eq!(tree.leaf(&[5.0, 0.0])[0].x, 1.0);
        assert_eq!(tree.leaf(&[10.0, 0.0])[0].x, 1.0);
    }

    #[test]
    fn unnormalize_spans_inclusive_rect() {
        let rect = FaceRect::from_xywh(10.0, 20.0, 101.0, 51.0);
        let br = rect.unnormalize(Point::new(1.0, 1.0));
        assert_eq!(br, Point::new(110.0, 70.0));
        assert_eq!(rect.unnormalize(Point::default()), Point::new(10.0, 20.0));
    }

    #[test]
    fn predict_without_trees_maps_mean_shape_into_rect() {
        let stage = CascadeStage {
            trees: vec![leaf_tree(4, Point::default())],
            anchor_idx: vec![0],
            deltas: vec![Point::default()],
        };
        let model = ShapePredictor::new(square(), vec![stage]).unwrap();
        let image = GrayImage::from_pixel(64, 64, image::Luma([128]));
        let rect = FaceRect::from_xywh(10.0, 10.0, 41.0, 41.0);

        let shape = model.predict(&image, &rect);
        assert_eq!(shape.len(), 4);
        assert_eq!(shape[0], Point::new(10.0, 10.0));
        assert_eq!(shape[2], Point::new(50.0, 50.0));
    }

    #[test]
    fn predict_accumulates_leaf_deltas_per_stage() {
        let stage = || CascadeStage {
            trees: vec![
                leaf_tree(4, Point::new(0.05, 0.0)),
                leaf_tree(4, Point::new(0.05, 0.0)),
            ],
            anchor_idx: vec![],
            deltas: vec![],
        };
        let model = ShapePredictor::new(square(), vec![stage(), stage()]).unwrap();
        let image = GrayImage::new(32, 32);
        let rect = FaceRect::from_xywh(0.0, 0.0, 11.0, 11.0);

        let shape = model.predict(&image, &rect);
        // four deltas of 0.05 over a 10px span
        assert!((shape[0].x - 2.0).abs() < 1e-4);
    }

    #[test]
    fn new_rejects_inconsistent_trees() {
        let bad_leaves = CascadeStage {
            trees: vec![RegressionTree {
                splits: vec![Split {
                    idx1: 0,
                    idx2: 0,
                    thresh: 0.0,
                }],
                leaf_values: vec![vec![Point::default(); 4]],
            }],
            anchor_idx: vec![0],
            deltas: vec![Point::default()],
        };
        assert!(ShapePredictor::new(square(), vec![bad_leaves]).is_err());

        let bad_anchor = CascadeStage {
            trees: vec![],
            anchor_idx: vec![9],
            deltas: vec![Point::default()],
        };
        assert!(ShapePredictor::new(square(), vec![bad_anchor]).is_err());
    }

    #[test]
    fn intensity_is_zero_off_image() {
        let image = GrayImage::from_pixel(4, 4, image::Luma([200]));
        assert_eq!(intensity(&image, Point::new(1.2, 2.6)), 200.0);
        assert_eq!(intensity(&image, Point::new(-0.7, 1.0)), 0.0);
        assert_eq!(intensity(&image, Point::new(3.6, 1.0)), 0.0);
    }
}
