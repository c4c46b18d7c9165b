//! YuNet output decoding.
//!
//! The 2023mar network emits twelve tensors, grouped by kind and then by
//! stride: `cls_{8,16,32}`, `obj_{8,16,32}`, `bbox_{8,16,32}`,
//! `kps_{8,16,32}`. Each has shape `[1, H*W, C]` over the stride's grid.
//!
//! Decoding is anchor-free, per grid cell `(row, col)`:
//! - score = sqrt(clamp(cls) * clamp(obj))
//! - cx = (col + dx) * stride, cy = (row + dy) * stride
//! - w = exp(dw) * stride, h = exp(dh) * stride
//! - landmark k = ((col + kx) * stride, (row + ky) * stride)
//!
//! All coordinates are in pixels of the square network input.

use crate::error::{Result, VisionError};

pub const INPUT_SIZE: usize = 640;

const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,...,x5,y5
}

/// One output tensor, borrowed from the session outputs.
pub type TensorRef<'a> = (&'a [i64], &'a [f32]);

fn channel<'a>(
    outputs: &[TensorRef<'a>],
    slot: usize,
    cells: usize,
    width: usize,
) -> Result<&'a [f32]> {
    let &(shape, data) = outputs
        .get(slot)
        .ok_or_else(|| VisionError::Model(format!("missing YuNet output {slot}")))?;

    let expected = [1, cells as i64, width as i64];
    if shape != expected || data.len() != cells * width {
        return Err(VisionError::Model(format!(
            "YuNet output {slot} has shape {shape:?}, expected {expected:?}"
        )));
    }
    Ok(data)
}

/// Decode all detections scoring at least `score_threshold`.
pub fn decode(
    outputs: &[TensorRef<'_>],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<RawDetection>> {
    if outputs.len() != 4 * STRIDES.len() {
        return Err(VisionError::Model(format!(
            "YuNet produced {} outputs, expected {}",
            outputs.len(),
            4 * STRIDES.len()
        )));
    }

    let mut detections = Vec::new();

    for (s, &stride) in STRIDES.iter().enumerate() {
        let cols = input_size / stride;
        let cells = cols * cols;

        let cls = channel(outputs, s, cells, 1)?;
        let obj = channel(outputs, s + 3, cells, 1)?;
        let bbox = channel(outputs, s + 6, cells, 4)?;
        let kps = channel(outputs, s + 9, cells, 10)?;

        let stride = stride as f32;
        for idx in 0..cells {
            let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
            if score < score_threshold {
                continue;
            }

            let row = (idx / cols) as f32;
            let col = (idx % cols) as f32;
            let b = &bbox[idx * 4..idx * 4 + 4];

            let cx = (col + b[0]) * stride;
            let cy = (row + b[1]) * stride;
            let w = b[2].exp() * stride;
            let h = b[3].exp() * stride;

            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = (col + kps[idx * 10 + k * 2]) * stride;
                landmarks[k * 2 + 1] = (row + kps[idx * 10 + k * 2 + 1]) * stride;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    Ok(detections)
}
