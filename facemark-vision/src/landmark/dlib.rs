//! Reader for dlib's serialized `shape_predictor` (`.dat`, optionally `.bz2`).
//!
//! Layout, in order: version (1), initial shape column vector, forests
//! (`vector<vector<regression_tree>>`), anchor indices
//! (`vector<vector<unsigned long>>`), reference pixel deltas
//! (`vector<vector<vector<float,2>>>`).
//!
//! Integers are a control byte (bit 7 = sign, low nibble = byte count)
//! followed by little-endian magnitude bytes. Floats are an integer
//! mantissa and an integer exponent. Matrices start with their dimensions
//! negated.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;

use super::predictor::{CascadeStage, Point, RegressionTree, ShapePredictor, Split};
use crate::error::{Result, VisionError};

struct DlibReader<R: Read> {
    reader: R,
}

impl<R: Read> DlibReader<R> {
    fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_int(&mut self) -> Result<i64> {
        let control = self.read_byte()?;
        let negative = control & 0x80 != 0;
        let len = (control & 0x0F) as usize;
        if len > 8 {
            return Err(VisionError::Model(format!("integer of {len} bytes")));
        }

        let mut magnitude: u64 = 0;
        for i in 0..len {
            magnitude |= (self.read_byte()? as u64) << (8 * i);
        }

        let value = magnitude as i64;
        Ok(if negative { -value } else { value })
    }

    fn read_len(&mut self) -> Result<usize> {
        let value = self.read_int()?;
        usize::try_from(value)
            .map_err(|_| VisionError::Model(format!("expected a size, got {value}")))
    }

    fn read_float(&mut self) -> Result<f32> {
        let mantissa = self.read_int()?;
        let exponent = self.read_int()?;
        if mantissa == 0 {
            return Ok(0.0);
        }
        Ok((mantissa as f64 * 2f64.powi(exponent as i32)) as f32)
    }

    fn read_point(&mut self) -> Result<Point> {
        let x = self.read_float()?;
        let y = self.read_float()?;
        Ok(Point::new(x, y))
    }

    /// Column vector of interleaved x/y values.
    fn read_shape(&mut self) -> Result<Vec<Point>> {
        let rows = self.read_int()?.unsigned_abs() as usize;
        let cols = self.read_int()?.unsigned_abs() as usize;
        if cols != 1 || rows % 2 != 0 {
            return Err(VisionError::Model(format!(
                "shape matrix is {rows}x{cols}, expected an even column vector"
            )));
        }
        (0..rows / 2).map(|_| self.read_point()).collect()
    }

    fn read_tree(&mut self) -> Result<RegressionTree> {
        let num_splits = self.read_len()?;
        let mut splits = Vec::with_capacity(num_splits);
        for _ in 0..num_splits {
            splits.push(Split {
                idx1: self.read_len()?,
                idx2: self.read_len()?,
                thresh: self.read_float()?,
            });
        }

        let num_leaves = self.read_len()?;
        let mut leaf_values = Vec::with_capacity(num_leaves);
        for _ in 0..num_leaves {
            leaf_values.push(self.read_shape()?);
        }

        Ok(RegressionTree {
            splits,
            leaf_values,
        })
    }
}

/// Load a predictor from disk; `.bz2` files are decompressed on the fly.
pub fn load_shape_predictor<P: AsRef<Path>>(path: P) -> Result<ShapePredictor> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    if path.extension().is_some_and(|ext| ext == "bz2") {
        read_shape_predictor(BzDecoder::new(reader))
    } else {
        read_shape_predictor(reader)
    }
}

pub fn read_shape_predictor<R: Read>(reader: R) -> Result<ShapePredictor> {
    let mut r = DlibReader::new(reader);

    let version = r.read_int()?;
    if version != 1 {
        return Err(VisionError::Model(format!(
            "unsupported shape_predictor version {version}"
        )));
    }

    let initial_shape = r.read_shape()?;

    let num_forests = r.read_len()?;
    let mut forests = Vec::with_capacity(num_forests);
    for _ in 0..num_forests {
        let num_trees = r.read_len()?;
        let trees = (0..num_trees)
            .map(|_| r.read_tree())
            .collect::<Result<Vec<_>>>()?;
        forests.push(trees);
    }

    let num_anchor_sets = r.read_len()?;
    let mut anchors = Vec::with_capacity(num_anchor_sets);
    for _ in 0..num_anchor_sets {
        let len = r.read_len()?;
        anchors.push((0..len).map(|_| r.read_len()).collect::<Result<Vec<_>>>()?);
    }

    let num_delta_sets = r.read_len()?;
    let mut deltas = Vec::with_capacity(num_delta_sets);
    for _ in 0..num_delta_sets {
        let len = r.read_len()?;
        deltas.push((0..len).map(|_| r.read_point()).collect::<Result<Vec<_>>>()?);
    }

    if anchors.len() != forests.len() || deltas.len() != forests.len() {
        return Err(VisionError::Model(format!(
            "{} forests, {} anchor sets, {} delta sets",
            forests.len(),
            anchors.len(),
            deltas.len()
        )));
    }

    let stages = forests
        .into_iter()
        .zip(anchors)
        .zip(deltas)
        .map(|((trees, anchor_idx), deltas)| CascadeStage {
            trees,
            anchor_idx,
            deltas,
        })
        .collect();

    ShapePredictor::new(initial_shape, stages)
}
