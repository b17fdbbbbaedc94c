// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Stand-in n-dimensional array chunk used by the rechunk run.
//!
//! The real array library glue (numpy/ndarray-equivalent types) is out of
//! scope; `DenseBrick` is a minimal row-major dense array just rich enough
//! to exercise slicing and the sub-lattice concatenation `ArrayRechunkRun`
//! needs.

use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShuffleError};
use crate::ids::NdIndex;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseBrick<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T: Clone> DenseBrick<T> {
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "brick data length does not match shape"
        );
        DenseBrick { shape, data }
    }

    pub fn size_bytes(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<T>()) as u64
    }

    pub fn get(&self, idx: &[usize]) -> &T {
        let strides = row_major_strides(&self.shape);
        let flat: usize = idx.iter().zip(strides.iter()).map(|(&i, &s)| i * s).sum();
        &self.data[flat]
    }

    /// Extracts the sub-brick covered by `ranges` (one half-open range per
    /// axis), copying elements.
    pub fn slice(&self, ranges: &[Range<usize>]) -> DenseBrick<T> {
        let new_shape: Vec<usize> = ranges.iter().map(|r| r.end - r.start).collect();
        let total: usize = new_shape.iter().product();
        let mut out = Vec::with_capacity(total);
        let strides = row_major_strides(&self.shape);

        if total > 0 {
            let mut idx = vec![0usize; ranges.len()];
            loop {
                let flat: usize = idx
                    .iter()
                    .enumerate()
                    .map(|(d, &i)| (ranges[d].start + i) * strides[d])
                    .sum();
                out.push(self.data[flat].clone());
                if !increment_odometer(&mut idx, &new_shape) {
                    break;
                }
            }
        }

        DenseBrick {
            shape: new_shape,
            data: out,
        }
    }
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Increments `idx` in row-major order (last axis fastest). Returns `false`
/// once every axis has wrapped, meaning enumeration is complete.
fn increment_odometer(idx: &mut [usize], shape: &[usize]) -> bool {
    for d in (0..idx.len()).rev() {
        idx[d] += 1;
        if idx[d] < shape[d] {
            return true;
        }
        idx[d] = 0;
    }
    false
}

/// Reassembles the dense sub-lattice of shards produced by splitting a
/// single new chunk across its contributing old chunks back into one
/// brick, concatenating axis by axis from the innermost axis outward.
/// Mirrors `concatenate3` in the original rechunk implementation.
pub fn concatenate_lattice<T: Clone>(
    shards: &HashMap<NdIndex, DenseBrick<T>>,
    subshape: &[usize],
) -> Result<DenseBrick<T>> {
    if subshape.is_empty() {
        return shards
            .get(&Vec::new())
            .cloned()
            .ok_or_else(|| ShuffleError::DataError {
                message: "missing scalar shard".into(),
            });
    }
    let expected: usize = subshape.iter().product();
    if shards.len() != expected {
        return Err(ShuffleError::DataError {
            message: format!(
                "expected {expected} shards to cover sub-lattice {subshape:?}, got {}",
                shards.len()
            ),
        });
    }
    rec(shards, subshape, &mut Vec::new(), 0)
}

fn rec<T: Clone>(
    shards: &HashMap<NdIndex, DenseBrick<T>>,
    subshape: &[usize],
    prefix: &mut Vec<usize>,
    axis: usize,
) -> Result<DenseBrick<T>> {
    if axis == subshape.len() {
        return shards
            .get(prefix)
            .cloned()
            .ok_or_else(|| ShuffleError::DataError {
                message: format!("missing shard at {prefix:?}"),
            });
    }
    let mut parts = Vec::with_capacity(subshape[axis]);
    for i in 0..subshape[axis] {
        prefix.push(i);
        parts.push(rec(shards, subshape, prefix, axis + 1)?);
        prefix.pop();
    }
    Ok(concat_along(&parts, axis))
}

fn concat_along<T: Clone>(parts: &[DenseBrick<T>], axis: usize) -> DenseBrick<T> {
    if parts.len() == 1 {
        return parts[0].clone();
    }
    let ndim = parts[0].shape.len();
    let mut new_shape = parts[0].shape.clone();
    new_shape[axis] = parts.iter().map(|p| p.shape[axis]).sum();
    let total: usize = new_shape.iter().product();
    let mut data = Vec::with_capacity(total);

    if total > 0 {
        let mut idx = vec![0usize; ndim];
        loop {
            let mut offset = idx[axis];
            let mut chosen = 0;
            for (pi, p) in parts.iter().enumerate() {
                if offset < p.shape[axis] {
                    chosen = pi;
                    break;
                }
                offset -= p.shape[axis];
            }
            let mut src_idx = idx.clone();
            src_idx[axis] = offset;
            data.push(parts[chosen].get(&src_idx).clone());
            if !increment_odometer(&mut idx, &new_shape) {
                break;
            }
        }
    }

    DenseBrick {
        shape: new_shape,
        data,
    }
}

/// Element type used by this crate's test fixtures and integration tests.
pub type Brick = DenseBrick<f64>;
