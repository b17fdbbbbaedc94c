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

//! Per-axis split planning for array rechunks.
//!
//! For one axis, given the old chunk boundaries and the new chunk
//! boundaries, computes how each old chunk's data is carved up across the
//! new chunks it overlaps. The full n-dimensional split is the Cartesian
//! product of per-axis splits, never materialized densely ahead of time.

use std::hash::{BuildHasher, Hash, Hasher};
use std::ops::Range;

use crate::ids::{NdIndex, WorkerAddress};

/// Fixed-seed hasher so every worker in the cluster computes the same
/// assignment for the same chunk index. The default `HashMap` hasher is
/// randomized per-process and would disagree across workers.
fn hash_state() -> ahash::RandomState {
    ahash::RandomState::with_seeds(0, 0, 0, 0)
}

/// Hash-sharding assignment: which worker owns the output chunk at
/// `output_partition`. A scheduler concern (see
/// [`crate::split::table::worker_for_range_sharding`] for the tabular
/// analogue), kept here as the pure function a scheduler implementation
/// would call to build the `worker_for` map it hands out.
pub fn worker_for_hash_sharding(output_partition: &NdIndex, workers: &[WorkerAddress]) -> Option<WorkerAddress> {
    if workers.is_empty() {
        return None;
    }
    let mut hasher = hash_state().build_hasher();
    output_partition.hash(&mut hasher);
    let i = (hasher.finish() % workers.len() as u64) as usize;
    workers.get(i).cloned()
}

/// One piece of an old chunk headed toward `chunk_index` in the new
/// chunking, at relative position `split_index` among the pieces that new
/// chunk assembles from along this axis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Split {
    pub chunk_index: usize,
    pub split_index: usize,
    pub slice: Range<usize>,
}

/// Splits belonging to one old chunk, ordered by where they land in the
/// new chunk's global coordinate space.
pub type SplitChunk = Vec<Split>;
/// Indexed by old chunk index along one axis.
pub type SplitAxis = Vec<SplitChunk>;
/// Indexed by axis.
pub type SplitAxes = Vec<SplitAxis>;

/// Builds the per-axis split plan for a rechunk from `old` chunk sizes to
/// `new` chunk sizes (one `Vec<usize>` of chunk sizes per axis).
pub fn split_axes(old: &[Vec<usize>], new: &[Vec<usize>]) -> SplitAxes {
    old.iter()
        .zip(new.iter())
        .map(|(old_axis, new_axis)| split_axis(old_axis, new_axis))
        .collect()
}

fn split_axis(old_axis: &[usize], new_axis: &[usize]) -> SplitAxis {
    let mapping = old_to_new(old_axis, new_axis);
    let mut result: SplitAxis = vec![Vec::new(); old_axis.len()];

    for (new_chunk_index, pieces) in mapping.into_iter().enumerate() {
        for (split_index, (old_chunk_index, slice)) in pieces.into_iter().enumerate() {
            result[old_chunk_index].push(Split {
                chunk_index: new_chunk_index,
                split_index,
                slice,
            });
        }
    }

    for chunk in result.iter_mut() {
        chunk.sort_by_key(|s| s.slice.start);
    }

    result
}

/// For each new chunk, the list of `(old_chunk_index, slice_within_that_old_chunk)`
/// pairs covering it, in old-chunk order.
fn old_to_new(old: &[usize], new: &[usize]) -> Vec<Vec<(usize, Range<usize>)>> {
    let mut old_bounds = Vec::with_capacity(old.len() + 1);
    old_bounds.push(0usize);
    for w in old {
        old_bounds.push(old_bounds.last().unwrap() + w);
    }

    let mut result = Vec::with_capacity(new.len());
    let mut new_start = 0usize;
    for &new_size in new {
        let new_end = new_start + new_size;
        let mut pieces = Vec::new();
        for (i, _) in old.iter().enumerate() {
            let old_start = old_bounds[i];
            let old_end = old_bounds[i + 1];
            let start = new_start.max(old_start);
            let end = new_end.min(old_end);
            if start < end {
                pieces.push((i, (start - old_start)..(end - old_start)));
            }
        }
        result.push(pieces);
        new_start = new_end;
    }

    result
}

/// Enumerates the Cartesian product of per-axis split lists for one old
/// chunk's coordinate, without materializing the whole lattice at once.
pub struct CartesianSplits<'a> {
    axes: Vec<&'a [Split]>,
    indices: Vec<usize>,
    done: bool,
}

impl<'a> CartesianSplits<'a> {
    pub fn new(axes: Vec<&'a [Split]>) -> Self {
        let done = axes.iter().any(|a| a.is_empty());
        let len = axes.len();
        CartesianSplits {
            axes,
            indices: vec![0; len],
            done,
        }
    }
}

impl<'a> Iterator for CartesianSplits<'a> {
    type Item = Vec<&'a Split>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item: Vec<&Split> = self
            .indices
            .iter()
            .zip(self.axes.iter())
            .map(|(&i, axis)| &axis[i])
            .collect();

        let mut k = self.axes.len();
        let mut carry = true;
        while carry && k > 0 {
            k -= 1;
            self.indices[k] += 1;
            if self.indices[k] < self.axes[k].len() {
                carry = false;
            } else {
                self.indices[k] = 0;
            }
        }
        if carry {
            self.done = true;
        }

        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_axis_even_split() {
        // old chunks [0..5, 5..10), new chunks [0..3, 3..6, 6..10)
        let old = vec![vec![5, 5]];
        let new = vec![vec![3, 3, 4]];
        let axes = split_axes(&old, &new);
        assert_eq!(axes.len(), 1);
        let axis = &axes[0];
        // old chunk 0 (0..5) feeds new chunk 0 (0..3) and new chunk 1 (3..5 of it)
        assert_eq!(axis[0].len(), 2);
        assert_eq!(axis[0][0].chunk_index, 0);
        assert_eq!(axis[0][0].slice, 0..3);
        assert_eq!(axis[0][1].chunk_index, 1);
        assert_eq!(axis[0][1].slice, 3..5);
        // old chunk 1 (5..10) feeds new chunk 1 (the rest, 5..6) and new chunk 2 (6..10)
        assert_eq!(axis[1].len(), 2);
        assert_eq!(axis[1][0].chunk_index, 1);
        assert_eq!(axis[1][0].slice, 0..1);
        assert_eq!(axis[1][1].chunk_index, 2);
        assert_eq!(axis[1][1].slice, 1..5);
    }

    #[test]
    fn identity_rechunk_is_one_to_one() {
        let old = vec![vec![4, 4, 4]];
        let new = old.clone();
        let axes = split_axes(&old, &new);
        for chunk in &axes[0] {
            assert_eq!(chunk.len(), 1);
            assert_eq!(chunk[0].split_index, 0);
        }
    }

    #[test]
    fn hash_sharding_is_deterministic_and_covers_every_worker() {
        let workers = vec![WorkerAddress::from("w0"), WorkerAddress::from("w1"), WorkerAddress::from("w2")];
        let a = worker_for_hash_sharding(&vec![1, 2], &workers);
        let b = worker_for_hash_sharding(&vec![1, 2], &workers);
        assert_eq!(a, b);
        assert!(a.is_some());
    }

    #[test]
    fn hash_sharding_with_no_workers_is_none() {
        assert_eq!(worker_for_hash_sharding(&vec![0], &[]), None);
    }

    #[test]
    fn cartesian_product_covers_two_axes() {
        let old = vec![vec![2, 2], vec![3]];
        let new = vec![vec![1, 3], vec![1, 2]];
        let axes = split_axes(&old, &new);
        // old chunk (0, 0) -> axis0 splits for old index 0, axis1 splits for old index 0
        let combos: Vec<_> =
            CartesianSplits::new(vec![axes[0][0].as_slice(), axes[1][0].as_slice()]).collect();
        assert!(!combos.is_empty());
        for combo in combos {
            assert_eq!(combo.len(), 2);
        }
    }
}
