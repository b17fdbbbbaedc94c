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

//! Wire-ish codec for shard blocks.
//!
//! [`encode_block`]/[`decode_block`] (de)serialize one producer's typed
//! shard list. Array shards keep a `(sub_index, payload)` tag per item since
//! the receiver still needs to know which destination chunk each shard
//! belongs to; table row groups carry no tag since the receiver re-derives
//! the destination partition itself from the row keys. [`frame_block`]/
//! [`decode_raw_blocks`] length-prefix an opaque blob so several of
//! them — one per delivery, table or array alike — can be appended to the
//! same partition's disk file over time and read back out in order.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encodes one producer's shard list into a single block.
pub fn encode_block<K: Serialize>(items: &[(K, Vec<u8>)]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(items)?)
}

/// Appends a length prefix to `block` so it can be told apart from
/// neighboring blocks once concatenated.
pub fn frame_block(block: Vec<u8>) -> Vec<u8> {
    let mut framed = Vec::with_capacity(8 + block.len());
    framed.extend_from_slice(&(block.len() as u64).to_le_bytes());
    framed.extend_from_slice(&block);
    framed
}

/// Splits `buf` into the length-delimited blocks it was framed from, in
/// order, without interpreting their contents.
fn iter_framed_blocks(buf: &[u8]) -> Result<Vec<&[u8]>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        if pos + 8 > buf.len() {
            return Err(crate::error::ShuffleError::DataError {
                message: "truncated block length prefix".into(),
            });
        }
        let len = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap()) as usize;
        pos += 8;
        if pos + len > buf.len() {
            return Err(crate::error::ShuffleError::DataError {
                message: "truncated block body".into(),
            });
        }
        out.push(&buf[pos..pos + len]);
        pos += len;
    }
    Ok(out)
}

/// Decodes one block produced by [`encode_block`].
pub fn decode_block<K: DeserializeOwned>(buf: &[u8]) -> Result<Vec<(K, Vec<u8>)>> {
    Ok(bincode::deserialize(buf)?)
}

/// Splits a sequence of raw framed blobs back into their individual
/// byte strings, with no assumption about what each blob encodes. Used to
/// read back the shard blobs appended to one partition's disk file.
pub fn decode_raw_blocks(buf: &[u8]) -> Result<Vec<Vec<u8>>> {
    Ok(iter_framed_blocks(buf)?
        .into_iter()
        .map(|b| b.to_vec())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_block_round_trips() {
        let block = encode_block(&[(0u32, vec![1u8, 2, 3]), (1u32, vec![4u8, 5])]).unwrap();
        let decoded: Vec<(u32, Vec<u8>)> = decode_block(&block).unwrap();
        assert_eq!(decoded, vec![(0, vec![1, 2, 3]), (1, vec![4, 5])]);
    }

    #[test]
    fn raw_blocks_round_trip() {
        let mut buf = frame_block(vec![1, 2, 3]);
        buf.extend_from_slice(&frame_block(vec![4, 5]));
        let blocks = decode_raw_blocks(&buf).unwrap();
        assert_eq!(blocks, vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn decode_raw_blocks_rejects_truncated_buffer() {
        let block = frame_block(vec![1, 2, 3]);
        let truncated = &block[..block.len() - 1];
        assert!(decode_raw_blocks(truncated).is_err());
    }
}
