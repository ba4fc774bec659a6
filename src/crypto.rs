//! Hashing for block production
//!
//! Blake2s-256 digests of headers and transactions plus the merkle commitment
//! over a block's transaction ids.

use crate::types::{BlockHeader, Hash256, Transaction};
use blake2::{Blake2s256, Digest};
use byteorder::{LittleEndian, WriteBytesExt};

/// Reusable Blake2s hasher for the search loop
pub struct Blake2sHasher {
    hasher: Blake2s256,
}

impl Blake2sHasher {
    /// Create a new Blake2s hasher
    pub fn new() -> Self {
        Self {
            hasher: Blake2s256::new(),
        }
    }

    /// Hash data and return the result
    pub fn hash(&mut self, data: &[u8]) -> Hash256 {
        self.hasher.update(data);
        let result = self.hasher.finalize_reset();
        Hash256(result.into())
    }
}

impl Default for Blake2sHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-width header encoding used for hashing
fn header_bytes(header: &BlockHeader) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + 32 + 32 + 4 + 32 + 4);
    // Writes into a Vec cannot fail
    let _ = bytes.write_i32::<LittleEndian>(header.version);
    bytes.extend_from_slice(header.prev_hash.as_bytes());
    bytes.extend_from_slice(header.merkle_root.as_bytes());
    let _ = bytes.write_u32::<LittleEndian>(header.time);
    for word in header.target.words() {
        let _ = bytes.write_u64::<LittleEndian>(word);
    }
    let _ = bytes.write_u32::<LittleEndian>(header.nonce);
    bytes
}

/// Hash of a block header
pub fn header_hash(header: &BlockHeader) -> Hash256 {
    Blake2sHasher::new().hash(&header_bytes(header))
}

/// Hash of a transaction, used as its id
pub fn transaction_hash(tx: &Transaction) -> Hash256 {
    let mut bytes = Vec::new();
    let _ = bytes.write_i32::<LittleEndian>(tx.version);
    let _ = bytes.write_u32::<LittleEndian>(tx.inputs.len() as u32);
    for input in &tx.inputs {
        match &input.previous_output {
            Some((hash, index)) => {
                bytes.extend_from_slice(hash.as_bytes());
                let _ = bytes.write_u32::<LittleEndian>(*index);
            }
            None => {
                bytes.extend_from_slice(Hash256::ZERO.as_bytes());
                let _ = bytes.write_u32::<LittleEndian>(u32::MAX);
            }
        }
        let _ = bytes.write_u32::<LittleEndian>(input.script_sig.len() as u32);
        bytes.extend_from_slice(input.script_sig.as_bytes());
        let _ = bytes.write_u32::<LittleEndian>(input.sequence);
    }
    let _ = bytes.write_u32::<LittleEndian>(tx.outputs.len() as u32);
    for output in &tx.outputs {
        let _ = bytes.write_u64::<LittleEndian>(output.value);
        let _ = bytes.write_u32::<LittleEndian>(output.script_pubkey.len() as u32);
        bytes.extend_from_slice(output.script_pubkey.as_bytes());
    }
    let _ = bytes.write_u32::<LittleEndian>(tx.lock_time);
    Blake2sHasher::new().hash(&bytes)
}

/// Merkle root over transaction ids, duplicating the last node on odd levels
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return Hash256::ZERO;
    }

    let mut hasher = Blake2sHasher::new();
    let mut level: Vec<Hash256> = txids.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut joined = [0u8; 64];
                joined[..32].copy_from_slice(left.as_bytes());
                joined[32..].copy_from_slice(right.as_bytes());
                hasher.hash(&joined)
            })
            .collect();
    }
    level[0]
}
