use byteorder::{ByteOrder, LittleEndian};
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::config;

/// SHA-256 digest type.
pub type Sha256Digest = [u8; config::COMMITMENT_SIZE];

/// Content commitment of a blob: the Merkle root over its chunksets plus the
/// values the registration transaction needs alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobCommitment {
    pub merkle_root: Sha256Digest,
    pub raw_size: u64,
    pub num_chunksets: u32,
}

impl BlobCommitment {
    pub fn root_hex(&self) -> String {
        format!("0x{}", hex::encode(self.merkle_root))
    }
}

/// Derives a content commitment from raw bytes.
///
/// Implementations must be pure: identical input always yields an identical
/// commitment.
pub trait ContentAddresser: Send + Sync {
    fn commit(&self, data: &[u8]) -> BlobCommitment;
}

/// Splits the input into fixed-size chunksets, hashes each chunkset (in
/// parallel) together with its index, and folds the leaves into a binary
/// SHA-256 Merkle tree.
#[derive(Debug, Clone)]
pub struct MerkleAddresser {
    chunkset_size: usize,
}

impl MerkleAddresser {
    pub fn new(chunkset_size: usize) -> Self {
        Self {
            chunkset_size: chunkset_size.max(1),
        }
    }
}

impl Default for MerkleAddresser {
    fn default() -> Self {
        Self::new(config::CHUNKSET_SIZE)
    }
}

impl ContentAddresser for MerkleAddresser {
    fn commit(&self, data: &[u8]) -> BlobCommitment {
        let chunksets = split_chunksets(data, self.chunkset_size);
        let leaves: Vec<Sha256Digest> = chunksets
            .par_iter()
            .enumerate()
            .map(|(index, chunk)| leaf_hash(index as u64, chunk))
            .collect();

        BlobCommitment {
            merkle_root: merkle_root(leaves),
            raw_size: data.len() as u64,
            num_chunksets: chunksets.len() as u32,
        }
    }
}

/// Split a byte buffer into chunksets. An empty buffer yields one empty chunkset.
pub fn split_chunksets(data: &[u8], chunkset_size: usize) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![data];
    }
    data.chunks(chunkset_size).collect()
}

/// Compute SHA-256 hash of a byte slice.
pub fn sha256(data: &[u8]) -> Sha256Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finish(hasher)
}

fn finish(hasher: Sha256) -> Sha256Digest {
    let result = hasher.finalize();
    let mut digest = [0u8; config::COMMITMENT_SIZE];
    digest.copy_from_slice(&result);
    digest
}

fn leaf_hash(index: u64, chunk: &[u8]) -> Sha256Digest {
    let mut prefix = [0u8; 8];
    LittleEndian::write_u64(&mut prefix, index);

    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(prefix);
    hasher.update(chunk);
    finish(hasher)
}

fn node_hash(left: &Sha256Digest, right: &Sha256Digest) -> Sha256Digest {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    finish(hasher)
}

/// Fold leaves pairwise up to a single root. An odd node is promoted unchanged.
fn merkle_root(mut level: Vec<Sha256Digest>) -> Sha256Digest {
    if level.is_empty() {
        return sha256(&[]);
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node_hash(left, right),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level[0]
}
