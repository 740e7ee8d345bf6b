//! The fixed-lane batch driver over the hash primitive.
//!
//! The injected hash library evaluates a small fixed number of messages
//! per call; everything here is written lane-generically so the lane
//! count is a per-process constant, not a type parameter.

use simdparck_commons::{HashAlgorithm, MAX_DIGEST_LENGTH, MAX_PASSWORD_LENGTH};

use crate::reduce::Reducer;

/// The batch width of the hash backend.
const LANES: usize = 8;

/// The number of messages hashed per batched call.
pub fn simd_lanes() -> usize {
    LANES
}

/// Hashes `lanes` variable-length messages in one call.
pub fn batched_hash(
    algorithm: HashAlgorithm,
    words: &[[u8; MAX_PASSWORD_LENGTH]],
    lengths: &[usize],
    digests: &mut [[u8; MAX_DIGEST_LENGTH]],
) {
    let width = algorithm.digest_size();
    for lane in 0..words.len() {
        let digest = algorithm.hash(&words[lane][..lengths[lane]]);
        digests[lane][..width].copy_from_slice(&digest);
    }
}

/// One lane-wide set of in-flight chains: the word buffers, their
/// lengths, and the digests of the last hash call.
pub struct LaneDriver {
    algorithm: HashAlgorithm,
    hash_width: usize,
    words: Vec<[u8; MAX_PASSWORD_LENGTH]>,
    lengths: Vec<usize>,
    digests: Vec<[u8; MAX_DIGEST_LENGTH]>,
}

impl LaneDriver {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let lanes = simd_lanes();
        Self {
            algorithm,
            hash_width: algorithm.digest_size(),
            words: vec![[0u8; MAX_PASSWORD_LENGTH]; lanes],
            lengths: vec![0; lanes],
            digests: vec![[0u8; MAX_DIGEST_LENGTH]; lanes],
        }
    }

    pub fn lanes(&self) -> usize {
        self.words.len()
    }

    pub fn word(&self, lane: usize) -> &[u8] {
        &self.words[lane][..self.lengths[lane]]
    }

    /// The word buffer of one lane, for in-place generation.
    pub fn word_buffer(&mut self, lane: usize) -> &mut [u8; MAX_PASSWORD_LENGTH] {
        &mut self.words[lane]
    }

    pub fn set_length(&mut self, lane: usize, length: usize) {
        self.lengths[lane] = length;
    }

    pub fn digest(&self, lane: usize) -> &[u8] {
        &self.digests[lane][..self.hash_width]
    }

    /// One batched hash call over all lanes.
    pub fn hash_lanes(&mut self) {
        batched_hash(
            self.algorithm,
            &self.words,
            &self.lengths,
            &mut self.digests,
        );
    }

    /// Feeds every lane's digest through the reducer, replacing the words.
    pub fn reduce_lanes(&mut self, reducer: &Reducer, iteration: u64) {
        for lane in 0..self.words.len() {
            let length = reducer.reduce(
                &mut self.words[lane],
                &self.digests[lane][..self.hash_width],
                iteration,
            );
            self.lengths[lane] = length;
        }
    }
}
