//! The hash -> plaintext reducer family.
//!
//! All reducers are pure functions of `(digest, iteration)` once
//! constructed: they fill a destination buffer with a plaintext of length
//! between `min` and `max` and never fail, drawing extra entropy from the
//! extension function whenever the digest runs dry.

use crate::wordgen;

/// The SHA-1 round constant used to mix the iteration into the hash words.
const ITERATION_KEY: u32 = 0x5a82_7999;

/// Extends the entropy of a buffer of 32-bit words in place, SHA-256
/// message-schedule style.
pub fn extend_entropy(buffer: &mut [u8]) {
    let words = buffer.len() / 4;

    for i in 0..words {
        let d1 = load_word(buffer, i);
        let d2 = load_word(buffer, (words - 2 + i) % words);
        let d3 = load_word(buffer, (words - 3 + i) % words);
        let s0 = d1.rotate_right(7) ^ d1.rotate_right(18) ^ (d1 >> 3);
        let s1 = d2.rotate_right(17) ^ d2.rotate_right(19) ^ (d2 >> 10);
        store_word(buffer, i, s0.wrapping_add(s1).wrapping_add(d3));
    }
}

/// The cheap alternative extension rule. Opt-in: the reducers default to
/// [`extend_entropy`].
pub fn extend_entropy_simple(buffer: &mut [u8]) {
    let words = buffer.len() / 4;

    for i in 0..words {
        let d1 = load_word(buffer, i);
        let d2 = load_word(buffer, (words - 2 + i) % words);
        let d3 = load_word(buffer, (words - 3 + i) % words);
        store_word(buffer, i, (d1 ^ d2).rotate_left(1).wrapping_add(d3));
    }
}

#[inline]
fn load_word(buffer: &[u8], i: usize) -> u32 {
    u32::from_le_bytes(buffer[i * 4..i * 4 + 4].try_into().unwrap_or_default())
}

#[inline]
fn store_word(buffer: &mut [u8], i: usize, value: u32) {
    buffer[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
}

/// Computes the smallest whole number of hash bytes able to represent
/// `value`, and the bitmask covering exactly its significant bits.
pub fn bytes_required(value: u64) -> (usize, u64) {
    let mut mask: u64 = 0;
    let mut bits = 0usize;

    while mask < value {
        mask = (mask << 1) | 1;
        bits += 1;
    }

    let mut bytes = bits / 8;
    if bits % 8 != 0 {
        bytes += 1;
    }

    (bytes, mask)
}

/// A naive `byte % k` skews towards the low end of the charset. The fix is
/// rejection sampling: only bytes below the largest multiple of k that fits
/// in a byte are accepted. Held in 16 bits because the multiple can be 256
/// itself.
pub fn modulo_bias_mask(charset_size: usize) -> u16 {
    ((256 / charset_size) * charset_size) as u16
}

/// Big-endian load of `length` bytes at `offset`.
#[inline]
fn load_bytes(buffer: &[u8], offset: usize, length: usize) -> u64 {
    let mut value: u64 = 0;
    for &b in &buffer[offset..offset + length] {
        value = (value << 8) | b as u64;
    }
    value
}

/// The keyspace parameters every reducer shares.
#[derive(Clone, Debug)]
struct Keyspace {
    min: usize,
    max: usize,
    charset: Vec<u8>,
    min_index: u64,
    keyspace: u64,
}

impl Keyspace {
    fn new(min: usize, max: usize, charset: &[u8]) -> Self {
        let min_index = wordgen::word_length_index64(min, charset);
        let max_index = wordgen::word_length_index64(max + 1, charset);
        Self {
            min,
            max,
            charset: charset.to_vec(),
            min_index,
            keyspace: max_index - min_index,
        }
    }

    /// Draws `length` charset bytes from `buffer` starting at `offset`,
    /// rejection-sampled to stay uniform, extending the entropy whenever
    /// the buffer is drained.
    fn chars_unbiased(
        &self,
        dst: &mut [u8],
        buffer: &mut [u8],
        mut offset: usize,
        length: usize,
        mod_max: u16,
    ) -> usize {
        let charset_size = self.charset.len();
        let mut written = 0;

        while written < length {
            if offset >= buffer.len() {
                extend_entropy(buffer);
                offset = 0;
            }

            let next = buffer[offset];
            offset += 1;
            if (next as u16) < mod_max {
                dst[written] = self.charset[next as usize % charset_size];
                written += 1;
            }
        }

        written
    }

    /// Constrains `value` into the keyspace and writes out its word.
    fn reduce_index(&self, dst: &mut [u8], value: u64, iteration: u64) -> usize {
        let index = (value ^ iteration) % self.keyspace + self.min_index;
        wordgen::generate_into(dst, index, &self.charset)
    }
}

/// The fast, modulo-biased reducer. Kept for comparison runs; production
/// tables use [`Reducer::hybrid`].
pub struct BasicModuloReducer {
    space: Keyspace,
}

impl BasicModuloReducer {
    pub fn new(min: usize, max: usize, charset: &[u8]) -> Self {
        Self {
            space: Keyspace::new(min, max, charset),
        }
    }

    pub fn reduce(&self, dst: &mut [u8], hash: &[u8], iteration: u64) -> usize {
        let length = hash.len().min(8);
        let value = load_bytes(hash, 0, length);
        self.space.reduce_index(dst, value, iteration)
    }
}

/// Bias-free variant of the modulo reducer: reads just enough hash bytes to
/// cover the keyspace and rejects out-of-range values instead of folding
/// them back in.
pub struct ModuloReducer {
    space: Keyspace,
    bytes_required: usize,
    mask: u64,
}

impl ModuloReducer {
    pub fn new(min: usize, max: usize, charset: &[u8]) -> Self {
        let space = Keyspace::new(min, max, charset);
        let (bytes_required, mask) = bytes_required(space.keyspace);
        Self {
            space,
            bytes_required,
            mask,
        }
    }

    pub fn reduce(&self, dst: &mut [u8], hash: &[u8], iteration: u64) -> usize {
        let mut buffer = [0u8; simdparck_commons::MAX_DIGEST_LENGTH];
        let buffer = &mut buffer[..hash.len()];
        buffer.copy_from_slice(hash);

        let mut offset = 0;
        let value = loop {
            if offset + self.bytes_required == buffer.len() {
                extend_entropy(buffer);
                offset = 0;
            }
            let value = load_bytes(buffer, offset, self.bytes_required) & self.mask;
            offset += 1;
            if value <= self.space.keyspace {
                break value;
            }
        };

        self.space.reduce_index(dst, value, iteration)
    }
}

/// The production reducer: derives both the output length and the
/// characters from the hash, without modulo bias.
pub struct HybridReducer {
    space: Keyspace,
    /// Cumulative keyspace sizes per output length, `limits[l]` covering
    /// all lengths in `min..=l`.
    limits: [u64; simdparck_commons::MAX_PASSWORD_LENGTH + 1],
    bytes_required: usize,
    mask: u64,
    mod_max: u16,
}

impl HybridReducer {
    pub fn new(min: usize, max: usize, charset: &[u8]) -> Self {
        let space = Keyspace::new(min, max, charset);
        let mut limits = [0u64; simdparck_commons::MAX_PASSWORD_LENGTH + 1];
        let mut total: u64 = 0;

        for i in min..=max {
            let lower = wordgen::word_length_index64(i, charset);
            let upper = wordgen::word_length_index64(i + 1, charset);
            total += upper - lower;
            limits[i] = total;
        }

        let (bytes_required, mask) = bytes_required(total);
        let mod_max = modulo_bias_mask(charset.len());

        Self {
            space,
            limits,
            bytes_required,
            mask,
            mod_max,
        }
    }

    pub fn reduce(&self, dst: &mut [u8], hash: &[u8], iteration: u64) -> usize {
        let mut buffer = [0u8; simdparck_commons::MAX_DIGEST_LENGTH];
        let buffer = &mut buffer[..hash.len()];

        // Copy and mix in the iteration
        let words = hash.len() / 4;
        let key = ITERATION_KEY.wrapping_mul(iteration as u32);
        for i in 0..words {
            let word = load_word(hash, i) ^ key.rotate_left(i as u32);
            store_word(buffer, i, word);
        }

        let mut offset = 0;
        let length = if self.space.min != self.space.max {
            let total = self.limits[self.space.max];
            let reduction = loop {
                if offset + self.bytes_required == buffer.len() {
                    extend_entropy(buffer);
                    offset = 0;
                }
                let mut reduction = load_bytes(buffer, offset, self.bytes_required);
                // If the value is too big the same entropy gets a second
                // chance with the byte order reversed.
                if (reduction & self.mask) >= total {
                    reduction = reduction.swap_bytes() >> (64 - self.bytes_required * 8);
                }
                reduction &= self.mask;
                offset += 1;
                if reduction < total {
                    break reduction;
                }
            };

            let mut length = self.space.max;
            for i in self.space.min..=self.space.max {
                if reduction < self.limits[i] {
                    length = i;
                    break;
                }
            }
            length
        } else {
            self.space.max
        };

        // Advance past the entropy consumed by the length choice, reusing
        // its final byte.
        offset += self.bytes_required - 1;

        self.space
            .chars_unbiased(dst, buffer, offset, length, self.mod_max)
    }
}

/// Fixed-length-only reducer drawing bytes straight off the hash.
pub struct BytewiseReducer {
    space: Keyspace,
    mod_max: u16,
}

impl BytewiseReducer {
    /// `min` must equal `max`; configuration validation enforces it.
    pub fn new(min: usize, max: usize, charset: &[u8]) -> Self {
        debug_assert_eq!(min, max);
        let space = Keyspace::new(min, max, charset);
        let mod_max = modulo_bias_mask(charset.len());
        Self { space, mod_max }
    }

    pub fn reduce(&self, dst: &mut [u8], hash: &[u8]) -> usize {
        let mut buffer = [0u8; simdparck_commons::MAX_DIGEST_LENGTH];
        let buffer = &mut buffer[..hash.len()];
        buffer.copy_from_slice(hash);

        self.space
            .chars_unbiased(dst, buffer, 0, self.space.max, self.mod_max)
    }
}

/// The reducer family as a tagged variant. The variant is selected at
/// table-build time; no dispatch happens per character.
pub enum Reducer {
    BasicModulo(BasicModuloReducer),
    Modulo(ModuloReducer),
    Hybrid(HybridReducer),
    Bytewise(BytewiseReducer),
}

impl Reducer {
    pub fn basic_modulo(min: usize, max: usize, charset: &[u8]) -> Self {
        Reducer::BasicModulo(BasicModuloReducer::new(min, max, charset))
    }

    pub fn modulo(min: usize, max: usize, charset: &[u8]) -> Self {
        Reducer::Modulo(ModuloReducer::new(min, max, charset))
    }

    pub fn hybrid(min: usize, max: usize, charset: &[u8]) -> Self {
        Reducer::Hybrid(HybridReducer::new(min, max, charset))
    }

    pub fn bytewise(length: usize, charset: &[u8]) -> Self {
        Reducer::Bytewise(BytewiseReducer::new(length, length, charset))
    }

    #[inline]
    pub fn reduce(&self, dst: &mut [u8], hash: &[u8], iteration: u64) -> usize {
        match self {
            Reducer::BasicModulo(r) => r.reduce(dst, hash, iteration),
            Reducer::Modulo(r) => r.reduce(dst, hash, iteration),
            Reducer::Hybrid(r) => r.reduce(dst, hash, iteration),
            Reducer::Bytewise(r) => r.reduce(dst, hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simdparck_commons::{HashAlgorithm, ASCII, LOWER};

    #[test]
    fn test_bytes_required() {
        assert_eq!((1, 0x1f), bytes_required(26));
        assert_eq!((1, 0x7f), bytes_required(96));
        assert_eq!((2, 0x1ff), bytes_required(500));
        assert_eq!((8, u64::MAX), bytes_required(u64::MAX));
    }

    #[test]
    fn test_modulo_bias_mask() {
        assert_eq!(256, modulo_bias_mask(1));
        assert_eq!(256, modulo_bias_mask(2));
        assert_eq!(234, modulo_bias_mask(26));
        assert_eq!(190, modulo_bias_mask(95));
    }

    #[test]
    fn test_entropy_extension_changes_buffer() {
        let mut a = *b"0123456789abcdef0123456789abcdef";
        let b = a;
        extend_entropy(&mut a);
        assert_ne!(a, b);

        let mut c = b;
        extend_entropy_simple(&mut c);
        assert_ne!(c, b);
        assert_ne!(c, a);
    }

    #[test]
    fn test_hybrid_reduce_is_deterministic() {
        let reducer = HybridReducer::new(1, 8, ASCII);
        let hash = HashAlgorithm::Sha1.hash(b"determinism");

        let mut first = [0u8; 31];
        let mut second = [0u8; 31];
        for iteration in [0u64, 1, 17, 9999] {
            let a = reducer.reduce(&mut first, &hash, iteration);
            let b = reducer.reduce(&mut second, &hash, iteration);
            assert_eq!(a, b);
            assert_eq!(&first[..a], &second[..b]);
        }
    }

    #[test]
    fn test_hybrid_reduce_range_and_charset() {
        let reducer = HybridReducer::new(2, 6, LOWER);
        let mut dst = [0u8; 31];

        for i in 0u64..2000 {
            let hash = HashAlgorithm::Md5.hash(&i.to_le_bytes());
            let length = reducer.reduce(&mut dst, &hash, i);
            assert!((2..=6).contains(&length));
            assert!(dst[..length].iter().all(|c| LOWER.contains(c)));
        }
    }

    #[test]
    fn test_hybrid_fixed_length_skips_phase_a() {
        let reducer = HybridReducer::new(4, 4, LOWER);
        let mut dst = [0u8; 31];
        let hash = HashAlgorithm::Sha256.hash(b"fixed");
        assert_eq!(4, reducer.reduce(&mut dst, &hash, 3));
    }

    #[test]
    fn test_hybrid_length_distribution_not_degenerate() {
        // longer lengths dominate the keyspace, so most outputs are long
        let reducer = HybridReducer::new(1, 5, LOWER);
        let mut dst = [0u8; 31];
        let mut longest = 0usize;

        for i in 0u64..500 {
            let hash = HashAlgorithm::Sha1.hash(&i.to_be_bytes());
            if reducer.reduce(&mut dst, &hash, 0) == 5 {
                longest += 1;
            }
        }

        assert!(longest > 400, "only {longest} of 500 outputs had length 5");
    }

    #[test]
    fn test_modulo_reducer_stays_in_keyspace() {
        let reducer = ModuloReducer::new(3, 5, LOWER);
        let mut dst = [0u8; 31];

        for i in 0u64..1000 {
            let hash = HashAlgorithm::Sha1.hash(&i.to_le_bytes());
            let length = reducer.reduce(&mut dst, &hash, i);
            assert!((3..=5).contains(&length));
            assert!(dst[..length].iter().all(|c| LOWER.contains(c)));
        }
    }

    #[test]
    fn test_basic_modulo_reducer_stays_in_keyspace() {
        let reducer = BasicModuloReducer::new(1, 4, LOWER);
        let mut dst = [0u8; 31];

        for i in 0u64..1000 {
            let hash = HashAlgorithm::Md4.hash(&i.to_le_bytes());
            let length = reducer.reduce(&mut dst, &hash, i);
            assert!((1..=4).contains(&length));
        }
    }

    #[test]
    fn test_bytewise_reducer() {
        let reducer = BytewiseReducer::new(8, 8, ASCII);
        let mut dst = [0u8; 31];

        for i in 0u64..200 {
            let hash = HashAlgorithm::Sha512.hash(&i.to_le_bytes());
            assert_eq!(8, reducer.reduce(&mut dst, &hash));
            assert!(dst[..8].iter().all(|c| ASCII.contains(c)));
        }
    }

    #[test]
    fn test_variant_dispatch_matches_inner() {
        let hash = HashAlgorithm::Sha1.hash(b"dispatch");
        let mut a = [0u8; 31];
        let mut b = [0u8; 31];

        let variant = Reducer::hybrid(1, 6, LOWER);
        let inner = HybridReducer::new(1, 6, LOWER);
        let la = variant.reduce(&mut a, &hash, 42);
        let lb = inner.reduce(&mut b, &hash, 42);
        assert_eq!(&a[..la], &b[..lb]);
    }
}
