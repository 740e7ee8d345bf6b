//! Bijective base-k codec between integer indices and charset strings.
//!
//! Every string of length >= 1 over an ordered charset of k distinct bytes
//! gets a unique index: length-1 strings occupy `[0, k)`, length-2 strings
//! `[k, k + k^2)`, and so on. `generate` emits the least significant
//! character first; the form stored in endpoints is the reversed one, so
//! `parse_reversed(generate(n)) != n` in general but
//! `parse(generate(n)) == n` and `parse_reversed(generate_reversed(n)) == n`
//! hold for every representable index.

use simdparck_commons::Password;

/// Writes the word for `value` into `dst` and returns its length.
/// `dst` must be able to hold the longest word of the configured keyspace.
pub fn generate_into(dst: &mut [u8], value: u64, charset: &[u8]) -> usize {
    let k = charset.len() as u64;
    let mut m = value + 1;
    let mut length = 0;

    while m > 0 {
        let mut digit = m % k;
        if digit == 0 {
            digit = k;
        }
        dst[length] = charset[(digit - 1) as usize];
        length += 1;
        m = (m - digit) / k;
    }

    length
}

/// Generates the word for `value`, least significant character first.
pub fn generate(value: u64, charset: &[u8]) -> Password {
    let mut buf = [0u8; simdparck_commons::MAX_PASSWORD_LENGTH];
    let length = generate_into(&mut buf, value, charset);
    Password::new(&buf[..length])
}

/// Generates the word for `value`, most significant character first.
pub fn generate_reversed(value: u64, charset: &[u8]) -> Password {
    let mut buf = [0u8; simdparck_commons::MAX_PASSWORD_LENGTH];
    let length = generate_into(&mut buf, value, charset);
    buf[..length].reverse();
    Password::new(&buf[..length])
}

/// Parses a word produced by [`generate`] back to its index.
/// The empty string parses to 0. Bytes outside the charset are the caller's
/// responsibility to reject.
pub fn parse(word: &[u8], charset: &[u8]) -> u64 {
    let k = charset.len() as u64;
    let mut num: u64 = 0;

    for &c in word.iter().rev() {
        num = num * k + (char_index(c, charset) + 1);
    }

    num.saturating_sub(1)
}

/// Parses a word produced by [`generate_reversed`] back to its index.
pub fn parse_reversed(word: &[u8], charset: &[u8]) -> u64 {
    let k = charset.len() as u64;
    let mut num: u64 = 0;

    for &c in word.iter() {
        num = num * k + (char_index(c, charset) + 1);
    }

    num.saturating_sub(1)
}

#[inline]
fn char_index(c: u8, charset: &[u8]) -> u64 {
    charset.iter().position(|&x| x == c).unwrap_or(0) as u64
}

/// Precomputes a byte-to-index map for [`parse_lookup`] and
/// [`parse_reversed_lookup`]. Entry 256 holds the charset size so a single
/// table carries the whole codec state.
pub fn parsing_lookup_table(charset: &[u8]) -> [u8; 257] {
    let mut table = [0u8; 257];
    table[256] = charset.len() as u8;

    for (i, &c) in charset.iter().enumerate() {
        table[c as usize] = i as u8;
    }

    table
}

/// [`parse`] accelerated by a precomputed lookup table.
pub fn parse_lookup(word: &[u8], table: &[u8; 257]) -> u64 {
    let k = table[256] as u64;
    let mut num: u64 = 0;

    for &c in word.iter().rev() {
        num = num * k + (table[c as usize] as u64 + 1);
    }

    num.saturating_sub(1)
}

/// [`parse_reversed`] accelerated by a precomputed lookup table.
pub fn parse_reversed_lookup(word: &[u8], table: &[u8; 257]) -> u64 {
    let k = table[256] as u64;
    let mut num: u64 = 0;

    for &c in word.iter() {
        num = num * k + (table[c as usize] as u64 + 1);
    }

    num.saturating_sub(1)
}

/// Returns the index of the first word of length `word_length`, that is
/// the number of strings shorter than `word_length` (the empty string
/// excluded). Computed in 128 bits so configuration validation can detect
/// keyspaces beyond the 64-bit build limit.
pub fn word_length_index(word_length: usize, charset: &[u8]) -> u128 {
    let k = charset.len() as u128;
    let mut index: u128 = 0;
    let mut product = k;

    // Saturating so that oversized keyspaces surface as "bigger than any
    // 64-bit index" instead of wrapping during validation.
    for _ in 1..word_length {
        index = index.saturating_add(product);
        product = product.saturating_mul(k);
    }

    index
}

/// 64-bit variant of [`word_length_index`] for configurations already
/// validated against the platform integer limit.
pub fn word_length_index64(word_length: usize, charset: &[u8]) -> u64 {
    word_length_index(word_length, charset) as u64
}

/// The number of indices naming words of length `min..=max`.
pub fn keyspace(min: usize, max: usize, charset: &[u8]) -> u128 {
    word_length_index(max + 1, charset) - word_length_index(min, charset)
}

/// A codec bound to one charset, with the parsing table precomputed.
pub struct WordGenerator {
    charset: Vec<u8>,
    lookup: [u8; 257],
}

impl WordGenerator {
    pub fn new(charset: &[u8]) -> Self {
        Self {
            charset: charset.to_vec(),
            lookup: parsing_lookup_table(charset),
        }
    }

    pub fn charset(&self) -> &[u8] {
        &self.charset
    }

    pub fn generate(&self, value: u64) -> Password {
        generate(value, &self.charset)
    }

    pub fn generate_reversed(&self, value: u64) -> Password {
        generate_reversed(value, &self.charset)
    }

    pub fn generate_into(&self, dst: &mut [u8], value: u64) -> usize {
        generate_into(dst, value, &self.charset)
    }

    pub fn parse(&self, word: &[u8]) -> u64 {
        parse_lookup(word, &self.lookup)
    }

    pub fn parse_reversed(&self, word: &[u8]) -> u64 {
        parse_reversed_lookup(word, &self.lookup)
    }

    pub fn word_length_index(&self, word_length: usize) -> u128 {
        word_length_index(word_length, &self.charset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simdparck_commons::{ALPHANUMERIC, ASCII, COMMON, LOWER, NUMERIC, UPPER};

    #[test]
    fn test_generate_lower_bound() {
        assert_eq!(b"a", generate(0, LOWER).as_ref());
    }

    #[test]
    fn test_generate_upper_bound() {
        assert_eq!(b"z", generate(25, LOWER).as_ref());
    }

    #[test]
    fn test_word_length_tick() {
        // LOWER[25] = z, LOWER[26] = aa, LOWER[27] = ba
        assert_eq!(b"b", generate(1, LOWER).as_ref());
        assert_eq!(b"aa", generate(26, LOWER).as_ref());
        assert_eq!(b"ba", generate(27, LOWER).as_ref());
    }

    #[test]
    fn test_word_length_tick_reversed() {
        assert_eq!(b"aa", generate_reversed(26, LOWER).as_ref());
        assert_eq!(b"ab", generate_reversed(27, LOWER).as_ref());
    }

    #[test]
    fn test_parse_examples() {
        assert_eq!(0, parse(b"a", LOWER));
        assert_eq!(1, parse(b"b", LOWER));
        assert_eq!(26, parse(b"aa", LOWER));
        assert_eq!(0, parse(b"", LOWER));
    }

    #[test]
    fn test_word_length_index_examples() {
        assert_eq!(0, word_length_index(1, LOWER));
        assert_eq!(26, word_length_index(2, LOWER));
        assert_eq!(702, word_length_index(3, LOWER));
    }

    #[test]
    fn test_word_length_boundary() {
        // the last index before each length tick is the all-last-char word
        for length in 1..=12usize {
            let next = word_length_index(length + 1, LOWER) as u64;
            let word = generate(next - 1, LOWER);
            assert_eq!(length, word.len());
            assert!(word.iter().all(|&c| c == b'z'));
            let first = generate(word_length_index(length, LOWER) as u64, LOWER);
            assert_eq!(length, first.len());
            assert!(first.iter().all(|&c| c == b'a'));
        }
    }

    #[test]
    fn test_codec_bijection() {
        for charset in [LOWER, UPPER, NUMERIC, ALPHANUMERIC, ASCII, COMMON] {
            for n in (0..1_000_000u64).step_by(7919) {
                assert_eq!(n, parse(generate(n, charset).as_ref(), charset));
                assert_eq!(
                    n,
                    parse_reversed(generate_reversed(n, charset).as_ref(), charset)
                );
            }
        }
    }

    #[test]
    fn test_generate_into_matches_generate() {
        let mut buf = [0u8; 31];
        for n in [0u64, 1, 25, 26, 27, 702, 1_000_003] {
            let length = generate_into(&mut buf, n, LOWER);
            assert_eq!(generate(n, LOWER).as_ref(), &buf[..length]);
        }
    }

    #[test]
    fn test_lookup_table_parse() {
        let table = parsing_lookup_table(COMMON);
        assert_eq!(COMMON.len() as u8, table[256]);
        for n in (0..100_000u64).step_by(997) {
            let word = generate(n, COMMON);
            assert_eq!(parse(word.as_ref(), COMMON), parse_lookup(word.as_ref(), &table));
            let reversed = generate_reversed(n, COMMON);
            assert_eq!(n, parse_reversed_lookup(reversed.as_ref(), &table));
        }
    }

    #[test]
    fn test_keyspace() {
        // min=1 max=2 over lower: 26 singles + 676 pairs
        assert_eq!(702, keyspace(1, 2, LOWER));
        assert_eq!(676, keyspace(2, 2, LOWER));
    }

    #[test]
    fn test_wordgenerator_wrapper() {
        let generator = WordGenerator::new(LOWER);
        assert_eq!(b"aa", generator.generate(26).as_ref());
        assert_eq!(26, generator.parse(b"aa"));
        assert_eq!(
            27,
            generator.parse_reversed(generator.generate_reversed(27).as_ref())
        );
    }
}
