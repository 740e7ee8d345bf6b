mod ntlm;

use core::fmt::{Debug, Display};
use core::ops::{Deref, DerefMut};
use core::str::FromStr;

use md4::{Digest as _, Md4};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

pub use tinyvec::ArrayVec;

use ntlm::ntlm;

/// The maximum plaintext length.
/// One below a word boundary so a buffer plus its length byte pack evenly.
pub const MAX_PASSWORD_LENGTH: usize = 31;

/// The maximum digest size in bytes (SHA-512).
pub const MAX_DIGEST_LENGTH: usize = 64;

/// The maximum charset length storable in a table header.
pub const MAX_CHARSET_LENGTH: usize = 128;

// Charset presets. All subsets are concatenated in byte order except the
// frequency-ordered `common` variants.
pub const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
pub const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const ALPHA: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
pub const NUMERIC: &[u8] = b"0123456789";
pub const ASCII_SPECIAL: &[u8] = b" !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";
pub const ALPHANUMERIC: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
/// Every printable ASCII byte, in byte order.
pub const ASCII: &[u8] =
    b" !\"#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_`abcdefghijklmnopqrstuvwxyz{|}~";
/// Ordered by frequency over a corpus of cracked passwords.
pub const COMMON: &[u8] =
    b"a1e20ion9r3sl85746tumdychbkgfpvjwzxqAE._SRMNILTODCBKPHG-UF!YJVWZ@QX*$#?& :+/";
pub const COMMON_SHORT: &[u8] =
    b"a1e20ion9r3sl85746tumdychbkgfpvjwzxqAE._SRMNILTODCBKPHG-UF!YJVWZ@QX";

/// Resolves a charset preset name.
/// Returns `None` for unknown names; callers decide whether the argument is
/// a literal charset instead.
pub fn parse_charset(name: &str) -> Option<&'static [u8]> {
    match name {
        "lower" => Some(LOWER),
        "upper" => Some(UPPER),
        "alpha" => Some(ALPHA),
        "numeric" | "num" => Some(NUMERIC),
        "ascii-special" => Some(ASCII_SPECIAL),
        "alphanumeric" | "alnum" => Some(ALPHANUMERIC),
        "ascii" | "ASCII" => Some(ASCII),
        "common" => Some(COMMON),
        "commonshort" => Some(COMMON_SHORT),
        _ => None,
    }
}

/// An ASCII plaintext stored in a stack-allocated vector.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Password(ArrayVec<[u8; MAX_PASSWORD_LENGTH]>);

impl Password {
    /// Creates a new password. `text` must not exceed [`MAX_PASSWORD_LENGTH`],
    /// which configuration validation guarantees.
    pub fn new(text: &[u8]) -> Self {
        let mut inner = ArrayVec::new();
        inner.extend_from_slice(text);
        Password(inner)
    }
}

impl AsRef<[u8]> for Password {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Password {
    type Target = ArrayVec<[u8; MAX_PASSWORD_LENGTH]>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Password {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Display for Password {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Debug for Password {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        <Password as Display>::fmt(self, f)
    }
}

/// A digest stored in a stack-allocated vector.
pub type Digest = ArrayVec<[u8; MAX_DIGEST_LENGTH]>;

/// All the supported hash functions.
///
/// The discriminants are persisted in the 6-bit algorithm field of the table
/// header, so they must never be renumbered.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md4 = 0,
    Md5 = 1,
    Ntlm = 2,
    Sha1 = 3,
    Sha256 = 4,
    Sha384 = 5,
    Sha512 = 6,
}

impl HashAlgorithm {
    /// Hashes a message using the selected hash function.
    #[inline]
    pub fn hash(&self, msg: &[u8]) -> Digest {
        match self {
            HashAlgorithm::Md4 => Md4::digest(msg).as_slice().try_into().unwrap(),
            HashAlgorithm::Md5 => Md5::digest(msg).as_slice().try_into().unwrap(),
            HashAlgorithm::Ntlm => ntlm(msg).as_slice().try_into().unwrap(),
            HashAlgorithm::Sha1 => Sha1::digest(msg).as_slice().try_into().unwrap(),
            HashAlgorithm::Sha256 => Sha256::digest(msg).as_slice().try_into().unwrap(),
            HashAlgorithm::Sha384 => Sha384::digest(msg).as_slice().try_into().unwrap(),
            HashAlgorithm::Sha512 => Sha512::digest(msg).as_slice().try_into().unwrap(),
        }
    }

    /// Gets the digest size in bytes.
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Md4 | HashAlgorithm::Md5 | HashAlgorithm::Ntlm => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => HashAlgorithm::Md4,
            1 => HashAlgorithm::Md5,
            2 => HashAlgorithm::Ntlm,
            3 => HashAlgorithm::Sha1,
            4 => HashAlgorithm::Sha256,
            5 => HashAlgorithm::Sha384,
            6 => HashAlgorithm::Sha512,
            _ => return None,
        })
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "md4" => HashAlgorithm::Md4,
            "md5" => HashAlgorithm::Md5,
            "ntlm" => HashAlgorithm::Ntlm,
            "sha1" => HashAlgorithm::Sha1,
            "sha256" => HashAlgorithm::Sha256,
            "sha384" => HashAlgorithm::Sha384,
            "sha512" => HashAlgorithm::Sha512,
            _ => return Err(format!("unknown hash algorithm: {s}")),
        })
    }
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            HashAlgorithm::Md4 => "md4",
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Ntlm => "ntlm",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_distinct_ascii_bytes() {
        for preset in [
            LOWER,
            UPPER,
            ALPHA,
            NUMERIC,
            ASCII_SPECIAL,
            ALPHANUMERIC,
            ASCII,
            COMMON,
            COMMON_SHORT,
        ] {
            let mut seen = [false; 256];
            for &c in preset {
                assert!(!seen[c as usize], "duplicate byte {c:#x}");
                assert!(c.is_ascii());
                seen[c as usize] = true;
            }
        }
    }

    #[test]
    fn test_parse_charset() {
        assert_eq!(Some(LOWER), parse_charset("lower"));
        assert_eq!(Some(NUMERIC), parse_charset("num"));
        assert_eq!(Some(ASCII), parse_charset("ASCII"));
        assert_eq!(None, parse_charset("Lower"));
        assert_eq!(None, parse_charset("klingon"));
    }

    #[test]
    fn test_ascii_preset_is_printable_range() {
        let expected: Vec<u8> = (0x20..0x7f).collect();
        assert_eq!(expected, ASCII);
    }

    #[test]
    fn test_digest_sizes() {
        for (alg, size) in [
            (HashAlgorithm::Md4, 16),
            (HashAlgorithm::Md5, 16),
            (HashAlgorithm::Ntlm, 16),
            (HashAlgorithm::Sha1, 20),
            (HashAlgorithm::Sha256, 32),
            (HashAlgorithm::Sha384, 48),
            (HashAlgorithm::Sha512, 64),
        ] {
            assert_eq!(size, alg.digest_size());
            assert_eq!(size, alg.hash(b"abc").len());
        }
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            hex::decode("900150983cd24fb0d6963f7d28e17f72").unwrap(),
            HashAlgorithm::Md5.hash(b"abc").as_slice()
        );
        assert_eq!(
            hex::decode("a9993e364706816aba3e25717850c26c9cd0d89d").unwrap(),
            HashAlgorithm::Sha1.hash(b"abc").as_slice()
        );
        assert_eq!(
            hex::decode("a448017aaf21d8525fc10ae87aa6729d").unwrap(),
            HashAlgorithm::Md4.hash(b"abc").as_slice()
        );
    }

    #[test]
    fn test_algorithm_round_trips_name_and_bits() {
        for bits in 0..7u8 {
            let alg = HashAlgorithm::from_bits(bits).unwrap();
            assert_eq!(bits, alg as u8);
            assert_eq!(Ok(alg), alg.to_string().parse());
        }
        assert_eq!(None, HashAlgorithm::from_bits(7));
    }
}
