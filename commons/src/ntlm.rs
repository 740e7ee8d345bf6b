use md4::{digest::generic_array::GenericArray, digest::OutputSizeUser, Digest as Md4Digest, Md4};

use tinyvec::ArrayVec;

use crate::MAX_PASSWORD_LENGTH;

/// UTF-16LE encodes an ASCII plaintext.
#[inline]
fn utf16_le(password: &[u8]) -> ArrayVec<[u8; MAX_PASSWORD_LENGTH * 2]> {
    let mut buf = ArrayVec::new();

    for el in password {
        buf.push(*el);
        buf.push(0);
    }

    buf
}

/// Hashes a password using NTLM.
#[inline]
pub fn ntlm(password: &[u8]) -> GenericArray<u8, <Md4 as OutputSizeUser>::OutputSize> {
    Md4::digest(utf16_le(password))
}
