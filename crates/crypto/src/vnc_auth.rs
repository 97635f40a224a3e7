use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;

use vncrepeater_core::TOKEN_SIZE;

/// Length of a VNC password, and therefore of the DES key
pub const PASSWORD_KEY_SIZE: usize = 8;

/// Turn a VNC password into its 8-byte DES key material.
///
/// Passwords longer than 8 bytes are truncated, shorter ones are padded
/// with NULs, exactly as VNC viewers do it.
pub fn password_key(password: &[u8]) -> [u8; PASSWORD_KEY_SIZE] {
    let mut key = [0u8; PASSWORD_KEY_SIZE];
    for (dst, src) in key.iter_mut().zip(password.iter()) {
        *dst = *src;
    }
    key
}

/// VNC authentication encryption: DES-ECB over both 8-byte halves of the
/// challenge, keyed with the password whose bytes are bit-mirrored.
pub fn encrypt(key: &[u8; PASSWORD_KEY_SIZE], challenge: &[u8; TOKEN_SIZE]) -> [u8; TOKEN_SIZE] {
    let mut mirrored = [0u8; PASSWORD_KEY_SIZE];
    for (dst, src) in mirrored.iter_mut().zip(key.iter()) {
        *dst = src.reverse_bits();
    }

    let cipher = Des::new(&mirrored.into());
    let mut response = *challenge;
    for block in response.chunks_exact_mut(PASSWORD_KEY_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    response
}
